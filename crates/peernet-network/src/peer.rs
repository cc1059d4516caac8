//! Peer identities and their known addresses.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use libp2p::identity::{Keypair, PublicKey};
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use parking_lot::RwLock;
use peernet_core::SwarmConfig;

use crate::error::NetworkError;

/// What we know about a peer.
#[derive(Debug, Clone, Default)]
pub struct Peer {
    /// Multihash of the peer's public key, once known.
    pub id: Option<PeerId>,
    pub addresses: HashSet<Multiaddr>,
    pub agent_version: String,
    pub protocol_version: String,
    /// Protobuf-encoded public key, base64.
    pub public_key: Option<String>,
}

impl Peer {
    pub fn with_id(id: PeerId) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    /// Union `addresses` into the known set.
    pub fn merge_addresses<I: IntoIterator<Item = Multiaddr>>(&mut self, addresses: I) {
        self.addresses.extend(addresses);
    }

    /// Decode the stored public key.
    pub fn decode_public_key(&self) -> Result<Option<PublicKey>, NetworkError> {
        let Some(encoded) = &self.public_key else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| NetworkError::Identity(format!("bad base64 public key: {}", e)))?;
        Ok(Some(PublicKey::try_decode_protobuf(&bytes)?))
    }

    /// Record `key` as this peer's identity, deriving the id if unknown.
    ///
    /// Fails if the id is already known and the key hashes to another one.
    pub fn set_public_key(&mut self, key: &PublicKey) -> Result<PeerId, NetworkError> {
        let derived = key.to_peer_id();
        if let Some(known) = self.id {
            if known != derived {
                return Err(NetworkError::Identity(format!(
                    "public key belongs to {}, expected {}",
                    derived, known
                )));
            }
        }
        self.id = Some(derived);
        self.public_key = Some(BASE64.encode(key.encode_protobuf()));
        Ok(derived)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id.is_some() && self.id == other.id
    }
}

/// The trailing `/p2p/<id>` (or `/ipfs/<id>`) segment of an address.
pub fn peer_id_of(address: &Multiaddr) -> Option<PeerId> {
    match address.iter().last() {
        Some(Protocol::P2p(id)) => Some(id),
        _ => None,
    }
}

/// `address` with any trailing peer id removed.
pub fn without_peer_id(address: &Multiaddr) -> Multiaddr {
    let mut stripped = address.clone();
    if let Some(Protocol::P2p(_)) = stripped.iter().last() {
        stripped.pop();
    }
    stripped
}

/// This node: its keypair plus the record it advertises.
pub struct LocalPeer {
    keypair: Keypair,
    id: PeerId,
    agent_version: String,
    protocol_version: String,
    addresses: RwLock<HashSet<Multiaddr>>,
}

impl LocalPeer {
    pub fn new(keypair: Keypair, config: &SwarmConfig) -> Self {
        let id = keypair.public().to_peer_id();
        Self {
            keypair,
            id,
            agent_version: config.agent_version.clone(),
            protocol_version: config.protocol_version.clone(),
            addresses: RwLock::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn add_address(&self, address: Multiaddr) {
        self.addresses.write().insert(without_peer_id(&address));
    }

    pub fn addresses(&self) -> Vec<Multiaddr> {
        self.addresses.read().iter().cloned().collect()
    }

    /// Snapshot as a [`Peer`] record.
    pub fn to_peer(&self) -> Peer {
        Peer {
            id: Some(self.id),
            addresses: self.addresses.read().clone(),
            agent_version: self.agent_version.clone(),
            protocol_version: self.protocol_version.clone(),
            public_key: Some(BASE64.encode(self.public_key().encode_protobuf())),
        }
    }
}

impl std::fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPeer")
            .field("id", &self.id)
            .field("agent_version", &self.agent_version)
            .finish_non_exhaustive()
    }
}
