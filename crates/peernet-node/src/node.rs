//! The Peernet node orchestrator.
//!
//! Ties together the swarm, the want-list engine and bootstrap discovery.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use peernet_bitswap::{Bitswap, Block, Cid, MemoryBlockStore};
use peernet_core::CancelToken;
use peernet_network::{BootstrapDiscovery, Swarm, SwarmEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::PeernetConfig;

/// A running Peernet node.
pub struct PeernetNode {
    config: PeernetConfig,
    swarm: Arc<Swarm>,
    bitswap: Bitswap,
    store: Arc<MemoryBlockStore>,
    /// Addresses the listeners actually bound.
    listening: Vec<Multiaddr>,
    discovery: Option<JoinHandle<()>>,
    events: broadcast::Receiver<SwarmEvent>,
    cancel: CancelToken,
}

impl PeernetNode {
    /// Create a node with the given config. Nothing is bound until [`start`].
    ///
    /// [`start`]: PeernetNode::start
    pub fn new(config: PeernetConfig) -> Result<Self> {
        let keypair = match config.identity.keypair_path {
            Some(ref path) => load_or_generate_keypair(path)?,
            None => {
                tracing::info!("generating ephemeral keypair");
                Keypair::generate_ed25519()
            }
        };
        let policy = config.access_policy()?;
        let swarm = Arc::new(Swarm::new(keypair, config.protocols.clone(), policy));
        let events = swarm.subscribe();
        let bitswap = Bitswap::new(config.bitswap.cancellation);

        tracing::info!(peer_id = %swarm.local_id(), "peernet node created");
        Ok(Self {
            config,
            swarm,
            bitswap,
            store: Arc::new(MemoryBlockStore::new()),
            listening: Vec::new(),
            discovery: None,
            events,
            cancel: CancelToken::new(),
        })
    }

    /// Bind every configured listen address and start bootstrap discovery.
    pub async fn start(&mut self) -> Result<()> {
        for address in self.config.listen_multiaddrs()? {
            let bound = self.swarm.listen(&address).await?;
            tracing::info!(%bound, "listening");
            self.listening.push(bound);
        }

        let bootstrap = BootstrapDiscovery::new(self.config.network.bootstrap_peers.clone())?;
        if !bootstrap.addresses().is_empty() {
            tracing::info!(peers = bootstrap.addresses().len(), "starting bootstrap discovery");
        }
        self.discovery = Some(self.swarm.start_discovery(Arc::new(bootstrap)));
        Ok(())
    }

    /// Process swarm events until the node shuts down.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                event = self.events.recv() => event,
            };
            match event {
                Ok(event) => self.handle_swarm_event(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "swarm event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Stop discovery and close every connection.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.swarm.shutdown().await;
        if let Some(discovery) = self.discovery.take() {
            discovery.await?;
        }
        tracing::info!(wanted = self.bitswap.len(), "node stopped");
        Ok(())
    }

    pub fn peer_id(&self) -> PeerId {
        self.swarm.local_id()
    }

    pub fn swarm(&self) -> &Arc<Swarm> {
        &self.swarm
    }

    pub fn bitswap(&self) -> &Bitswap {
        &self.bitswap
    }

    pub fn listening(&self) -> &[Multiaddr] {
        &self.listening
    }

    /// Fetch a block for `peer` from the local store, or wait for it.
    pub async fn get_block(&self, id: Cid, peer: PeerId) -> Result<Block> {
        let block = self
            .bitswap
            .get_block(self.store.as_ref(), id, peer, &self.cancel)
            .await?;
        Ok(block)
    }

    fn handle_swarm_event(&self, event: SwarmEvent) {
        match event {
            SwarmEvent::PeerRegistered { address } => {
                tracing::debug!(%address, known = self.swarm.known_addresses().len(), "peer registered");
            }
            SwarmEvent::ConnectionEstablished(established) => {
                tracing::info!(
                    connection = established.connection_id,
                    peer = ?established.peer_id,
                    outbound = established.outbound,
                    "connection established"
                );
            }
            SwarmEvent::ConnectionClosed {
                connection_id,
                peer_id,
            } => {
                if let Some(peer) = peer_id {
                    let abandoned = self.bitswap.peer_wants(&peer);
                    if !abandoned.is_empty() {
                        tracing::debug!(%peer, wants = abandoned.len(), "peer with open wants disconnected");
                    }
                }
                tracing::info!(connection = connection_id, peer = ?peer_id, "connection closed");
            }
            SwarmEvent::Listening { address } => {
                tracing::debug!(%address, "listener ready");
            }
        }
    }
}

/// Load a keypair from disk, or generate and save a new one.
fn load_or_generate_keypair(path: &Path) -> Result<Keypair> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| anyhow::anyhow!("failed to decode keypair: {}", e))?;
        tracing::info!(path = %path.display(), "loaded keypair from disk");
        Ok(keypair)
    } else {
        let keypair = Keypair::generate_ed25519();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = keypair
            .to_protobuf_encoding()
            .map_err(|e| anyhow::anyhow!("failed to encode keypair: {}", e))?;
        std::fs::write(path, encoded)?;
        tracing::info!(path = %path.display(), "generated and saved new keypair");
        Ok(keypair)
    }
}
