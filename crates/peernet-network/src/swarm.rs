//! The swarm: known peer addresses, the access policy that gates them, and
//! the live connections to other peers.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use peernet_core::CancelToken;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::connection::{Direction, Endpoint, PeerConnection};
use crate::discovery::{Discovery, DiscoveryEvent};
use crate::error::NetworkError;
use crate::events::{ConnectionEstablished, SwarmEvent};
use crate::peer::{peer_id_of, without_peer_id, LocalPeer, Peer};
use crate::policy::{AccessPolicy, Policy};
use crate::protocol::ProtocolRegistry;
use crate::resolve::resolve;
use crate::stream::BoxedStream;
use crate::transport::{ConnectionHandler, TransportRegistry};
use crate::upgrade::{upgrade_outbound, StackConfig};

const EVENT_CAPACITY: usize = 256;
const DISCOVERY_CAPACITY: usize = 64;

pub struct Swarm {
    local: Arc<LocalPeer>,
    config: StackConfig,
    registry: Arc<ProtocolRegistry>,
    transports: Arc<TransportRegistry>,
    policy: AccessPolicy<Multiaddr>,
    known: DashMap<Multiaddr, PeerId>,
    connections: DashMap<u64, Arc<PeerConnection>>,
    events: broadcast::Sender<SwarmEvent>,
    cancel: CancelToken,
}

impl Swarm {
    /// A swarm with the default protocols and transports.
    pub fn new(keypair: Keypair, config: StackConfig, policy: AccessPolicy<Multiaddr>) -> Self {
        let registry =
            ProtocolRegistry::with_defaults(&config.swarm, &config.mplex, &config.secio);
        Self::with_registries(
            keypair,
            config,
            policy,
            Arc::new(registry),
            Arc::new(TransportRegistry::with_defaults()),
        )
    }

    pub fn with_registries(
        keypair: Keypair,
        config: StackConfig,
        policy: AccessPolicy<Multiaddr>,
        registry: Arc<ProtocolRegistry>,
        transports: Arc<TransportRegistry>,
    ) -> Self {
        let local = Arc::new(LocalPeer::new(keypair, &config.swarm));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        tracing::info!(peer_id = %local.id(), "swarm created");
        Self {
            local,
            config,
            registry,
            transports,
            policy,
            known: DashMap::new(),
            connections: DashMap::new(),
            events,
            cancel: CancelToken::new(),
        }
    }

    pub fn local_peer(&self) -> &Arc<LocalPeer> {
        &self.local
    }

    pub fn local_id(&self) -> PeerId {
        self.local.id()
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    pub fn policy(&self) -> &AccessPolicy<Multiaddr> {
        &self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SwarmEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Add `address` to the known set.
    ///
    /// Returns false if the address has no trailing peer id, is already
    /// known, or is refused by the policy.
    pub fn register_peer(&self, address: &Multiaddr) -> bool {
        let Some(peer_id) = peer_id_of(address) else {
            tracing::debug!(%address, "address has no peer id");
            return false;
        };
        match self.known.entry(address.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                if self.policy.is_not_allowed(address) {
                    tracing::debug!(%address, "address refused by policy");
                    return false;
                }
                slot.insert(peer_id);
                tracing::debug!(%address, %peer_id, "peer registered");
                self.emit(SwarmEvent::PeerRegistered {
                    address: address.clone(),
                });
                true
            }
        }
    }

    pub fn deregister_peer(&self, address: &Multiaddr) -> bool {
        self.known.remove(address).is_some()
    }

    pub fn known_addresses(&self) -> Vec<Multiaddr> {
        self.known.iter().map(|e| e.key().clone()).collect()
    }

    /// Known addresses grouped by peer id, computed on each call.
    pub fn known_peers(&self) -> HashMap<PeerId, Peer> {
        let mut peers: HashMap<PeerId, Peer> = HashMap::new();
        for entry in self.known.iter() {
            peers
                .entry(*entry.value())
                .or_insert_with(|| Peer::with_id(*entry.value()))
                .addresses
                .insert(entry.key().clone());
        }
        peers
    }

    /// Dial `address`, upgrade the connection and keep it.
    ///
    /// Returns `Ok(None)` if the swarm shut down while dialing. Dialing an
    /// address the policy refuses is an error.
    pub async fn connect(
        self: &Arc<Self>,
        address: &Multiaddr,
    ) -> Result<Option<Arc<PeerConnection>>, NetworkError> {
        if self.policy.is_not_allowed(address) {
            return Err(NetworkError::PolicyViolation(format!(
                "'{}' is not allowed",
                address
            )));
        }
        let remote = match peer_id_of(address) {
            Some(id) if id == self.local.id() => {
                return Err(NetworkError::InvalidAddress(format!(
                    "'{}' is this node",
                    address
                )))
            }
            Some(id) => Peer::with_id(id),
            None => Peer::default(),
        };

        let candidates = resolve(&without_peer_id(address), &self.cancel).await?;
        let mut last_error = None;
        let mut dialed = None;
        for candidate in candidates {
            let Some(transport) = self.transports.for_address(&candidate) else {
                last_error = Some(NetworkError::NotSupported(format!(
                    "no transport for '{}'",
                    candidate
                )));
                continue;
            };
            match transport.connect(&candidate, &self.cancel).await {
                Ok(Some(stream)) => {
                    dialed = Some((stream, candidate));
                    break;
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    tracing::debug!(%candidate, error = %e, "dial attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let Some((stream, remote_address)) = dialed else {
            return Err(last_error.unwrap_or_else(|| {
                NetworkError::Transport(format!("no dialable address for '{}'", address))
            }));
        };

        let conn = PeerConnection::new(
            Direction::Outbound,
            stream,
            Arc::clone(&self.local),
            remote,
            Endpoint {
                local_address: None,
                remote_address: Some(remote_address.clone()),
            },
            Arc::clone(&self.registry),
            &self.cancel,
        );
        let cancel = conn.cancel_token();
        if let Err(e) = upgrade_outbound(&conn, &self.config, &cancel).await {
            conn.dispose().await;
            if e.is_cancelled() || self.cancel.is_cancelled() {
                return Ok(None);
            }
            return Err(e);
        }
        if peer_id_of(address).is_some() {
            self.register_peer(address);
        }
        self.track(Arc::clone(&conn));
        Ok(Some(conn))
    }

    /// Keep `conn` until its cancel token fires.
    fn track(self: &Arc<Self>, conn: Arc<PeerConnection>) {
        let id = conn.id();
        self.connections.insert(id, Arc::clone(&conn));
        self.emit(SwarmEvent::ConnectionEstablished(ConnectionEstablished {
            connection_id: id,
            peer_id: conn.remote().id,
            address: conn.remote_address().cloned(),
            outbound: conn.direction() == Direction::Outbound,
        }));
        let swarm = Arc::downgrade(self);
        tokio::spawn(async move {
            conn.cancel_token().cancelled().await;
            if let Some(swarm) = swarm.upgrade() {
                swarm.connections.remove(&id);
                swarm.emit(SwarmEvent::ConnectionClosed {
                    connection_id: id,
                    peer_id: conn.remote().id,
                });
            }
        });
    }

    /// Accept connections on `address`. Returns the bound address.
    pub async fn listen(self: &Arc<Self>, address: &Multiaddr) -> Result<Multiaddr, NetworkError> {
        let transport = self.transports.for_address(address).ok_or_else(|| {
            NetworkError::NotSupported(format!("no transport for '{}'", address))
        })?;
        let swarm = Arc::downgrade(self);
        let handler: ConnectionHandler = Arc::new(
            move |stream: BoxedStream, local: Multiaddr, remote: Multiaddr| {
                let swarm = swarm.upgrade();
                async move {
                    match swarm {
                        Some(swarm) => swarm.accept(stream, local, remote).await,
                        None => Err(NetworkError::Closed),
                    }
                }
                .boxed()
            },
        );
        let bound = transport
            .listen(address, handler, self.cancel.child())
            .await?;
        self.local.add_address(bound.clone());
        self.emit(SwarmEvent::Listening {
            address: bound.clone(),
        });
        Ok(bound)
    }

    async fn accept(
        self: Arc<Self>,
        stream: BoxedStream,
        local: Multiaddr,
        remote: Multiaddr,
    ) -> Result<(), NetworkError> {
        if self.policy.is_not_allowed(&remote) {
            tracing::debug!(%remote, "inbound connection refused by policy");
            return Ok(());
        }
        let conn = PeerConnection::new(
            Direction::Inbound,
            stream,
            Arc::clone(&self.local),
            Peer::default(),
            Endpoint {
                local_address: Some(local),
                remote_address: Some(remote),
            },
            Arc::clone(&self.registry),
            &self.cancel,
        );
        self.track(Arc::clone(&conn));
        conn.serve().await;
        Ok(())
    }

    pub fn connections(&self) -> Vec<Arc<PeerConnection>> {
        self.connections.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register every address a discovery channel reports, until the
    /// channel closes or the swarm shuts down.
    pub fn spawn_discovery_consumer(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<DiscoveryEvent>,
    ) -> JoinHandle<()> {
        let swarm = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = swarm.cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(DiscoveryEvent::PeerDiscovered { address }) => {
                        swarm.register_peer(&address);
                    }
                    None => break,
                }
            }
            tracing::debug!("discovery consumer stopped");
        })
    }

    /// Run `source` and feed what it finds into the swarm.
    pub fn start_discovery(self: &Arc<Self>, source: Arc<dyn Discovery>) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(DISCOVERY_CAPACITY);
        let cancel = self.cancel.child();
        tokio::spawn(async move {
            if let Err(e) = source.start(tx, cancel).await {
                tracing::warn!(source = source.name(), error = %e, "discovery failed");
            }
        });
        self.spawn_discovery_consumer(rx)
    }

    /// Stop listeners and discovery and dispose every connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let connections = self.connections();
        self.connections.clear();
        for conn in connections {
            conn.dispose().await;
        }
        tracing::info!(peer_id = %self.local.id(), "swarm shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("local", &self.local.id())
            .field("known", &self.known.len())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::BootstrapDiscovery;

    fn swarm(policy: AccessPolicy<Multiaddr>) -> Arc<Swarm> {
        Arc::new(Swarm::new(
            Keypair::generate_ed25519(),
            StackConfig::default(),
            policy,
        ))
    }

    fn peer_addr(ip: &str, id: &PeerId) -> Multiaddr {
        format!("/ip4/{}/tcp/4001/ipfs/{}", ip, id).parse().unwrap()
    }

    #[test]
    fn test_register_requires_peer_id() {
        let swarm = swarm(AccessPolicy::default());
        assert!(!swarm.register_peer(&"/ip4/10.0.0.1/tcp/4001".parse().unwrap()));
        assert!(swarm.known_addresses().is_empty());
    }

    #[test]
    fn test_register_same_address_twice() {
        let swarm = swarm(AccessPolicy::default());
        let addr = peer_addr("10.0.0.1", &PeerId::random());
        assert!(swarm.register_peer(&addr));
        assert!(!swarm.register_peer(&addr));
        assert_eq!(swarm.known_addresses().len(), 1);
    }

    #[test]
    fn test_blacklisted_address_never_registered() {
        let bad = peer_addr("10.0.0.1", &PeerId::random());
        let policy = AccessPolicy::default();
        policy.black_list.add(bad.clone());
        let swarm = swarm(policy);
        assert!(!swarm.register_peer(&bad));
        assert!(swarm.known_addresses().is_empty());
    }

    #[test]
    fn test_whitelist_limits_registration() {
        let good = peer_addr("10.0.0.1", &PeerId::random());
        let other = peer_addr("10.0.0.2", &PeerId::random());
        let policy = AccessPolicy::default();
        policy.white_list.add(good.clone());
        let swarm = swarm(policy);
        assert!(!swarm.register_peer(&other));
        assert!(swarm.register_peer(&good));
        assert_eq!(swarm.known_addresses(), vec![good]);
    }

    #[test]
    fn test_known_peers_grouped_by_id() {
        let swarm = swarm(AccessPolicy::default());
        let (a, b) = (PeerId::random(), PeerId::random());
        swarm.register_peer(&peer_addr("10.0.0.1", &a));
        swarm.register_peer(&peer_addr("10.0.0.2", &a));
        swarm.register_peer(&peer_addr("10.0.0.3", &b));
        let peers = swarm.known_peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[&a].addresses.len(), 2);
        assert_eq!(peers[&b].addresses.len(), 1);

        swarm.deregister_peer(&peer_addr("10.0.0.3", &b));
        assert_eq!(swarm.known_peers().len(), 1);
    }

    #[test]
    fn test_concurrent_registration_counts_once() {
        let swarm = swarm(AccessPolicy::default());
        let addr = peer_addr("10.0.0.1", &PeerId::random());
        let successes: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| swarm.register_peer(&addr) as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_connect_to_blacklisted_is_error() {
        let bad = peer_addr("127.0.0.1", &PeerId::random());
        let policy = AccessPolicy::default();
        policy.black_list.add(bad.clone());
        let swarm = swarm(policy);
        assert!(matches!(
            swarm.connect(&bad).await,
            Err(NetworkError::PolicyViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_self_rejected() {
        let swarm = swarm(AccessPolicy::default());
        let me = peer_addr("127.0.0.1", &swarm.local_id());
        assert!(matches!(
            swarm.connect(&me).await,
            Err(NetworkError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_discovery_registers_peers() {
        let swarm = swarm(AccessPolicy::default());
        let id = PeerId::random();
        let source = BootstrapDiscovery::new(vec![
            peer_addr("10.0.0.1", &id).to_string(),
            "/ip4/10.0.0.2/tcp/4001".to_string(),
        ])
        .unwrap();
        swarm.start_discovery(Arc::new(source)).await.unwrap();
        assert_eq!(swarm.known_addresses(), vec![peer_addr("10.0.0.1", &id)]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_discovery_consumer() {
        let swarm = swarm(AccessPolicy::default());
        let (_tx, rx) = mpsc::channel(1);
        let consumer = swarm.spawn_discovery_consumer(rx);
        swarm.shutdown().await;
        consumer.await.unwrap();
        assert!(swarm.is_shut_down());
    }
}
