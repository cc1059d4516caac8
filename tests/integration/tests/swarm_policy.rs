//! Integration test: the swarm's peer registry and access policy, exercised
//! with real listeners and dials.

use std::sync::Arc;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use peernet_integration_tests::{listen_local, stack, swarm, TIMEOUT};
use peernet_network::{
    AccessPolicy, BlackList, BootstrapDiscovery, NetworkError, Swarm, SwarmEvent, WhiteList,
};

fn peer_addr(ip: &str, port: u16, id: PeerId) -> Multiaddr {
    format!("/ip4/{}/tcp/{}", ip, port)
        .parse::<Multiaddr>()
        .unwrap()
        .with(Protocol::P2p(id))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_blacklisted_dial_is_a_policy_violation() {
    let listener = swarm(stack(true, true), AccessPolicy::default());
    let address = listen_local(&listener).await;

    let black_list: BlackList<Multiaddr> = [address.clone()].into_iter().collect();
    let dialer = swarm(
        stack(true, true),
        AccessPolicy::new(black_list, WhiteList::new()),
    );

    let result = dialer.connect(&address).await;
    assert!(matches!(result, Err(NetworkError::PolicyViolation(_))));
    assert_eq!(dialer.connection_count(), 0);
    assert_eq!(listener.connection_count(), 0);
    // Registration is refused quietly.
    assert!(!dialer.register_peer(&address));
}

#[tokio::test]
async fn test_whitelist_limits_dials() {
    let allowed = swarm(stack(true, true), AccessPolicy::default());
    let other = swarm(stack(true, true), AccessPolicy::default());
    let allowed_addr = listen_local(&allowed).await;
    let other_addr = listen_local(&other).await;

    let white_list: WhiteList<Multiaddr> = [allowed_addr.clone()].into_iter().collect();
    let dialer = swarm(
        stack(true, true),
        AccessPolicy::new(BlackList::new(), white_list),
    );

    assert!(dialer.connect(&allowed_addr).await.unwrap().is_some());
    assert!(matches!(
        dialer.connect(&other_addr).await,
        Err(NetworkError::PolicyViolation(_))
    ));
    assert_eq!(dialer.known_addresses(), vec![allowed_addr]);
}

#[tokio::test]
async fn test_known_peers_group_addresses_by_id() {
    let swarm = swarm(stack(true, true), AccessPolicy::default());
    let a = PeerId::random();
    let b = PeerId::random();

    assert!(swarm.register_peer(&peer_addr("10.0.0.1", 4001, a)));
    assert!(swarm.register_peer(&peer_addr("10.0.0.2", 4001, a)));
    assert!(swarm.register_peer(&peer_addr("10.0.0.3", 4001, b)));
    assert!(!swarm.register_peer(&peer_addr("10.0.0.1", 4001, a)));
    assert!(!swarm.register_peer(&"/ip4/10.0.0.4/tcp/4001".parse().unwrap()));

    let known = swarm.known_peers();
    assert_eq!(known.len(), 2);
    assert_eq!(known[&a].addresses.len(), 2);
    assert_eq!(known[&b].addresses.len(), 1);
}

#[tokio::test]
async fn test_bootstrap_discovery_respects_policy() {
    let banned = peer_addr("10.0.0.9", 4001, PeerId::random());
    let fine = peer_addr("10.0.0.8", 4001, PeerId::random());
    let black_list: BlackList<Multiaddr> = [banned.clone()].into_iter().collect();
    let swarm = swarm(
        stack(true, true),
        AccessPolicy::new(black_list, WhiteList::new()),
    );

    let discovery = BootstrapDiscovery::new(vec![banned.to_string(), fine.to_string()]).unwrap();
    let consumer = swarm.start_discovery(Arc::new(discovery));
    wait_until(|| !swarm.known_addresses().is_empty()).await;
    // Give the consumer a chance to process the second announcement too.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(swarm.known_addresses(), vec![fine]);

    swarm.shutdown().await;
    tokio::time::timeout(TIMEOUT, consumer).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_events_and_shutdown() {
    let listener = swarm(stack(true, true), AccessPolicy::default());
    let dialer = swarm(stack(true, true), AccessPolicy::default());
    let mut events = listener.subscribe();
    let address = listen_local(&listener).await;

    dialer.connect(&address).await.unwrap().expect("connection");
    let established = tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Ok(SwarmEvent::ConnectionEstablished(e)) = events.recv().await {
                return e;
            }
        }
    })
    .await
    .unwrap();
    assert!(!established.outbound);
    assert_eq!(listener.connection_count(), 1);

    // Closing the dialer closes the listener's side too.
    dialer.shutdown().await;
    assert_eq!(dialer.connection_count(), 0);
    wait_until(|| listener.connection_count() == 0).await;
}

#[tokio::test]
async fn test_connect_after_shutdown_returns_none() {
    let listener = swarm(stack(true, true), AccessPolicy::default());
    let address = listen_local(&listener).await;
    let dialer: Arc<Swarm> = swarm(stack(true, true), AccessPolicy::default());
    dialer.shutdown().await;

    let result = dialer.connect(&address).await;
    assert!(matches!(result, Ok(None)));
}
