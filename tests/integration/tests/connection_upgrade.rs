//! Integration test: dial over TCP loopback and upgrade the connection
//! through security, mplex and identify, then use substreams on it.

use std::sync::Arc;

use libp2p::multiaddr::Protocol;

use peernet_core::CancelToken;
use peernet_integration_tests::{echo_protocol, listen_local, stack, swarm, TIMEOUT};
use peernet_network::{AccessPolicy, Multistream1, PeerConnection, Swarm};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn wait_for_connection(swarm: &Arc<Swarm>) -> Arc<PeerConnection> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Some(conn) = swarm.connections().into_iter().next() {
                return conn;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("inbound connection")
}

async fn echo_once(conn: &PeerConnection, payload: &[u8]) -> Vec<u8> {
    let muxer = conn.muxer_established().wait().await;
    let cancel = CancelToken::new();
    let name = echo_protocol().to_string();
    let mut substream = muxer.create_stream(&name).await.unwrap();
    let agreed = Multistream1::select(&mut substream, std::slice::from_ref(&name), &cancel)
        .await
        .unwrap();
    assert_eq!(agreed, "/echo/1.0.0");

    substream.write_all(payload).await.unwrap();
    substream.flush().await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    substream.read_exact(&mut echoed).await.unwrap();
    substream.shutdown().await.unwrap();
    echoed
}

// =========================================================================
// Security negotiation
// =========================================================================

#[tokio::test]
async fn test_secio_connection_identifies_both_peers() {
    let listener = swarm(stack(true, true), AccessPolicy::default());
    let dialer = swarm(stack(true, true), AccessPolicy::default());
    let address = listen_local(&listener).await;

    let conn = tokio::time::timeout(TIMEOUT, dialer.connect(&address))
        .await
        .unwrap()
        .unwrap()
        .expect("connection");

    assert_eq!(conn.remote().id, Some(listener.local_id()));
    assert_eq!(conn.protocols(), vec!["/secio/1.0.0", "/mplex/6.7.0"]);
    assert_eq!(
        conn.remote().agent_version,
        listener.local_peer().agent_version()
    );
    assert!(conn.observed_address().is_some());

    // The listener learned who dialed it from the secio handshake.
    let inbound = wait_for_connection(&listener).await;
    inbound.security_established().wait().await;
    assert_eq!(inbound.remote().id, Some(dialer.local_id()));

    // Dialing registers the listener as a known peer.
    let known = dialer.known_peers();
    assert_eq!(known.len(), 1);
    assert!(known.contains_key(&listener.local_id()));
}

#[tokio::test]
async fn test_plaintext_connection() {
    let listener = swarm(stack(false, true), AccessPolicy::default());
    let dialer = swarm(stack(false, true), AccessPolicy::default());
    let address = listen_local(&listener).await;

    let conn = dialer.connect(&address).await.unwrap().expect("connection");
    assert_eq!(conn.protocols(), vec!["/plaintext/1.0.0", "/mplex/6.7.0"]);
    assert_eq!(conn.remote().id, Some(listener.local_id()));
}

#[tokio::test]
async fn test_dialer_falls_back_to_plaintext() {
    // The listener only speaks plaintext; the dialer prefers secio.
    let listener = swarm(stack(false, true), AccessPolicy::default());
    let dialer = swarm(stack(true, true), AccessPolicy::default());
    let address = listen_local(&listener).await;

    let conn = dialer.connect(&address).await.unwrap().expect("connection");
    assert_eq!(conn.protocols()[0], "/plaintext/1.0.0");
}

#[tokio::test]
async fn test_no_common_security_fails() {
    let listener = swarm(stack(true, false), AccessPolicy::default());
    let dialer = swarm(stack(false, true), AccessPolicy::default());
    let address = listen_local(&listener).await;

    let result = dialer.connect(&address).await;
    assert!(result.is_err());
    assert_eq!(dialer.connection_count(), 0);
}

#[tokio::test]
async fn test_muxer_refused_before_security() {
    let listener = swarm(stack(true, false), AccessPolicy::default());
    let address = listen_local(&listener).await;
    let port = address
        .iter()
        .find_map(|p| match p {
            Protocol::Tcp(port) => Some(port),
            _ => None,
        })
        .expect("tcp port");

    // Skip the security step and ask for the muxer and identify directly.
    let mut raw = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let cancel = CancelToken::new();
    for name in ["/mplex/6.7.0", "/ipfs/id/1.0.0", "/echo/1.0.0"] {
        let result = Multistream1::select(&mut raw, &[name.to_string()], &cancel).await;
        assert!(result.is_err(), "{} selected on an unsecured stream", name);
    }

    let inbound = wait_for_connection(&listener).await;
    assert!(!inbound.security_established().is_set());
    assert!(!inbound.muxer_established().is_set());
    assert!(inbound.protocols().is_empty());
}

#[tokio::test]
async fn test_dial_without_peer_id_is_not_registered() {
    let listener = swarm(stack(true, true), AccessPolicy::default());
    let dialer = swarm(stack(true, true), AccessPolicy::default());
    let address = peernet_network::without_peer_id(&listen_local(&listener).await);

    let conn = dialer.connect(&address).await.unwrap().expect("connection");
    // Identify still tells us who we reached.
    assert_eq!(conn.remote().id, Some(listener.local_id()));
    assert!(dialer.known_addresses().is_empty());
}

// =========================================================================
// Substreams
// =========================================================================

#[tokio::test]
async fn test_echo_over_secured_substream() {
    let listener = swarm(stack(true, false), AccessPolicy::default());
    let dialer = swarm(stack(true, false), AccessPolicy::default());
    let address = listen_local(&listener).await;
    let conn = dialer.connect(&address).await.unwrap().expect("connection");

    let echoed = tokio::time::timeout(TIMEOUT, echo_once(&conn, b"hello over secio"))
        .await
        .unwrap();
    assert_eq!(echoed, b"hello over secio");
}

#[tokio::test]
async fn test_concurrent_substreams_on_one_connection() {
    let listener = swarm(stack(true, false), AccessPolicy::default());
    let dialer = swarm(stack(true, false), AccessPolicy::default());
    let address = listen_local(&listener).await;
    let conn = dialer.connect(&address).await.unwrap().expect("connection");

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let conn = Arc::clone(&conn);
        tasks.push(tokio::spawn(async move {
            let payload = vec![i; 512 + i as usize];
            let echoed = echo_once(&conn, &payload).await;
            assert_eq!(echoed, payload);
        }));
    }
    for task in tasks {
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_listener_lists_protocols_on_substream() {
    let listener = swarm(stack(true, true), AccessPolicy::default());
    let dialer = swarm(stack(true, true), AccessPolicy::default());
    let address = listen_local(&listener).await;
    let conn = dialer.connect(&address).await.unwrap().expect("connection");

    let muxer = conn.muxer_established().wait().await;
    let mut substream = muxer.create_stream("ls").await.unwrap();
    let protocols = Multistream1::list(&mut substream, &CancelToken::new())
        .await
        .unwrap();
    assert!(protocols.contains(&"/echo/1.0.0".to_string()));
    assert!(protocols.contains(&"/ipfs/id/1.0.0".to_string()));
}
