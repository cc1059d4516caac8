//! Integration test: blocks carried over an mplex substream resolve the
//! want list of the receiving node.

use bytes::Bytes;
use peernet_bitswap::{Bitswap, Block, HashAlgorithm, MemoryBlockStore, WantCancellation};
use peernet_core::CancelToken;
use peernet_integration_tests::{echo_protocol, listen_local, stack, swarm, TIMEOUT};
use peernet_network::{AccessPolicy, Multistream1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn test_block_received_over_substream_resolves_wants() {
    let listener = swarm(stack(true, false), AccessPolicy::default());
    let dialer = swarm(stack(true, false), AccessPolicy::default());
    let address = listen_local(&listener).await;
    let conn = dialer.connect(&address).await.unwrap().expect("connection");
    let remote = conn.remote().id.expect("identified remote");

    let bitswap = Bitswap::new(WantCancellation::PerConsumer);
    let store = std::sync::Arc::new(MemoryBlockStore::new());
    let expected = Block::from_data(HashAlgorithm::Sha2_256, Bytes::from_static(b"block payload"))
        .unwrap();

    // Two local callers wait for the same block on behalf of the remote.
    let fetch = {
        let bitswap = bitswap.clone();
        let store = std::sync::Arc::clone(&store);
        let id = expected.id;
        tokio::spawn(async move {
            bitswap
                .get_block(store.as_ref(), id, remote, &CancelToken::new())
                .await
        })
    };
    let direct = bitswap.want(expected.id, remote, &CancelToken::new());
    tokio::time::timeout(TIMEOUT, async {
        while bitswap.consumer_count(&expected.id) < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(bitswap.peer_wants(&remote), vec![expected.id]);

    // The bytes make a round trip through the remote before they count.
    let muxer = conn.muxer_established().wait().await;
    let name = echo_protocol().to_string();
    let mut substream = muxer.create_stream(&name).await.unwrap();
    Multistream1::select(&mut substream, std::slice::from_ref(&name), &CancelToken::new())
        .await
        .unwrap();
    substream.write_all(&expected.data).await.unwrap();
    substream.flush().await.unwrap();
    substream.shutdown().await.unwrap();
    let mut received = Vec::new();
    substream.read_to_end(&mut received).await.unwrap();

    let block = Block::from_data(HashAlgorithm::Sha2_256, received).unwrap();
    assert_eq!(bitswap.found(&block), 2);
    assert_eq!(direct.wait().await.unwrap(), expected);
    assert_eq!(fetch.await.unwrap().unwrap(), expected);
    assert!(store.contains(&expected.id));
    assert!(bitswap.peer_wants(&remote).is_empty());
}
