//! Fixtures shared by the end-to-end tests: swarms listening on loopback
//! and a trivial echo protocol to drive substreams with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use peernet_core::{CancelToken, SwarmConfig, Version, VersionedName};
use peernet_network::{
    AccessPolicy, BoxedStream, NetworkError, PeerConnection, ProtocolHandler, StackConfig, Swarm,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// How long a test waits for something that should happen promptly.
pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn echo_protocol() -> VersionedName {
    VersionedName::new("echo", Version::new(1, 0, 0))
}

/// Writes back every chunk it reads, one flush per chunk, until EOF.
pub struct Echo;

#[async_trait]
impl ProtocolHandler for Echo {
    fn name(&self) -> VersionedName {
        echo_protocol()
    }

    async fn handle(
        &self,
        _conn: Arc<PeerConnection>,
        mut stream: BoxedStream,
        _cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        let mut buf = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            stream.flush().await?;
        }
        stream.shutdown().await?;
        Ok(())
    }
}

/// Stack config with only the chosen security protocol enabled.
pub fn stack(secio: bool, plaintext: bool) -> StackConfig {
    StackConfig {
        swarm: SwarmConfig {
            enable_secio: secio,
            enable_plaintext: plaintext,
            ..SwarmConfig::default()
        },
        ..StackConfig::default()
    }
}

pub fn swarm(config: StackConfig, policy: AccessPolicy<Multiaddr>) -> Arc<Swarm> {
    let swarm = Arc::new(Swarm::new(Keypair::generate_ed25519(), config, policy));
    swarm.registry().register(echo_protocol(), || Box::new(Echo));
    swarm
}

/// Listen on an ephemeral loopback TCP port and return the dialable
/// address, ending in the swarm's peer id.
pub async fn listen_local(swarm: &Arc<Swarm>) -> Multiaddr {
    let bound = swarm
        .listen(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
        .await
        .expect("listen on loopback");
    bound.with(Protocol::P2p(swarm.local_id()))
}
