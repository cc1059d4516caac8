//! SECIO 1.0.0: authenticated key agreement and an encrypted stream.

pub mod handshake;
pub mod proto;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use peernet_core::{CancelToken, SecioConfig, Version, VersionedName};

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::multistream::Multistream1;
use crate::protocol::ProtocolHandler;
use crate::stream::BoxedStream;

pub use handshake::{handshake, SecureSession, Suite, NONCE_SIZE};
pub use stream::{Secio1Stream, MAX_PACKET_SIZE};

/// Listener side of SECIO. After the handshake the secured stream goes
/// back to multistream for the next protocol.
#[derive(Debug, Clone, Default)]
pub struct Secio1 {
    config: SecioConfig,
}

impl Secio1 {
    pub fn new(config: SecioConfig) -> Self {
        Self { config }
    }

    pub fn protocol_name() -> VersionedName {
        VersionedName::new("secio", Version::new(1, 0, 0))
    }

    /// Secure `stream` and record the remote identity on `conn`.
    pub async fn secure(
        conn: &PeerConnection,
        stream: BoxedStream,
        config: &SecioConfig,
        cancel: &CancelToken,
    ) -> Result<Secio1Stream<BoxedStream>, NetworkError> {
        let session = handshake(stream, conn.local(), config, cancel).await?;
        conn.update_remote(|remote| remote.set_public_key(&session.remote_key))?;
        conn.security_established().set(());
        Ok(session.stream)
    }
}

#[async_trait]
impl ProtocolHandler for Secio1 {
    fn name(&self) -> VersionedName {
        Self::protocol_name()
    }

    fn requires_security(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        conn: Arc<PeerConnection>,
        stream: BoxedStream,
        cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        let secured = Self::secure(&conn, stream, &self.config, &cancel).await?;
        Multistream1::listen(conn, Box::new(secured), cancel).await
    }
}
