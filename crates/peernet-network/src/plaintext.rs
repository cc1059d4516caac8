//! Plaintext 1.0.0: a security protocol that adds no security.
//!
//! Used between peers that skip SECIO and in tests. Selecting it marks the
//! connection as secured and negotiation continues on the same stream.

use std::sync::Arc;

use async_trait::async_trait;
use peernet_core::{CancelToken, Version, VersionedName};

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::multistream::Multistream1;
use crate::protocol::ProtocolHandler;
use crate::stream::BoxedStream;

#[derive(Debug, Default, Clone, Copy)]
pub struct Plaintext1;

impl Plaintext1 {
    pub fn protocol_name() -> VersionedName {
        VersionedName::new("plaintext", Version::new(1, 0, 0))
    }
}

#[async_trait]
impl ProtocolHandler for Plaintext1 {
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
        tracing::debug!(connection = conn.id(), "plaintext security established");
        conn.security_established().set(());
        Multistream1::listen(conn, stream, cancel).await
    }
}
