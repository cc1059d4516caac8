//! multistream-select 1.0.0: agree on the next protocol spoken over a stream.
//!
//! The listener reads proposed names and answers with an echo (accepted),
//! `na` (unknown), or the protocol listing for `ls`. Once a protocol other
//! than multistream itself is accepted, the stream is handed to it. Until
//! the connection is secured only security protocols are accepted.

use std::sync::Arc;

use async_trait::async_trait;
use peernet_core::{message, CancelToken, Version, VersionedName};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::protocol::ProtocolHandler;
use crate::stream::BoxedStream;

pub const MULTISTREAM: &str = "/multistream/1.0.0";
pub const NOT_AVAILABLE: &str = "na";
pub const LIST: &str = "ls";

#[derive(Debug, Default, Clone, Copy)]
pub struct Multistream1;

impl Multistream1 {
    pub fn protocol_name() -> VersionedName {
        VersionedName::new("multistream", Version::new(1, 0, 0))
    }

    /// Listener loop. Returns `Ok` on end of stream or cancellation, after
    /// the selected protocol finishes, or with the first unexpected error.
    pub async fn listen(
        conn: Arc<PeerConnection>,
        mut stream: BoxedStream,
        cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        let registry = conn.registry();
        loop {
            let name = match message::read_string_async(&mut stream, &cancel).await {
                Ok(name) => name,
                Err(e) if e.is_closed() || e.is_cancelled() => {
                    tracing::debug!(connection = conn.id(), "multistream listener stopped");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if name == LIST {
                let listing = registry.names().join("\n");
                message::write_async(&listing, &mut stream, &cancel).await?;
                continue;
            }

            let Some(handler) = registry.create(&name) else {
                tracing::debug!(connection = conn.id(), protocol = %name, "protocol not available");
                message::write_async(NOT_AVAILABLE, &mut stream, &cancel).await?;
                continue;
            };

            if handler.requires_security() && !conn.security_established().is_set() {
                tracing::warn!(
                    connection = conn.id(),
                    protocol = %name,
                    "refusing protocol on unsecured stream"
                );
                message::write_async(NOT_AVAILABLE, &mut stream, &cancel).await?;
                continue;
            }

            message::write_async(&name, &mut stream, &cancel).await?;
            if name == MULTISTREAM {
                continue;
            }

            tracing::debug!(connection = conn.id(), protocol = %name, "protocol selected");
            conn.record_protocol(&name);
            return handler.handle(conn, stream, cancel).await;
        }
    }

    /// Dialer side: propose `candidates` in order and return the first one
    /// the listener accepts.
    pub async fn select<S>(
        stream: &mut S,
        candidates: &[String],
        cancel: &CancelToken,
    ) -> Result<String, NetworkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Self::handshake(stream, cancel).await?;
        for candidate in candidates {
            message::write_async(candidate, stream, cancel).await?;
            let reply = message::read_string_async(stream, cancel).await?;
            if &reply == candidate {
                tracing::debug!(protocol = %candidate, "protocol negotiated");
                return Ok(reply);
            }
            if reply != NOT_AVAILABLE {
                return Err(NetworkError::Protocol(format!(
                    "unexpected reply '{}' to '{}'",
                    reply, candidate
                )));
            }
        }
        Err(NetworkError::Protocol(format!(
            "none of {:?} supported by remote",
            candidates
        )))
    }

    /// Ask the listener for the protocols it supports.
    pub async fn list<S>(stream: &mut S, cancel: &CancelToken) -> Result<Vec<String>, NetworkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Self::handshake(stream, cancel).await?;
        message::write_async(LIST, stream, cancel).await?;
        let listing = message::read_string_async(stream, cancel).await?;
        Ok(listing
            .split('\n')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn handshake<S>(stream: &mut S, cancel: &CancelToken) -> Result<(), NetworkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        message::write_async(MULTISTREAM, stream, cancel).await?;
        let reply = message::read_string_async(stream, cancel).await?;
        if reply != MULTISTREAM {
            return Err(NetworkError::Protocol(format!(
                "expected multistream header, got '{}'",
                reply
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolHandler for Multistream1 {
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
        Self::listen(conn, stream, cancel).await
    }
}
