//! Mplex 6.7.0 stream multiplexing.
//!
//! Many substreams share one stream. Each frame names its stream id and
//! packet type in a single varint, followed by a varint payload length and
//! the payload.

pub mod header;
pub mod muxer;
pub mod substream;

use std::sync::Arc;

use async_trait::async_trait;
use peernet_core::{CancelToken, MplexConfig, Version, VersionedName};

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::protocol::ProtocolHandler;
use crate::stream::BoxedStream;

pub use header::{Frame, Header, PacketType, MAX_STREAM_ID};
pub use muxer::{Muxer, MuxerEvent, Role, WriteAccess};
pub use substream::Substream;

/// Listener side of mplex. Selecting it turns the stream into a muxer that
/// serves each remote substream with its own multistream listener.
#[derive(Debug, Clone, Default)]
pub struct Mplex67 {
    config: MplexConfig,
}

impl Mplex67 {
    pub fn new(config: MplexConfig) -> Self {
        Self { config }
    }

    pub fn protocol_name() -> VersionedName {
        VersionedName::new("mplex", Version::new(6, 7, 0))
    }
}

#[async_trait]
impl ProtocolHandler for Mplex67 {
    fn name(&self) -> VersionedName {
        Self::protocol_name()
    }

    async fn handle(
        &self,
        conn: Arc<PeerConnection>,
        stream: BoxedStream,
        cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        let muxer = Muxer::new(stream, Role::Receiver, self.config.clone());
        tracing::debug!(connection = conn.id(), "mplex established");
        conn.run_muxer(muxer, cancel).await
    }
}
