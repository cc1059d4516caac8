//! A connection to one remote peer and the protocol layers installed on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use libp2p::Multiaddr;
use parking_lot::{Mutex, RwLock};
use peernet_core::{CancelToken, OnceSignal};
use tokio::io::AsyncWriteExt;

use crate::error::NetworkError;
use crate::mplex::{Muxer, MuxerEvent};
use crate::multistream::Multistream1;
use crate::peer::{LocalPeer, Peer};
use crate::protocol::ProtocolRegistry;
use crate::stream::BoxedStream;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One transport connection and its negotiation state.
///
/// The connection holds its stream only until a protocol claims it; from
/// then on the stream is owned by whichever layer is running (security,
/// muxer) and is released when the connection's cancel token fires.
pub struct PeerConnection {
    id: u64,
    direction: Direction,
    local: Arc<LocalPeer>,
    remote: RwLock<Peer>,
    local_address: Option<Multiaddr>,
    remote_address: Option<Multiaddr>,
    registry: Arc<ProtocolRegistry>,
    stream: Mutex<Option<BoxedStream>>,
    disposed: AtomicBool,
    closed: CancelToken,
    protocols: Mutex<Vec<String>>,
    observed_address: RwLock<Option<Multiaddr>>,
    security_established: OnceSignal<()>,
    muxer_established: OnceSignal<Arc<Muxer>>,
}

/// Addressing details for a new connection.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub local_address: Option<Multiaddr>,
    pub remote_address: Option<Multiaddr>,
}

impl PeerConnection {
    /// Wrap `stream`. The connection is cancelled together with `parent`.
    pub fn new(
        direction: Direction,
        stream: BoxedStream,
        local: Arc<LocalPeer>,
        remote: Peer,
        endpoint: Endpoint,
        registry: Arc<ProtocolRegistry>,
        parent: &CancelToken,
    ) -> Arc<Self> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            connection = id,
            ?direction,
            remote = ?endpoint.remote_address,
            "connection opened"
        );
        Arc::new(Self {
            id,
            direction,
            local,
            remote: RwLock::new(remote),
            local_address: endpoint.local_address,
            remote_address: endpoint.remote_address,
            registry,
            stream: Mutex::new(Some(stream)),
            disposed: AtomicBool::new(false),
            closed: parent.child(),
            protocols: Mutex::new(Vec::new()),
            observed_address: RwLock::new(None),
            security_established: OnceSignal::new(),
            muxer_established: OnceSignal::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn local(&self) -> &Arc<LocalPeer> {
        &self.local
    }

    /// Snapshot of the remote peer record.
    pub fn remote(&self) -> Peer {
        self.remote.read().clone()
    }

    /// Mutate the remote peer record in place.
    pub fn update_remote<R>(&self, f: impl FnOnce(&mut Peer) -> R) -> R {
        f(&mut self.remote.write())
    }

    pub fn local_address(&self) -> Option<&Multiaddr> {
        self.local_address.as_ref()
    }

    pub fn remote_address(&self) -> Option<&Multiaddr> {
        self.remote_address.as_ref()
    }

    /// How the remote says it sees us.
    pub fn observed_address(&self) -> Option<Multiaddr> {
        self.observed_address.read().clone()
    }

    pub fn set_observed_address(&self, address: Multiaddr) {
        *self.observed_address.write() = Some(address);
    }

    pub fn registry(&self) -> Arc<ProtocolRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token every task on this connection should observe.
    pub fn cancel_token(&self) -> CancelToken {
        self.closed.clone()
    }

    /// Protocols selected on this connection, in order.
    pub fn protocols(&self) -> Vec<String> {
        self.protocols.lock().clone()
    }

    pub(crate) fn record_protocol(&self, name: &str) {
        self.protocols.lock().push(name.to_string());
    }

    /// Claim the unclaimed stream, if any.
    pub fn take_stream(&self) -> Option<BoxedStream> {
        self.stream.lock().take()
    }

    /// Park a stream on the connection. Refused once disposed.
    pub fn set_stream(&self, stream: BoxedStream) -> Result<(), NetworkError> {
        if self.is_disposed() {
            return Err(NetworkError::Closed);
        }
        *self.stream.lock() = Some(stream);
        Ok(())
    }

    pub fn has_stream(&self) -> bool {
        self.stream.lock().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn security_established(&self) -> &OnceSignal<()> {
        &self.security_established
    }

    pub fn muxer_established(&self) -> &OnceSignal<Arc<Muxer>> {
        &self.muxer_established
    }

    /// The muxer, once one has been installed.
    pub fn muxer(&self) -> Option<Arc<Muxer>> {
        self.muxer_established.get()
    }

    /// Run multistream negotiation on the parked stream until the connection
    /// ends, then dispose it.
    pub async fn serve(self: Arc<Self>) {
        let Some(stream) = self.take_stream() else {
            tracing::debug!(connection = self.id, "serve called without a stream");
            return;
        };
        let result = Multistream1::listen(Arc::clone(&self), stream, self.cancel_token()).await;
        match result {
            Ok(()) => tracing::debug!(connection = self.id, "connection finished"),
            Err(e) if e.is_benign() => {
                tracing::debug!(connection = self.id, error = %e, "connection ended")
            }
            Err(e) => tracing::warn!(connection = self.id, error = %e, "connection failed"),
        }
        self.dispose().await;
    }

    /// Publish `muxer`, serve substreams the remote opens, and run the
    /// muxer's read loop until it stops.
    pub(crate) async fn run_muxer(
        self: &Arc<Self>,
        muxer: Arc<Muxer>,
        cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        if !self.muxer_established.set(Arc::clone(&muxer)) {
            return Err(NetworkError::Protocol("muxer already established".into()));
        }
        if let Some(mut events) = muxer.take_events() {
            let conn = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        MuxerEvent::SubstreamCreated(substream) => {
                            let conn = Arc::clone(&conn);
                            let cancel = cancel.child();
                            tokio::spawn(async move {
                                let id = substream.id();
                                let result =
                                    Multistream1::listen(conn, Box::new(substream), cancel).await;
                                if let Err(e) = result {
                                    tracing::debug!(stream_id = id, error = %e, "substream failed");
                                }
                            });
                        }
                        MuxerEvent::SubstreamClosed(id) => {
                            tracing::trace!(connection = conn.id, stream_id = id, "substream closed");
                        }
                    }
                }
            });
        }
        muxer.process_requests(cancel).await
    }

    /// Release the stream, stop every task on the connection and tear down
    /// the muxer. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        let stream = self.stream.lock().take();
        if let Some(mut stream) = stream {
            let _ = stream.shutdown().await;
        }
        if let Some(muxer) = self.muxer_established.get() {
            muxer.dispose().await;
        }
        tracing::debug!(connection = self.id, "connection disposed");
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("remote", &self.remote.read().id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
