use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use peernet_core::{CancelToken, MplexConfig};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use super::header::{Frame, PacketType, MAX_STREAM_ID};
use super::substream::Substream;
use crate::error::NetworkError;
use crate::stream::BoxedStream;

/// Which id space this side allocates from. Initiators use odd ids,
/// receivers even ones, so locally created ids never collide with the
/// remote's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Receiver,
}

impl Role {
    pub fn first_stream_id(&self) -> u64 {
        match self {
            Role::Initiator => 1,
            Role::Receiver => 0,
        }
    }
}

#[derive(Debug)]
pub enum MuxerEvent {
    /// The remote opened a substream.
    SubstreamCreated(Substream),
    /// The remote closed or reset a substream.
    SubstreamClosed(u64),
}

struct SubstreamEntry {
    name: String,
    initiator: bool,
    inbound: mpsc::Sender<Bytes>,
    reset: Arc<AtomicBool>,
}

/// Exclusive right to write to the shared channel. Frames written while it
/// is held cannot interleave with anyone else's.
pub struct WriteAccess<'a> {
    writer: MutexGuard<'a, Option<WriteHalf<BoxedStream>>>,
}

impl WriteAccess<'_> {
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), NetworkError> {
        let writer = self.writer.as_mut().ok_or(NetworkError::Closed)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Carries many substreams over one stream.
pub struct Muxer {
    role: Role,
    next_id: AtomicU64,
    config: MplexConfig,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    reader: parking_lot::Mutex<Option<ReadHalf<BoxedStream>>>,
    substreams: DashMap<u64, SubstreamEntry>,
    events_tx: mpsc::UnboundedSender<MuxerEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<MuxerEvent>>>,
    disposed: AtomicBool,
    closed: CancelToken,
}

impl Muxer {
    pub fn new(stream: BoxedStream, role: Role, config: MplexConfig) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            role,
            next_id: AtomicU64::new(role.first_stream_id()),
            config,
            writer: Mutex::new(Some(writer)),
            reader: parking_lot::Mutex::new(Some(reader)),
            substreams: DashMap::new(),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            disposed: AtomicBool::new(false),
            closed: CancelToken::new(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &MplexConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of open substreams.
    pub fn substream_count(&self) -> usize {
        self.substreams.len()
    }

    /// Name the remote gave a substream, if it is still open.
    pub fn substream_name(&self, id: u64) -> Option<String> {
        self.substreams.get(&id).map(|e| e.name.clone())
    }

    /// Receiver for substream events. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MuxerEvent>> {
        self.events_rx.lock().take()
    }

    /// Wait for exclusive write access. Waiters are served in arrival order.
    pub async fn acquire_write_access(&self) -> WriteAccess<'_> {
        WriteAccess {
            writer: self.writer.lock().await,
        }
    }

    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<(), NetworkError> {
        if self.is_disposed() {
            return Err(NetworkError::Closed);
        }
        let encoded = frame.encode()?;
        let mut access = self.acquire_write_access().await;
        access.write(&encoded).await
    }

    /// Open a substream and announce it to the remote.
    pub async fn create_stream(self: &Arc<Self>, name: &str) -> Result<Substream, NetworkError> {
        if self.is_disposed() {
            return Err(NetworkError::Closed);
        }
        let id = self.next_id.fetch_add(2, Ordering::SeqCst);
        if id > MAX_STREAM_ID {
            return Err(NetworkError::Protocol("stream ids exhausted".into()));
        }
        let (inbound, reset) = self.register(id, name);
        if let Err(e) = self
            .send_frame(Frame::new(id, PacketType::NewStream, name.as_bytes().to_vec()))
            .await
        {
            self.substreams.remove(&id);
            return Err(e);
        }
        tracing::debug!(stream_id = id, name, "substream created");
        Ok(Substream::new(
            Arc::clone(self),
            id,
            name.to_string(),
            true,
            inbound,
            reset,
        ))
    }

    fn register(&self, id: u64, name: &str) -> (mpsc::Receiver<Bytes>, Arc<AtomicBool>) {
        let (tx, rx) = self.queue();
        let reset = Arc::new(AtomicBool::new(false));
        self.substreams.insert(
            id,
            SubstreamEntry {
                name: name.to_string(),
                initiator: true,
                inbound: tx,
                reset: Arc::clone(&reset),
            },
        );
        (rx, reset)
    }

    fn queue(&self) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(self.config.substream_queue_depth.max(1))
    }

    /// Drop the table slot for a substream that went away locally.
    pub(crate) fn forget(&self, id: u64) {
        self.substreams.remove(&id);
    }

    /// The read loop. Runs until the stream ends, `cancel` fires, the muxer
    /// is disposed, or the remote breaks the protocol. The muxer is disposed
    /// when it returns.
    pub async fn process_requests(self: &Arc<Self>, cancel: CancelToken) -> Result<(), NetworkError> {
        let Some(mut reader) = self.reader.lock().take() else {
            return Err(NetworkError::Protocol("muxer read loop already running".into()));
        };
        let result = loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = self.closed.cancelled() => break Ok(()),
                step = self.process_one(&mut reader) => step,
            };
            match step {
                Ok(()) => {}
                Err(e) if e.is_closed() => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "muxer read loop failed");
        }
        self.dispose().await;
        result
    }

    async fn process_one(
        self: &Arc<Self>,
        reader: &mut ReadHalf<BoxedStream>,
    ) -> Result<(), NetworkError> {
        let frame = Frame::read(reader, self.config.max_message_size).await?;
        let id = frame.header.stream_id;
        match frame.header.packet_type {
            PacketType::NewStream => {
                let name = String::from_utf8_lossy(&frame.payload).into_owned();
                let (tx, rx) = self.queue();
                let reset = Arc::new(AtomicBool::new(false));
                match self.substreams.entry(id) {
                    Entry::Occupied(_) => {
                        return Err(NetworkError::Protocol(format!("duplicate stream id {}", id)));
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(SubstreamEntry {
                            name: name.clone(),
                            initiator: false,
                            inbound: tx,
                            reset: Arc::clone(&reset),
                        });
                    }
                }
                tracing::debug!(stream_id = id, name = %name, "remote opened substream");
                let substream = Substream::new(Arc::clone(self), id, name, false, rx, reset);
                let _ = self.events_tx.send(MuxerEvent::SubstreamCreated(substream));
            }
            PacketType::MessageReceiver | PacketType::MessageInitiator => {
                // Never waits: one slow consumer must not hold up its siblings.
                let delivery = self
                    .substreams
                    .get(&id)
                    .map(|e| e.inbound.try_send(frame.payload));
                match delivery {
                    Some(Ok(())) => {}
                    Some(Err(TrySendError::Full(_))) => self.reset_overrun(id),
                    Some(Err(TrySendError::Closed(_))) => {
                        tracing::trace!(stream_id = id, "message for dropped substream")
                    }
                    None => tracing::trace!(stream_id = id, "message for unknown substream"),
                }
            }
            PacketType::CloseReceiver
            | PacketType::CloseInitiator
            | PacketType::ResetReceiver
            | PacketType::ResetInitiator => {
                if let Some((_, entry)) = self.substreams.remove(&id) {
                    if matches!(
                        frame.header.packet_type,
                        PacketType::ResetReceiver | PacketType::ResetInitiator
                    ) {
                        entry.reset.store(true, Ordering::Release);
                    }
                    tracing::debug!(stream_id = id, "remote closed substream");
                    let _ = self.events_tx.send(MuxerEvent::SubstreamClosed(id));
                }
            }
        }
        Ok(())
    }

    /// The consumer of `id` has more unread messages than its queue holds.
    /// Mplex has no flow control, so that substream alone is reset: its
    /// reader sees what was queued and then an error, and the remote is told.
    fn reset_overrun(self: &Arc<Self>, id: u64) {
        let Some((_, entry)) = self.substreams.remove(&id) else {
            return;
        };
        entry.reset.store(true, Ordering::Release);
        tracing::warn!(
            stream_id = id,
            name = %entry.name,
            depth = self.config.substream_queue_depth,
            "substream queue overrun, resetting"
        );
        let _ = self.events_tx.send(MuxerEvent::SubstreamClosed(id));
        let packet_type = if entry.initiator {
            PacketType::ResetInitiator
        } else {
            PacketType::ResetReceiver
        };
        let muxer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = muxer.send_frame(Frame::new(id, packet_type, Bytes::new())).await {
                tracing::trace!(stream_id = id, error = %e, "reset frame not sent");
            }
        });
    }

    /// Close the channel for reading and writing. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.cancel();
        // Dropping the senders ends every substream's inbound side.
        self.substreams.clear();
        self.reader.lock().take();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        tracing::debug!(role = ?self.role, "muxer disposed");
    }
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("role", &self.role)
            .field("substreams", &self.substreams.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pair(config: MplexConfig) -> (Arc<Muxer>, Arc<Muxer>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Muxer::new(Box::new(a), Role::Initiator, config.clone()),
            Muxer::new(Box::new(b), Role::Receiver, config),
        )
    }

    fn spawn_loop(muxer: &Arc<Muxer>) -> tokio::task::JoinHandle<Result<(), NetworkError>> {
        let muxer = Arc::clone(muxer);
        tokio::spawn(async move { muxer.process_requests(CancelToken::new()).await })
    }

    #[tokio::test]
    async fn test_initiator_ids_are_odd() {
        let (initiator, _receiver) = pair(MplexConfig::default());
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(initiator.create_stream("").await.unwrap().id());
        }
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_receiver_ids_are_even() {
        let (_initiator, receiver) = pair(MplexConfig::default());
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(receiver.create_stream("").await.unwrap().id());
        }
        assert_eq!(ids, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_remote_substream_carries_data_both_ways() {
        let (initiator, receiver) = pair(MplexConfig::default());
        let mut events = receiver.take_events().unwrap();
        spawn_loop(&initiator);
        spawn_loop(&receiver);

        let mut local = initiator.create_stream("chat").await.unwrap();
        let mut remote = match events.recv().await.unwrap() {
            MuxerEvent::SubstreamCreated(s) => s,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(remote.id(), local.id());
        assert_eq!(remote.name(), "chat");
        assert!(!remote.is_initiator());

        local.write_all(b"hello").await.unwrap();
        local.flush().await.unwrap();
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        remote.write_all(b"world").await.unwrap();
        remote.flush().await.unwrap();
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_close_ends_remote_reader() {
        let (initiator, receiver) = pair(MplexConfig::default());
        let mut events = receiver.take_events().unwrap();
        spawn_loop(&initiator);
        spawn_loop(&receiver);

        let mut local = initiator.create_stream("").await.unwrap();
        let mut remote = match events.recv().await.unwrap() {
            MuxerEvent::SubstreamCreated(s) => s,
            other => panic!("unexpected event {:?}", other),
        };
        local.write_all(b"last").await.unwrap();
        local.shutdown().await.unwrap();

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"last");
        assert!(matches!(
            events.recv().await.unwrap(),
            MuxerEvent::SubstreamClosed(1)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_stream_id_disposes_channel() {
        // Two independent initiators both allocate id 1.
        let mut frames = Vec::new();
        let mut initiators = Vec::new();
        for _ in 0..2 {
            let (a, mut b) = tokio::io::duplex(1024);
            let muxer = Muxer::new(Box::new(a), Role::Initiator, MplexConfig::default());
            let stream = muxer.create_stream("dup").await.unwrap();
            assert_eq!(stream.id(), 1);
            let expected = Frame::new(1, PacketType::NewStream, b"dup".to_vec())
                .encode()
                .unwrap();
            let mut buf = vec![0u8; expected.len()];
            b.read_exact(&mut buf).await.unwrap();
            frames.push(buf);
            initiators.push((muxer, stream, b));
        }

        let (mut shared, consumer_side) = tokio::io::duplex(1024);
        let consumer = Muxer::new(Box::new(consumer_side), Role::Receiver, MplexConfig::default());
        let _events = consumer.take_events().unwrap();
        let task = spawn_loop(&consumer);
        for frame in &frames {
            shared.write_all(frame).await.unwrap();
        }

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("read loop did not stop")
            .unwrap();
        assert!(matches!(result, Err(NetworkError::Protocol(_))));
        assert!(consumer.is_disposed());
        assert!(consumer.create_stream("after").await.is_err());
        let mut buf = [0u8; 1];
        assert_eq!(shared.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_access_is_ordered() {
        let (muxer, _other) = pair(MplexConfig::default());
        let start = Instant::now();

        let first = {
            let muxer = Arc::clone(&muxer);
            tokio::spawn(async move {
                let _access = muxer.acquire_write_access().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                Instant::now()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let muxer = Arc::clone(&muxer);
            tokio::spawn(async move {
                let _access = muxer.acquire_write_access().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Instant::now()
            })
        };

        let first_done = first.await.unwrap();
        let second_done = second.await.unwrap();
        assert!(first_done < second_done);
        assert!(second_done.duration_since(start) >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_oversized_frame_disposes_muxer() {
        let config = MplexConfig {
            max_message_size: 8,
            ..MplexConfig::default()
        };
        let (mut raw, side) = tokio::io::duplex(1024);
        let muxer = Muxer::new(Box::new(side), Role::Receiver, config);
        let task = spawn_loop(&muxer);
        let frame = Frame::new(1, PacketType::MessageInitiator, vec![0u8; 9]);
        raw.write_all(&frame.encode().unwrap()).await.unwrap();
        assert!(matches!(task.await.unwrap(), Err(NetworkError::Framing(_))));
        assert!(muxer.is_disposed());
    }

    #[tokio::test]
    async fn test_cancel_stops_read_loop() {
        let (muxer, _other) = pair(MplexConfig::default());
        let cancel = CancelToken::new();
        let task = {
            let muxer = Arc::clone(&muxer);
            let cancel = cancel.clone();
            tokio::spawn(async move { muxer.process_requests(cancel).await })
        };
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
        assert!(muxer.is_disposed());
    }

    #[tokio::test]
    async fn test_buffered_messages_arrive_in_order() {
        let (initiator, receiver) = pair(MplexConfig::default());
        let mut events = receiver.take_events().unwrap();
        spawn_loop(&initiator);
        spawn_loop(&receiver);

        let mut local = initiator.create_stream("").await.unwrap();
        let mut remote = match events.recv().await.unwrap() {
            MuxerEvent::SubstreamCreated(s) => s,
            other => panic!("unexpected event {:?}", other),
        };
        let writer = tokio::spawn(async move {
            for i in 0..20u8 {
                local.write_all(&[i]).await.unwrap();
                local.flush().await.unwrap();
            }
            local.shutdown().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received, (0..20u8).collect::<Vec<_>>());
    }

    async fn next_created(events: &mut mpsc::UnboundedReceiver<MuxerEvent>) -> Substream {
        match tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("substream announced")
            .unwrap()
        {
            MuxerEvent::SubstreamCreated(s) => s,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_overrun_resets_only_that_substream() {
        let config = MplexConfig {
            substream_queue_depth: 2,
            ..MplexConfig::default()
        };
        let (initiator, receiver) = pair(config);
        let mut events = receiver.take_events().unwrap();
        spawn_loop(&initiator);
        spawn_loop(&receiver);

        let mut idle_local = initiator.create_stream("idle").await.unwrap();
        let mut busy_local = initiator.create_stream("busy").await.unwrap();
        let _idle_remote = next_created(&mut events).await;
        let mut busy_remote = next_created(&mut events).await;
        assert_eq!(busy_remote.name(), "busy");

        for i in 1..=3u8 {
            idle_local.write_all(&[i]).await.unwrap();
            idle_local.flush().await.unwrap();
        }
        busy_local.write_all(b"hi").await.unwrap();
        busy_local.flush().await.unwrap();

        // The sibling is served even though nobody reads `idle`.
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(1), busy_remote.read(&mut buf))
            .await
            .expect("sibling substream stalled")
            .unwrap();
        assert_eq!(&buf[..n], b"hi");

        // The side that overran the queue learns about the reset.
        let err = tokio::time::timeout(Duration::from_secs(1), idle_local.read(&mut buf))
            .await
            .expect("reset not delivered")
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        assert!(idle_local.is_reset());
        assert!(!busy_local.is_reset());
    }

    #[tokio::test]
    async fn test_overrun_reader_gets_queued_messages_then_reset() {
        let config = MplexConfig {
            substream_queue_depth: 2,
            ..MplexConfig::default()
        };
        let (initiator, receiver) = pair(config);
        let mut events = receiver.take_events().unwrap();
        spawn_loop(&initiator);
        spawn_loop(&receiver);

        let mut local = initiator.create_stream("idle").await.unwrap();
        let mut marker = initiator.create_stream("marker").await.unwrap();
        let mut remote = next_created(&mut events).await;
        let mut remote_marker = next_created(&mut events).await;

        for i in 1..=3u8 {
            local.write_all(&[i]).await.unwrap();
            local.flush().await.unwrap();
        }
        marker.write_all(b"x").await.unwrap();
        marker.flush().await.unwrap();

        // Frames are handled in order, so once the marker is readable the
        // overrun has been dealt with.
        let mut buf = [0u8; 8];
        remote_marker.read(&mut buf).await.unwrap();

        assert_eq!(remote.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 1);
        assert_eq!(remote.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 2);
        let err = remote.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
        assert!(remote.write_all(b"late").await.is_err());
        assert_eq!(receiver.substream_name(remote.id()), None);
    }
}
