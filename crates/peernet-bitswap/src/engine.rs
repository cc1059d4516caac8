//! The want list: which blocks are wanted, by whom, and who is waiting.
//!
//! Every [`Bitswap::want`] call adds a consumer to the entry for its id.
//! [`Bitswap::found`] hands the block to every consumer and drops the entry;
//! [`Bitswap::unwant`] drops the entry and cancels every consumer. An entry
//! exists only while it has at least one consumer: dropping a [`WantHandle`]
//! removes its consumer, and a cancelled token is acted on whether or not
//! the handle is being awaited.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use libp2p::PeerId;
use peernet_core::CancelToken;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::block::{Block, BlockStore};
use crate::cid::Cid;
use crate::error::BitswapError;

/// What a cancelled want takes down with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WantCancellation {
    /// The whole entry is unwanted, cancelling every other waiter too.
    #[default]
    WholeBlock,
    /// Only the cancelled caller is removed.
    PerConsumer,
}

#[derive(Debug)]
struct Consumer {
    token: u64,
    peer: PeerId,
    tx: oneshot::Sender<Block>,
}

/// A wanted block and everyone waiting for it.
#[derive(Debug)]
pub struct WantedBlock {
    id: Cid,
    wanters: HashSet<PeerId>,
    consumers: Vec<Consumer>,
}

impl WantedBlock {
    pub fn id(&self) -> &Cid {
        &self.id
    }

    pub fn wanters(&self) -> impl Iterator<Item = &PeerId> {
        self.wanters.iter()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

#[derive(Debug)]
struct Inner {
    wants: DashMap<Cid, WantedBlock>,
    next_token: AtomicU64,
    cancellation: WantCancellation,
}

/// Want-list engine. Cheap to clone; clones share the table.
#[derive(Debug, Clone)]
pub struct Bitswap {
    inner: Arc<Inner>,
}

impl Default for Bitswap {
    fn default() -> Self {
        Self::new(WantCancellation::default())
    }
}

impl Bitswap {
    pub fn new(cancellation: WantCancellation) -> Self {
        Self {
            inner: Arc::new(Inner {
                wants: DashMap::new(),
                next_token: AtomicU64::new(0),
                cancellation,
            }),
        }
    }

    pub fn cancellation(&self) -> WantCancellation {
        self.inner.cancellation
    }

    /// Register `peer` as wanting `id`. The returned handle resolves when the
    /// block is found, or fails once the want is cancelled.
    pub fn want(&self, id: Cid, peer: PeerId, cancel: &CancelToken) -> WantHandle {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let consumer = Consumer { token, peer, tx };

        match self.inner.wants.entry(id) {
            Entry::Occupied(mut entry) => {
                let wanted = entry.get_mut();
                wanted.wanters.insert(peer);
                wanted.consumers.push(consumer);
                tracing::trace!(cid = %id, %peer, consumers = wanted.consumers.len(), "joined want");
            }
            Entry::Vacant(entry) => {
                entry.insert(WantedBlock {
                    id,
                    wanters: HashSet::from([peer]),
                    consumers: vec![consumer],
                });
                tracing::debug!(cid = %id, %peer, "block wanted");
            }
        }

        let (settled_tx, settled_rx) = oneshot::channel();
        self.watch(id, token, cancel.clone(), settled_rx);
        WantHandle {
            bitswap: self.clone(),
            id,
            token,
            rx,
            cancel: cancel.clone(),
            _settled: settled_tx,
        }
    }

    /// Act on `cancel` for one consumer until its handle goes away. Without
    /// a runtime the cancellation is only seen by [`WantHandle::wait`].
    fn watch(&self, id: Cid, token: u64, cancel: CancelToken, settled: oneshot::Receiver<()>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = settled => {}
                _ = cancel.cancelled() => {
                    if let Some(inner) = inner.upgrade() {
                        Bitswap { inner }.cancel_consumer(&id, token);
                    }
                }
            }
        });
    }

    /// Forget `id` and cancel everyone waiting for it. Unknown ids are ignored.
    pub fn unwant(&self, id: &Cid) {
        if let Some((_, wanted)) = self.inner.wants.remove(id) {
            tracing::debug!(cid = %id, consumers = wanted.consumers.len(), "block unwanted");
            // Dropping the senders cancels the consumers.
        }
    }

    /// Deliver a block to everyone waiting for it. Returns how many waiters
    /// received it.
    pub fn found(&self, block: &Block) -> usize {
        let Some((_, wanted)) = self.inner.wants.remove(&block.id) else {
            return 0;
        };
        let delivered = wanted
            .consumers
            .into_iter()
            .map(|consumer| consumer.tx.send(block.clone()).is_ok())
            .filter(|sent| *sent)
            .count();
        tracing::debug!(cid = %block.id, delivered, "wanted block found");
        delivered
    }

    /// Ids `peer` is currently waiting for.
    pub fn peer_wants(&self, peer: &PeerId) -> Vec<Cid> {
        self.inner
            .wants
            .iter()
            .filter(|entry| entry.wanters.contains(peer))
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn is_wanted(&self, id: &Cid) -> bool {
        self.inner.wants.contains_key(id)
    }

    /// Peers waiting for `id`.
    pub fn wanters(&self, id: &Cid) -> Vec<PeerId> {
        self.inner
            .wants
            .get(id)
            .map(|wanted| wanted.wanters().copied().collect())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self, id: &Cid) -> usize {
        self.inner
            .wants
            .get(id)
            .map_or(0, |wanted| wanted.consumer_count())
    }

    /// Number of distinct wanted ids.
    pub fn len(&self) -> usize {
        self.inner.wants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.wants.is_empty()
    }

    /// Serve `id` from `store`, or wait for it on the want list and store it
    /// when it arrives.
    pub async fn get_block(
        &self,
        store: &dyn BlockStore,
        id: Cid,
        peer: PeerId,
        cancel: &CancelToken,
    ) -> Result<Block, BitswapError> {
        if let Some(block) = store.get(&id).await? {
            return Ok(block);
        }
        let block = self.want(id, peer, cancel).wait().await?;
        if !id.matches(&block.data) {
            return Err(BitswapError::InvalidCid(format!(
                "block data does not hash to {}",
                id
            )));
        }
        store.put(block.data.clone(), id.algorithm()?, false).await?;
        Ok(block)
    }

    /// Apply the cancellation mode to one consumer, if it is still waiting.
    fn cancel_consumer(&self, id: &Cid, token: u64) {
        match self.cancellation() {
            WantCancellation::WholeBlock => {
                let removed = self
                    .inner
                    .wants
                    .remove_if(id, |_, wanted| wanted.consumers.iter().any(|c| c.token == token));
                if let Some((_, wanted)) = removed {
                    tracing::debug!(cid = %id, consumers = wanted.consumers.len(), "want cancelled, block unwanted");
                }
            }
            WantCancellation::PerConsumer => self.remove_consumer(id, token),
        }
    }

    fn remove_consumer(&self, id: &Cid, token: u64) {
        if let Entry::Occupied(mut entry) = self.inner.wants.entry(*id) {
            let wanted = entry.get_mut();
            let Some(pos) = wanted.consumers.iter().position(|c| c.token == token) else {
                return;
            };
            let consumer = wanted.consumers.swap_remove(pos);
            if !wanted.consumers.iter().any(|c| c.peer == consumer.peer) {
                wanted.wanters.remove(&consumer.peer);
            }
            if wanted.consumers.is_empty() {
                entry.remove();
                tracing::debug!(cid = %id, "last consumer left, block unwanted");
            }
        }
    }
}

/// A pending [`Bitswap::want`]. Dropping it withdraws this consumer.
#[derive(Debug)]
pub struct WantHandle {
    bitswap: Bitswap,
    id: Cid,
    token: u64,
    rx: oneshot::Receiver<Block>,
    cancel: CancelToken,
    // Dropped with the handle, which stops the cancellation watcher.
    _settled: oneshot::Sender<()>,
}

impl WantHandle {
    pub fn id(&self) -> &Cid {
        &self.id
    }

    /// Wait for the block.
    pub async fn wait(mut self) -> Result<Block, BitswapError> {
        tokio::select! {
            biased;
            received = &mut self.rx => received.map_err(|_| BitswapError::Cancelled),
            _ = self.cancel.cancelled() => {
                self.bitswap.cancel_consumer(&self.id, self.token);
                Err(BitswapError::Cancelled)
            }
        }
    }
}

impl Drop for WantHandle {
    fn drop(&mut self) {
        // No-op once the block was delivered or the want was cancelled.
        self.bitswap.remove_consumer(&self.id, self.token);
    }
}
