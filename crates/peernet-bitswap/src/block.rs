//! Blocks and block storage.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::cid::{Cid, HashAlgorithm};
use crate::error::BitswapError;

/// A content-addressed chunk of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Cid,
    pub data: Bytes,
}

impl Block {
    pub fn new(id: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Build a block whose id is the hash of `data`.
    pub fn from_data(algorithm: HashAlgorithm, data: impl Into<Bytes>) -> Result<Self, BitswapError> {
        let data = data.into();
        let id = Cid::compute(algorithm, &data)?;
        Ok(Self { id, data })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Source and sink of blocks.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Look up a block by id.
    async fn get(&self, id: &Cid) -> Result<Option<Block>, BitswapError>;

    /// Store `data` under the id computed with `hash` and return that id.
    /// Pinned blocks are never evicted.
    async fn put(&self, data: Bytes, hash: HashAlgorithm, pin: bool) -> Result<Cid, BitswapError>;
}

#[derive(Debug)]
struct StoredBlock {
    block: Block,
    pinned: bool,
}

/// Block store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Cid, StoredBlock>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, id: &Cid) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn is_pinned(&self, id: &Cid) -> bool {
        self.blocks.get(id).is_some_and(|b| b.pinned)
    }

    /// Drop an unpinned block. Returns whether anything was removed.
    pub fn remove(&self, id: &Cid) -> bool {
        self.blocks.remove_if(id, |_, b| !b.pinned).is_some()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn get(&self, id: &Cid) -> Result<Option<Block>, BitswapError> {
        Ok(self.blocks.get(id).map(|b| b.block.clone()))
    }

    async fn put(&self, data: Bytes, hash: HashAlgorithm, pin: bool) -> Result<Cid, BitswapError> {
        let block = Block::from_data(hash, data)?;
        let id = block.id;
        self.blocks
            .entry(id)
            .and_modify(|stored| stored.pinned |= pin)
            .or_insert(StoredBlock { block, pinned: pin });
        tracing::trace!(cid = %id, pin, "block stored");
        Ok(id)
    }
}
