//! Bitswap error types.

/// Errors that can occur while wanting, finding or storing blocks.
#[derive(Debug, thiserror::Error)]
pub enum BitswapError {
    /// The want was cancelled before the block arrived.
    #[error("want cancelled")]
    Cancelled,

    /// The multihash code is not one we can compute.
    #[error("unsupported hash algorithm: 0x{0:x}")]
    UnsupportedHash(u64),

    /// Malformed content id.
    #[error("invalid cid: {0}")]
    InvalidCid(String),

    /// The block store failed.
    #[error("block store error: {0}")]
    Store(String),
}

impl BitswapError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BitswapError::Cancelled)
    }
}
