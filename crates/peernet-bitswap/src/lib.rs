//! Bitswap want-list engine for Peernet.
//!
//! Tracks which content-addressed blocks are wanted and by which peers, and
//! resolves every waiting caller when a block turns up. The wire exchange of
//! want lists with remote peers is not part of this crate.
//!
//! ```
//! use bytes::Bytes;
//! use libp2p::PeerId;
//! use peernet_bitswap::{Bitswap, Block, HashAlgorithm};
//! use peernet_core::CancelToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bitswap = Bitswap::default();
//! let block = Block::from_data(HashAlgorithm::Sha2_256, Bytes::from_static(b"hi")).unwrap();
//! let handle = bitswap.want(block.id, PeerId::random(), &CancelToken::new());
//! assert_eq!(bitswap.found(&block), 1);
//! assert_eq!(handle.wait().await.unwrap(), block);
//! # }
//! ```

pub mod block;
pub mod cid;
pub mod engine;
pub mod error;

pub use block::{Block, BlockStore, MemoryBlockStore};
pub use cid::{Cid, HashAlgorithm};
pub use engine::{Bitswap, WantCancellation, WantHandle, WantedBlock};
pub use error::BitswapError;
