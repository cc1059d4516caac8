//! Peernet core building blocks shared by every layer of the stack.

pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod signal;
pub mod versioned_name;

pub use cancel::CancelToken;
pub use config::{MplexConfig, SecioConfig, SwarmConfig};
pub use error::CoreError;
pub use signal::OnceSignal;
pub use versioned_name::{Version, VersionedName};
