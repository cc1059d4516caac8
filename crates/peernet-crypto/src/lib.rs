pub mod error;
pub mod exchange;
pub mod hash;
pub mod negotiate;
pub mod stretch;
pub mod symmetric;

pub use error::CryptoError;
pub use exchange::{EphemeralKey, ExchangeKind};
pub use hash::{compute_hmac, sha256, HashKind, SessionMac};
pub use negotiate::{order, select_best, split_list};
pub use stretch::{stretch_keys, StretchedKey, HMAC_KEY_SIZE};
pub use symmetric::{CipherKind, CtrCipher, SessionCipher};
