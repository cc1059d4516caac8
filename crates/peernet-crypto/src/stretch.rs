//! HMAC-chained key expansion for SECIO sessions.
//!
//! One shared secret is expanded into two [`StretchedKey`]s, one per
//! direction of traffic.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::symmetric::CipherKind;
use crate::error::CryptoError;
use crate::hash::{compute_hmac, HashKind};

/// Size of the MAC key carried in each stretched key.
pub const HMAC_KEY_SIZE: usize = 20;

const SEED: &[u8] = b"key expansion";

/// Key material for one direction of a session.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct StretchedKey {
    pub iv: Vec<u8>,
    pub cipher_key: Vec<u8>,
    pub mac_key: Vec<u8>,
}

impl fmt::Debug for StretchedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StretchedKey")
            .field("iv_len", &self.iv.len())
            .field("cipher_key_len", &self.cipher_key.len())
            .field("mac_key_len", &self.mac_key.len())
            .finish()
    }
}

/// Expand `secret` into the `(k1, k2)` key pair for `cipher` using HMAC over `hash`.
///
/// `a = HMAC(secret, seed)`, then repeatedly `HMAC(secret, a ‖ seed)` is
/// appended to the output and `a = HMAC(secret, a)`, until both halves are
/// filled. Each half is sliced into IV, cipher key and MAC key in that order.
pub fn stretch_keys(
    cipher: CipherKind,
    hash: HashKind,
    secret: &[u8],
) -> Result<(StretchedKey, StretchedKey), CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::InvalidInput("empty shared secret".into()));
    }
    let iv_size = cipher.iv_size();
    let key_size = cipher.key_size();
    let half = iv_size + key_size + HMAC_KEY_SIZE;
    let need = 2 * half;

    let mut output = Vec::with_capacity(need + hash.output_size());
    let mut a = compute_hmac(hash, secret, &[SEED])?;
    while output.len() < need {
        let b = compute_hmac(hash, secret, &[a.as_slice(), SEED])?;
        output.extend_from_slice(&b);
        a = compute_hmac(hash, secret, &[a.as_slice()])?;
    }
    output.truncate(need);

    let split = |chunk: &[u8]| StretchedKey {
        iv: chunk[..iv_size].to_vec(),
        cipher_key: chunk[iv_size..iv_size + key_size].to_vec(),
        mac_key: chunk[iv_size + key_size..].to_vec(),
    };
    let keys = (split(&output[..half]), split(&output[half..]));
    output.zeroize();
    a.zeroize();
    Ok(keys)
}
