use std::fmt;
use std::str::FromStr;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// SHA-256 digest (32 bytes).
pub type Digest32 = [u8; 32];

/// Hash data with SHA-256.
pub fn sha256(data: &[u8]) -> Digest32 {
    Sha256::digest(data).into()
}

/// Hash algorithms a SECIO session can use for its MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Sha256,
    Sha512,
}

impl HashKind {
    /// Output size of the HMAC tag in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            HashKind::Sha256 => 32,
            HashKind::Sha512 => 64,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashKind::Sha256 => "SHA256",
            HashKind::Sha512 => "SHA512",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHA256" => Ok(HashKind::Sha256),
            "SHA512" => Ok(HashKind::Sha512),
            other => Err(CryptoError::UnsupportedHash(other.to_string())),
        }
    }
}

/// Compute `HMAC(key, parts[0] ‖ parts[1] ‖ ...)`.
pub fn compute_hmac(kind: HashKind, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    match kind {
        HashKind::Sha256 => hmac_with::<Hmac<Sha256>>(key, parts),
        HashKind::Sha512 => hmac_with::<Hmac<Sha512>>(key, parts),
    }
}

fn hmac_with<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidInput(format!("hmac key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC signer and verifier for one direction of a session.
pub struct SessionMac {
    kind: HashKind,
    key: Zeroizing<Vec<u8>>,
}

impl SessionMac {
    pub fn new(kind: HashKind, key: &[u8]) -> Self {
        Self {
            kind,
            key: Zeroizing::new(key.to_vec()),
        }
    }

    pub fn kind(&self) -> HashKind {
        self.kind
    }

    /// Tag length appended to every packet.
    pub fn size(&self) -> usize {
        self.kind.output_size()
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        compute_hmac(self.kind, &self.key, &[data])
    }

    /// Check `tag` against `data` in constant time.
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        match self.kind {
            HashKind::Sha256 => verify_with::<Hmac<Sha256>>(&self.key, data, tag),
            HashKind::Sha512 => verify_with::<Hmac<Sha512>>(&self.key, data, tag),
        }
    }
}

fn verify_with<M: Mac + KeyInit>(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

impl fmt::Debug for SessionMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMac")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
