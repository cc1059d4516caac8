//! Content identifiers.
//!
//! A [`Cid`] is a multihash of the block contents. Its string form is the
//! base58btc encoding of the multihash bytes, so SHA2-256 ids look like the
//! familiar `Qm...` CIDv0 strings.

use std::fmt;
use std::str::FromStr;

use libp2p::multihash::Multihash;
use sha2::{Digest, Sha256, Sha512};

use crate::error::BitswapError;

/// Hash functions a block id may be computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha2_256,
    Sha2_512,
}

impl HashAlgorithm {
    /// Multicodec code of the hash function.
    pub fn code(&self) -> u64 {
        match self {
            HashAlgorithm::Sha2_256 => 0x12,
            HashAlgorithm::Sha2_512 => 0x13,
        }
    }

    pub fn from_code(code: u64) -> Result<Self, BitswapError> {
        match code {
            0x12 => Ok(HashAlgorithm::Sha2_256),
            0x13 => Ok(HashAlgorithm::Sha2_512),
            other => Err(BitswapError::UnsupportedHash(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha2_256 => "sha2-256",
            HashAlgorithm::Sha2_512 => "sha2-512",
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha2_256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha2_512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = BitswapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha2-256" | "sha256" => Ok(HashAlgorithm::Sha2_256),
            "sha2-512" | "sha512" => Ok(HashAlgorithm::Sha2_512),
            _ => Err(BitswapError::InvalidCid(format!("unknown hash algorithm '{}'", s))),
        }
    }
}

/// Identifier of a content-addressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid(Multihash<64>);

impl Cid {
    /// Hash `data` with `algorithm`.
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Result<Self, BitswapError> {
        let digest = algorithm.digest(data);
        Multihash::wrap(algorithm.code(), &digest)
            .map(Cid)
            .map_err(|e| BitswapError::InvalidCid(e.to_string()))
    }

    pub fn from_multihash(hash: Multihash<64>) -> Self {
        Cid(hash)
    }

    pub fn multihash(&self) -> &Multihash<64> {
        &self.0
    }

    /// Hash algorithm this id was computed with.
    pub fn algorithm(&self) -> Result<HashAlgorithm, BitswapError> {
        HashAlgorithm::from_code(self.0.code())
    }

    /// Whether `data` hashes to this id.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.algorithm()
            .and_then(|algorithm| Cid::compute(algorithm, data))
            .is_ok_and(|id| id == *self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BitswapError> {
        Multihash::from_bytes(bytes)
            .map(Cid)
            .map_err(|e| BitswapError::InvalidCid(e.to_string()))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.to_bytes()).into_string())
    }
}

impl FromStr for Cid {
    type Err = BitswapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| BitswapError::InvalidCid(format!("'{}': {}", s, e)))?;
        Cid::from_bytes(&bytes)
    }
}
