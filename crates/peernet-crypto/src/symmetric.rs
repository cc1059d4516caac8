//! Byte-oriented counter mode over a block cipher, and the cipher suites
//! SECIO can negotiate.

use std::fmt;
use std::str::FromStr;

use aes::{Aes128, Aes256};
use blowfish::Blowfish;
use cipher::{Block, BlockEncrypt, BlockSizeUser, KeyInit};

use crate::error::CryptoError;

/// Symmetric ciphers available to a SECIO session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    Aes128,
    Aes256,
    Blowfish,
}

impl CipherKind {
    /// IV length in bytes, equal to the block size.
    pub fn iv_size(&self) -> usize {
        match self {
            CipherKind::Aes128 | CipherKind::Aes256 => 16,
            CipherKind::Blowfish => 8,
        }
    }

    /// Cipher key length in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            CipherKind::Aes128 => 16,
            CipherKind::Aes256 | CipherKind::Blowfish => 32,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Aes128 => "AES-128",
            CipherKind::Aes256 => "AES-256",
            CipherKind::Blowfish => "Blowfish",
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES-128" => Ok(CipherKind::Aes128),
            "AES-256" => Ok(CipherKind::Aes256),
            "Blowfish" => Ok(CipherKind::Blowfish),
            other => Err(CryptoError::UnsupportedCipher(other.to_string())),
        }
    }
}

/// Counter mode built on any block cipher.
///
/// The counter block starts at the IV. A keystream block is produced lazily
/// when the byte cursor is at zero; after a whole block of keystream has been
/// consumed the counter is incremented as a big-endian integer.
pub struct CtrCipher<B: BlockEncrypt + BlockSizeUser> {
    cipher: B,
    counter: Block<B>,
    keystream: Block<B>,
    cursor: usize,
}

impl<B: BlockEncrypt + BlockSizeUser + KeyInit> CtrCipher<B> {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let block_size = B::block_size();
        if iv.len() != block_size {
            return Err(CryptoError::InvalidKeyLength {
                expected: block_size,
                actual: iv.len(),
            });
        }
        let cipher = B::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidInput(format!("bad key length {}", key.len())))?;
        Ok(Self {
            cipher,
            counter: Block::<B>::clone_from_slice(iv),
            keystream: Block::<B>::default(),
            cursor: 0,
        })
    }
}

impl<B: BlockEncrypt + BlockSizeUser> CtrCipher<B> {
    /// Encrypt or decrypt a single byte.
    pub fn return_byte(&mut self, input: u8) -> u8 {
        if self.cursor == 0 {
            self.keystream.clone_from(&self.counter);
            self.cipher.encrypt_block(&mut self.keystream);
        }
        let output = input ^ self.keystream[self.cursor];
        self.cursor += 1;
        if self.cursor == self.keystream.len() {
            self.cursor = 0;
            increment_be(&mut self.counter);
        }
        output
    }

    /// Encrypt or decrypt `data` in place, continuing the keystream.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.return_byte(*byte);
        }
    }
}

fn increment_be(counter: &mut [u8]) {
    for byte in counter.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            break;
        }
    }
}

/// A negotiated cipher instance for one direction of a session.
pub enum SessionCipher {
    Aes128(CtrCipher<Aes128>),
    Aes256(CtrCipher<Aes256>),
    Blowfish(CtrCipher<Blowfish>),
}

impl SessionCipher {
    pub fn new(kind: CipherKind, key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != kind.key_size() {
            return Err(CryptoError::InvalidKeyLength {
                expected: kind.key_size(),
                actual: key.len(),
            });
        }
        Ok(match kind {
            CipherKind::Aes128 => SessionCipher::Aes128(CtrCipher::new(key, iv)?),
            CipherKind::Aes256 => SessionCipher::Aes256(CtrCipher::new(key, iv)?),
            CipherKind::Blowfish => SessionCipher::Blowfish(CtrCipher::new(key, iv)?),
        })
    }

    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        match self {
            SessionCipher::Aes128(c) => c.apply_keystream(data),
            SessionCipher::Aes256(c) => c.apply_keystream(data),
            SessionCipher::Blowfish(c) => c.apply_keystream(data),
        }
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            SessionCipher::Aes128(_) => CipherKind::Aes128,
            SessionCipher::Aes256(_) => CipherKind::Aes256,
            SessionCipher::Blowfish(_) => CipherKind::Blowfish,
        };
        f.debug_tuple("SessionCipher").field(&kind).finish()
    }
}
