//! Ephemeral Diffie-Hellman key exchange.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Supported ephemeral exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    X25519,
}

impl ExchangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeKind::X25519 => "X25519",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExchangeKind {
    type Err = CryptoError;

    /// NIST curves are valid SECIO names but are not implemented here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X25519" => Ok(ExchangeKind::X25519),
            other => Err(CryptoError::UnsupportedExchange(other.to_string())),
        }
    }
}

/// One side's ephemeral key pair. Consumed by [`EphemeralKey::agree`].
pub struct EphemeralKey {
    kind: ExchangeKind,
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKey {
    pub fn generate(kind: ExchangeKind) -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        tracing::trace!(exchange = %kind, "generated ephemeral key");
        Self {
            kind,
            secret,
            public,
        }
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Public half as sent on the wire.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    /// Derive the shared secret with the remote's public bytes.
    pub fn agree(self, remote_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let bytes: [u8; 32] =
            remote_public
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: 32,
                    actual: remote_public.len(),
                })?;
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(bytes));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreement(
                "remote sent a low-order point".into(),
            ));
        }
        Ok(Zeroizing::new(shared.as_bytes().to_vec()))
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("kind", &self.kind)
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_secret() {
        let alice = EphemeralKey::generate(ExchangeKind::X25519);
        let bob = EphemeralKey::generate(ExchangeKind::X25519);
        let alice_pub = alice.public_bytes();
        let bob_pub = bob.public_bytes();
        let s1 = alice.agree(&bob_pub).unwrap();
        let s2 = bob.agree(&alice_pub).unwrap();
        assert_eq!(*s1, *s2);
        assert_eq!(s1.len(), 32);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let key = EphemeralKey::generate(ExchangeKind::X25519);
        assert!(matches!(
            key.agree(&[1u8; 31]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_low_order_point_rejected() {
        let key = EphemeralKey::generate(ExchangeKind::X25519);
        assert!(matches!(
            key.agree(&[0u8; 32]),
            Err(CryptoError::KeyAgreement(_))
        ));
    }

    #[test]
    fn test_nist_curves_unsupported() {
        for name in ["P-256", "P-384", "P-521"] {
            assert!(matches!(
                name.parse::<ExchangeKind>(),
                Err(CryptoError::UnsupportedExchange(_))
            ));
        }
        assert_eq!("X25519".parse::<ExchangeKind>().unwrap(), ExchangeKind::X25519);
    }
}
