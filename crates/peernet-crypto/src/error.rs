/// Cryptographic operation errors. All of them are fatal to a handshake.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    #[error("unsupported hash: {0}")]
    UnsupportedHash(String),

    #[error("unsupported key exchange: {0}")]
    UnsupportedExchange(String),

    #[error("no agreement on {0}")]
    NoAgreement(&'static str),

    #[error("talking to self (identical order hashes)")]
    TalkingToSelf,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
