//! Network error types for the Peernet connection stack.

use peernet_core::CoreError;
use peernet_crypto::CryptoError;

/// Errors that can occur in the network layer.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The remote closed the stream.
    #[error("stream closed by peer")]
    Closed,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed frame, length prefix or stream id.
    #[error("framing error: {0}")]
    Framing(String),

    /// The remote violated a protocol (unexpected message, duplicate stream id).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Feature or address form this node does not support.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// An explicit connect was attempted to an address the policy forbids.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Malformed or unusable multiaddress.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Address resolution failed.
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Transport-level failure (connect, bind).
    #[error("transport error: {0}")]
    Transport(String),

    /// MAC mismatch or malformed secured packet.
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// Peer identity problem (bad public key, id mismatch).
    #[error("identity error: {0}")]
    Identity(String),

    /// Protobuf encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(String),

    /// Error from the crypto layer.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// True when the remote went away cleanly.
    pub fn is_closed(&self) -> bool {
        match self {
            NetworkError::Closed => true,
            NetworkError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetworkError::Cancelled)
    }

    /// Closed or cancelled: loops end silently on these.
    pub fn is_benign(&self) -> bool {
        self.is_closed() || self.is_cancelled()
    }
}

impl From<CoreError> for NetworkError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Closed => NetworkError::Closed,
            CoreError::Cancelled => NetworkError::Cancelled,
            CoreError::Framing(msg) => NetworkError::Framing(msg),
            CoreError::InvalidName(msg) => NetworkError::Protocol(msg),
            CoreError::Io(e) => NetworkError::Io(e),
            other => NetworkError::Framing(other.to_string()),
        }
    }
}

impl From<prost::DecodeError> for NetworkError {
    fn from(err: prost::DecodeError) -> Self {
        NetworkError::Codec(err.to_string())
    }
}

impl From<libp2p::multiaddr::Error> for NetworkError {
    fn from(err: libp2p::multiaddr::Error) -> Self {
        NetworkError::InvalidAddress(err.to_string())
    }
}

impl From<libp2p::identity::DecodingError> for NetworkError {
    fn from(err: libp2p::identity::DecodingError) -> Self {
        NetworkError::Identity(err.to_string())
    }
}

impl From<NetworkError> for std::io::Error {
    fn from(err: NetworkError) -> Self {
        use std::io::ErrorKind;
        match err {
            NetworkError::Io(e) => e,
            NetworkError::Closed => std::io::Error::new(ErrorKind::UnexpectedEof, err),
            NetworkError::Integrity(_) | NetworkError::Framing(_) => {
                std::io::Error::new(ErrorKind::InvalidData, err)
            }
            other => std::io::Error::new(ErrorKind::Other, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn test_core_error_conversion() {
        assert!(NetworkError::from(CoreError::Closed).is_closed());
        assert!(NetworkError::from(CoreError::Cancelled).is_cancelled());
        let too_large = NetworkError::from(CoreError::MessageTooLarge { len: 9, max: 1 });
        assert!(matches!(too_large, NetworkError::Framing(_)));
    }

    #[test]
    fn test_io_roundtrip_keeps_kind() {
        let io: std::io::Error = NetworkError::Integrity("mac mismatch".into()).into();
        assert_eq!(io.kind(), std::io::ErrorKind::InvalidData);

        let io: std::io::Error = NetworkError::Closed.into();
        assert!(NetworkError::from(io).is_closed());
    }

    #[test]
    fn test_benign_classification() {
        assert!(NetworkError::Cancelled.is_benign());
        assert!(!NetworkError::Protocol("x".into()).is_benign());
    }
}
