/// Core protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The peer closed the stream before a message started.
    #[error("stream closed by peer")]
    Closed,

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed length prefix, missing terminator or truncated payload.
    #[error("framing error: {0}")]
    Framing(String),

    /// A length prefix announced more bytes than the channel accepts.
    #[error("message too large: {len} bytes exceeds limit of {max}")]
    MessageTooLarge { len: u64, max: u64 },

    /// A message payload was not valid UTF-8.
    #[error("message is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A protocol identifier could not be parsed.
    #[error("invalid protocol name: {0}")]
    InvalidName(String),

    /// I/O error on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True when the error means the remote went away cleanly.
    pub fn is_closed(&self) -> bool {
        match self {
            CoreError::Closed => true,
            CoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// True when the error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}
