use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream that can move between tasks.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Duplex for T {}

/// Owned, type-erased stream handed from one protocol layer to the next.
pub type BoxedStream = Box<dyn Duplex>;
