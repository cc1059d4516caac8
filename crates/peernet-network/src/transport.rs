//! Transports: turn a multiaddress into a duplex byte stream.
//!
//! TCP supports dialing and listening. UDP can only dial; each write is
//! sent as one datagram and each read returns one datagram.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use peernet_core::CancelToken;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::error::NetworkError;
use crate::stream::BoxedStream;

/// Pause after a failed accept. Doubles per consecutive failure up to
/// [`AcceptBackoff::MAX`] and starts over after a successful accept.
#[derive(Debug, Default)]
pub struct AcceptBackoff {
    failures: u32,
}

impl AcceptBackoff {
    pub const INITIAL: Duration = Duration::from_millis(10);
    pub const MAX: Duration = Duration::from_secs(1);

    /// Delay before the next accept attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Self::INITIAL
            .saturating_mul(1u32 << self.failures.min(16))
            .min(Self::MAX);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Called once per accepted connection with `(stream, local, remote)`.
pub type ConnectionHandler = Arc<
    dyn Fn(BoxedStream, Multiaddr, Multiaddr) -> BoxFuture<'static, Result<(), NetworkError>>
        + Send
        + Sync,
>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Multiaddress protocol this transport serves, e.g. `tcp`.
    fn protocol(&self) -> &'static str;

    /// Dial `address`. Returns `Ok(None)` if `cancel` fires first.
    async fn connect(
        &self,
        address: &Multiaddr,
        cancel: &CancelToken,
    ) -> Result<Option<BoxedStream>, NetworkError>;

    /// Accept connections on `address` until `cancel` fires, passing each one
    /// to `handler`. Returns the address actually bound.
    async fn listen(
        &self,
        address: &Multiaddr,
        handler: ConnectionHandler,
        cancel: CancelToken,
    ) -> Result<Multiaddr, NetworkError>;
}

/// Extract the `ip` and `<protocol>` port segments of `address`.
pub fn socket_addr(address: &Multiaddr, protocol: &str) -> Result<SocketAddr, NetworkError> {
    let mut ip: Option<IpAddr> = None;
    let mut port: Option<u16> = None;
    for segment in address.iter() {
        match segment {
            Protocol::Ip4(v4) => ip = Some(IpAddr::V4(v4)),
            Protocol::Ip6(v6) => ip = Some(IpAddr::V6(v6)),
            Protocol::Tcp(p) if protocol == "tcp" => port = Some(p),
            Protocol::Udp(p) if protocol == "udp" => port = Some(p),
            _ => {}
        }
    }
    match (ip, port) {
        (Some(ip), Some(port)) => Ok(SocketAddr::new(ip, port)),
        _ => Err(NetworkError::InvalidAddress(format!(
            "'{}' has no ip/{} endpoint",
            address, protocol
        ))),
    }
}

/// Multiaddress form of a socket address.
pub fn to_multiaddr(addr: SocketAddr, protocol: &str) -> Multiaddr {
    let port = match protocol {
        "udp" => Protocol::Udp(addr.port()),
        _ => Protocol::Tcp(addr.port()),
    };
    Multiaddr::from(addr.ip()).with(port)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> &'static str {
        "tcp"
    }

    async fn connect(
        &self,
        address: &Multiaddr,
        cancel: &CancelToken,
    ) -> Result<Option<BoxedStream>, NetworkError> {
        let target = socket_addr(address, "tcp")?;
        // Dropping the connect future closes the half-open socket.
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(%address, "tcp connect cancelled");
                return Ok(None);
            }
            result = TcpStream::connect(target) => result.map_err(|e| {
                NetworkError::Transport(format!("connect to {} failed: {}", address, e))
            })?,
        };
        stream.set_nodelay(true)?;
        tracing::debug!(%address, "tcp connected");
        Ok(Some(Box::new(stream)))
    }

    async fn listen(
        &self,
        address: &Multiaddr,
        handler: ConnectionHandler,
        cancel: CancelToken,
    ) -> Result<Multiaddr, NetworkError> {
        let bind = socket_addr(address, "tcp")?;
        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| NetworkError::Transport(format!("bind {} failed: {}", address, e)))?;
        let local = to_multiaddr(listener.local_addr()?, "tcp");
        tracing::info!(address = %local, "tcp listening");

        let bound = local.clone();
        tokio::spawn(async move {
            let mut backoff = AcceptBackoff::default();
            loop {
                let accepted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let (stream, peer) = match accepted {
                    Ok(accepted) => {
                        backoff.reset();
                        accepted
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(address = %bound, error = %e, ?delay, "accept failed");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "set_nodelay failed");
                }
                let remote = to_multiaddr(peer, "tcp");
                tracing::debug!(%remote, "tcp connection accepted");
                let handler = Arc::clone(&handler);
                let local = bound.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler(Box::new(stream), local, remote.clone()).await {
                        tracing::debug!(%remote, error = %e, "inbound connection failed");
                    }
                });
            }
            tracing::info!(address = %bound, "tcp listener stopped");
        });
        Ok(local)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    fn protocol(&self) -> &'static str {
        "udp"
    }

    async fn connect(
        &self,
        address: &Multiaddr,
        cancel: &CancelToken,
    ) -> Result<Option<BoxedStream>, NetworkError> {
        let target = socket_addr(address, "udp")?;
        let any: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            socket = async {
                let socket = UdpSocket::bind(any).await?;
                socket.connect(target).await?;
                Ok::<_, io::Error>(socket)
            } => socket.map_err(|e| {
                NetworkError::Transport(format!("connect to {} failed: {}", address, e))
            })?,
        };
        tracing::debug!(%address, "udp socket connected");
        Ok(Some(Box::new(UdpStream { socket })))
    }

    async fn listen(
        &self,
        address: &Multiaddr,
        _handler: ConnectionHandler,
        _cancel: CancelToken,
    ) -> Result<Multiaddr, NetworkError> {
        Err(NetworkError::NotSupported(format!(
            "listening on udp ({})",
            address
        )))
    }
}

/// A connected UDP socket seen as a stream of datagrams.
#[derive(Debug)]
pub struct UdpStream {
    socket: UdpSocket,
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Transports by protocol name.
#[derive(Default)]
pub struct TransportRegistry {
    transports: DashMap<&'static str, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with TCP and UDP.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(TcpTransport));
        registry.register(Arc::new(UdpTransport));
        registry
    }

    pub fn register(&self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.protocol(), transport);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(protocol).map(|t| Arc::clone(t.value()))
    }

    /// The transport for the first segment of `address` that has one.
    pub fn for_address(&self, address: &Multiaddr) -> Option<Arc<dyn Transport>> {
        address.iter().find_map(|segment| self.get(segment.tag()))
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transports.iter().map(|e| *e.key()).collect();
        f.debug_struct("TransportRegistry")
            .field("transports", &names)
            .finish()
    }
}
