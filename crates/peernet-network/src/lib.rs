//! Peernet connection stack.
//!
//! This crate carries everything between a raw transport and an application
//! protocol:
//!
//! - **Multistream** negotiation of the next protocol on a stream
//! - **SECIO** or **Plaintext** security
//! - **Mplex** multiplexing of many substreams over one connection
//! - **Identify** exchange of peer records
//! - **Transports** (TCP, UDP dial) and DNS multiaddress resolution
//! - the **Swarm**, which gates peer addresses through black/white lists
//!   and keeps the live connections
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use peernet_network::{AccessPolicy, Keypair, StackConfig, Swarm};
//!
//! #[tokio::main]
//! async fn main() {
//!     let swarm = Arc::new(Swarm::new(
//!         Keypair::generate_ed25519(),
//!         StackConfig::default(),
//!         AccessPolicy::default(),
//!     ));
//!     let bound = swarm.listen(&"/ip4/127.0.0.1/tcp/0".parse().unwrap()).await.unwrap();
//!     println!("listening on {}", bound);
//! }
//! ```

pub mod connection;
pub mod discovery;
pub mod error;
pub mod events;
pub mod identify;
pub mod mplex;
pub mod multistream;
pub mod peer;
pub mod plaintext;
pub mod policy;
pub mod protocol;
pub mod resolve;
pub mod secio;
pub mod stream;
pub mod swarm;
pub mod transport;
pub mod upgrade;

// Re-exports for convenience.
pub use connection::{Direction, Endpoint, PeerConnection};
pub use discovery::{BootstrapDiscovery, Discovery, DiscoveryEvent};
pub use error::NetworkError;
pub use events::{ConnectionEstablished, SwarmEvent};
pub use identify::{Identify1, IdentifyRecord};
pub use mplex::{Mplex67, Muxer, MuxerEvent, Role, Substream};
pub use multistream::Multistream1;
pub use peer::{peer_id_of, without_peer_id, LocalPeer, Peer};
pub use plaintext::Plaintext1;
pub use policy::{AccessPolicy, BlackList, Policy, WhiteList};
pub use protocol::{ProtocolFactory, ProtocolHandler, ProtocolRegistry};
pub use resolve::resolve;
pub use secio::{Secio1, Secio1Stream};
pub use stream::{BoxedStream, Duplex};
pub use swarm::Swarm;
pub use transport::{
    AcceptBackoff, ConnectionHandler, TcpTransport, Transport, TransportRegistry, UdpTransport,
};
pub use upgrade::{upgrade_outbound, StackConfig};

// Re-export commonly used libp2p types for downstream convenience.
pub use libp2p::{identity::Keypair, Multiaddr, PeerId};
