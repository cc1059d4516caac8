//! Swarm event types.
//!
//! These events are broadcast by the swarm so that higher-level components
//! can react to peers appearing, connecting and going away.

use libp2p::{Multiaddr, PeerId};

/// High-level events emitted by the swarm.
#[derive(Debug, Clone)]
pub enum SwarmEvent {
    /// A new address was added to the known set.
    PeerRegistered {
        /// The registered address, ending in the peer id.
        address: Multiaddr,
    },

    /// A connection finished its upgrade (security, muxer, identify).
    ConnectionEstablished(ConnectionEstablished),

    /// A connection was disposed.
    ConnectionClosed {
        /// Swarm-local connection id.
        connection_id: u64,
        /// Remote peer, if it was identified.
        peer_id: Option<PeerId>,
    },

    /// This node started listening on an address.
    Listening {
        /// The address we are now listening on.
        address: Multiaddr,
    },
}

/// Emitted when a connection is ready for substreams.
#[derive(Debug, Clone)]
pub struct ConnectionEstablished {
    /// Swarm-local connection id.
    pub connection_id: u64,
    /// The PeerId of the remote, when known.
    pub peer_id: Option<PeerId>,
    /// Address of the remote end.
    pub address: Option<Multiaddr>,
    /// Whether we dialed the remote.
    pub outbound: bool,
}
