//! Identify 1.0.0: exchange identity records over the current stream.
//!
//! Both sides write their own record and then read the remote's. Listen
//! addresses from the remote are added to what we already know about it.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::identity::PublicKey;
use libp2p::Multiaddr;
use peernet_core::message::read_varint_async;
use peernet_core::{CancelToken, Version, VersionedName};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::peer::Peer;
use crate::protocol::ProtocolHandler;
use crate::stream::BoxedStream;

/// Upper bound on an encoded identify record.
pub const MAX_RECORD_SIZE: u64 = 64 * 1024;

/// Identity record as carried on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct IdentifyRecord {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub public_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub listen_addrs: Vec<Vec<u8>>,
    #[prost(string, repeated, tag = "3")]
    pub protocols: Vec<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub observed_addr: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub protocol_version: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub agent_version: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Identify1;

impl Identify1 {
    pub fn protocol_name() -> VersionedName {
        VersionedName::new("ipfs/id", Version::new(1, 0, 0))
    }

    /// Our record, as sent to the remote of `conn`.
    pub fn local_record(conn: &PeerConnection) -> IdentifyRecord {
        let local = conn.local();
        IdentifyRecord {
            public_key: Some(local.public_key().encode_protobuf()),
            listen_addrs: local.addresses().iter().map(|a| a.to_vec()).collect(),
            protocols: conn.registry().names(),
            observed_addr: conn.remote_address().map(|a| a.to_vec()),
            protocol_version: Some(local.protocol_version().to_string()),
            agent_version: Some(local.agent_version().to_string()),
        }
    }

    /// Send our record, read the remote's and fold it into the connection's
    /// remote peer. Returns the updated remote peer.
    pub async fn exchange<S>(
        conn: &PeerConnection,
        stream: &mut S,
        cancel: &CancelToken,
    ) -> Result<Peer, NetworkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let outgoing = Self::local_record(conn).encode_length_delimited_to_vec();
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
            record = async {
                stream.write_all(&outgoing).await?;
                stream.flush().await?;
                read_record(stream).await
            } => record?,
        };
        Self::apply(conn, record)
    }

    fn apply(conn: &PeerConnection, record: IdentifyRecord) -> Result<Peer, NetworkError> {
        let addresses: Vec<Multiaddr> = record
            .listen_addrs
            .into_iter()
            .filter_map(|bytes| match Multiaddr::try_from(bytes) {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::debug!(connection = conn.id(), error = %e, "skipping bad listen address");
                    None
                }
            })
            .collect();
        let public_key = record
            .public_key
            .map(|bytes| PublicKey::try_decode_protobuf(&bytes))
            .transpose()?;

        let peer = conn.update_remote(|remote| -> Result<Peer, NetworkError> {
            if let Some(key) = &public_key {
                remote.set_public_key(key)?;
            }
            remote.merge_addresses(addresses);
            if let Some(agent) = record.agent_version {
                remote.agent_version = agent;
            }
            if let Some(version) = record.protocol_version {
                remote.protocol_version = version;
            }
            Ok(remote.clone())
        })?;

        if let Some(observed) = record.observed_addr {
            match Multiaddr::try_from(observed) {
                Ok(addr) => conn.set_observed_address(addr),
                Err(e) => tracing::debug!(connection = conn.id(), error = %e, "bad observed address"),
            }
        }
        tracing::info!(
            connection = conn.id(),
            peer = ?peer.id,
            agent = %peer.agent_version,
            protocols = record.protocols.len(),
            "peer identified"
        );
        Ok(peer)
    }
}

async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<IdentifyRecord, NetworkError> {
    let len = read_varint_async(reader).await?;
    if len > MAX_RECORD_SIZE {
        return Err(NetworkError::Framing(format!(
            "identify record of {} bytes exceeds {}",
            len, MAX_RECORD_SIZE
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(IdentifyRecord::decode(buf.as_slice())?)
}

#[async_trait]
impl ProtocolHandler for Identify1 {
    fn name(&self) -> VersionedName {
        Self::protocol_name()
    }

    async fn handle(
        &self,
        conn: Arc<PeerConnection>,
        mut stream: BoxedStream,
        cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        Self::exchange(&conn, &mut stream, &cancel).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
