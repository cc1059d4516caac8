//! Dialer-side connection upgrade: security, then mplex, then identify.

use std::sync::Arc;

use peernet_core::{CancelToken, MplexConfig, SecioConfig, SwarmConfig};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::identify::Identify1;
use crate::mplex::{Mplex67, Muxer, Role};
use crate::multistream::Multistream1;
use crate::plaintext::Plaintext1;
use crate::secio::Secio1;
use crate::stream::BoxedStream;

/// Protocol settings for every layer of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub mplex: MplexConfig,
    #[serde(default)]
    pub secio: SecioConfig,
}

/// Security protocols to offer, most preferred first.
pub fn security_candidates(config: &SwarmConfig) -> Vec<String> {
    let mut candidates = Vec::new();
    if config.enable_secio {
        candidates.push(Secio1::protocol_name().to_string());
    }
    if config.enable_plaintext {
        candidates.push(Plaintext1::protocol_name().to_string());
    }
    candidates
}

/// Upgrade a freshly dialed connection. On success the muxer's read loop
/// is running in the background and the remote has been identified.
pub async fn upgrade_outbound(
    conn: &Arc<PeerConnection>,
    config: &StackConfig,
    cancel: &CancelToken,
) -> Result<Arc<Muxer>, NetworkError> {
    let mut stream = conn.take_stream().ok_or(NetworkError::Closed)?;

    let candidates = security_candidates(&config.swarm);
    if candidates.is_empty() {
        return Err(NetworkError::NotSupported("no security protocol enabled".into()));
    }
    let security = Multistream1::select(&mut stream, &candidates, cancel).await?;
    conn.record_protocol(&security);
    let mut stream: BoxedStream = if security == Secio1::protocol_name().to_string() {
        Box::new(Secio1::secure(conn, stream, &config.secio, cancel).await?)
    } else {
        conn.security_established().set(());
        stream
    };

    let mplex = Mplex67::protocol_name().to_string();
    Multistream1::select(&mut stream, std::slice::from_ref(&mplex), cancel).await?;
    conn.record_protocol(&mplex);
    let muxer = Muxer::new(stream, Role::Initiator, config.mplex.clone());
    {
        let conn = Arc::clone(conn);
        let muxer = Arc::clone(&muxer);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.run_muxer(muxer, cancel).await {
                tracing::debug!(connection = conn.id(), error = %e, "muxer stopped");
            }
            conn.dispose().await;
        });
    }

    let identify = Identify1::protocol_name().to_string();
    let mut substream = muxer.create_stream(&identify).await?;
    Multistream1::select(&mut substream, std::slice::from_ref(&identify), cancel).await?;
    Identify1::exchange(conn, &mut substream, cancel).await?;
    substream.shutdown().await?;

    tracing::info!(
        connection = conn.id(),
        peer = ?conn.remote().id,
        security = %security,
        "outbound connection upgraded"
    );
    Ok(muxer)
}
