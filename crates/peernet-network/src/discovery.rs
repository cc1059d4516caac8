//! Peer discovery sources.
//!
//! A source publishes [`DiscoveryEvent`]s into a channel; the swarm consumes
//! the channel and registers what it hears about. Sources never see who is
//! listening, and stopping one does not affect the others.

use std::str::FromStr;

use async_trait::async_trait;
use libp2p::Multiaddr;
use peernet_core::CancelToken;
use tokio::sync::mpsc;

use crate::error::NetworkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A peer is reachable at `address` (which ends in its peer id).
    PeerDiscovered { address: Multiaddr },
}

#[async_trait]
pub trait Discovery: Send + Sync {
    fn name(&self) -> &'static str;

    /// Publish events until done or until `cancel` fires.
    async fn start(
        &self,
        events: mpsc::Sender<DiscoveryEvent>,
        cancel: CancelToken,
    ) -> Result<(), NetworkError>;
}

/// Announces a fixed list of bootstrap peers once.
#[derive(Debug, Clone, Default)]
pub struct BootstrapDiscovery {
    addresses: Vec<Multiaddr>,
}

impl BootstrapDiscovery {
    /// Parse the bootstrap list.
    pub fn new(addresses: Vec<String>) -> Result<Self, NetworkError> {
        let mut parsed = Vec::with_capacity(addresses.len());
        for addr_str in &addresses {
            let addr = Multiaddr::from_str(addr_str).map_err(|e| {
                NetworkError::InvalidAddress(format!("invalid bootstrap addr '{}': {}", addr_str, e))
            })?;
            parsed.push(addr);
        }
        Ok(Self { addresses: parsed })
    }

    pub fn addresses(&self) -> &[Multiaddr] {
        &self.addresses
    }
}

#[async_trait]
impl Discovery for BootstrapDiscovery {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    async fn start(
        &self,
        events: mpsc::Sender<DiscoveryEvent>,
        cancel: CancelToken,
    ) -> Result<(), NetworkError> {
        for address in &self.addresses {
            let event = DiscoveryEvent::PeerDiscovered {
                address: address.clone(),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = events.send(event) => {
                    if sent.is_err() {
                        tracing::debug!("discovery receiver dropped");
                        return Ok(());
                    }
                }
            }
            tracing::debug!(%address, "bootstrap peer announced");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty_bootstrap() {
        let discovery = BootstrapDiscovery::new(vec![]).unwrap();
        assert!(discovery.addresses().is_empty());
    }

    #[test]
    fn test_new_with_invalid_bootstrap() {
        let result = BootstrapDiscovery::new(vec!["not-a-valid-multiaddr".to_string()]);
        assert!(matches!(result, Err(NetworkError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_announces_every_address() {
        let discovery = BootstrapDiscovery::new(vec![
            "/ip4/127.0.0.1/tcp/9000".to_string(),
            "/ip4/192.168.1.1/tcp/9001".to_string(),
        ])
        .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        discovery.start(tx, CancelToken::new()).await.unwrap();

        let mut seen = Vec::new();
        while let Some(DiscoveryEvent::PeerDiscovered { address }) = rx.recv().await {
            seen.push(address);
        }
        assert_eq!(seen, discovery.addresses());
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_quietly() {
        let discovery = BootstrapDiscovery::new(vec!["/ip4/127.0.0.1/tcp/9000".to_string()]).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(discovery.start(tx, CancelToken::new()).await.is_ok());
    }
}
