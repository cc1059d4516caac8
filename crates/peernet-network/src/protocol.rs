//! The capability every negotiable protocol exposes, and the registry that
//! maps protocol names to fresh handler instances.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use peernet_core::{CancelToken, MplexConfig, SecioConfig, SwarmConfig, VersionedName};

use crate::connection::PeerConnection;
use crate::error::NetworkError;
use crate::identify::Identify1;
use crate::mplex::Mplex67;
use crate::multistream::Multistream1;
use crate::plaintext::Plaintext1;
use crate::secio::Secio1;
use crate::stream::BoxedStream;

/// A protocol selected by multistream negotiation.
///
/// `handle` receives ownership of the stream the protocol was selected on.
/// Security protocols wrap it and hand the result back to multistream; the
/// muxer turns it into substreams; leaf protocols consume it.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn name(&self) -> VersionedName;

    /// Whether the protocol may only be selected once the connection is
    /// secured. Security protocols and multistream itself opt out.
    fn requires_security(&self) -> bool {
        true
    }

    async fn handle(
        &self,
        conn: Arc<PeerConnection>,
        stream: BoxedStream,
        cancel: CancelToken,
    ) -> Result<(), NetworkError>;
}

/// Produces a fresh handler per negotiation.
pub type ProtocolFactory = Arc<dyn Fn() -> Box<dyn ProtocolHandler> + Send + Sync>;

/// Name-to-factory table consulted by the multistream listener.
#[derive(Default)]
pub struct ProtocolRegistry {
    factories: DashMap<String, ProtocolFactory>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in protocols, security ones as `swarm` enables.
    pub fn with_defaults(swarm: &SwarmConfig, mplex: &MplexConfig, secio: &SecioConfig) -> Self {
        let registry = Self::new();
        registry.register(Multistream1::protocol_name(), || Box::new(Multistream1));
        if swarm.enable_plaintext {
            registry.register(Plaintext1::protocol_name(), || Box::new(Plaintext1));
        }
        if swarm.enable_secio {
            let secio = secio.clone();
            registry.register(Secio1::protocol_name(), move || {
                Box::new(Secio1::new(secio.clone()))
            });
        }
        let mplex = mplex.clone();
        registry.register(Mplex67::protocol_name(), move || {
            Box::new(Mplex67::new(mplex.clone()))
        });
        registry.register(Identify1::protocol_name(), || Box::new(Identify1));
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&self, name: VersionedName, factory: F)
    where
        F: Fn() -> Box<dyn ProtocolHandler> + Send + Sync + 'static,
    {
        tracing::debug!(protocol = %name, "protocol registered");
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the handler registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn ProtocolHandler>> {
        // Clone the factory out so the shard lock is not held while it runs.
        let factory = self.factories.get(name).map(|f| Arc::clone(f.value()))?;
        Some(factory())
    }

    /// Registered names in name-then-version order.
    pub fn names(&self) -> Vec<String> {
        let mut parsed: Vec<(Option<VersionedName>, String)> = self
            .factories
            .iter()
            .map(|entry| (entry.key().parse().ok(), entry.key().clone()))
            .collect();
        parsed.sort();
        parsed.into_iter().map(|(_, name)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("protocols", &self.names())
            .finish()
    }
}
