//! Node configuration loading and management.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use libp2p::Multiaddr;
use peernet_bitswap::WantCancellation;
use peernet_network::{AccessPolicy, BlackList, StackConfig, WhiteList};
use serde::{Deserialize, Serialize};

/// Full configuration for a Peernet node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PeernetConfig {
    /// Listen addresses, bootstrap peers and address policy.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Protocol tunables for the connection stack.
    #[serde(default)]
    pub protocols: StackConfig,

    /// Want-list settings.
    #[serde(default)]
    pub bitswap: BitswapConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Multiaddresses to listen on.
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<String>,
    /// Bootstrap peer multiaddresses, each ending in `/p2p/<id>`.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    /// Addresses that may never be used.
    #[serde(default)]
    pub black_list: Vec<String>,
    /// If non-empty, the only addresses that may be used.
    #[serde(default)]
    pub white_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BitswapConfig {
    /// Whether one cancelled want unwants the block for every waiter
    /// (`whole-block`) or only for itself (`per-consumer`).
    #[serde(default)]
    pub cancellation: WantCancellation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Path to the keypair file. A fresh identity is generated per run if unset.
    #[serde(default)]
    pub keypair_path: Option<PathBuf>,
}

fn default_listen_addrs() -> Vec<String> {
    vec!["/ip4/0.0.0.0/tcp/4001".into()]
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(),
            bootstrap_peers: Vec::new(),
            black_list: Vec::new(),
            white_list: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn parse_addrs(addrs: &[String], what: &str) -> anyhow::Result<Vec<Multiaddr>> {
    addrs
        .iter()
        .map(|a| Multiaddr::from_str(a).with_context(|| format!("invalid {} address '{}'", what, a)))
        .collect()
}

impl PeernetConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: PeernetConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn listen_multiaddrs(&self) -> anyhow::Result<Vec<Multiaddr>> {
        parse_addrs(&self.network.listen_addrs, "listen")
    }

    /// Build the swarm's address policy from the configured lists.
    pub fn access_policy(&self) -> anyhow::Result<AccessPolicy<Multiaddr>> {
        let black_list: BlackList<Multiaddr> =
            parse_addrs(&self.network.black_list, "blacklisted")?.into_iter().collect();
        let white_list: WhiteList<Multiaddr> =
            parse_addrs(&self.network.white_list, "whitelisted")?.into_iter().collect();
        Ok(AccessPolicy::new(black_list, white_list))
    }
}
