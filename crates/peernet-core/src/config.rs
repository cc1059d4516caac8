use serde::{Deserialize, Serialize};

/// Stream multiplexer tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MplexConfig {
    /// Largest frame payload accepted from the remote, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Unread messages a substream may hold. One more resets that substream.
    #[serde(default = "default_queue_depth")]
    pub substream_queue_depth: usize,
}

/// SECIO algorithm preferences, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecioConfig {
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<String>,
    #[serde(default = "default_ciphers")]
    pub ciphers: Vec<String>,
    #[serde(default = "default_hashes")]
    pub hashes: Vec<String>,
}

/// Identity strings and which security protocols the swarm offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_agent_version")]
    pub agent_version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_true")]
    pub enable_secio: bool,
    #[serde(default = "default_true")]
    pub enable_plaintext: bool,
}

fn default_max_message_size() -> usize {
    1024 * 1024
}
fn default_queue_depth() -> usize {
    32
}
fn default_exchanges() -> Vec<String> {
    vec!["X25519".into()]
}
fn default_ciphers() -> Vec<String> {
    vec!["AES-256".into(), "AES-128".into(), "Blowfish".into()]
}
fn default_hashes() -> Vec<String> {
    vec!["SHA256".into(), "SHA512".into()]
}
fn default_agent_version() -> String {
    format!("peernet/{}", env!("CARGO_PKG_VERSION"))
}
fn default_protocol_version() -> String {
    "ipfs/0.1.0".into()
}
fn default_true() -> bool {
    true
}

impl Default for MplexConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            substream_queue_depth: default_queue_depth(),
        }
    }
}

impl Default for SecioConfig {
    fn default() -> Self {
        Self {
            exchanges: default_exchanges(),
            ciphers: default_ciphers(),
            hashes: default_hashes(),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            agent_version: default_agent_version(),
            protocol_version: default_protocol_version(),
            enable_secio: true,
            enable_plaintext: true,
        }
    }
}
