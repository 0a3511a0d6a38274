//! Configuration management
//!
//! Handles configuration loading (JSON or TOML), defaults and validation.

use crate::network::topic::Topic;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chain identifier carried in every message header
    #[serde(default = "default_chain_id")]
    pub chain_id: u16,

    /// Peer-to-peer transport settings
    #[serde(default)]
    pub p2p: P2pConfig,

    /// Transaction pool settings
    #[serde(default)]
    pub mempool: MempoolConfig,

    /// Storage settings (in-memory store when absent)
    pub storage: Option<StorageConfig>,

    /// Logging configuration
    pub logging: Option<LoggingConfig>,
}

fn default_chain_id() -> u16 {
    1
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            p2p: P2pConfig::default(),
            mempool: MempoolConfig::default(),
            storage: None,
            logging: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.p2p.validate()?;
        self.mempool.validate()?;
        Ok(())
    }
}

/// Listening port of each topic. Every node uses the same ports, so a redial
/// to a peer always targets `peer_ip:port(topic)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicPorts {
    pub nonce_broadcast: u16,
    pub self_nonce: u16,
    pub transactions: u16,
    pub block_sync: u16,
    pub rpc: u16,
}

impl Default for TopicPorts {
    fn default() -> Self {
        Self {
            nonce_broadcast: 9091,
            self_nonce: 9092,
            transactions: 9093,
            block_sync: 9094,
            rpc: 9095,
        }
    }
}

impl TopicPorts {
    /// Port assigned to `topic`
    pub fn port(&self, topic: Topic) -> u16 {
        match topic {
            Topic::NonceBroadcast => self.nonce_broadcast,
            Topic::SelfNonce => self.self_nonce,
            Topic::Transactions => self.transactions,
            Topic::BlockSync => self.block_sync,
            Topic::Rpc => self.rpc,
        }
    }

    /// Override the port of one topic (tests bind to OS-assigned ports)
    pub fn set_port(&mut self, topic: Topic, port: u16) {
        match topic {
            Topic::NonceBroadcast => self.nonce_broadcast = port,
            Topic::SelfNonce => self.self_nonce = port,
            Topic::Transactions => self.transactions = port,
            Topic::BlockSync => self.block_sync = port,
            Topic::Rpc => self.rpc = port,
        }
    }
}

/// Peer-to-peer transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Local address every topic listener binds to
    #[serde(default = "default_listen_ip")]
    pub listen_ip: IpAddr,

    /// Per-topic listening ports
    #[serde(default)]
    pub ports: TopicPorts,

    /// Trust assigned to a freshly registered peer
    #[serde(default = "default_max_trust")]
    pub max_trust: u8,

    /// Ban duration in seconds
    #[serde(default = "default_ban_duration")]
    pub ban_duration_secs: u64,

    /// Dial attempts before the address is banned
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Timeout of a single dial attempt in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Initial backoff between dial attempts in milliseconds
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff_ms: u64,

    /// Write deadline for a single frame in milliseconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Size of a single socket read
    #[serde(default = "default_read_chunk")]
    pub read_chunk_size: usize,

    /// Largest frame accepted before the sender is penalised
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Consecutive read errors tolerated before the connection is redialled
    #[serde(default = "default_read_error_ceiling")]
    pub read_error_ceiling: u32,

    /// Pause between retried reads in milliseconds
    #[serde(default = "default_read_retry_delay")]
    pub read_retry_delay_ms: u64,

    /// Peer-set diff interval in milliseconds
    #[serde(default = "default_peer_diff_interval")]
    pub peer_diff_interval_ms: u64,

    /// Capacity of every internal queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Addresses that are never banned nor penalised
    #[serde(default)]
    pub whitelist: Vec<IpAddr>,
}

fn default_listen_ip() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_max_trust() -> u8 {
    5
}

fn default_ban_duration() -> u64 {
    3600 // 1 hour
}

fn default_connect_retries() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    3_000
}

fn default_connect_backoff() -> u64 {
    500
}

fn default_write_timeout() -> u64 {
    3_000
}

fn default_read_chunk() -> usize {
    64 * 1024
}

fn default_max_message_size() -> usize {
    32 * 1024 * 1024
}

fn default_read_error_ceiling() -> u32 {
    5
}

fn default_read_retry_delay() -> u64 {
    200
}

fn default_peer_diff_interval() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    10_000
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            ports: TopicPorts::default(),
            max_trust: default_max_trust(),
            ban_duration_secs: default_ban_duration(),
            connect_retries: default_connect_retries(),
            connect_timeout_ms: default_connect_timeout(),
            connect_backoff_ms: default_connect_backoff(),
            write_timeout_ms: default_write_timeout(),
            read_chunk_size: default_read_chunk(),
            max_message_size: default_max_message_size(),
            read_error_ceiling: default_read_error_ceiling(),
            read_retry_delay_ms: default_read_retry_delay(),
            peer_diff_interval_ms: default_peer_diff_interval(),
            queue_capacity: default_queue_capacity(),
            whitelist: Vec::new(),
        }
    }
}

impl P2pConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_delay_ms)
    }

    pub fn peer_diff_interval(&self) -> Duration {
        Duration::from_millis(self.peer_diff_interval_ms)
    }

    /// Validate transport limits
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_trust == 0 {
            anyhow::bail!("p2p.max_trust must be at least 1");
        }
        if self.connect_retries == 0 {
            anyhow::bail!("p2p.connect_retries must be at least 1");
        }
        if self.read_chunk_size == 0 {
            anyhow::bail!("p2p.read_chunk_size must be non-zero");
        }
        if self.max_message_size == 0 {
            anyhow::bail!("p2p.max_message_size must be non-zero");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("p2p.queue_capacity must be non-zero");
        }
        Ok(())
    }
}

/// Transaction pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_standard_capacity")]
    pub standard_capacity: usize,

    #[serde(default = "default_escrow_capacity")]
    pub escrow_capacity: usize,

    #[serde(default = "default_multisign_capacity")]
    pub multisign_capacity: usize,

    /// Ban count at which a hash is refused on admission
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u32,

    /// Ban count past which the counter is forgotten
    #[serde(default = "default_ban_forget_after")]
    pub ban_forget_after: u32,
}

fn default_standard_capacity() -> usize {
    10_000
}

fn default_escrow_capacity() -> usize {
    2_000
}

fn default_multisign_capacity() -> usize {
    2_000
}

fn default_ban_threshold() -> u32 {
    3
}

fn default_ban_forget_after() -> u32 {
    100
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            standard_capacity: default_standard_capacity(),
            escrow_capacity: default_escrow_capacity(),
            multisign_capacity: default_multisign_capacity(),
            ban_threshold: default_ban_threshold(),
            ban_forget_after: default_ban_forget_after(),
        }
    }
}

impl MempoolConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.standard_capacity == 0 || self.escrow_capacity == 0 || self.multisign_capacity == 0
        {
            anyhow::bail!("mempool capacities must be non-zero");
        }
        if self.ban_forget_after <= self.ban_threshold {
            anyhow::bail!(
                "mempool.ban_forget_after ({}) must exceed mempool.ban_threshold ({})",
                self.ban_forget_after,
                self.ban_threshold
            );
        }
        Ok(())
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendConfig {
    Redb,
    Sled,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: PathBuf,

    /// Backend (redb when absent)
    pub backend: Option<StorageBackendConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "pqchain_node::network=debug")
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.p2p.ports.port(Topic::Transactions), 9093);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let mut config = NodeConfig::default();
        config.chain_id = 7;
        config.p2p.whitelist.push("10.0.0.1".parse().unwrap());
        config.to_json_file(&path).unwrap();

        let loaded = NodeConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.chain_id, 7);
        assert_eq!(loaded.p2p.whitelist, config.p2p.whitelist);
    }

    #[test]
    fn test_toml_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "chain_id = 3\n[p2p]\nmax_trust = 2\n[mempool]\nstandard_capacity = 16\n",
        )
        .unwrap();

        let loaded = NodeConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.chain_id, 3);
        assert_eq!(loaded.p2p.max_trust, 2);
        assert_eq!(loaded.p2p.connect_retries, 5);
        assert_eq!(loaded.mempool.standard_capacity, 16);
        assert_eq!(loaded.mempool.escrow_capacity, 2_000);
    }

    #[test]
    fn test_validation_rejects_bad_ban_limits() {
        let mut config = NodeConfig::default();
        config.mempool.ban_forget_after = config.mempool.ban_threshold;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_port() {
        let mut ports = TopicPorts::default();
        ports.set_port(Topic::Rpc, 1234);
        assert_eq!(ports.port(Topic::Rpc), 1234);
    }
}
