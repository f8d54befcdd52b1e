//! Configuration for the token index

use crate::source::TrackedScripts;
use crate::types::{PolicyId, ScriptHash};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    #[serde(default)]
    pub rocksdb: RocksDBConfig,

    /// Event ingestion configuration
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/token-index"),
            service_name: "token-index".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            indexer: IndexerConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Event ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unit string of the native coin
    pub native_unit: String,

    /// Ingestion mailbox capacity (blocks)
    pub mailbox_capacity: usize,

    /// Upper bound on history page size
    pub max_history_limit: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            native_unit: "lovelace".to_string(),
            mailbox_capacity: 1000,
            max_history_limit: 1000,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Script holding registry nodes (hex); unset until bootstrap
    pub spend_script_hash: Option<String>,

    /// Policy minting the node NFTs (hex)
    pub mint_policy_id: Option<String>,

    /// Coin locked with each node output
    #[serde(default = "default_min_node_coin")]
    pub min_node_coin: u64,

    /// Network id written into derived addresses (0 testnets, 1 mainnet)
    #[serde(default)]
    pub network_id: u8,

    /// Programmable-logic payment scripts to index (hex)
    #[serde(default)]
    pub tracked_scripts: Vec<String>,
}

fn default_min_node_coin() -> u64 {
    1_000_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            spend_script_hash: None,
            mint_policy_id: None,
            min_node_coin: default_min_node_coin(),
            network_id: 0,
            tracked_scripts: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Parsed registry spend script
    pub fn spend_script(&self) -> crate::Result<Option<ScriptHash>> {
        self.spend_script_hash
            .as_deref()
            .map(ScriptHash::from_hex)
            .transpose()
    }

    /// Parsed node NFT policy
    pub fn mint_policy(&self) -> crate::Result<Option<PolicyId>> {
        self.mint_policy_id.as_deref().map(PolicyId::from_hex).transpose()
    }

    /// Parsed tracked scripts
    pub fn tracked(&self) -> crate::Result<TrackedScripts> {
        let scripts = self
            .tracked_scripts
            .iter()
            .map(|s| ScriptHash::from_hex(s))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(TrackedScripts::new(scripts))
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables
    pub fn apply_env(&mut self) {
        if let Ok(data_dir) = std::env::var("TOKEN_INDEX_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(unit) = std::env::var("TOKEN_INDEX_NATIVE_UNIT") {
            self.indexer.native_unit = unit;
        }

        if let Ok(script) = std::env::var("TOKEN_INDEX_REGISTRY_SCRIPT") {
            self.registry.spend_script_hash = Some(script);
        }

        if let Ok(policy) = std::env::var("TOKEN_INDEX_REGISTRY_POLICY") {
            self.registry.mint_policy_id = Some(policy);
        }
    }

    /// Check that every hex field parses
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |e: crate::Error| crate::Error::Config(e.to_string());
        self.registry.spend_script().map_err(invalid)?;
        self.registry.mint_policy().map_err(invalid)?;
        self.registry.tracked().map_err(invalid)?;
        if self.registry.network_id > 0x0f {
            return Err(crate::Error::Config("network_id must fit in four bits".to_string()));
        }
        if self.indexer.mailbox_capacity == 0 {
            return Err(crate::Error::Config("mailbox_capacity must be positive".to_string()));
        }
        Ok(())
    }
}
