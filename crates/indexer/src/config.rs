//! Configuration for the ingestion core.
//!
//! Loaded from a TOML file with defaults for every key, then validated once
//! at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use eosearch_core::Name;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Cluster endpoints and index naming.
    #[serde(default)]
    pub elasticsearch: ElasticConfig,

    /// Queue, cache and start-block tuning.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Which collections to write.
    #[serde(default)]
    pub store: StoreConfig,

    /// Action filtering rules.
    #[serde(default)]
    pub filter: FilterRules,
}

/// Elasticsearch connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// One or more cluster endpoints.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Name of the physical index holding every collection.
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Drop and recreate the index on startup.
    #[serde(default)]
    pub delete_index_on_startup: bool,
}

/// Ingestion tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Soft bound on each ingress queue before producers start sleeping.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum number of resident ABI serializers.
    #[serde(default = "default_abi_cache_size")]
    pub abi_cache_size: usize,

    /// First block to index; 0 means from genesis.
    #[serde(default)]
    pub start_block_num: u32,

    /// Per-call decode budget for ABI-driven payload decoding.
    #[serde(default = "default_abi_serializer_max_time_ms")]
    pub abi_serializer_max_time_ms: u64,

    /// The privileged account whose actions drive the account projection.
    #[serde(default = "default_system_account")]
    pub system_account: String,
}

/// Per-collection store switches; everything defaults to on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_true")]
    pub blocks: bool,
    #[serde(default = "default_true")]
    pub block_states: bool,
    #[serde(default = "default_true")]
    pub transactions: bool,
    #[serde(default = "default_true")]
    pub transaction_traces: bool,
    #[serde(default = "default_true")]
    pub action_traces: bool,
}

/// Raw filter rules; parsed into a `filter::ActionFilter` at startup.
///
/// Each entry is `receiver:action:actor` with empty components acting as
/// wildcards; the single entry `"*"` in `on` admits everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    #[serde(default = "default_filter_on")]
    pub on: Vec<String>,
    #[serde(default)]
    pub out: Vec<String>,
}

fn default_endpoints() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_index_name() -> String {
    "eos".to_string()
}

fn default_max_queue_size() -> usize {
    1024
}

fn default_abi_cache_size() -> usize {
    2048
}

fn default_abi_serializer_max_time_ms() -> u64 {
    500
}

fn default_system_account() -> String {
    "eosio".to_string()
}

fn default_true() -> bool {
    true
}

fn default_filter_on() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            index_name: default_index_name(),
            delete_index_on_startup: false,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            abi_cache_size: default_abi_cache_size(),
            start_block_num: 0,
            abi_serializer_max_time_ms: default_abi_serializer_max_time_ms(),
            system_account: default_system_account(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blocks: true,
            block_states: true,
            transactions: true,
            transaction_traces: true,
            action_traces: true,
        }
    }
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            on: default_filter_on(),
            out: Vec::new(),
        }
    }
}

impl IndexerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: IndexerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: IndexerConfig =
            toml::from_str(toml).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.elasticsearch.endpoints.is_empty() {
            anyhow::bail!("elasticsearch.endpoints cannot be empty");
        }
        for endpoint in &self.elasticsearch.endpoints {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!("elasticsearch endpoint '{}' must be an http(s) URL", endpoint);
            }
        }
        if self.elasticsearch.index_name.is_empty() {
            anyhow::bail!("elasticsearch.index_name cannot be empty");
        }
        if self.ingest.max_queue_size == 0 {
            anyhow::bail!("ingest.max_queue_size must be > 0");
        }
        if self.ingest.abi_cache_size == 0 {
            anyhow::bail!("ingest.abi_cache_size must be > 0");
        }
        if self.ingest.abi_serializer_max_time_ms == 0 {
            anyhow::bail!("ingest.abi_serializer_max_time_ms must be > 0");
        }
        Name::new(&self.ingest.system_account)
            .map_err(|e| anyhow::anyhow!("ingest.system_account: {e}"))?;
        Ok(())
    }

    /// The decode budget as a [`Duration`].
    pub fn abi_serializer_max_time(&self) -> Duration {
        Duration::from_millis(self.ingest.abi_serializer_max_time_ms)
    }

    /// The parsed system account name; `validate` guarantees this succeeds.
    pub fn system_account(&self) -> Name {
        Name::new(&self.ingest.system_account).unwrap_or(Name::ZERO)
    }
}
