use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};

/// Tuning options for the adaptive chunking policy.
///
/// Defaults match a healthy process: 2,000 rows per chunk, growing towards
/// 10,000 when there is plenty of memory headroom and shrinking towards 500
/// when the resident set approaches the pressure threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Minimum rows per chunk when the process is under heavy memory pressure.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Rows per chunk when the process is healthy.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,

    /// Upper bound rows per chunk when there is ample memory headroom.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Memory utilization percentage that triggers producer throttling.
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold_percent: f64,

    /// How long (ms) to pause intake when pressure exceeds the threshold.
    #[serde(default = "default_pause_duration_ms")]
    pub pause_duration_ms: u64,

    /// Memory budget in bytes the pressure samplers measure against.
    /// When unset the samplers fall back to the cgroup limit or total
    /// system memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_budget_bytes: Option<u64>,
}

fn default_min_chunk_size() -> usize {
    500
}

fn default_chunk_size() -> usize {
    2_000
}

fn default_max_chunk_size() -> usize {
    10_000
}

fn default_pressure_threshold() -> f64 {
    80.0
}

fn default_pause_duration_ms() -> u64 {
    250
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            min_chunk_size: default_min_chunk_size(),
            default_chunk_size: default_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            pressure_threshold_percent: default_pressure_threshold(),
            pause_duration_ms: default_pause_duration_ms(),
            memory_budget_bytes: None,
        }
    }
}

/// Options for streaming query results via server-side cursors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Lower bound applied to the fetch size a caller requests.
    #[serde(default = "default_min_fetch_size")]
    pub min_fetch_size: usize,

    /// Upper bound applied to the fetch size a caller requests.
    #[serde(default = "default_max_fetch_size")]
    pub max_fetch_size: usize,

    /// Statement timeout applied to the streaming session.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_min_fetch_size() -> usize {
    500
}

fn default_max_fetch_size() -> usize {
    10_000
}

fn default_query_timeout_secs() -> u64 {
    30
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            min_fetch_size: default_min_fetch_size(),
            max_fetch_size: default_max_fetch_size(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

/// Allow-list and safety settings for bulk write requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Tables bulk operations may touch. Compared case-insensitively.
    #[serde(default)]
    pub allowed_tables: HashSet<String>,

    /// Column names bulk operations must never reference.
    #[serde(default = "default_sensitive_columns")]
    pub sensitive_columns: HashSet<String>,

    /// Batch size used when a request does not carry one.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
}

fn default_sensitive_columns() -> HashSet<String> {
    [
        "password",
        "password_hash",
        "secret",
        "secret_key",
        "access_key",
        "api_key",
        "token",
        "refresh_token",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_batch_size() -> usize {
    100
}

impl Default for BulkConfig {
    fn default() -> Self {
        BulkConfig {
            allowed_tables: HashSet::new(),
            sensitive_columns: default_sensitive_columns(),
            default_batch_size: default_batch_size(),
        }
    }
}

impl BulkConfig {
    pub fn table_allowed(&self, table: &str) -> bool {
        let lowered = table.to_lowercase();
        self.allowed_tables.iter().any(|t| t.to_lowercase() == lowered)
    }

    pub fn column_sensitive(&self, column: &str) -> bool {
        let lowered = column.to_lowercase();
        self.sensitive_columns.iter().any(|c| c.to_lowercase() == lowered)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    CouldNotReadFile(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    CouldNotParse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Process-wide engine configuration, read-only after startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub bulk: BulkConfig,
}

impl EngineConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.min_chunk_size == 0 {
            return Err(ConfigError::Invalid("min_chunk_size must be greater than 0".to_string()));
        }
        if self.chunking.min_chunk_size > self.chunking.max_chunk_size {
            return Err(ConfigError::Invalid(format!(
                "min_chunk_size ({}) cannot exceed max_chunk_size ({})",
                self.chunking.min_chunk_size, self.chunking.max_chunk_size
            )));
        }
        if self.chunking.default_chunk_size < self.chunking.min_chunk_size
            || self.chunking.default_chunk_size > self.chunking.max_chunk_size
        {
            return Err(ConfigError::Invalid(format!(
                "default_chunk_size ({}) must be within [{}, {}]",
                self.chunking.default_chunk_size,
                self.chunking.min_chunk_size,
                self.chunking.max_chunk_size
            )));
        }
        if !(0.0..=100.0).contains(&self.chunking.pressure_threshold_percent) {
            return Err(ConfigError::Invalid(
                "pressure_threshold_percent must be between 0 and 100 inclusive".to_string(),
            ));
        }
        if self.streaming.min_fetch_size == 0 {
            return Err(ConfigError::Invalid("min_fetch_size must be greater than 0".to_string()));
        }
        if self.streaming.min_fetch_size > self.streaming.max_fetch_size {
            return Err(ConfigError::Invalid(format!(
                "min_fetch_size ({}) cannot exceed max_fetch_size ({})",
                self.streaming.min_fetch_size, self.streaming.max_fetch_size
            )));
        }
        if self.bulk.default_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "default_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
