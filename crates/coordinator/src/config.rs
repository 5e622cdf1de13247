use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Database assumed for unqualified table names.
    #[serde(default)]
    pub default_db: String,
    #[serde(default = "default_sharding_config")]
    pub sharding_config: String,
    /// Picks the fixed group `partitions[fixture % n]` for unsharded statements.
    #[serde(default)]
    pub fixture: u32,
    #[serde(default = "default_merged_output_size")]
    pub merged_output_size: usize,
    #[serde(default)]
    pub allow_nested_subquery: bool,
    #[serde(default)]
    pub partition_mode: bool,
    #[serde(default = "default_shard_timeout_ms")]
    pub shard_timeout_ms: u64,
}

fn default_sharding_config() -> String {
    "config/sharding.json".to_string()
}

fn default_merged_output_size() -> usize {
    8192
}

fn default_shard_timeout_ms() -> u64 {
    5000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_db: String::new(),
            sharding_config: default_sharding_config(),
            fixture: 0,
            merged_output_size: default_merged_output_size(),
            allow_nested_subquery: false,
            partition_mode: false,
            shard_timeout_ms: default_shard_timeout_ms(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let config_file_path = std::env::var("SHARDGATE_CONFIG_PATH")
            .unwrap_or_else(|_| "crates/coordinator/config/default.toml".to_string());
        Self::from_file(&config_file_path)
    }

    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let s = config::Config::builder()
            .add_source(config::File::with_name(path).required(true))
            .add_source(config::Environment::with_prefix("SHARDGATE").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }
}
