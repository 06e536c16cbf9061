//! Index configuration and loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// How long to postpone writing the index after a mutation while the
/// application is in the foreground.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_secs(20);

/// Flush delay while the application is backgrounded. Much shorter, so the
/// index reaches disk before the process can be killed.
pub const DEFAULT_BACKGROUND_FLUSH_DELAY: Duration = Duration::from_millis(100);

/// Default per-entry filesystem overhead estimate used by size-aware eviction.
///
/// Added to each entry's size before weighting by age, which also flattens the
/// curve so tiny entries sort roughly alike.
pub const DEFAULT_ENTRY_OVERHEAD_ESTIMATE: u32 = 512;

/// Runtime tunables for [`SimpleIndex`](crate::index::SimpleIndex).
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Delay between the last mutation and the deferred index write
    /// (foreground).
    pub flush_delay: Duration,
    /// Deferred-write delay while backgrounded.
    pub background_flush_delay: Duration,
    /// Whether eviction weighs entry age by entry size.
    pub eviction_with_size: bool,
    /// Per-entry overhead added to sizes during size-aware eviction.
    pub entry_overhead_estimate: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            flush_delay: DEFAULT_FLUSH_DELAY,
            background_flush_delay: DEFAULT_BACKGROUND_FLUSH_DELAY,
            eviction_with_size: true,
            entry_overhead_estimate: DEFAULT_ENTRY_OVERHEAD_ESTIMATE,
        }
    }
}

impl IndexConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the foreground flush delay.
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Set the background flush delay.
    pub fn with_background_flush_delay(mut self, delay: Duration) -> Self {
        self.background_flush_delay = delay;
        self
    }

    /// Enable or disable size-aware eviction.
    pub fn with_eviction_with_size(mut self, enabled: bool) -> Self {
        self.eviction_with_size = enabled;
        self
    }

    /// Set the eviction overhead estimate.
    pub fn with_entry_overhead_estimate(mut self, overhead: u32) -> Self {
        self.entry_overhead_estimate = overhead;
        self
    }
}

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimpleIndexConfig {
    /// Index configuration.
    pub index: Option<IndexConfigSpec>,
}

impl SimpleIndexConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `SIMPLE_INDEX_CONFIG` env var (if set),
    /// then apply `SIMPLE_INDEX__index__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("SIMPLE_INDEX_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("SIMPLE_INDEX__") {
                continue;
            }
            let path = key["SIMPLE_INDEX__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["index", "flush_delay_ms"] => {
                    self.index_mut().flush_delay_ms = Some(parse_value(&key, &value)?);
                }
                ["index", "background_flush_delay_ms"] => {
                    self.index_mut().background_flush_delay_ms =
                        Some(parse_value(&key, &value)?);
                }
                ["index", "eviction_with_size"] => {
                    self.index_mut().eviction_with_size = Some(parse_value(&key, &value)?);
                }
                ["index", "entry_overhead_estimate"] => {
                    self.index_mut().entry_overhead_estimate = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build an `IndexConfig` using defaults plus overrides.
    pub fn to_index_config(&self) -> IndexConfig {
        let mut config = IndexConfig::default();
        if let Some(index) = &self.index {
            index.apply_to(&mut config);
        }
        config
    }

    fn index_mut(&mut self) -> &mut IndexConfigSpec {
        if self.index.is_none() {
            self.index = Some(IndexConfigSpec::default());
        }
        self.index.as_mut().expect("index config")
    }
}

/// Index configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexConfigSpec {
    /// Foreground flush delay in milliseconds.
    pub flush_delay_ms: Option<u64>,
    /// Background flush delay in milliseconds.
    pub background_flush_delay_ms: Option<u64>,
    /// Whether eviction is size-aware.
    pub eviction_with_size: Option<bool>,
    /// Per-entry overhead estimate in bytes.
    pub entry_overhead_estimate: Option<u32>,
}

impl IndexConfigSpec {
    fn apply_to(&self, config: &mut IndexConfig) {
        if let Some(value) = self.flush_delay_ms {
            config.flush_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.background_flush_delay_ms {
            config.background_flush_delay = Duration::from_millis(value);
        }
        if let Some(value) = self.eviction_with_size {
            config.eviction_with_size = value;
        }
        if let Some(value) = self.entry_overhead_estimate {
            config.entry_overhead_estimate = value;
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
