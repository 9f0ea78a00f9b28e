use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::coord::partition::{check_min_partition_size, DEFAULT_MIN_PARTITION_SIZE};
use crate::core::errors::{Result, ScatterError};

/// Scatter-gather run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
    // Splitting policy
    /// Jobs above this size are split into sub-jobs, the rest become leaf tasks
    pub min_partition_size: u64,
    /// Items in a run launched from the command line
    pub total_items: u64,

    // Dispatcher
    /// Maximum number of leaf tasks in flight. Further leaf tasks wait on the
    /// bus until a slot frees up.
    pub max_workers: usize,
    /// Capacity of the message bus
    pub channel_capacity: usize,

    // Storage
    /// Keep coordinator state in sled at this path instead of memory
    pub state_db_path: Option<PathBuf>,
    /// Drop persisted coordinator state when the store is opened
    pub purge_on_startup: bool,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            min_partition_size: DEFAULT_MIN_PARTITION_SIZE,
            total_items: 10_000,
            max_workers: num_cpus::get() * 2,
            channel_capacity: 10_000,
            state_db_path: None,
            purge_on_startup: true,
        }
    }
}

impl ScatterConfig {
    /// Create a new builder for ScatterConfig
    pub fn builder() -> ScatterConfigBuilder {
        ScatterConfigBuilder::new()
    }

    /// Parse a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        check_min_partition_size(self.min_partition_size)?;
        if self.total_items == 0 {
            return Err(ScatterError::configuration(
                "total_items must be greater than 0",
            ));
        }
        if self.max_workers == 0 {
            return Err(ScatterError::configuration(
                "max_workers must be greater than 0",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ScatterError::configuration(
                "channel_capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Small in-memory setup for development and tests
    pub fn development() -> Self {
        Self {
            total_items: 1_000,
            max_workers: 4,
            channel_capacity: 1_024,
            ..Default::default()
        }
    }
}

/// Builder for ScatterConfig
pub struct ScatterConfigBuilder {
    config: ScatterConfig,
}

impl ScatterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ScatterConfig::default(),
        }
    }

    pub fn min_partition_size(mut self, size: u64) -> Self {
        self.config.min_partition_size = size;
        self
    }

    pub fn total_items(mut self, items: u64) -> Self {
        self.config.total_items = items;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn state_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_db_path = Some(path.into());
        self
    }

    pub fn purge_on_startup(mut self, purge: bool) -> Self {
        self.config.purge_on_startup = purge;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ScatterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ScatterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
