pub mod validation;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use validation::validate_config;

/// Main settings configuration for atlas-pathwatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level for application logging (e.g., "info", "debug", "warn", "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Measurement API endpoint configuration
    #[serde(default)]
    pub api: ApiSettings,
    /// Candidate classification parameters
    #[serde(default)]
    pub classify: ClassifySettings,
    /// Number of worker threads for shard processing (0 = one per core)
    #[serde(default)]
    pub workers: usize,
}

/// Measurement API endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the measurement API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Number of parallel result downloads
    #[serde(default = "default_parallel_downloads")]
    pub parallel_downloads: usize,
}

fn default_base_url() -> String {
    "https://atlas.ripe.net/api/v2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_parallel_downloads() -> usize {
    4
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            parallel_downloads: default_parallel_downloads(),
        }
    }
}

/// Candidate classification and binning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifySettings {
    /// Minimum number of traceroutes required for an accepted candidate pair
    #[serde(default = "default_min_traceroutes")]
    pub min_traceroutes: u64,
    /// Width of statistics time bins in seconds
    #[serde(default = "default_bin_size_secs")]
    pub bin_size_secs: i64,
}

fn default_min_traceroutes() -> u64 {
    24
}

fn default_bin_size_secs() -> i64 {
    crate::bins::DEFAULT_BIN_SIZE_SECS
}

impl Default for ClassifySettings {
    fn default() -> Self {
        Self {
            min_traceroutes: default_min_traceroutes(),
            bin_size_secs: default_bin_size_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api: ApiSettings::default(),
            classify: ClassifySettings::default(),
            workers: 0,
        }
    }
}

impl Settings {
    /// Load configuration from a specific config file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Construct settings, env vars take priority still
        let settings = ConfigBuilder::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()))
            .add_source(
                Environment::with_prefix("PW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate the configuration
        validate_config(&settings)?;

        Ok(settings)
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        // NOTE: It's ok if this fails (file might not exist)
        let _ = dotenvy::dotenv();

        // Construct settings
        let settings: Settings = ConfigBuilder::builder()
            .add_source(
                Environment::with_prefix("PW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate the configuration
        validate_config(&settings)?;

        Ok(settings)
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tAPI Base URL: {}\n\
             \tRequest Timeout: {}s\n\
             \tParallel Downloads: {}\n\
             \tMin Traceroutes: {}\n\
             \tBin Size: {}s\n\
             \tWorkers: {}\n\
             }}",
            self.log_level,
            self.api.base_url,
            self.api.request_timeout_secs,
            self.api.parallel_downloads,
            self.classify.min_traceroutes,
            self.classify.bin_size_secs,
            self.workers,
        )
    }
}
