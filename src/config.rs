use config::{Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string() }
    }
}

/// Settings shared across the daemon: pool sizing and the database the
/// `UserStore` is backed by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub log: LogConfig,
    pub database_url: String,
    /// Maximum number of scheduler-bridge tasks running concurrently.
    pub pool_workers: usize,
    /// Suppresses per-error-class metrics and verbose logs.
    pub stress_test_mode: bool,
}

/// Per-worker tunables that don't vary with the user being synced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            idle_timeout_secs: 23 * 60,
        }
    }
}

impl DaemonConfig {
    pub fn new(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let default_config_path = "config/default.toml";
        let path_to_use = config_path.unwrap_or(default_config_path);

        let builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("database_url", "sqlite:data/sync.db")?
            .set_default("pool_workers", 10)?
            .set_default("stress_test_mode", false)?
            .add_source(File::with_name(path_to_use).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}
