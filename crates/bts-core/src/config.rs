use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::OsVersion;

/// First OS version on which one-off and periodic work goes to the native
/// job scheduler instead of the legacy deferred-execution service.
pub const DEFAULT_MODERN_BACKEND_MIN_OS_VERSION: u32 = 23;
pub const DEFAULT_MAIN_THREAD_NAME: &str = "bts-main";
pub const DEFAULT_LOG_FILTER: &str = "bts=info";

/// Top-level config (bts.toml + BTS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_modern_min_os_version")]
    pub modern_backend_min_os_version: u32,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            modern_backend_min_os_version: DEFAULT_MODERN_BACKEND_MIN_OS_VERSION,
            database: DatabaseConfig::default(),
            dispatch: DispatchConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding the task registry.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Name given to the thread that runs task owners' callbacks.
    #[serde(default = "default_main_thread_name")]
    pub main_thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            main_thread_name: default_main_thread_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_modern_min_os_version() -> u32 {
    DEFAULT_MODERN_BACKEND_MIN_OS_VERSION
}
fn default_main_thread_name() -> String {
    DEFAULT_MAIN_THREAD_NAME.to_string()
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bts/tasks.db", home)
}

impl SchedulerConfig {
    /// Load config from a TOML file with BTS_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `BTS_DATABASE__PATH`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        if !std::path::Path::new(&path).exists() {
            debug!(%path, "no config file; using defaults and BTS_* overrides");
        }

        let config: SchedulerConfig =
            Figment::from(Serialized::defaults(SchedulerConfig::default()))
                .merge(Toml::file(&path))
                .merge(Env::prefixed("BTS_").split("__"))
                .extract()
                .map_err(|e| crate::error::BtsError::Config(e.to_string()))?;

        debug!(
            %path,
            threshold = config.modern_backend_min_os_version,
            db = %config.database.path,
            "config loaded"
        );
        Ok(config)
    }

    pub fn modern_threshold(&self) -> OsVersion {
        OsVersion(self.modern_backend_min_os_version)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.bts/bts.toml", home)
}
