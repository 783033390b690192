//! Configuration using Figment.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. `taurus.toml` (or the file passed to [`TaurusConfig::load_from`])
//! 3. environment variables prefixed with `TAURUS_`, nested keys separated
//!    by a double underscore
//!
//! # Example
//! ```no_run
//! use taurus_core::config::TaurusConfig;
//!
//! // TAURUS_POLLING__DEFAULT_PERIOD_MS=500 overrides the file
//! let config = TaurusConfig::load()?;
//! config.validate()?;
//! println!("default scheme: {}", config.default_scheme);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::basetypes::SerializationMode;
use crate::error::{Result, TaurusError};
use crate::validator::uri::scheme_from_name;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "taurus.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaurusConfig {
    /// Scheme assumed for names without one.
    #[serde(default = "default_scheme")]
    pub default_scheme: String,
    /// Default dispatch of jobs and first events.
    #[serde(default)]
    pub serialization_mode: SerializationMode,
    /// Reject names only accepted by lenient grammars.
    #[serde(default = "default_true")]
    pub strict_model_names: bool,
    /// Manager thread pool.
    #[serde(default)]
    pub thread_pool: ThreadPoolConfig,
    /// Client-side polling.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Logging and deprecation reporting.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Built-in simulation scheme.
    #[serde(default)]
    pub sim: SimConfig,
    /// Maps behind `res:` names.
    #[serde(default)]
    pub resources: ResourcesConfig,
}

/// Thread pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPoolConfig {
    /// Worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queue capacity; 0 means unbounded.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Period of new attributes, in milliseconds.
    #[serde(default = "default_period")]
    pub default_period_ms: u64,
    /// Whether timers run.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level: critical, error, warning, info, debug or trace.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: pretty, compact or json.
    #[serde(default = "default_log_format")]
    pub format: String,
    /// How many times each deprecation is logged. Unset means always;
    /// negative turns deprecated calls into errors.
    #[serde(default)]
    pub max_deprecations_logged: Option<i64>,
}

/// Simulation scheme settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Authority used when names omit one.
    #[serde(default = "default_authority")]
    pub default_authority: String,
    /// Whether names are case sensitive.
    #[serde(default)]
    pub case_sensitive: bool,
}

/// Resource maps for the `res` scheme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// TOML files of keys and model names, searched in listed order.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Keys and the model names they stand for. Searched first.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

fn default_scheme() -> String {
    "sim".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    5
}

fn default_queue_size() -> usize {
    1000
}

fn default_period() -> u64 {
    crate::attribute::DFT_POLLING_PERIOD_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_authority() -> String {
    "//localhost:10000".to_string()
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_period_ms: default_period(),
            enabled: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            max_deprecations_logged: None,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            default_authority: default_authority(),
            case_sensitive: false,
        }
    }
}

impl Default for TaurusConfig {
    fn default() -> Self {
        Self {
            default_scheme: default_scheme(),
            serialization_mode: SerializationMode::default(),
            strict_model_names: true,
            thread_pool: ThreadPoolConfig::default(),
            polling: PollingConfig::default(),
            logging: LoggingConfig::default(),
            sim: SimConfig::default(),
            resources: ResourcesConfig::default(),
        }
    }
}

impl TaurusConfig {
    /// Load from `taurus.toml` in the working directory and the environment.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load from `path` and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(TaurusConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TAURUS_").split("__"))
            .extract()
    }

    /// Check semantic constraints the types cannot express.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let parsed = scheme_from_name(&format!("{}:", self.default_scheme), false, "");
        if parsed.as_deref() != Some(self.default_scheme.to_lowercase().as_str()) {
            return Err(format!("Invalid default_scheme '{}'", self.default_scheme));
        }
        if self.thread_pool.workers == 0 {
            return Err("thread_pool.workers must be at least 1".to_string());
        }
        if self.polling.default_period_ms == 0 {
            return Err("polling.default_period_ms must be positive".to_string());
        }
        crate::logging::parse_log_level(&self.logging.level)?;
        crate::logging::parse_output_format(&self.logging.format)?;
        if let Some(key) = self
            .resources
            .values
            .keys()
            .find(|k| crate::schemes::res::resource_key(&format!("res:{}", k)).is_none())
        {
            return Err(format!("Invalid resource key '{}'", key));
        }
        if !self.sim.default_authority.starts_with("//") {
            return Err(format!(
                "Invalid sim.default_authority '{}'. Expected //host:port",
                self.sim.default_authority
            ));
        }
        Ok(())
    }

    /// Serialize as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TaurusError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TaurusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thread_pool.workers, 5);
        assert_eq!(config.thread_pool.queue_size, 1000);
        assert_eq!(config.polling.default_period_ms, 3000);
        assert_eq!(config.serialization_mode, SerializationMode::Concurrent);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = TaurusConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());

        let mut config = TaurusConfig::default();
        config.polling.default_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TaurusConfig::default();
        config.default_scheme = "1bad".to_string();
        assert!(config.validate().is_err());

        let mut config = TaurusConfig::default();
        config
            .resources
            .values
            .insert("not a key".to_string(), "sim:a/b/c".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_output_parses_back() {
        let config = TaurusConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed: TaurusConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
