//! Tracing setup and deprecation reporting.
//!
//! Built on `tracing` and `tracing-subscriber`:
//! - pretty, compact or JSON output
//! - `RUST_LOG` filtering, falling back to the configured level
//! - taurus level names (`Critical`, `Warning`...) accepted alongside the
//!   tracing ones, and `TAURUSLOGLEVEL` read from the environment
//!
//! # Example
//! ```no_run
//! use taurus_core::{config::TaurusConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TaurusConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(scheme = %config.default_scheme, "Taurus started");
//! # Ok(())
//! # }
//! ```

use crate::config::{LoggingConfig, TaurusConfig};
use crate::error::{Result, TaurusError};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the configured log level.
pub const LOG_LEVEL_ENV: &str = "TAURUSLOGLEVEL";

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored.
    Pretty,
    /// Single line, no colors.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Whether span open/close events are logged.
    pub with_span_events: bool,
    /// Whether file and line are shown.
    pub with_file_and_line: bool,
    /// Whether thread names are shown.
    pub with_thread_names: bool,
    /// Whether ANSI colors are used (pretty format only).
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Options derived from the logging section; `TAURUSLOGLEVEL` wins
    /// over the configured level.
    pub fn from_config(config: &TaurusConfig) -> std::result::Result<Self, String> {
        let level = match level_from_env() {
            Some(level) => level,
            None => parse_log_level(&config.logging.level)?,
        };
        Ok(Self {
            level,
            format: parse_output_format(&config.logging.format)?,
            ..Default::default()
        })
    }

    /// Options with `level` and defaults otherwise.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the configuration.
pub fn init_from_config(config: &TaurusConfig) -> std::result::Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Calling it again once a subscriber is installed is a no-op, so tests and
/// embedding applications may call it freely.
pub fn init(config: TracingConfig) -> std::result::Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        OutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        OutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_thread_names(config.with_thread_names)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    result.or_else(|e| {
        if e.to_string()
            .contains("a global default trace dispatcher has already been set")
        {
            Ok(())
        } else {
            Err(format!("Failed to initialize tracing: {}", e))
        }
    })
}

/// Parse a level name. Taurus names map onto the nearest tracing level.
pub fn parse_log_level(level: &str) -> std::result::Result<Level, String> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warning" | "warn" => Ok(Level::WARN),
        "error" | "critical" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warning, error, critical",
            level
        )),
    }
}

/// Parse an output format name.
pub fn parse_output_format(format: &str) -> std::result::Result<OutputFormat, String> {
    match format.trim().to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        )),
    }
}

/// Level from `TAURUSLOGLEVEL`, if set and valid.
pub fn level_from_env() -> Option<Level> {
    let raw = std::env::var(LOG_LEVEL_ENV).ok()?;
    match parse_log_level(&raw) {
        Ok(level) => Some(level),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring {}", LOG_LEVEL_ENV);
            None
        }
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

// =============================================================================
// Deprecations
// =============================================================================

/// Counts deprecated API usage and decides whether to log it.
///
/// With no limit every occurrence is logged. A limit `n >= 0` logs each
/// distinct message at most `n` times. A negative limit turns deprecated
/// calls into [`TaurusError::Deprecated`].
#[derive(Debug, Default)]
pub struct DeprecationPolicy {
    max_logged: Option<i64>,
    counts: Mutex<HashMap<String, u64>>,
}

impl DeprecationPolicy {
    /// Policy with the given limit.
    pub fn new(max_logged: Option<i64>) -> Self {
        Self {
            max_logged,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Policy from the logging section.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(config.max_deprecations_logged)
    }

    /// Configured limit.
    pub fn max_logged(&self) -> Option<i64> {
        self.max_logged
    }

    /// Record one use of a deprecated API.
    pub fn deprecated(&self, msg: &str) -> Result<()> {
        let count = {
            let mut counts = self.counts.lock();
            let count = counts.entry(msg.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if self.max_logged.is_some_and(|max| max < 0) {
            return Err(TaurusError::Deprecated(msg.to_string()));
        }
        let within_limit = self
            .max_logged
            .map_or(true, |max| i64::try_from(count).map_or(false, |c| c <= max));
        if within_limit {
            tracing::warn!(count, "{}", msg);
        }
        Ok(())
    }

    /// Times `msg` was recorded.
    pub fn count(&self, msg: &str) -> u64 {
        self.counts.lock().get(msg).copied().unwrap_or(0)
    }

    /// Total deprecations recorded.
    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// Log how many deprecations were seen, if any.
    pub fn log_summary(&self) {
        let total = self.total();
        if total > 0 {
            let distinct = self.counts.lock().len();
            tracing::info!(total, distinct, "Deprecated API was used");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("Warning"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("Critical"), Ok(Level::ERROR)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_parse_output_format() {
        assert_eq!(parse_output_format("JSON"), Ok(OutputFormat::Json));
        assert!(parse_output_format("xml").is_err());
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn negative_limit_turns_deprecations_into_errors() {
        let policy = DeprecationPolicy::new(Some(-1));
        assert!(matches!(
            policy.deprecated("old call"),
            Err(TaurusError::Deprecated(_))
        ));
        assert!(policy.deprecated("old call").is_err());
        assert_eq!(policy.count("old call"), 2);
        assert_eq!(policy.total(), 2);
    }

    #[test]
    fn deprecations_are_counted_per_message() {
        let policy = DeprecationPolicy::new(Some(1));
        policy.deprecated("a").unwrap();
        policy.deprecated("a").unwrap();
        policy.deprecated("b").unwrap();
        assert_eq!(policy.count("a"), 2);
        assert_eq!(policy.count("b"), 1);
        assert_eq!(policy.total(), 3);
    }
}
