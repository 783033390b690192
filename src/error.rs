//! Custom error types for the library.
//!
//! `TaurusError` is the single error type returned by fallible operations in
//! this crate. It is built with `thiserror`, so it composes with `?` and with
//! `anyhow` in the `taurus` binary.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidName`**: a name validator rejected a model name. Factory `get_*`
//!   calls fail fast with this variant and never return a half-built object.
//! - **`NotImplemented`**: a scheme back-end does not provide an operation
//!   (read, write, attribute info...). This signals an integration problem
//!   rather than a runtime data error.
//! - **`Backend`**: the back-end was reached but the operation failed. Poll
//!   paths turn this into an error value object instead of propagating it.
//! - **`Deprecated`**: raised instead of logged when the deprecation policy is
//!   configured to turn deprecated API usage into hard errors.
//! - **`Config`** / **`Configuration`**: figment extraction errors and semantic
//!   validation errors respectively.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, TaurusError>;

/// Errors produced by the model layer.
#[derive(Error, Debug)]
pub enum TaurusError {
    /// A model name was rejected by the validator for `kind`.
    #[error("Invalid {kind} name '{name}'")]
    InvalidName {
        /// Element kind the name was validated as (e.g. "device").
        kind: &'static str,
        /// The offending name.
        name: String,
    },

    /// No factory is registered for the scheme.
    #[error("Unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    /// The scheme back-end does not implement the operation.
    #[error("Operation '{0}' is not implemented by this scheme")]
    NotImplemented(&'static str),

    /// Enumeration construction or lookup failure.
    #[error("Enumeration error: {0}")]
    Enumeration(String),

    /// Error reported by a scheme back-end.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A job was submitted to a thread pool that has been joined.
    #[error("Thread pool '{0}' is closed")]
    PoolClosed(String),

    /// Deprecated API used while deprecations are configured as errors.
    #[error("Deprecated API: {0}")]
    Deprecated(String),

    /// An event generator was used while its events are deactivated.
    #[error("Event generator '{0}' does not have events active")]
    EventsInactive(String),

    /// The callback is already subscribed to the event generator.
    #[error("Callback already registered on '{0}'")]
    AlreadySubscribed(String),

    /// A (low, high) limit pair was not ordered.
    #[error("Invalid limits: {0}")]
    InvalidLimits(String),

    /// The object (or its owner) has been cleaned up.
    #[error("'{0}' has been disposed")]
    Disposed(String),

    /// A name grammar failed to compile.
    #[error("Invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure (thread spawn, files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaurusError {
    /// Shorthand for [`TaurusError::InvalidName`].
    pub fn invalid_name(kind: &'static str, name: impl Into<String>) -> Self {
        Self::InvalidName {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_name_message() {
        let err = TaurusError::invalid_name("device", "a/b");
        assert_eq!(err.to_string(), "Invalid device name 'a/b'");
    }

    #[test]
    fn io_errors_convert() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(TaurusError::Io(_))));
    }
}
