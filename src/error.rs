//! Error types for sfctl.
//!
//! Every public operation returns [`Result`]. The variants map onto the
//! failure taxonomy operators see: caller-side argument problems, transport
//! failures, authentication, API errors reported by the cluster, timeouts and
//! failed lookups. Actions translate these into log lines and exit codes.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sfctl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure category, used by callers that only care about the class
/// of a failure rather than its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Transport,
    Auth,
    Api,
    Timeout,
    UnknownObject,
    Ambiguous,
    Aborted,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Argument => "argument",
            ErrorKind::Transport => "transport",
            ErrorKind::Auth => "auth",
            ErrorKind::Api => "api",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnknownObject => "unknown-object",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// The main error type for sfctl.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Invalid arguments supplied by the caller. Raised before any I/O.
    #[error("Invalid arguments - {0}")]
    Argument(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Network, HTTP or response parsing failure talking to an endpoint.
    #[error("Transport error talking to '{endpoint}': {message}")]
    Transport {
        /// Endpoint address (IP or URL)
        endpoint: String,
        /// Error message
        message: String,
    },

    /// Credentials were rejected.
    #[error("Authentication failed for '{target}': {message}")]
    Auth {
        /// Endpoint or host
        target: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Cluster Errors
    // ========================================================================
    /// The cluster returned an error object.
    #[error("{name}: {message}")]
    Api {
        /// Error name, e.g. `xVolumeIDDoesNotExist`
        name: String,
        /// Error message
        message: String,
        /// Numeric error code
        code: i64,
    },

    /// A bounded operation did not finish in time.
    #[error("Timeout waiting for {operation} after {seconds} seconds")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Timeout that expired
        seconds: u64,
    },

    /// A search that had to return something returned nothing.
    #[error("{0}")]
    UnknownObject(String),

    /// A name resolved to more than one object.
    #[error("Found {count} {what} named '{name}' (ids {ids:?})", count = .ids.len())]
    Ambiguous {
        /// Object kind, e.g. "volumes"
        what: String,
        /// Name that was searched for
        name: String,
        /// IDs of all matches
        ids: Vec<u64>,
    },

    /// The operation was interrupted by the operator.
    #[error("Aborted by user")]
    Aborted,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Generic error with optional source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Create a transport error.
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn auth(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create an API error.
    pub fn api(name: impl Into<String>, message: impl Into<String>, code: i64) -> Self {
        Self::Api {
            name: name.into(),
            message: message.into(),
            code,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create an unknown-object error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::UnknownObject(message.into())
    }

    /// Create an error from a plain message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            source: None,
        }
    }

    /// Failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Argument(_) | Error::Config(_) => ErrorKind::Argument,
            Error::Transport { .. } | Error::JsonParse(_) => ErrorKind::Transport,
            Error::Auth { .. } => ErrorKind::Auth,
            Error::Api { .. } => ErrorKind::Api,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::UnknownObject(_) => ErrorKind::UnknownObject,
            Error::Ambiguous { .. } => ErrorKind::Ambiguous,
            Error::Aborted => ErrorKind::Aborted,
            _ => ErrorKind::Other,
        }
    }

    /// The API error name, when this is an API error.
    pub fn api_name(&self) -> Option<&str> {
        match self {
            Error::Api { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Whether this is an API error whose name is one of `names`.
    pub fn is_api_error(&self, names: &[&str]) -> bool {
        self.api_name().map(|n| names.contains(&n)).unwrap_or(false)
    }

    /// Process exit code an action reports for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context lazily.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::argument("x").kind(), ErrorKind::Argument);
        assert_eq!(Error::transport("1.2.3.4", "down").kind(), ErrorKind::Transport);
        assert_eq!(Error::auth("1.2.3.4", "401").kind(), ErrorKind::Auth);
        assert_eq!(Error::api("xFoo", "bar", 500).kind(), ErrorKind::Api);
        assert_eq!(Error::timeout("gc", 10).kind(), ErrorKind::Timeout);
        assert_eq!(Error::unknown("nope").kind(), ErrorKind::UnknownObject);
        assert_eq!(Error::Aborted.kind(), ErrorKind::Aborted);
    }

    #[test]
    fn test_api_name_allow_list() {
        let err = Error::api("xAccountIDDoesNotExist", "gone", 500);
        assert!(err.is_api_error(&["xAccountIDDoesNotExist", "xOther"]));
        assert!(!err.is_api_error(&["xOther"]));
        assert!(!Error::argument("x").is_api_error(&["xOther"]));
    }

    #[test]
    fn test_display() {
        let err = Error::Ambiguous {
            what: "volumes".into(),
            name: "vol1".into(),
            ids: vec![3, 7],
        };
        assert_eq!(err.to_string(), "Found 2 volumes named 'vol1' (ids [3, 7])");
        assert_eq!(
            Error::timeout("GC to finish", 30).to_string(),
            "Timeout waiting for GC to finish after 30 seconds"
        );
        assert_eq!(Error::api("xFoo", "bar", 500).to_string(), "xFoo: bar");
    }

    #[test]
    fn test_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        let err = res.context("reading config").unwrap_err();
        assert_eq!(err.to_string(), "reading config");
        assert!(std::error::Error::source(&err).is_some());
    }
}
