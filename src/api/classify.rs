//! Decides which transport failures are worth another attempt.
//!
//! Every failure the transport sees is first reduced to a [`FailureKind`],
//! then [`classify`] maps it, together with the method name, onto
//! retry / fail / auth.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// API errors caused by transient trouble in the cluster database.
pub const TRANSIENT_API_ERRORS: &[&str] = &[
    "xDBConnectionLoss",
    "xDBOperationTimeout",
    "xDBSessionExpired",
    "xDBSessionMoved",
    "xDBNoServerResponse",
    "xDBClosing",
    "xDBInvalidState",
];

/// Method-name prefixes of calls that change nothing on the cluster.
const IDEMPOTENT_PREFIXES: &[&str] = &["List", "Get", "Test", "Check"];

/// What the transport should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retry,
    Fail,
    Auth,
}

/// Socket-level failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    Unreachable,
    TimedOut,
    Refused,
    Reset,
    Other,
}

impl NetworkFailure {
    /// Categorize an I/O error by its OS error code, falling back to its kind.
    pub fn from_io(error: &io::Error) -> Self {
        if let Some(code) = error.raw_os_error() {
            match code {
                libc::ENETUNREACH | libc::EHOSTUNREACH => return NetworkFailure::Unreachable,
                libc::ETIMEDOUT => return NetworkFailure::TimedOut,
                libc::ECONNREFUSED => return NetworkFailure::Refused,
                libc::ECONNRESET | libc::EPIPE | libc::ECONNABORTED => return NetworkFailure::Reset,
                _ => {}
            }
        }
        match error.kind() {
            io::ErrorKind::TimedOut => NetworkFailure::TimedOut,
            io::ErrorKind::ConnectionRefused => NetworkFailure::Refused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe => {
                NetworkFailure::Reset
            }
            _ => NetworkFailure::Other,
        }
    }

    /// Walk an error's source chain looking for the underlying I/O error.
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(io_error) = err.downcast_ref::<io::Error>() {
                return Self::from_io(io_error);
            }
            current = err.source();
        }
        NetworkFailure::Other
    }
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkFailure::Unreachable => "network unreachable",
            NetworkFailure::TimedOut => "operation timed out",
            NetworkFailure::Refused => "connection refused",
            NetworkFailure::Reset => "connection reset",
            NetworkFailure::Other => "network error",
        };
        f.write_str(s)
    }
}

/// One failed attempt, reduced to what matters for the retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-2xx HTTP status
    Http(u16),
    /// Connection-level failure
    Network(NetworkFailure),
    /// Body cut short (does not end with `}`)
    TruncatedJson,
    /// Complete-looking body that still fails to parse
    InvalidJson,
    /// `Content-Length` disagrees with the received body
    LengthMismatch { expected: u64, received: u64 },
    /// The cluster answered with an error object
    Api(String),
}

/// True for methods that are safe to repeat.
pub fn is_idempotent(method: &str) -> bool {
    IDEMPOTENT_PREFIXES.iter().any(|prefix| method.starts_with(prefix))
}

/// Map a failure of `method` onto the transport's next move.
pub fn classify(kind: &FailureKind, method: &str) -> RetryClass {
    match kind {
        FailureKind::Http(401) | FailureKind::Http(403) => RetryClass::Auth,
        FailureKind::Http(408) | FailureKind::Http(429) => RetryClass::Retry,
        FailureKind::Http(status) if *status >= 500 => RetryClass::Retry,
        FailureKind::Http(_) => RetryClass::Fail,

        FailureKind::Network(NetworkFailure::Unreachable)
        | FailureKind::Network(NetworkFailure::TimedOut)
        | FailureKind::Network(NetworkFailure::Refused) => RetryClass::Fail,
        FailureKind::Network(_) => RetryClass::Retry,

        FailureKind::TruncatedJson | FailureKind::LengthMismatch { .. } => RetryClass::Retry,
        FailureKind::InvalidJson => RetryClass::Fail,

        FailureKind::Api(name) if TRANSIENT_API_ERRORS.contains(&name.as_str()) && is_idempotent(method) => {
            RetryClass::Retry
        }
        FailureKind::Api(_) => RetryClass::Fail,
    }
}
