//! Remote and local command execution.
//!
//! [`SshSession`] runs commands on cluster nodes and client hosts over SSH;
//! [`local`] runs them on this machine. Both bound every command by a
//! timeout and take the whole process tree down when it expires.

pub mod local;
pub mod ssh;

pub use local::{kill_process_tree, run_local, LocalShell};
pub use ssh::{SshCredentials, SshSession};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::error::Error;

/// Wraps `russh::Error` so it can serve as a client handler error type.
#[derive(Debug)]
pub struct RusshError(pub ::russh::Error);

impl From<::russh::Error> for RusshError {
    fn from(err: ::russh::Error) -> Self {
        RusshError(err)
    }
}

impl std::fmt::Display for RusshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Russh error: {}", self.0)
    }
}

impl std::error::Error for RusshError {}

impl From<::russh::Error> for ConnectionError {
    fn from(err: ::russh::Error) -> Self {
        ConnectionError::SshError(format!("Russh error: {}", err))
    }
}

/// Errors from establishing a session or running a command.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The command could not be started or its channel broke; a non-zero
    /// exit status is not an error
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("SSH error: {0}")]
    SshError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

impl ConnectionError {
    /// Convert to the crate error, naming the host and what was being done.
    pub fn into_error(self, host: &str, operation: &str) -> Error {
        match self {
            ConnectionError::AuthenticationFailed(message) => Error::auth(host, message),
            ConnectionError::Timeout(seconds) => Error::timeout(format!("{} on {}", operation, host), seconds),
            other => Error::transport(host, other.to_string()),
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        err.into_error("remote host", "command")
    }
}

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// `true` if `exit_code == 0`
    pub success: bool,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
        }
    }

    /// stdout then stderr, whichever are non-empty
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Default limit on a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-command settings.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Time limit; `None` means [`DEFAULT_COMMAND_TIMEOUT`]
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }
}

/// Something that runs shell command lines on a host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// `user@host:port`
    fn identifier(&self) -> &str;

    async fn execute(&self, command: &str, options: &ExecuteOptions) -> ConnectionResult<CommandResult>;

    async fn close(&self) -> ConnectionResult<()>;
}

/// Single-quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,@".contains(c)) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
