//! SSH sessions to nodes and client hosts (russh).

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::{shell_quote, CommandResult, ConnectionError, ConnectionResult, ExecuteOptions, RemoteShell, RusshError};
use crate::config::SshConfig;

/// Marker the command wrapper writes to stderr so the remote process group
/// can be found again on timeout.
const PGID_MARKER: &str = "__sfctl_pgid=";

/// Who to log in as and how.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub user: String,
    pub password: Option<String>,
    /// Private key tried before the password, when it exists
    pub key_file: Option<PathBuf>,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl SshCredentials {
    pub fn new(user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user: user.into(),
            password,
            key_file: None,
            port: 22,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_key_file(mut self, key_file: Option<PathBuf>) -> Self {
        self.key_file = key_file;
        self
    }
}

impl From<&SshConfig> for SshCredentials {
    fn from(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            password: config.password.clone(),
            key_file: config.effective_key_file(),
            port: config.port,
            connect_timeout: config.connect_timeout,
        }
    }
}

/// Accepts any host key; appliance nodes are reinstalled too often for
/// known_hosts to be useful.
struct ClientHandler {
    host: String,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = RusshError;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        trace!(host = %self.host, "Accepting host key");
        Ok(true)
    }
}

/// An authenticated SSH connection. Not meant to be shared between workers.
pub struct SshSession {
    identifier: String,
    host: String,
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
}

impl SshSession {
    /// Connect and authenticate, key first and password second.
    pub async fn connect(host: &str, credentials: &SshCredentials) -> ConnectionResult<Self> {
        let identifier = format!("{}@{}:{}", credentials.user, host, credentials.port);
        debug!(host = %host, user = %credentials.user, "Connecting via SSH");

        let mut config = russh::client::Config::default();
        config.inactivity_timeout = None;
        let config = Arc::new(config);

        let addr = format!("{}:{}", host, credentials.port);
        let socket = tokio::time::timeout(credentials.connect_timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(credentials.connect_timeout.as_secs()))?
            .map_err(|e| ConnectionError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e)))?;
        socket
            .set_nodelay(true)
            .map_err(|e| ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let handler = ClientHandler { host: host.to_string() };
        let mut session = tokio::time::timeout(
            credentials.connect_timeout,
            russh::client::connect_stream(config, socket, handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(credentials.connect_timeout.as_secs()))?
        .map_err(|e| ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", e)))?;

        Self::authenticate(&mut session, credentials).await?;
        debug!(identifier = %identifier, "SSH session established");

        Ok(Self {
            identifier,
            host: host.to_string(),
            handle: Arc::new(RwLock::new(Some(session))),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn authenticate(session: &mut Handle<ClientHandler>, credentials: &SshCredentials) -> ConnectionResult<()> {
        if let Some(key_path) = &credentials.key_file {
            match Self::try_key_auth(session, &credentials.user, key_path).await {
                Ok(()) => {
                    debug!(key = %key_path.display(), "Authenticated using key");
                    return Ok(());
                }
                Err(e) => trace!(error = %e, "Key authentication did not succeed"),
            }
        }

        if let Some(password) = &credentials.password {
            let authenticated = session
                .authenticate_password(&credentials.user, password)
                .await
                .map_err(|e| ConnectionError::AuthenticationFailed(format!("Password authentication failed: {}", e)))?;
            if authenticated {
                debug!("Authenticated using password");
                return Ok(());
            }
        }

        Err(ConnectionError::AuthenticationFailed(format!(
            "All authentication methods failed for user {}",
            credentials.user
        )))
    }

    async fn try_key_auth(session: &mut Handle<ClientHandler>, user: &str, key_path: &Path) -> ConnectionResult<()> {
        if !key_path.exists() {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "Key file not found: {}",
                key_path.display()
            )));
        }

        let key_pair = load_secret_key(key_path, None).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("Failed to load key {}: {}", key_path.display(), e))
        })?;

        let authenticated = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| ConnectionError::AuthenticationFailed(format!("Key authentication failed: {}", e)))?;

        if authenticated {
            Ok(())
        } else {
            Err(ConnectionError::AuthenticationFailed("Key rejected".to_string()))
        }
    }

    /// Run one command to completion on a fresh channel.
    ///
    /// `on_stderr` sees the stderr collected so far each time more arrives.
    async fn run_channel<F>(&self, command: String, mut on_stderr: F) -> ConnectionResult<(Option<u32>, Vec<u8>, Vec<u8>)>
    where
        F: FnMut(&[u8]) + Send,
    {
        let handle_guard = self.handle.read().await;
        let handle = handle_guard.as_ref().ok_or(ConnectionError::ConnectionClosed)?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to open channel: {}", e)))?;
        drop(handle_guard);

        channel
            .exec(true, command)
            .await
            .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to execute command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // Extended data type 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data);
                    on_stderr(&stderr);
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        Ok((exit_code, stdout, stderr))
    }

    /// Kill a remote process group.
    async fn kill_group(&self, pgid: u32) {
        let command = format!("kill -9 -- -{} 2>/dev/null", pgid);
        if let Err(e) = self.run_channel(command, |_| {}).await {
            warn!(host = %self.host, error = %e, "Could not kill timed out command");
        }
    }
}

/// Wrap a command so it reports its process group first.
fn wrap_command(command: &str, options: &ExecuteOptions) -> String {
    let mut full = format!("echo {}$$ 1>&2; ", PGID_MARKER);
    let mut env: Vec<_> = options.env.iter().collect();
    env.sort();
    for (key, value) in env {
        full.push_str(&format!("export {}={}; ", key, shell_quote(value)));
    }
    full.push_str(command);
    full
}

/// Stderr callback that stores the first process group ID it sees.
fn record_pgid(slot: Arc<parking_lot::Mutex<Option<u32>>>) -> impl FnMut(&[u8]) + Send {
    move |stderr| {
        let mut current = slot.lock();
        if current.is_none() {
            *current = take_pgid(&String::from_utf8_lossy(stderr)).0;
        }
    }
}

/// Remove the process group marker from stderr, returning the group ID.
fn take_pgid(stderr: &str) -> (Option<u32>, String) {
    let mut pgid = None;
    let mut rest = Vec::new();
    for line in stderr.lines() {
        match line.strip_prefix(PGID_MARKER) {
            Some(value) if pgid.is_none() => pgid = value.trim().parse().ok(),
            _ => rest.push(line),
        }
    }
    let mut cleaned = rest.join("\n");
    if stderr.ends_with('\n') && !cleaned.is_empty() {
        cleaned.push('\n');
    }
    (pgid, cleaned)
}

#[async_trait]
impl RemoteShell for SshSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(&self, command: &str, options: &ExecuteOptions) -> ConnectionResult<CommandResult> {
        let timeout = options.effective_timeout();
        let full_command = wrap_command(command, options);
        debug!(host = %self.host, command = %command, "Executing remote command");

        // The group ID is needed after a timeout, so it is captured as
        // stderr arrives rather than at the end.
        let pgid_slot = Arc::new(parking_lot::Mutex::new(None::<u32>));
        let run = self.run_channel(full_command, record_pgid(Arc::clone(&pgid_slot)));

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => {
                let (exit_code, stdout, stderr) = result?;
                let (_, stderr) = take_pgid(&String::from_utf8_lossy(&stderr));
                // A missing exit status means the remote side died abnormally
                let exit_code = exit_code.map(|e| e as i32).unwrap_or(-1);
                trace!(exit_code = %exit_code, "Command completed");
                Ok(CommandResult::new(exit_code, String::from_utf8_lossy(&stdout).into_owned(), stderr))
            }
            Err(_) => {
                let pgid = *pgid_slot.lock();
                if let Some(pgid) = pgid {
                    self.kill_group(pgid).await;
                }
                Err(ConnectionError::Timeout(timeout.as_secs()))
            }
        }
    }

    async fn close(&self) -> ConnectionResult<()> {
        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            debug!(identifier = %self.identifier, "Closing SSH session");
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "Connection closed by client", "en")
                .await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession").field("identifier", &self.identifier).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_command() {
        let options = ExecuteOptions::new().with_env("B", "two words").with_env("A", "1");
        assert_eq!(
            wrap_command("uptime", &options),
            "echo __sfctl_pgid=$$ 1>&2; export A=1; export B='two words'; uptime"
        );
    }

    #[test]
    fn test_take_pgid() {
        let (pgid, rest) = take_pgid("__sfctl_pgid=4242\nwarning: x\n");
        assert_eq!(pgid, Some(4242));
        assert_eq!(rest, "warning: x\n");

        let (pgid, rest) = take_pgid("__sfctl_pgid=17\n");
        assert_eq!(pgid, Some(17));
        assert_eq!(rest, "");

        let (pgid, rest) = take_pgid("plain error");
        assert_eq!(pgid, None);
        assert_eq!(rest, "plain error");
    }

    #[test]
    fn test_record_pgid_keeps_first_group() {
        let slot = Arc::new(parking_lot::Mutex::new(None));
        let mut record = record_pgid(Arc::clone(&slot));
        record(b"partial".as_slice());
        assert_eq!(*slot.lock(), None);
        record(format!("{}4242\nwarning", PGID_MARKER).as_bytes());
        assert_eq!(*slot.lock(), Some(4242));
        record(format!("{}1\n", PGID_MARKER).as_bytes());
        assert_eq!(*slot.lock(), Some(4242));
    }

    #[test]
    fn test_credentials_from_config() {
        let config = SshConfig::default();
        let credentials = SshCredentials::from(&config);
        assert_eq!(credentials.user, "root");
        assert_eq!(credentials.port, 22);
    }
}
