//! Local command execution.

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::{CommandResult, ConnectionError, ConnectionResult, ExecuteOptions, RemoteShell};

/// SIGKILL the process group led by `pid`.
///
/// Children are started as group leaders, so this takes down everything
/// they spawned as well.
pub fn kill_process_tree(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pid = pid, "Killed process group"),
        Err(nix::errno::Errno::ESRCH) => trace!(pid = pid, "Process group already gone"),
        Err(e) => warn!(pid = pid, error = %e, "Failed to kill process group"),
    }
}

/// Run `command` with `sh -c`, killing its whole process group on timeout.
pub async fn run_local(command: &str, options: &ExecuteOptions) -> ConnectionResult<CommandResult> {
    let timeout = options.effective_timeout();
    debug!(command = %command, "Executing local command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e)))?;
    let pid = child.id();

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let read_out = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_err = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (out, err, status) = tokio::join!(read_out, read_err, child.wait());
        out?;
        err?;
        let status = status?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => {
            let (status, stdout, stderr) = result?;
            // Killed by a signal leaves no exit code
            let exit_code = status.code().unwrap_or(-1);
            trace!(exit_code = %exit_code, "Command completed");
            Ok(CommandResult::new(
                exit_code,
                String::from_utf8_lossy(&stdout).into_owned(),
                String::from_utf8_lossy(&stderr).into_owned(),
            ))
        }
        Err(_) => {
            if let Some(pid) = pid {
                kill_process_tree(pid);
            }
            // Reap so no zombie is left behind
            let _ = child.wait().await;
            Err(ConnectionError::Timeout(timeout.as_secs()))
        }
    }
}

/// [`RemoteShell`] for the machine sfctl runs on.
#[derive(Debug, Clone)]
pub struct LocalShell {
    identifier: String,
}

impl LocalShell {
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        Self { identifier }
    }
}

impl Default for LocalShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(&self, command: &str, options: &ExecuteOptions) -> ConnectionResult<CommandResult> {
        run_local(command, options).await
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}
