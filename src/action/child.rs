//! Running another action as a child process and collecting its result.

use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::result::ResultListener;
use crate::connection::kill_process_tree;
use crate::error::{Error, Result};
use crate::logging;

/// How long to wait for the result once the child has exited.
const RESULT_GRACE: Duration = Duration::from_secs(5);

/// What a child action left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildOutcome {
    pub exit_code: i32,
    /// The published result, if the child sent one
    pub result: Option<Value>,
}

impl ChildOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A subcommand of some action binary, run in its own process group.
#[derive(Debug, Clone)]
pub struct ChildAction {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ChildAction {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(3600),
        }
    }

    /// `subcommand` of the running binary.
    pub fn subcommand(subcommand: &str, args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe()?;
        let mut full = vec![subcommand.to_string()];
        full.extend(args);
        Ok(Self::new(program, full))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the child, echo its output, and return its exit code and result.
    pub async fn run(&self) -> Result<ChildOutcome> {
        let mut listener = ResultListener::bind().await?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(format!("--result_address={}", listener.address()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        debug!("Starting child {} {}", self.program.display(), self.args.join(" "));

        let mut child = command.spawn()?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            tokio::join!(echo(stdout), echo(stderr));
            child.wait().await
        };
        let status = match tokio::time::timeout(self.timeout, run).await {
            Ok(status) => status?,
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_tree(pid);
                }
                let _ = child.wait().await;
                return Err(Error::timeout(
                    format!("child action {}", self.args.first().map_or("", String::as_str)),
                    self.timeout.as_secs(),
                ));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let result = if exit_code == 0 {
            listener.receive(RESULT_GRACE).await?
        } else {
            None
        };
        Ok(ChildOutcome { exit_code, result })
    }
}

/// Copy a child's stream to the console line by line.
async fn echo<R: AsyncRead + Unpin>(stream: Option<R>) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logging::raw(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_exit_code_without_result() {
        let child = ChildAction::new("sh", vec!["-c".into(), "echo hello; exit 3".into(), "child".into()]);
        let outcome = child.run().await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.success());
        assert_eq!(outcome.result, None);
    }

    #[tokio::test]
    async fn test_child_timeout_kills_group() {
        let child = ChildAction::new("sh", vec!["-c".into(), "sleep 5 & sleep 5; wait".into(), "child".into()])
            .with_timeout(Duration::from_millis(200));
        let err = child.run().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
