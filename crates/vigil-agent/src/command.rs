//! Shell command execution

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use vigil_proto::unix_now;

/// Status reported when the command exceeded its timeout
pub const TIMEOUT_STATUS: i32 = 2;

/// Status reported when the command could not be run or was killed by a signal
pub const FAILURE_STATUS: i32 = 3;

/// Output reported when the command exceeded its timeout
pub const TIMEOUT_OUTPUT: &str = "Execution timed out";

/// A command to run through `sh -c`
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Command line
    pub command: String,
    /// Complete environment of the process
    pub env: Vec<(String, String)>,
    /// Execution timeout, `None` means unbounded
    pub timeout: Option<Duration>,
    /// Bytes written to the process stdin
    pub stdin: Option<Vec<u8>>,
}

/// Result of running a command
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Exit status
    pub status: i32,
    /// Stdout followed by stderr
    pub output: String,
    /// Start time, unix seconds
    pub executed: i64,
    /// Wall-clock duration
    pub duration: Duration,
}

impl ExecutionRequest {
    /// Create a request for `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Timeout from a seconds value where zero means unbounded
    pub fn with_timeout_secs(mut self, secs: u32) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(u64::from(secs)));
        self
    }
}

fn shell() -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C");
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c");
        cmd
    }
}

/// Run a command to completion or timeout
///
/// Never fails: spawn errors and timeouts become statuses.
pub async fn execute(request: ExecutionRequest) -> ExecutionResult {
    let executed = unix_now();
    let start_time = Instant::now();
    debug!("Executing command: {}", request.command);

    let mut cmd = shell();
    cmd.arg(&request.command)
        .env_clear()
        .envs(request.env.iter().map(|(k, v)| (k, v)))
        .stdin(if request.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn {}: {}", request.command, e);
            return ExecutionResult {
                status: FAILURE_STATUS,
                output: format!("failed to execute command: {}", e),
                executed,
                duration: start_time.elapsed(),
            };
        }
    };

    if let Some(stdin_data) = request.stdin {
        if let Some(mut child_stdin) = child.stdin.take() {
            // write concurrently so a child that never reads cannot block us
            tokio::spawn(async move {
                if let Err(e) = child_stdin.write_all(&stdin_data).await {
                    debug!("Failed to write to process stdin: {}", e);
                }
            });
        }
    }

    let waited = match request.timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output()).await,
        None => Ok(child.wait_with_output().await),
    };
    let duration = start_time.elapsed();

    match waited {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            let status = output.status.code().unwrap_or(FAILURE_STATUS);
            ExecutionResult {
                status,
                output: text,
                executed,
                duration,
            }
        }
        Ok(Err(e)) => ExecutionResult {
            status: FAILURE_STATUS,
            output: format!("failed to wait for command: {}", e),
            executed,
            duration,
        },
        // dropping the child future kills the process
        Err(_) => {
            warn!("Command timed out after {:?}: {}", duration, request.command);
            ExecutionResult {
                status: TIMEOUT_STATUS,
                output: TIMEOUT_OUTPUT.to_string(),
                executed,
                duration,
            }
        }
    }
}

/// Truncate `output` to at most `max` bytes on a character boundary, zero means unlimited
pub fn truncate_output(output: &mut String, max: u64) {
    if max == 0 || output.len() as u64 <= max {
        return;
    }
    let mut end = usize::try_from(max).unwrap_or(usize::MAX).min(output.len());
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output.truncate(end);
}
