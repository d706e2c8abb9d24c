// sprout-aio/src/process.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use sprout_common::error::{Result, SproutError};
use tokio::process::Command;
use tracing::{debug, error};

/// How a bounded child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Terminated by a signal before it could exit.
    Signaled { stdout: String, stderr: String },
    /// Still running when the deadline passed; it has been killed.
    TimedOut,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Exited { code: 0, .. })
    }

    /// Short human readable description, used in error messages.
    pub fn describe(&self) -> String {
        match self {
            CommandOutcome::Exited { code, stderr, .. } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("exited with status {code}")
                } else {
                    format!("exited with status {code}: {}", last_line(stderr))
                }
            }
            CommandOutcome::Signaled { .. } => "terminated by signal".to_string(),
            CommandOutcome::TimedOut => "timed out".to_string(),
        }
    }
}

fn last_line(s: &str) -> &str {
    s.lines().last().unwrap_or(s)
}

/// Runs `program` with stdin closed and output captured. The child is killed
/// if it outlives `timeout` or if the returned future is dropped.
pub async fn run_command_with_timeout(
    program: &str,
    args: &[String],
    cwd: Option<PathBuf>,
    envs: Option<HashMap<String, String>>,
    timeout: Duration,
) -> Result<CommandOutcome> {
    debug!(
        "Running command: {} {:?} (cwd: {:?}, envs: {:?}, timeout: {:?})",
        program,
        args,
        cwd,
        envs.as_ref().map(|e| e.keys().collect::<Vec<_>>()),
        timeout
    );

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let Some(env_map) = envs {
        cmd.envs(env_map);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            debug!("Command {} did not finish within {:?}", program, timeout);
            return Ok(CommandOutcome::TimedOut);
        }
        Ok(Err(e)) => {
            error!("Failed to execute command {}: {}", program, e);
            return Err(SproutError::from(e));
        }
        Ok(Ok(output)) => output,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        debug!("Command failed with status: {}", output.status);
        if !stdout.trim().is_empty() {
            debug!("Stdout:\n{}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("Stderr:\n{}", stderr.trim());
        }
    } else {
        debug!("Command finished successfully.");
    }

    Ok(match output.status.code() {
        Some(code) => CommandOutcome::Exited {
            code,
            stdout,
            stderr,
        },
        None => CommandOutcome::Signaled { stdout, stderr },
    })
}
