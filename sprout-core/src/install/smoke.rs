// sprout-core/src/install/smoke.rs
use std::path::Path;
use std::time::Duration;

use sprout_aio::process::{run_command_with_timeout, CommandOutcome};
use sprout_common::error::{Result, SproutError};
use tracing::debug;

/// Runs the installed executable once and returns its exit status.
///
/// Anything but a clean zero exit within `timeout` is a `SmokeTestFailed`.
pub async fn run_smoke_test(executable: &Path, args: &[String], timeout: Duration) -> Result<i32> {
    let program = executable.to_string_lossy();
    debug!("Smoke testing {} {:?} (timeout {:?})", program, args, timeout);

    let failed = |reason: String| SproutError::SmokeTestFailed {
        executable: program.to_string(),
        reason,
    };
    let outcome = run_command_with_timeout(&program, args, None, None, timeout)
        .await
        .map_err(|e| failed(format!("could not start: {e}")))?;

    match outcome {
        CommandOutcome::Exited { code: 0, .. } => Ok(0),
        CommandOutcome::TimedOut => Err(failed(format!(
            "timed out after {}",
            humantime::format_duration(timeout)
        ))),
        other => Err(failed(other.describe())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("tool");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn zero_exit_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = script(tmp.path(), "test \"$1\" = --help");
        let code = run_smoke_test(&tool, &["--help".to_string()], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn non_zero_exit_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = script(tmp.path(), "echo broken >&2; exit 1");
        let err = run_smoke_test(&tool, &[], Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SmokeTestFailed");
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn hanging_tool_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = script(tmp.path(), "exec sleep 30");
        let err = run_smoke_test(&tool, &[], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_executable_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_smoke_test(&tmp.path().join("nope"), &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SmokeTestFailed");
    }
}
