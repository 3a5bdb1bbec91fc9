// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sema_config::MAX_TIMEOUT_MS;

/// Marker the shell prints after the user command so the next call can pick
/// up the working directory where the previous one left it.
const CWD_MARKER: &str = "__SEMA_CWD__";

/// The outcome of one shell execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    /// True when the command was cut short by timeout or abort.  A timeout
    /// does not fire the session abort; the result alone carries the flag.
    pub interrupted: bool,
}

/// Process-wide shell for the bash tool.  Commands run one at a time (the
/// scheduler already serializes any batch containing bash); the working
/// directory persists across calls and is reset to the session root whenever
/// a command drifts outside it.
pub struct PersistentShell {
    original_dir: PathBuf,
    cwd: Mutex<PathBuf>,
}

impl PersistentShell {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let dir = working_dir.into();
        Self {
            cwd: Mutex::new(dir.clone()),
            original_dir: dir,
        }
    }

    pub fn original_dir(&self) -> &PathBuf {
        &self.original_dir
    }

    pub async fn current_dir(&self) -> PathBuf {
        self.cwd.lock().await.clone()
    }

    /// Run `command` under `bash -c`, honoring `abort` and `timeout_ms`
    /// (clamped to `MAX_TIMEOUT_MS`).
    pub async fn exec(
        &self,
        command: &str,
        abort: &CancellationToken,
        timeout_ms: u64,
    ) -> ExecResult {
        // Holding the cwd lock for the whole call serializes shell access.
        let mut cwd = self.cwd.lock().await;

        debug!(cmd = %command, cwd = %cwd.display(), "shell exec");

        // The trailing marker lets us recover $PWD from the finished process
        // while preserving the user command's exit status.
        let wrapped = format!(
            "{command}\n__sema_status=$?; printf '\\n{CWD_MARKER}%s\\n' \"$PWD\"; \
             exit $__sema_status"
        );

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&wrapped);
        cmd.current_dir(&*cwd);
        // No controlling terminal for the child: stdin from /dev/null and a
        // fresh session id keep interactive programs from wedging the host.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let timeout = std::time::Duration::from_millis(timeout_ms.min(MAX_TIMEOUT_MS));
        let output = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                return ExecResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    code: -1,
                    interrupted: true,
                };
            }
            result = tokio::time::timeout(timeout, cmd.output()) => result,
        };

        match output {
            Err(_) => ExecResult {
                stdout: String::new(),
                stderr: format!("command timed out after {} ms", timeout.as_millis()),
                code: -1,
                interrupted: true,
            },
            Ok(Err(e)) => ExecResult {
                stdout: String::new(),
                stderr: format!("failed to spawn shell: {e}"),
                code: -1,
                interrupted: false,
            },
            Ok(Ok(out)) => {
                let raw_stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                let (stdout, observed_cwd) = split_cwd_marker(&raw_stdout);
                if let Some(dir) = observed_cwd {
                    *cwd = self.apply_drift_policy(PathBuf::from(dir));
                }
                ExecResult {
                    stdout,
                    stderr,
                    code: out.status.code().unwrap_or(-1),
                    interrupted: false,
                }
            }
        }
    }

    /// Keep the new cwd unless it escaped the original working directory.
    fn apply_drift_policy(&self, new_cwd: PathBuf) -> PathBuf {
        if new_cwd.starts_with(&self.original_dir) {
            new_cwd
        } else {
            warn!(
                drifted = %new_cwd.display(),
                reset = %self.original_dir.display(),
                "shell cwd drifted outside the working directory; resetting"
            );
            self.original_dir.clone()
        }
    }
}

/// Split the cwd marker line off the captured stdout.
fn split_cwd_marker(raw: &str) -> (String, Option<String>) {
    match raw.rfind(CWD_MARKER) {
        Some(pos) => {
            let dir = raw[pos + CWD_MARKER.len()..].trim().to_string();
            let mut body = raw[..pos].to_string();
            // Drop the newline printf added before the marker.
            if body.ends_with('\n') {
                body.pop();
            }
            (body, Some(dir))
        }
        None => (raw.to_string(), None),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> (tempfile::TempDir, PersistentShell) {
        let dir = tempfile::tempdir().unwrap();
        let sh = PersistentShell::new(dir.path());
        (dir, sh)
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let (_d, sh) = shell();
        let r = sh
            .exec("echo hello", &CancellationToken::new(), 5_000)
            .await;
        assert_eq!(r.stdout.trim(), "hello");
        assert_eq!(r.code, 0);
        assert!(!r.interrupted);
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_preserved() {
        let (_d, sh) = shell();
        let r = sh.exec("exit 3", &CancellationToken::new(), 5_000).await;
        assert_eq!(r.code, 3);
    }

    #[tokio::test]
    async fn cwd_persists_across_calls_inside_working_dir() {
        let (dir, sh) = shell();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        sh.exec("cd sub", &CancellationToken::new(), 5_000).await;
        let r = sh.exec("pwd", &CancellationToken::new(), 5_000).await;
        assert!(r.stdout.trim().ends_with("sub"), "stdout: {}", r.stdout);
    }

    #[tokio::test]
    async fn cwd_resets_when_drifting_outside_working_dir() {
        let (_d, sh) = shell();
        sh.exec("cd /", &CancellationToken::new(), 5_000).await;
        assert_eq!(sh.current_dir().await, *sh.original_dir());
    }

    #[tokio::test]
    async fn timeout_sets_interrupted_flag() {
        let (_d, sh) = shell();
        let r = sh.exec("sleep 5", &CancellationToken::new(), 50).await;
        assert!(r.interrupted);
        assert_eq!(r.code, -1);
    }

    #[tokio::test]
    async fn abort_cancels_immediately() {
        let (_d, sh) = shell();
        let abort = CancellationToken::new();
        abort.cancel();
        let r = sh.exec("sleep 5", &abort, 60_000).await;
        assert!(r.interrupted);
    }

    #[test]
    fn marker_splitting_handles_missing_marker() {
        let (body, cwd) = split_cwd_marker("plain output\n");
        assert_eq!(body, "plain output\n");
        assert!(cwd.is_none());
    }
}
