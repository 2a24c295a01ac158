//! Awaitable child-process handle.
//!
//! Wraps `tokio::process::Child` so orchestration reads as sequential
//! `spawn -> wait -> stop` steps, with SIGTERM-then-kill shutdown and
//! captured output retained for failure analysis.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::errors::{PipelineError, PipelineResult};

/// A spawned child with piped output and graceful-shutdown support.
pub struct ManagedProcess {
    name: String,
    child: Child,
    stdout_buf: Arc<Mutex<String>>,
    stderr_buf: Arc<Mutex<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    /// Spawn `command` with piped stdout/stderr. Reader tasks start
    /// accumulating output immediately so nothing is lost if the child
    /// is later killed.
    pub fn spawn(name: &str, command: &mut Command) -> PipelineResult<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| PipelineError::ProcessSpawn(format!("{name}: {e}")))?;

        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            let buf = Arc::clone(&stdout_buf);
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut guard = buf.lock().await;
                    guard.push_str(&line);
                    guard.push('\n');
                }
            }));
        }

        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut guard = buf.lock().await;
                    guard.push_str(&line);
                    guard.push('\n');
                }
            }));
        }

        debug!(name = name, pid = ?child.id(), "Process spawned");

        Ok(Self {
            name: name.to_string(),
            child,
            stdout_buf,
            stderr_buf,
            readers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS pid, while the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for natural exit and return the exit code.
    pub async fn wait(&mut self) -> PipelineResult<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    /// Send SIGTERM without waiting.
    pub fn terminate(&self) -> PipelineResult<()> {
        let pid = self
            .child
            .id()
            .ok_or_else(|| PipelineError::ProcessFailed {
                name: self.name.clone(),
                code: None,
            })?;
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| PipelineError::ProcessSpawn(format!("SIGTERM {}: {e}", self.name)))?;
        Ok(())
    }

    /// Graceful stop: SIGTERM, wait up to `grace`, force-kill if still
    /// alive. Returns the exit code when the child exited on its own.
    pub async fn stop(&mut self, grace: Duration) -> PipelineResult<Option<i32>> {
        if self.child.id().is_none() {
            // Already exited; collect status.
            return self.wait().await;
        }

        if let Err(e) = self.terminate() {
            warn!(name = %self.name, error = %e, "Failed to send terminate signal");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(name = %self.name, ?status, "Process exited within grace window");
                Ok(status.code())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(name = %self.name, "Grace window expired, forcing kill");
                self.child.kill().await?;
                Ok(None)
            }
        }
    }

    /// Snapshot of captured stdout so far.
    pub async fn stdout_snapshot(&self) -> String {
        self.stdout_buf.lock().await.clone()
    }

    /// Snapshot of captured stderr so far.
    pub async fn stderr_snapshot(&self) -> String {
        self.stderr_buf.lock().await.clone()
    }

    /// Abort reader tasks and take the final captured output.
    pub async fn into_output(mut self) -> (String, String) {
        // Give readers a moment to drain closed pipes.
        for handle in self.readers.drain(..) {
            let _ = tokio::time::timeout(Duration::from_millis(250), handle).await;
        }
        let stdout = self.stdout_buf.lock().await.clone();
        let stderr = self.stderr_buf.lock().await.clone();
        (stdout, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_and_wait_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello; echo oops >&2");

        let mut proc = ManagedProcess::spawn("echo-test", &mut cmd).unwrap();
        let code = proc.wait().await.unwrap();
        assert_eq!(code, Some(0));

        let (stdout, stderr) = proc.into_output().await;
        assert!(stdout.contains("hello"));
        assert!(stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 3");

        let mut proc = ManagedProcess::spawn("exit-test", &mut cmd).unwrap();
        let code = proc.wait().await.unwrap();
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_stop_terminates_long_running_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let mut proc = ManagedProcess::spawn("sleep-test", &mut cmd).unwrap();
        assert!(proc.id().is_some());

        let started = std::time::Instant::now();
        proc.stop(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let mut cmd = Command::new("definitely-not-a-real-binary-helmsman");
        let result = ManagedProcess::spawn("missing", &mut cmd);
        assert!(matches!(result, Err(PipelineError::ProcessSpawn(_))));
    }
}
