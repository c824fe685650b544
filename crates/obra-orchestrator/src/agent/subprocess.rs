//! `SubprocessAgentSession` — the default `AgentSession` provider,
//! spawning a fresh headless executor process per `send()` call (spec
//! §4.4).
//!
//! Grounded on `harness/git_manager.rs` (the teacher's only
//! subprocess-spawning code, there shelling out to `git`) generalized
//! from a fixed `git` binary to an arbitrary configured executor, and on
//! `harness/session.rs`'s lifecycle bookkeeping (`Initializing` ->
//! `Active` state, iteration counter) adapted into `initialize`/`cleanup`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use obra_coordination::plugins::{AgentConfig, AgentError, AgentSession};

/// Bound applied after the stop-hook marker file appears, or after clean
/// process exit with stdout fully drained, whichever comes first (spec
/// §4.4, §9: pinned at 500ms).
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Bound on each step of the escalating-shutdown sequence.
const ESCALATION_STEP: Duration = Duration::from_secs(1);

pub struct SubprocessAgentSession {
    binary: PathBuf,
    workspace: PathBuf,
    bypass_permissions: bool,
    marker_dir: Option<tempfile::TempDir>,
}

impl SubprocessAgentSession {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            workspace: PathBuf::new(),
            bypass_permissions: false,
            marker_dir: None,
        }
    }

    fn marker_path(&self) -> Option<PathBuf> {
        self.marker_dir.as_ref().map(|d| d.path().join("stop"))
    }

    async fn drain_child(&self, mut child: Child, deadline: Duration) -> Result<String, AgentError> {
        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let read_stdout = async {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        };
        let read_stderr = async {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        };

        let wait_all = async {
            let (output, _stderr, status) =
                tokio::join!(read_stdout, read_stderr, child.wait());
            (output, status)
        };

        match timeout(deadline, wait_all).await {
            Ok((output, Ok(status))) if status.success() => Ok(output),
            Ok((output, Ok(_status))) if !output.trim().is_empty() => Ok(output),
            Ok((_output, Ok(_status))) => Err(AgentError::ChildDiedEarly),
            Ok((_output, Err(_))) => Err(AgentError::ChildDiedEarly),
            Err(_) => {
                self.escalate_shutdown(child).await;
                Err(AgentError::DeadlineExceeded)
            }
        }
    }

    /// Interrupt, then `kill()` soft, then `kill()` hard, each bounded at
    /// `ESCALATION_STEP`. On non-unix targets there is no cooperative
    /// interrupt signal available through `tokio::process`, so the
    /// sequence collapses to two steps (soft kill, hard kill) — noted
    /// here rather than hidden.
    async fn escalate_shutdown(&self, mut child: Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                unsafe {
                    libc_kill(pid as i32, 2 /* SIGINT */);
                }
                if timeout(ESCALATION_STEP, child.wait()).await.is_ok() {
                    return;
                }
            }
        }

        let _ = child.start_kill();
        if timeout(ESCALATION_STEP, child.wait()).await.is_ok() {
            return;
        }

        let _ = child.kill().await;
        let _ = timeout(ESCALATION_STEP, child.wait()).await;
    }
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig);
}

#[async_trait]
impl AgentSession for SubprocessAgentSession {
    async fn initialize(&mut self, config: AgentConfig) -> Result<(), AgentError> {
        if !config.workspace.is_absolute() {
            return Err(AgentError::WorkspaceInvalid(
                "workspace must be an absolute path".to_string(),
            ));
        }
        if !config.workspace.exists() {
            return Err(AgentError::WorkspaceInvalid(format!(
                "workspace does not exist: {}",
                config.workspace.display()
            )));
        }
        self.workspace = config.workspace;
        self.bypass_permissions = config.bypass_permissions;
        self.marker_dir = Some(
            tempfile::tempdir()
                .map_err(|e| AgentError::SpawnFailed(format!("failed to create marker dir: {e}")))?,
        );
        Ok(())
    }

    async fn send(&self, prompt: &str, deadline: Duration) -> Result<String, AgentError> {
        let mut command = Command::new(&self.binary);
        command
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.bypass_permissions {
            command.arg("--bypass-permissions");
        }
        if let Some(marker) = self.marker_path() {
            command.env("OBRA_STOP_MARKER", marker);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::SpawnFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AgentError::SpawnFailed(format!("failed writing stdin: {e}")))?;
        }

        self.drain_child(child, deadline + DRAIN_WINDOW).await
    }

    async fn healthy(&self) -> bool {
        self.workspace.exists()
    }

    async fn cleanup(&self) {
        if let Some(marker) = self.marker_path() {
            let _ = tokio::fs::remove_file(marker).await;
        }
    }
}
