//! Claude Code harness adapter.
//!
//! Spawns `claude --print --dangerously-skip-permissions
//! --output-format stream-json` and streams its stdout line by line. The
//! lines stay opaque here; rendering the stream-json shapes is a
//! display concern of the consumers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentbox_protocol::Task;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::trait_def::{AgentHandle, Harness, LineStream};

/// How long a SIGTERM'd process gets before SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Internal state kept per spawned process.
struct ProcessState {
    /// The child process handle (for wait / kill / is_running).
    child: Child,
    /// Stdout reader; `Option` so it can be `.take()`-ed once for streaming.
    stdout: Option<ChildStdout>,
}

/// Harness adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Clone)]
pub struct ClaudeCodeAdapter {
    /// Path to the `claude` binary. Defaults to `"claude"` (found via `$PATH`).
    binary_path: String,
    /// Working directory for tasks that do not carry their own.
    workspace: PathBuf,
    /// Environment profile injected into every child. Fixed at
    /// construction, never varied per task.
    base_env: Vec<(String, String)>,
    /// Per-process bookkeeping, keyed by OS pid.
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
}

impl std::fmt::Debug for ClaudeCodeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeAdapter")
            .field("binary_path", &self.binary_path)
            .field("workspace", &self.workspace)
            .finish()
    }
}

/// The non-interactive profile every agent process runs under: no
/// terminal colors, no interactive prompts from git/apt/pip.
fn non_interactive_env() -> Vec<(String, String)> {
    [
        ("TERM", "dumb"),
        ("NO_COLOR", "1"),
        ("DEBIAN_FRONTEND", "noninteractive"),
        ("GIT_TERMINAL_PROMPT", "0"),
        ("PIP_NO_INPUT", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

impl ClaudeCodeAdapter {
    /// Create an adapter that looks for `claude` on `$PATH` and runs
    /// tasks in the current directory unless they override it.
    pub fn new() -> Self {
        Self {
            binary_path: "claude".to_string(),
            workspace: PathBuf::from("."),
            base_env: non_interactive_env(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Use a custom binary path (tests, non-standard installs).
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            binary_path: path.into(),
            ..Self::new()
        }
    }

    /// Set the default working directory for tasks.
    pub fn workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace = dir.into();
        self
    }

    /// Forward an upstream API credential to every agent process.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.base_env
            .push(("ANTHROPIC_API_KEY".to_owned(), key.into()));
        self
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Harness for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn spawn(&self, task: &Task) -> Result<AgentHandle> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--print")
            .arg("--dangerously-skip-permissions")
            .arg("--output-format")
            .arg("stream-json");

        let workdir = task.workdir.as_deref().unwrap_or(&self.workspace);
        cmd.current_dir(workdir);

        // Merge the fixed profile into the inherited environment.
        for (key, value) in &self.base_env {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::null());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn agent binary at '{}' -- is it installed and on PATH?",
                self.binary_path
            )
        })?;

        let pid = child.id().context("child process has no pid")?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        {
            let mut processes = self.processes.lock().await;
            processes.insert(pid, ProcessState { child, stdout });
        }

        debug!(pid, task_id = %task.id, workdir = %workdir.display(), "spawned agent process");

        Ok(AgentHandle {
            pid,
            task_id: task.id.clone(),
            stdin,
        })
    }

    fn output_lines(&self, handle: &AgentHandle) -> LineStream {
        let pid = handle.pid;
        let processes = Arc::clone(&self.processes);

        let stream = async_stream::stream! {
            let stdout = {
                let mut procs = processes.lock().await;
                procs.get_mut(&pid).and_then(|state| state.stdout.take())
            };

            let Some(stdout) = stdout else {
                warn!(pid, "no stdout available -- already consumed or process missing");
                return;
            };

            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        yield line;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(pid, error = %e, "error reading agent stdout");
                        break;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    async fn wait(&self, handle: &AgentHandle) -> Result<Option<i32>> {
        let state = {
            let mut processes = self.processes.lock().await;
            processes.remove(&handle.pid)
        };

        let Some(mut state) = state else {
            debug!(pid = handle.pid, "wait called but process not in map (already reaped?)");
            return Ok(None);
        };

        let status = state
            .child
            .wait()
            .await
            .with_context(|| format!("failed to wait for agent process {}", handle.pid))?;
        Ok(status.code())
    }

    async fn kill(&self, handle: &AgentHandle) -> Result<()> {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            #[cfg(unix)]
            {
                // SAFETY: pid is a valid u32 from a child we spawned.
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }

            // Wait for graceful shutdown, then force.
            let exited = tokio::time::timeout(KILL_GRACE_PERIOD, state.child.wait()).await;
            match exited {
                Ok(Ok(_status)) => {
                    debug!(pid, "process exited within the grace period");
                }
                _ => {
                    debug!(pid, "process did not exit after SIGTERM, sending SIGKILL");
                    let _ = state.child.kill().await;
                }
            }

            processes.remove(&pid);
        } else {
            debug!(pid, "kill called but process not in map (already exited?)");
        }

        Ok(())
    }

    async fn is_running(&self, handle: &AgentHandle) -> bool {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            match state.child.try_wait() {
                Ok(Some(_status)) => {
                    processes.remove(&pid);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(pid, error = %e, "error checking process status");
                    false
                }
            }
        } else {
            false
        }
    }
}
