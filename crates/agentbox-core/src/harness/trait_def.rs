//! The `Harness` trait -- the adapter interface for agent processes.

use std::pin::Pin;

use agentbox_protocol::Task;
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use tokio::process::ChildStdin;

/// A lazy stream of raw output lines from a running agent.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Handle to a spawned agent process.
#[derive(Debug)]
pub struct AgentHandle {
    /// OS pid of the child.
    pub pid: u32,
    /// Id of the task the process is working on.
    pub task_id: String,
    /// Piped stdin; `Option` so the driver can `.take()` it once, write
    /// the prompt, and close it.
    pub stdin: Option<ChildStdin>,
}

/// Adapter interface for spawning and managing the external agent.
///
/// Object-safe so it can be held as `Arc<dyn Harness>` by the service.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Human-readable name for this harness (e.g. "claude-code").
    fn name(&self) -> &str;

    /// Spawn an agent process for the given task.
    ///
    /// The environment profile (non-interactive flags, permission
    /// auto-approval) is fixed at harness construction; only the working
    /// directory varies per task.
    async fn spawn(&self, task: &Task) -> Result<AgentHandle>;

    /// Stream the process's output, one line at a time, in the order the
    /// process produced them. The stream ends at EOF.
    fn output_lines(&self, handle: &AgentHandle) -> LineStream;

    /// Wait for the process to exit and return its exit code.
    ///
    /// `None` means the process was terminated by a signal (or was
    /// already reaped by an earlier `kill`).
    async fn wait(&self, handle: &AgentHandle) -> Result<Option<i32>>;

    /// Terminate the agent process: SIGTERM first, then SIGKILL after a
    /// grace period if it has not exited.
    async fn kill(&self, handle: &AgentHandle) -> Result<()>;

    /// Whether the agent process is still alive.
    async fn is_running(&self, handle: &AgentHandle) -> bool;
}

// Compile-time assertion: Harness must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};
