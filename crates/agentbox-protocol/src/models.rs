use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Generate a short wire-format identifier: `<prefix>_<8 hex chars>`.
///
/// Matches the ids the file protocol has always used (`task_1f2e3d4c`,
/// `cmd_0a1b2c3d`), so records written by older controllers interleave
/// cleanly with ours.
pub fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..8])
}

// ---------------------------------------------------------------------------
// State enums
// ---------------------------------------------------------------------------

/// State of a task run.
///
/// `Running` is the only non-terminal state; every other variant is final
/// and no transition ever leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunState {
    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

impl FromStr for RunState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(StateParseError(other.to_owned())),
        }
    }
}

/// State published in `status.json`.
///
/// A projection of [`RunState`]: `Idle` is the absence of an active run
/// (not a run state itself), `Working` projects a running run, and the
/// terminal variants carry over unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Working,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl From<RunState> for AgentState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Running => Self::Working,
            RunState::Completed => Self::Completed,
            RunState::Failed => Self::Failed,
            RunState::Cancelled => Self::Cancelled,
            RunState::TimedOut => Self::TimedOut,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "working" => Ok(Self::Working),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(StateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid state string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid state: {0:?}")]
pub struct StateParseError(pub String);

// ---------------------------------------------------------------------------
// Task and TaskRun
// ---------------------------------------------------------------------------

/// A unit of work submitted to the agent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at submission.
    pub id: String,
    /// The prompt handed to the agent process.
    pub prompt: String,
    /// Optional working-directory override for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with a freshly generated id.
    pub fn new(prompt: impl Into<String>, workdir: Option<PathBuf>) -> Self {
        Self::with_id(short_id("task"), prompt, workdir)
    }

    /// Create a task carrying a caller-supplied id.
    ///
    /// The file front end uses this so output records correlate with the
    /// command record that requested them.
    pub fn with_id(
        id: impl Into<String>,
        prompt: impl Into<String>,
        workdir: Option<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            workdir,
            submitted_at: Utc::now(),
        }
    }
}

/// The execution record for one task, from admission to terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub task: Task,
    pub state: RunState,
    /// Output lines in the order the process produced them.
    pub output_lines: Vec<String>,
    /// Exit code, present only when the process itself exited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Diagnostic for launch failures and other non-exit terminations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// A fresh run in the `running` state.
    pub fn started(task: Task) -> Self {
        Self {
            task,
            state: RunState::Running,
            output_lines: Vec::new(),
            exit_code: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// The single current-status record (`status.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: AgentState,
    /// Id of the task this record refers to, absent when idle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Human-readable detail: a prompt excerpt, or a failure diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn idle() -> Self {
        Self {
            state: AgentState::Idle,
            task: None,
            detail: None,
            updated_at: Utc::now(),
        }
    }

    /// The record written when a task starts running.
    pub fn working(task: &Task) -> Self {
        Self {
            state: AgentState::Working,
            task: Some(task.id.clone()),
            detail: Some(excerpt(&task.prompt)),
            updated_at: Utc::now(),
        }
    }

    /// The record written exactly once when a run reaches a terminal state.
    pub fn terminal(run: &TaskRun) -> Self {
        let detail = match (&run.error, run.exit_code) {
            (Some(err), _) => Some(err.clone()),
            (None, Some(code)) => Some(format!("exit code {code}")),
            (None, None) => None,
        };
        Self {
            state: run.state.into(),
            task: Some(run.task.id.clone()),
            detail,
            updated_at: Utc::now(),
        }
    }
}

/// Truncate a prompt for display in status records.
fn excerpt(prompt: &str) -> String {
    const MAX: usize = 50;
    let mut end = prompt.len().min(MAX);
    while !prompt.is_char_boundary(end) {
        end -= 1;
    }
    prompt[..end].to_owned()
}

/// An inbound control record (`commands.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Task prompt; older controllers wrote the field as `prompt`.
    #[serde(default, alias = "prompt", skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Stamped at append time; records from controllers that omit it
    /// read as "now".
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Task,
    Abort,
}

impl CommandRecord {
    /// Build a `task` command with a fresh `cmd_` id.
    pub fn task(prompt: impl Into<String>, workdir: Option<PathBuf>) -> Self {
        Self {
            id: short_id("cmd"),
            kind: CommandKind::Task,
            task: Some(prompt.into()),
            workdir,
            timestamp: Utc::now(),
        }
    }

    /// Build an `abort` command.
    pub fn abort() -> Self {
        Self {
            id: short_id("cmd"),
            kind: CommandKind::Abort,
            task: None,
            workdir: None,
            timestamp: Utc::now(),
        }
    }
}

/// One summary record per terminal task (`output.jsonl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    /// The accumulated output, newline-joined.
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Terminal state of the run. Absent in records written by older
    /// controllers; those are treated as completed/failed by exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RunState>,
}

impl OutputRecord {
    /// Build the summary record for a terminal run.
    pub fn from_run(run: &TaskRun) -> Self {
        Self {
            id: run.task.id.clone(),
            timestamp: Utc::now(),
            prompt: run.task.prompt.clone(),
            response: run.output_lines.join("\n"),
            exit_code: run.exit_code,
            state: Some(run.state),
        }
    }

    /// Terminal state, inferring from the exit code for legacy records.
    pub fn effective_state(&self) -> RunState {
        match self.state {
            Some(state) => state,
            None => match self.exit_code {
                Some(0) => RunState::Completed,
                _ => RunState::Failed,
            },
        }
    }
}

/// An entry in the durable event log (`log.jsonl`).
///
/// Append-only; file order is the total order. The log is the replay
/// source for reconstructing the most recent run after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// A task was admitted.
    Command {
        id: String,
        timestamp: DateTime<Utc>,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workdir: Option<PathBuf>,
    },
    /// One line of agent output.
    Output {
        id: String,
        timestamp: DateTime<Utc>,
        line: String,
    },
    /// A state transition for a run.
    Status {
        id: String,
        timestamp: DateTime<Utc>,
        state: RunState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

impl LogEntry {
    /// The task id this entry belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::Command { id, .. } | Self::Output { id, .. } | Self::Status { id, .. } => id,
        }
    }

    pub fn command(task: &Task) -> Self {
        Self::Command {
            id: task.id.clone(),
            timestamp: Utc::now(),
            prompt: task.prompt.clone(),
            workdir: task.workdir.clone(),
        }
    }

    pub fn output(task_id: &str, line: impl Into<String>) -> Self {
        Self::Output {
            id: task_id.to_owned(),
            timestamp: Utc::now(),
            line: line.into(),
        }
    }

    pub fn status(task_id: &str, state: RunState, exit_code: Option<i32>) -> Self {
        Self::Status {
            id: task_id.to_owned(),
            timestamp: Utc::now(),
            state,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ids_have_prefix_and_length() {
        let id = short_id("task");
        assert!(id.starts_with("task_"));
        assert_eq!(id.len(), "task_".len() + 8);
        assert_ne!(short_id("task"), short_id("task"));
    }

    #[test]
    fn run_state_terminality() {
        assert!(!RunState::Running.is_terminal());
        for state in [
            RunState::Completed,
            RunState::Failed,
            RunState::Cancelled,
            RunState::TimedOut,
        ] {
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn run_state_display_round_trips() {
        for state in [
            RunState::Running,
            RunState::Completed,
            RunState::Failed,
            RunState::Cancelled,
            RunState::TimedOut,
        ] {
            assert_eq!(state.to_string().parse::<RunState>().unwrap(), state);
        }
        assert!("nonsense".parse::<RunState>().is_err());
    }

    #[test]
    fn agent_state_projection() {
        assert_eq!(AgentState::from(RunState::Running), AgentState::Working);
        assert_eq!(AgentState::from(RunState::TimedOut), AgentState::TimedOut);
        assert_eq!(
            "timed_out".parse::<AgentState>().unwrap(),
            AgentState::TimedOut
        );
    }

    #[test]
    fn status_record_serializes_snake_case() {
        let record = StatusRecord {
            state: AgentState::TimedOut,
            task: Some("task_abc".into()),
            detail: None,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "timed_out");
        assert_eq!(json["task"], "task_abc");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn command_record_accepts_prompt_alias() {
        let json = r#"{"id":"cmd_1","type":"task","prompt":"fix it","timestamp":"2026-01-01T00:00:00Z"}"#;
        let cmd: CommandRecord = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.kind, CommandKind::Task);
        assert_eq!(cmd.task.as_deref(), Some("fix it"));

        // Records without a timestamp still parse.
        let bare: CommandRecord = serde_json::from_str(r#"{"id":"cmd_2","type":"abort"}"#).unwrap();
        assert_eq!(bare.kind, CommandKind::Abort);
    }

    #[test]
    fn log_entry_tagged_representation() {
        let entry = LogEntry::output("task_1", "hello");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "output");
        assert_eq!(json["id"], "task_1");
        assert_eq!(json["line"], "hello");

        let back: LogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.task_id(), "task_1");
    }

    #[test]
    fn output_record_effective_state_falls_back_to_exit_code() {
        let mut record = OutputRecord {
            id: "task_1".into(),
            timestamp: Utc::now(),
            prompt: "p".into(),
            response: "r".into(),
            exit_code: Some(0),
            state: None,
        };
        assert_eq!(record.effective_state(), RunState::Completed);
        record.exit_code = Some(2);
        assert_eq!(record.effective_state(), RunState::Failed);
        record.state = Some(RunState::Cancelled);
        assert_eq!(record.effective_state(), RunState::Cancelled);
    }

    #[test]
    fn terminal_status_detail_prefers_error() {
        let task = Task::new("list files", None);
        let mut run = TaskRun::started(task);
        run.state = RunState::Failed;
        run.error = Some("spawn failed".into());
        run.exit_code = None;
        let record = StatusRecord::terminal(&run);
        assert_eq!(record.state, AgentState::Failed);
        assert_eq!(record.detail.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let long = "é".repeat(60);
        let e = excerpt(&long);
        assert!(e.len() <= 50);
        assert!(long.starts_with(&e));
    }
}
