//! The durable event log (`log.jsonl`).
//!
//! Append-only, single writer, any number of polling readers. File order
//! is the total order; entries are never rewritten. On restart the log is
//! the replay source for the most recent run's last-known state.

use std::path::PathBuf;

use anyhow::Result;

use crate::files;
use crate::models::{LogEntry, RunState, Task};

/// Handle to the durable log file.
#[derive(Debug, Clone)]
pub struct DurableLog {
    path: PathBuf,
}

/// The most recent run reconstructed from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredRun {
    pub task: Task,
    /// Output lines recorded since the run's command entry, in order.
    pub lines: Vec<String>,
    /// Last recorded state; `Running` means the process crashed mid-run.
    pub state: RunState,
    pub exit_code: Option<i32>,
}

impl DurableLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one entry. The entry is committed iff this returns `Ok`.
    pub async fn append(&self, entry: &LogEntry) -> Result<()> {
        files::append_jsonl(&self.path, entry).await
    }

    /// Read every entry, in file order. Never blocks the writer.
    pub async fn read_all(&self) -> Result<Vec<LogEntry>> {
        files::read_jsonl(&self.path).await
    }

    /// Read entries starting at a zero-based offset.
    pub async fn read_from(&self, offset: usize) -> Result<Vec<LogEntry>> {
        let mut entries = self.read_all().await?;
        if offset >= entries.len() {
            return Ok(Vec::new());
        }
        Ok(entries.split_off(offset))
    }

    /// Read the entries belonging to one task, in file order.
    pub async fn read_for_task(&self, task_id: &str) -> Result<Vec<LogEntry>> {
        let entries = self.read_all().await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.task_id() == task_id)
            .collect())
    }

    /// Reconstruct the most recent run: the last `command` entry, the
    /// `output` entries since it, and the last `status` entry for it.
    ///
    /// Returns `None` when the log holds no command entry.
    pub async fn recover_last_run(&self) -> Result<Option<RecoveredRun>> {
        let entries = self.read_all().await?;

        let Some(cmd_index) = entries
            .iter()
            .rposition(|e| matches!(e, LogEntry::Command { .. }))
        else {
            return Ok(None);
        };

        let LogEntry::Command {
            id,
            timestamp,
            prompt,
            workdir,
        } = &entries[cmd_index]
        else {
            unreachable!("rposition matched a command entry");
        };

        let mut task = Task::with_id(id.clone(), prompt.clone(), workdir.clone());
        task.submitted_at = *timestamp;

        let mut lines = Vec::new();
        // A run with a command entry but no status entry yet crashed before
        // the running transition was recorded; report it as still running.
        let mut state = RunState::Running;
        let mut exit_code = None;

        for entry in &entries[cmd_index + 1..] {
            if entry.task_id() != task.id {
                continue;
            }
            match entry {
                LogEntry::Output { line, .. } => lines.push(line.clone()),
                LogEntry::Status {
                    state: s,
                    exit_code: code,
                    ..
                } => {
                    state = *s;
                    exit_code = *code;
                }
                LogEntry::Command { .. } => {}
            }
        }

        Ok(Some(RecoveredRun {
            task,
            lines,
            state,
            exit_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> DurableLog {
        DurableLog::new(dir.path().join("log.jsonl"))
    }

    #[tokio::test]
    async fn append_and_read_preserve_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp);

        let task = Task::with_id("task_1", "list files", None);
        log.append(&LogEntry::command(&task)).await.unwrap();
        log.append(&LogEntry::output("task_1", "a.py")).await.unwrap();
        log.append(&LogEntry::output("task_1", "b.py")).await.unwrap();
        log.append(&LogEntry::status("task_1", RunState::Completed, Some(0)))
            .await
            .unwrap();

        let entries = log.read_all().await.unwrap();
        assert_eq!(entries.len(), 4);
        assert!(matches!(entries[0], LogEntry::Command { .. }));
        assert!(matches!(&entries[1], LogEntry::Output { line, .. } if line == "a.py"));
        assert!(matches!(&entries[2], LogEntry::Output { line, .. } if line == "b.py"));
        assert!(matches!(entries[3], LogEntry::Status { .. }));
    }

    #[tokio::test]
    async fn read_from_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp);

        for n in 0..3 {
            log.append(&LogEntry::output("task_1", format!("line {n}")))
                .await
                .unwrap();
        }

        let tail = log.read_from(2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert!(matches!(&tail[0], LogEntry::Output { line, .. } if line == "line 2"));
        assert!(log.read_from(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recover_terminal_run() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp);

        // An earlier run, then the one we expect to recover.
        let old = Task::with_id("task_old", "old", None);
        log.append(&LogEntry::command(&old)).await.unwrap();
        log.append(&LogEntry::status("task_old", RunState::Completed, Some(0)))
            .await
            .unwrap();

        let task = Task::with_id("task_new", "new work", None);
        log.append(&LogEntry::command(&task)).await.unwrap();
        log.append(&LogEntry::status("task_new", RunState::Running, None))
            .await
            .unwrap();
        log.append(&LogEntry::output("task_new", "out")).await.unwrap();
        log.append(&LogEntry::status("task_new", RunState::Failed, Some(2)))
            .await
            .unwrap();

        let run = log.recover_last_run().await.unwrap().unwrap();
        assert_eq!(run.task.id, "task_new");
        assert_eq!(run.lines, vec!["out".to_string()]);
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.exit_code, Some(2));
    }

    #[tokio::test]
    async fn recover_interrupted_run_reports_running() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp);

        let task = Task::with_id("task_1", "crashy", None);
        log.append(&LogEntry::command(&task)).await.unwrap();
        log.append(&LogEntry::status("task_1", RunState::Running, None))
            .await
            .unwrap();
        log.append(&LogEntry::output("task_1", "partial")).await.unwrap();
        // Crash: no terminal status entry.

        let run = log.recover_last_run().await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Running);
        assert_eq!(run.lines, vec!["partial".to_string()]);
    }

    #[tokio::test]
    async fn recover_empty_log_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp);
        assert!(log.recover_last_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_for_task_filters_other_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let log = log_in(&tmp);

        log.append(&LogEntry::output("task_a", "a")).await.unwrap();
        log.append(&LogEntry::output("task_b", "b")).await.unwrap();
        log.append(&LogEntry::output("task_a", "a2")).await.unwrap();

        let entries = log.read_for_task("task_a").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.task_id() == "task_a"));
    }
}
