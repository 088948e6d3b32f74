//! Bounded in-memory history of terminal runs.
//!
//! Rebuilt from `output.jsonl` at startup, appended to exactly once per
//! terminal run afterwards. Queries return most-recent-first.

use std::collections::VecDeque;
use std::sync::Mutex;

use agentbox_protocol::{OutputRecord, Task, TaskRun};

/// Maximum retained entries; older ones are discarded.
const MAX_HISTORY: usize = 100;

#[derive(Debug)]
pub struct History {
    inner: Mutex<VecDeque<TaskRun>>,
    cap: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    /// Append a terminal run, discarding the oldest entry past capacity.
    pub fn push(&self, run: TaskRun) {
        let mut runs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if runs.len() >= self.cap {
            runs.pop_front();
        }
        runs.push_back(run);
    }

    /// The most recent `limit` runs, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TaskRun> {
        let runs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        runs.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let runs = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild from output records (file order is oldest first).
    pub fn recover_from(&self, records: &[OutputRecord]) {
        for record in records {
            self.push(run_from_record(record));
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconstruct a terminal run from its summary record. Timestamps
/// collapse to the record's write time; that is all the record kept.
fn run_from_record(record: &OutputRecord) -> TaskRun {
    let mut task = Task::with_id(record.id.clone(), record.prompt.clone(), None);
    task.submitted_at = record.timestamp;

    let output_lines = if record.response.is_empty() {
        Vec::new()
    } else {
        record.response.lines().map(str::to_owned).collect()
    };

    TaskRun {
        task,
        state: record.effective_state(),
        output_lines,
        exit_code: record.exit_code,
        error: None,
        started_at: record.timestamp,
        finished_at: Some(record.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_protocol::RunState;
    use chrono::Utc;

    fn terminal_run(id: &str) -> TaskRun {
        let mut run = TaskRun::started(Task::with_id(id, "prompt", None));
        run.state = RunState::Completed;
        run.exit_code = Some(0);
        run
    }

    #[test]
    fn recent_is_most_recent_first() {
        let history = History::new();
        history.push(terminal_run("task_1"));
        history.push(terminal_run("task_2"));
        history.push(terminal_run("task_3"));

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task.id, "task_3");
        assert_eq!(recent[1].task.id, "task_2");
    }

    #[test]
    fn capacity_discards_oldest() {
        let history = History::with_capacity(2);
        history.push(terminal_run("task_1"));
        history.push(terminal_run("task_2"));
        history.push(terminal_run("task_3"));

        assert_eq!(history.len(), 2);
        let recent = history.recent(10);
        assert_eq!(recent[0].task.id, "task_3");
        assert_eq!(recent[1].task.id, "task_2");
    }

    #[test]
    fn recover_rebuilds_runs_from_records() {
        let history = History::new();
        let records = vec![
            OutputRecord {
                id: "task_old".into(),
                timestamp: Utc::now(),
                prompt: "old".into(),
                response: "a\nb".into(),
                exit_code: Some(0),
                state: Some(RunState::Completed),
            },
            OutputRecord {
                id: "task_new".into(),
                timestamp: Utc::now(),
                prompt: "new".into(),
                response: String::new(),
                exit_code: None,
                state: Some(RunState::Cancelled),
            },
        ];
        history.recover_from(&records);

        let recent = history.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task.id, "task_new");
        assert_eq!(recent[0].state, RunState::Cancelled);
        assert!(recent[0].output_lines.is_empty());
        assert_eq!(recent[1].output_lines, vec!["a".to_string(), "b".to_string()]);
    }
}
