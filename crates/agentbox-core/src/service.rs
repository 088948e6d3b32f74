//! The control surface: one service instance shared by every front end.

use std::sync::Arc;
use std::time::Duration;

use agentbox_protocol::{
    DurableLog, LogEntry, OutputFile, OutputRecord, ProtocolConfig, RunState, StatusRecord,
    StatusStore, Task, TaskRun,
};
use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::{ActiveRun, TaskSlot};
use crate::error::{StopOutcome, SubmitError};
use crate::events::{EventBroadcaster, EventStream};
use crate::harness::Harness;
use crate::history::History;
use crate::runner::{self, RunContext};

/// Accepts one task at a time, drives it to completion, and exposes the
/// run as status, history, and a live event stream.
///
/// Cheap to share: clone the `Arc` handed out by [`AgentService::new`].
pub struct AgentService {
    harness: Arc<dyn Harness>,
    slot: Arc<TaskSlot>,
    log: DurableLog,
    status: StatusStore,
    output: OutputFile,
    history: Arc<History>,
    task_timeout: Duration,
}

impl AgentService {
    /// Build the service over a protocol directory and recover durable
    /// state left by a previous process.
    pub async fn new(config: &ProtocolConfig, harness: Arc<dyn Harness>) -> Result<Arc<Self>> {
        config.ensure_dir().await?;
        let service = Arc::new(Self {
            harness,
            slot: Arc::new(TaskSlot::new()),
            log: DurableLog::new(config.log_path()),
            status: StatusStore::new(config.status_path()),
            output: OutputFile::new(config.output_path()),
            history: Arc::new(History::new()),
            task_timeout: config.task_timeout,
        });
        service.recover().await?;
        Ok(service)
    }

    /// Rebuild history from the output file, close out a run the previous
    /// process left unfinished, and ensure a status record exists.
    async fn recover(&self) -> Result<()> {
        let records = self.output.read_all().await?;
        if !records.is_empty() {
            info!(count = records.len(), "recovered history from output file");
        }
        self.history.recover_from(&records);

        if let Some(recovered) = self.log.recover_last_run().await? {
            if !recovered.state.is_terminal() {
                warn!(task_id = %recovered.task.id, "closing out run interrupted by restart");
                let mut run = TaskRun::started(recovered.task);
                run.output_lines = recovered.lines;
                run.state = RunState::Failed;
                run.error = Some("interrupted by restart".to_owned());
                run.finished_at = Some(Utc::now());
                self.status.write(&StatusRecord::terminal(&run)).await?;
                self.log
                    .append(&LogEntry::status(&run.task.id, run.state, None))
                    .await?;
                self.output.append(&OutputRecord::from_run(&run)).await?;
                self.history.push(run);
            }
        }

        if self.status.read().await?.is_none() {
            self.status.write(&StatusRecord::idle()).await?;
        }
        Ok(())
    }

    /// Submit a task.
    ///
    /// Rejects synchronously with [`SubmitError::Busy`] when a run is
    /// active; nothing is appended to the log for a rejected submission.
    /// On admission the command record is made durable, the driver is
    /// started, and the returned stream yields this run's
    /// `start, output*, done` events.
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<EventStream, SubmitError> {
        let cancel = CancellationToken::new();
        let broadcaster = EventBroadcaster::new();
        let active = ActiveRun {
            task_id: task.id.clone(),
            started_at: Utc::now(),
            cancel: cancel.clone(),
            broadcaster: broadcaster.clone(),
        };
        self.slot
            .try_claim(active)
            .map_err(|current| SubmitError::Busy { current })?;

        // Admitted. Make the command durable before the driver starts;
        // if that fails the slot goes back and the caller sees the error.
        if let Err(e) = self.log.append(&LogEntry::command(&task)).await {
            self.slot.release(&task.id);
            return Err(SubmitError::Internal(e));
        }

        // Subscribe before the driver starts so the caller observes the
        // start event.
        let stream = broadcaster.subscribe();

        let ctx = RunContext {
            harness: Arc::clone(&self.harness),
            slot: Arc::clone(&self.slot),
            log: self.log.clone(),
            status: self.status.clone(),
            output: self.output.clone(),
            history: Arc::clone(&self.history),
            broadcaster,
            cancel,
            timeout: self.task_timeout,
        };
        tokio::spawn(runner::drive(ctx, task));
        Ok(stream)
    }

    /// Attach to the active run's live events, if a run is active.
    pub fn subscribe(&self) -> Option<EventStream> {
        self.slot.subscribe_current()
    }

    /// Snapshot of the current status record (`idle` when none exists).
    pub async fn status(&self) -> Result<StatusRecord> {
        self.status.read_or_idle().await
    }

    /// Request cancellation of the active run. A no-op when idle.
    pub fn stop(&self) -> StopOutcome {
        match self.slot.cancel_current() {
            Some(task_id) => StopOutcome::Stopping { task_id },
            None => StopOutcome::NoActiveTask,
        }
    }

    /// Terminal runs, most recent first.
    pub fn history(&self, limit: usize) -> Vec<TaskRun> {
        self.history.recent(limit)
    }

    /// Id of the active run, if any.
    pub fn current_task_id(&self) -> Option<String> {
        self.slot.current_task_id()
    }

    pub fn is_busy(&self) -> bool {
        self.current_task_id().is_some()
    }
}
