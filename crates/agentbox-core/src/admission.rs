//! Admission control: the single guarded "active run" slot.
//!
//! This slot is the only mutable state shared between front ends. All
//! access goes through its check-and-set and clear operations; handlers
//! never touch a free-standing "current task" variable.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::events::{EventBroadcaster, EventStream};

/// Book-keeping for the run currently occupying the slot.
#[derive(Debug)]
pub struct ActiveRun {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    /// Cooperative cancellation signal for the driver.
    pub cancel: CancellationToken,
    /// Fan-out sender for this run's events.
    pub broadcaster: EventBroadcaster,
}

/// The at-most-one-active-task gate.
#[derive(Debug, Default)]
pub struct TaskSlot {
    inner: Mutex<Option<ActiveRun>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the slot for a new run.
    ///
    /// The check and the set are one indivisible step: of any number of
    /// concurrent callers, exactly one wins. Losing callers get the id of
    /// the occupying run back.
    pub fn try_claim(&self, run: ActiveRun) -> Result<(), String> {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(active) => Err(active.task_id.clone()),
            None => {
                *slot = Some(run);
                Ok(())
            }
        }
    }

    /// Clear the slot when the named run reaches a terminal state.
    ///
    /// A mismatched id leaves the slot untouched, so a stale release can
    /// never evict a newer run.
    pub fn release(&self, task_id: &str) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|run| run.task_id == task_id) {
            *slot = None;
        }
    }

    /// Id of the active run, if any.
    pub fn current_task_id(&self) -> Option<String> {
        let slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|run| run.task_id.clone())
    }

    /// Signal cancellation to the active run, returning its id.
    ///
    /// Returns `None` (a no-op) when nothing is active.
    pub fn cancel_current(&self) -> Option<String> {
        let slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|run| {
            run.cancel.cancel();
            run.task_id.clone()
        })
    }

    /// Attach to the active run's event stream, if a run is active.
    ///
    /// The subscriber receives events published after this call; earlier
    /// events are only available through history.
    pub fn subscribe_current(&self) -> Option<EventStream> {
        let slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|run| run.broadcaster.subscribe())
    }
}
