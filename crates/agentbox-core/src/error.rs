use thiserror::Error;

/// Why a submission was not admitted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Another task is currently active. The caller may retry later or
    /// queue on its own side; the core never queues.
    #[error("agent is busy with task {current}")]
    Busy { current: String },
    /// The submission was admitted but could not be made durable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubmitError {
    /// Whether this is the busy rejection (as opposed to an internal fault).
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Outcome of a stop request. Stopping with no active task is a no-op,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Cancellation was signalled to the active run.
    Stopping { task_id: String },
    /// There was nothing to stop.
    NoActiveTask,
}
