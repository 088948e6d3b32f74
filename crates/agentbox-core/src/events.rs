//! Live event fan-out for a single task run.
//!
//! Built on `tokio::sync::broadcast`: publishing never blocks, every
//! subscriber sees events in publish order, and a subscriber that falls
//! too far behind skips the dropped range instead of stalling the
//! publisher or its peers.

use std::pin::Pin;

use agentbox_protocol::RunState;
use futures::Stream;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

/// Events delivered to subscribers, in order: one `Start`, any number of
/// `Output`s, and exactly one terminal `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Start {
        task_id: String,
        prompt: String,
    },
    Output {
        line: String,
    },
    Done {
        task_id: String,
        exit_code: Option<i32>,
        state: RunState,
        error: Option<String>,
    },
}

impl TaskEvent {
    /// Wire name of the event (the SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Output { .. } => "output",
            Self::Done { .. } => "done",
        }
    }

    /// JSON payload of the event (the SSE `data:` field).
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Start { task_id, prompt } => json!({
                "task_id": task_id,
                "prompt": prompt,
            }),
            Self::Output { line } => json!({ "line": line }),
            Self::Done {
                task_id,
                exit_code,
                state,
                error,
            } => {
                let mut payload = json!({
                    "task_id": task_id,
                    "exit_code": exit_code,
                    "state": state.to_string(),
                });
                if let Some(error) = error {
                    payload["error"] = json!(error);
                }
                payload
            }
        }
    }

    /// Whether this is the terminal event for the run.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// A finite, lazy stream of task events, ending at `Done`.
pub type EventStream = Pin<Box<dyn Stream<Item = TaskEvent> + Send>>;

/// Buffered events per subscriber before the oldest are dropped for that
/// subscriber alone.
const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out sender for one task run.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Never blocks; having no subscribers is not an error.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from this point on.
    ///
    /// The stream yields events in publish order and ends after the
    /// `Done` event (or when the run is over and the sender is gone).
    /// A lagged subscriber skips the dropped events and continues.
    pub fn subscribe(&self) -> EventStream {
        let mut rx = self.tx.subscribe();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = event.is_done();
                        yield event;
                        if done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged, dropping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Box::pin(stream)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn done(task_id: &str) -> TaskEvent {
        TaskEvent::Done {
            task_id: task_id.into(),
            exit_code: Some(0),
            state: RunState::Completed,
            error: None,
        }
    }

    #[tokio::test]
    async fn all_subscribers_see_identical_order() {
        let broadcaster = EventBroadcaster::new();
        let streams: Vec<EventStream> = (0..3).map(|_| broadcaster.subscribe()).collect();

        broadcaster.publish(TaskEvent::Start {
            task_id: "task_1".into(),
            prompt: "list files".into(),
        });
        broadcaster.publish(TaskEvent::Output { line: "a.py".into() });
        broadcaster.publish(TaskEvent::Output { line: "b.py".into() });
        broadcaster.publish(done("task_1"));

        for stream in streams {
            let events: Vec<TaskEvent> = stream.collect().await;
            assert_eq!(events.len(), 4);
            assert_eq!(events[0].name(), "start");
            assert_eq!(events[1], TaskEvent::Output { line: "a.py".into() });
            assert_eq!(events[2], TaskEvent::Output { line: "b.py".into() });
            assert!(events[3].is_done());
        }
    }

    #[tokio::test]
    async fn stream_ends_at_done() {
        let broadcaster = EventBroadcaster::new();
        let stream = broadcaster.subscribe();

        broadcaster.publish(done("task_1"));
        // Events after done must not be observed by this subscriber.
        broadcaster.publish(TaskEvent::Output { line: "late".into() });

        let events: Vec<TaskEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_done());
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(TaskEvent::Start {
            task_id: "task_1".into(),
            prompt: "p".into(),
        });

        let stream = broadcaster.subscribe();
        broadcaster.publish(done("task_1"));
        let events: Vec<TaskEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_done());
    }

    #[tokio::test]
    async fn stream_ends_when_sender_dropped() {
        let broadcaster = EventBroadcaster::new();
        let stream = broadcaster.subscribe();
        drop(broadcaster);
        let events: Vec<TaskEvent> = stream.collect().await;
        assert!(events.is_empty());
    }

    #[test]
    fn done_payload_includes_error_only_when_present() {
        let ok = done("task_1").payload();
        assert_eq!(ok["state"], "completed");
        assert_eq!(ok["exit_code"], 0);
        assert!(ok.get("error").is_none());

        let failed = TaskEvent::Done {
            task_id: "task_1".into(),
            exit_code: None,
            state: RunState::Failed,
            error: Some("spawn failed".into()),
        }
        .payload();
        assert_eq!(failed["state"], "failed");
        assert_eq!(failed["exit_code"], serde_json::Value::Null);
        assert_eq!(failed["error"], "spawn failed");
    }
}
