//! Core task execution and state-synchronization engine.
//!
//! One task at a time: the [`service::AgentService`] admits a task through
//! the [`admission::TaskSlot`], the [`runner`] drives the external agent
//! process to a terminal state while appending every output line to the
//! durable log, and the [`events::EventBroadcaster`] fans the live event
//! stream out to any number of independent subscribers.
//!
//! ```text
//! Control Surface (HTTP / CLI / file wrapper / backlog worker)
//!     |
//!     v
//! AgentService --try_claim--> TaskSlot (at most one active run)
//!     |
//!     v
//! runner::drive --spawn--> Harness (claude subprocess)
//!     |            per line: DurableLog append, then publish
//!     v
//! EventBroadcaster --start/output/done--> subscribers
//! ```

pub mod admission;
pub mod error;
pub mod events;
pub mod harness;
pub mod history;
pub mod runner;
pub mod service;

pub use error::{StopOutcome, SubmitError};
pub use events::{EventBroadcaster, EventStream, TaskEvent};
pub use harness::{AgentHandle, ClaudeCodeAdapter, Harness};
pub use service::AgentService;
