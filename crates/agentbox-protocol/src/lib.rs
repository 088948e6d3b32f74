//! Durable file protocol for agentbox.
//!
//! Everything the controller and the agent share on disk lives here:
//!
//! - `commands.jsonl` -- inbound control records, append-only
//! - `output.jsonl` -- one summary record per terminal task, append-only
//! - `log.jsonl` -- the durable event log (command/output/status entries),
//!   the replay source for crash recovery
//! - `status.json` -- the single current-status record, atomically replaced
//!
//! The files are line-delimited JSON with ISO-8601 timestamps, so any
//! language (or a shell with `tail -f` and `jq`) can act as a controller.

pub mod commands;
pub mod config;
pub mod files;
pub mod log;
pub mod models;
pub mod output;
pub mod status;

pub use commands::{CommandsFile, ProcessedSet};
pub use config::ProtocolConfig;
pub use log::{DurableLog, RecoveredRun};
pub use models::{
    AgentState, CommandKind, CommandRecord, LogEntry, OutputRecord, RunState, StatusRecord, Task,
    TaskRun,
};
pub use output::OutputFile;
pub use status::StatusStore;
