//! Process-management abstraction for the external coding agent.
//!
//! The agent is a dependency, not a library call: an opaque process that
//! consumes a prompt on stdin and produces line-oriented output and an
//! exit code. The [`Harness`] trait captures exactly that surface
//! (spawn, stream, signal, wait) so the driver never touches a concrete
//! process API.

pub mod claude_code;
pub mod trait_def;

pub use claude_code::ClaudeCodeAdapter;
pub use trait_def::{AgentHandle, Harness, LineStream};
