//! Linear issue-tracker integration.
//!
//! A thin GraphQL client plus the issue domain logic the backlog worker
//! needs: pending-issue filtering, workflow-state transitions, result
//! comments, and prompt building. The worker itself lives in the CLI;
//! its only calls into the core are submit-task and read-final-status,
//! both over the HTTP control surface.

pub mod client;
pub mod issues;

pub use client::{LinearClient, LinearError};
pub use issues::{Issue, build_prompt, pending_filter, result_comment, states};
