//! The status store (`status.json`): a single current-state record.
//!
//! Writes build the full record and swap it in with a temp-file rename, so
//! a concurrent reader observes the previous record or the new one in
//! full, never a torn mix. No read lock is needed.

use std::path::PathBuf;

use anyhow::Result;

use crate::files;
use crate::models::StatusRecord;

#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Atomically replace the current record.
    pub async fn write(&self, record: &StatusRecord) -> Result<()> {
        files::write_json_atomic(&self.path, record).await
    }

    /// Read the current record. Absent or malformed files read as `None`.
    pub async fn read(&self) -> Result<Option<StatusRecord>> {
        files::read_json(&self.path).await
    }

    /// Read the current record, treating absence as idle.
    pub async fn read_or_idle(&self) -> Result<StatusRecord> {
        Ok(self.read().await?.unwrap_or_else(StatusRecord::idle))
    }
}
