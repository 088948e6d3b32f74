//! The output file (`output.jsonl`): one summary record per terminal task.

use std::path::PathBuf;

use anyhow::Result;

use crate::files;
use crate::models::OutputRecord;

#[derive(Debug, Clone)]
pub struct OutputFile {
    path: PathBuf,
}

impl OutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, record: &OutputRecord) -> Result<()> {
        files::append_jsonl(&self.path, record).await
    }

    pub async fn read_all(&self) -> Result<Vec<OutputRecord>> {
        files::read_jsonl(&self.path).await
    }

    /// Read the record for a specific task id, if present.
    pub async fn find(&self, id: &str) -> Result<Option<OutputRecord>> {
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }
}
