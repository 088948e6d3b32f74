//! The inbound command channel (`commands.jsonl`) and the durable record
//! of which command ids have already been handled (`.processed_commands`).

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::files;
use crate::models::CommandRecord;

/// Handle to the append-only commands file.
#[derive(Debug, Clone)]
pub struct CommandsFile {
    path: PathBuf,
}

impl CommandsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, record: &CommandRecord) -> Result<()> {
        files::append_jsonl(&self.path, record).await
    }

    pub async fn read_all(&self) -> Result<Vec<CommandRecord>> {
        files::read_jsonl(&self.path).await
    }
}

/// Set of already-processed command ids, persisted one id per line so the
/// wrapper does not re-run commands after a restart.
#[derive(Debug)]
pub struct ProcessedSet {
    path: PathBuf,
    seen: HashSet<String>,
}

impl ProcessedSet {
    /// Load the set from disk; a missing file loads as empty.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        Ok(Self { path, seen })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Mark an id as processed, durably.
    pub async fn mark(&mut self, id: &str) -> Result<()> {
        if !self.seen.insert(id.to_owned()) {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {} for append", self.path.display()))?;
        file.write_all(format!("{id}\n").as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandKind;

    #[tokio::test]
    async fn append_and_read_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let file = CommandsFile::new(tmp.path().join("commands.jsonl"));

        file.append(&CommandRecord::task("fix the bug", None))
            .await
            .unwrap();
        file.append(&CommandRecord::abort()).await.unwrap();

        let records = file.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, CommandKind::Task);
        assert_eq!(records[0].task.as_deref(), Some("fix the bug"));
        assert_eq!(records[1].kind, CommandKind::Abort);
    }

    #[tokio::test]
    async fn processed_set_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".processed_commands");

        let mut set = ProcessedSet::load(&path).await.unwrap();
        assert!(!set.contains("cmd_1"));
        set.mark("cmd_1").await.unwrap();
        set.mark("cmd_2").await.unwrap();
        // Marking twice is a no-op.
        set.mark("cmd_1").await.unwrap();

        let reloaded = ProcessedSet::load(&path).await.unwrap();
        assert!(reloaded.contains("cmd_1"));
        assert!(reloaded.contains("cmd_2"));
        assert!(!reloaded.contains("cmd_3"));
    }
}
