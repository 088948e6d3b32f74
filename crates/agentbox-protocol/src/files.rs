//! Low-level file primitives shared by the protocol stores.
//!
//! Two disciplines, used everywhere:
//!
//! - **JSONL append**: a record is committed once the append returns. The
//!   write is flushed and synced before returning, so a crash before the
//!   return is never observed by readers, and a crash after always is.
//! - **Atomic JSON replace**: build the full document, write it to a side
//!   file, rename over the canonical path. Readers see the old document or
//!   the new one, never a torn mix.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append one record as a JSON line, flushing and syncing before returning.
pub async fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_string(record).context("failed to serialize record")?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("failed to flush {}", path.display()))?;
    file.sync_data()
        .await
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}

/// Read all records from a JSONL file, preserving file order.
///
/// A missing file reads as empty. Malformed lines are skipped with a
/// warning; they never fail the read.
pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut records = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed record"
                );
            }
        }
    }
    Ok(records)
}

/// Atomically replace a JSON document: write to `<path>.tmp`, then rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(value).context("failed to serialize document")?;
    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to rename {} over {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Read a JSON document. Absent or malformed files read as `None`; a
/// malformed document is logged, never propagated as an error.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping malformed document");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        n: u32,
        s: String,
    }

    #[tokio::test]
    async fn jsonl_append_then_read_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("recs.jsonl");

        for n in 0..5 {
            let rec = Rec {
                n,
                s: format!("line {n}"),
            };
            append_jsonl(&path, &rec).await.unwrap();
        }

        let records: Vec<Rec> = read_jsonl(&path).await.unwrap();
        assert_eq!(records.len(), 5);
        for (i, rec) in records.iter().enumerate() {
            assert_eq!(rec.n as usize, i);
        }
    }

    #[tokio::test]
    async fn jsonl_missing_file_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let records: Vec<Rec> = read_jsonl(&tmp.path().join("nope.jsonl")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn jsonl_malformed_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("recs.jsonl");
        tokio::fs::write(
            &path,
            "{\"n\":1,\"s\":\"ok\"}\nnot json at all\n\n{\"n\":2,\"s\":\"also ok\"}\n",
        )
        .await
        .unwrap();

        let records: Vec<Rec> = read_jsonl(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].n, 1);
        assert_eq!(records[1].n, 2);
    }

    #[tokio::test]
    async fn json_atomic_write_then_read_is_byte_equivalent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.json");

        let doc = Rec {
            n: 7,
            s: "hello".into(),
        };
        write_json_atomic(&path, &doc).await.unwrap();

        let back: Rec = read_json(&path).await.unwrap().unwrap();
        assert_eq!(back, doc);
        // No leftover temp file.
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn json_missing_and_malformed_read_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.json");
        assert!(read_json::<Rec>(&path).await.unwrap().is_none());

        tokio::fs::write(&path, "{ truncated").await.unwrap();
        assert!(read_json::<Rec>(&path).await.unwrap().is_none());
    }
}
