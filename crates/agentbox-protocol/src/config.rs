use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Protocol directory configuration.
///
/// Reads from `AGENT_PROTOCOL_DIR`, `AGENT_POLL_INTERVAL` and
/// `AGENT_TASK_TIMEOUT`, falling back to documented defaults when unset
/// or unparsable.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Directory holding the protocol files.
    pub dir: PathBuf,
    /// Interval between polls of `commands.jsonl` and the watch files.
    pub poll_interval: Duration,
    /// Maximum wall time for a single task before it is timed out.
    pub task_timeout: Duration,
}

impl ProtocolConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        let dir = env::var("AGENT_PROTOCOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let poll_interval =
            duration_from_env("AGENT_POLL_INTERVAL").unwrap_or(Self::DEFAULT_POLL_INTERVAL);
        let task_timeout =
            duration_from_env("AGENT_TASK_TIMEOUT").unwrap_or(Self::DEFAULT_TASK_TIMEOUT);
        Self {
            dir,
            poll_interval,
            task_timeout,
        }
    }

    /// Build a config rooted at an explicit directory (tests, CLI flags).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            task_timeout: Self::DEFAULT_TASK_TIMEOUT,
        }
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join("status.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("log.jsonl")
    }

    pub fn commands_path(&self) -> PathBuf {
        self.dir.join("commands.jsonl")
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join("output.jsonl")
    }

    pub fn processed_path(&self) -> PathBuf {
        self.dir.join(".processed_commands")
    }

    /// Create the protocol directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// The directory the config is rooted at.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Parse a seconds value (integer or fractional) from an env var.
///
/// Returns `None` when unset, empty, negative or non-numeric.
fn duration_from_env(key: &str) -> Option<Duration> {
    let raw = env::var(key).ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
