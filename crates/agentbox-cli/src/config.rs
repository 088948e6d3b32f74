//! Configuration resolution for the `agentbox` binary.
//!
//! Chain: CLI flag > env var > config file > default. The config file is
//! TOML at `~/.config/agentbox/config.toml` (XDG layout); every field is
//! optional, and the env names match the wire protocol the files have
//! always used.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use agentbox_protocol::ProtocolConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub linear: LinearSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerSection {
    /// Bind host for `serve`.
    pub host: Option<String>,
    /// Bind port for `serve`.
    pub port: Option<u16>,
    /// Server URL used by the client commands.
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentSection {
    /// Path to the agent binary.
    pub binary: Option<String>,
    /// Default working directory for tasks.
    pub workspace: Option<PathBuf>,
    /// Upstream credential forwarded to the agent process.
    pub anthropic_api_key: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LinearSection {
    pub api_key: Option<String>,
    pub team_id: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the agentbox config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/agentbox` or
/// `~/.config/agentbox`, regardless of platform conventions.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("agentbox");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("agentbox")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file. A missing file is `None`, not an error.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(Some(config))
}

// -----------------------------------------------------------------------
// Resolved settings
// -----------------------------------------------------------------------

/// Fully resolved configuration (env > config file > default). CLI flags
/// override individual fields at the call sites.
#[derive(Debug)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub server_url: String,
    pub workspace: PathBuf,
    pub agent_binary: String,
    pub anthropic_api_key: Option<String>,
    pub linear_api_key: Option<String>,
    pub linear_team_id: Option<String>,
    pub protocol: ProtocolConfig,
}

impl Settings {
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

    pub fn resolve() -> Result<Self> {
        let file = load_config()?.unwrap_or_default();
        Ok(Self::from_parts(file))
    }

    fn from_parts(file: ConfigFile) -> Self {
        let host = env_string("AGENT_HOST")
            .or(file.server.host)
            .unwrap_or_else(|| Self::DEFAULT_HOST.to_owned());
        let port = env_string("AGENT_PORT")
            .and_then(|raw| raw.parse().ok())
            .or(file.server.port)
            .unwrap_or(Self::DEFAULT_PORT);
        let server_url = env_string("AGENTBOX_SERVER")
            .or(file.server.url)
            .unwrap_or_else(|| Self::DEFAULT_SERVER_URL.to_owned());
        let workspace = env_string("WORKSPACE_DIR")
            .map(PathBuf::from)
            .or(file.agent.workspace)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let agent_binary = file.agent.binary.unwrap_or_else(|| "claude".to_owned());
        let anthropic_api_key = env_string("ANTHROPIC_API_KEY").or(file.agent.anthropic_api_key);
        let linear_api_key = env_string("LINEAR_API_KEY").or(file.linear.api_key);
        let linear_team_id = env_string("LINEAR_TEAM_ID").or(file.linear.team_id);

        Self {
            host,
            port,
            server_url,
            workspace,
            agent_binary,
            anthropic_api_key,
            linear_api_key,
            linear_team_id,
            protocol: ProtocolConfig::from_env(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_is_empty() {
        let settings = Settings::from_parts(ConfigFile::default());
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.server_url, "http://localhost:8080");
        assert_eq!(settings.agent_binary, "claude");
    }

    #[test]
    fn config_file_fields_are_used() {
        let file: ConfigFile = toml::from_str(
            "[server]\nport = 9999\nurl = \"http://box:9999\"\n\
             [agent]\nbinary = \"/opt/claude\"\n\
             [linear]\nteam_id = \"team-1\"\n",
        )
        .unwrap();
        let settings = Settings::from_parts(file);
        assert_eq!(settings.port, 9999);
        assert_eq!(settings.server_url, "http://box:9999");
        assert_eq!(settings.agent_binary, "/opt/claude");
        assert_eq!(settings.linear_team_id.as_deref(), Some("team-1"));
    }

    #[test]
    fn partial_sections_parse() {
        let file: ConfigFile = toml::from_str("[server]\nhost = \"127.0.0.1\"\n").unwrap();
        assert_eq!(file.server.host.as_deref(), Some("127.0.0.1"));
        assert!(file.agent.binary.is_none());
    }
}
