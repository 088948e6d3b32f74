//! Issue domain logic: filters, prompts, and result comments.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

/// Conventional workflow state names the worker moves issues between.
pub mod states {
    pub const IN_PROGRESS: &str = "In Progress";
    pub const IN_REVIEW: &str = "In Review";
    /// Failed issues go back to the queue for human attention rather
    /// than being resubmitted automatically.
    pub const TODO: &str = "Todo";
}

/// How many trailing output lines the result comment keeps.
const COMMENT_TAIL_LINES: usize = 50;

/// An issue as returned by the pending-issues query.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub state: Option<IssueState>,
    #[serde(default)]
    pub labels: Option<LabelConnection>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueState {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelConnection {
    #[serde(default)]
    pub nodes: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

impl Issue {
    /// Names of the labels attached to this issue.
    pub fn label_names(&self) -> Vec<&str> {
        self.labels
            .as_ref()
            .map(|c| c.nodes.iter().map(|l| l.name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn state_name(&self) -> &str {
        self.state.as_ref().map(|s| s.name.as_str()).unwrap_or("?")
    }
}

/// The `IssueFilter` object for the pending-issues query: backlog or
/// unstarted, optionally restricted to a team and a label.
pub fn pending_filter(team_id: Option<&str>, label: Option<&str>) -> Value {
    let mut filter = json!({
        "state": { "type": { "in": ["backlog", "unstarted"] } },
    });
    if let Some(team_id) = team_id {
        filter["team"] = json!({ "id": { "eq": team_id } });
    }
    if let Some(label) = label {
        filter["labels"] = json!({ "name": { "eq": label } });
    }
    filter
}

/// Build the agent prompt for an issue.
pub fn build_prompt(issue: &Issue) -> String {
    format!(
        "You are working on issue {identifier}: {title}\n\
         \n\
         Description:\n\
         {description}\n\
         \n\
         Instructions:\n\
         1. Analyze this issue and understand what needs to be done\n\
         2. Look at the relevant code in the workspace\n\
         3. Make the necessary changes to fix/implement this\n\
         4. Run any relevant tests\n\
         5. Summarize what you did\n\
         \n\
         If you cannot complete this task, explain why and what additional \
         information you need.\n",
        identifier = issue.identifier,
        title = issue.title,
        description = issue
            .description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or("(no description)"),
    )
}

/// Render the markdown comment posted back to the issue after a run.
pub fn result_comment(success: bool, output_lines: &[String]) -> String {
    let tail_start = output_lines.len().saturating_sub(COMMENT_TAIL_LINES);
    let tail = output_lines[tail_start..].join("\n");
    format!(
        "## Agent Result\n\
         \n\
         **Status:** {status}\n\
         **Processed at:** {timestamp}\n\
         \n\
         ### Output Summary\n\
         \n\
         ```\n\
         {tail}\n\
         ```\n\
         \n\
         ---\n\
         *Processed by agentbox*\n",
        status = if success {
            "Completed"
        } else {
            "Failed/Needs Review"
        },
        timestamp = Utc::now().to_rfc3339(),
    )
}
