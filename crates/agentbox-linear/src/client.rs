//! GraphQL client for the Linear API.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::warn;

use crate::issues::{Issue, pending_filter};

/// Default Linear GraphQL endpoint.
pub const LINEAR_API_URL: &str = "https://api.linear.app/graphql";

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum LinearError {
    #[error("LINEAR_API_KEY is not set")]
    MissingApiKey,
    #[error("linear api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("linear api returned errors: {0}")]
    Api(String),
    #[error("unexpected linear response shape: {0}")]
    InvalidResponse(String),
}

const PENDING_ISSUES_QUERY: &str = "\
query PendingIssues($first: Int, $filter: IssueFilter) {
    issues(first: $first, filter: $filter, orderBy: priority) {
        nodes {
            id
            identifier
            title
            description
            priority
            state { name }
            labels { nodes { name } }
            url
        }
    }
}";

const WORKFLOW_STATES_QUERY: &str = "\
query States($filter: WorkflowStateFilter) {
    workflowStates(filter: $filter) {
        nodes { id name }
    }
}";

const UPDATE_ISSUE_MUTATION: &str = "\
mutation UpdateIssue($id: String!, $stateId: String!) {
    issueUpdate(id: $id, input: { stateId: $stateId }) {
        success
    }
}";

const ADD_COMMENT_MUTATION: &str = "\
mutation AddComment($issueId: String!, $body: String!) {
    commentCreate(input: { issueId: $issueId, body: $body }) {
        success
    }
}";

/// Client for the handful of Linear operations the backlog worker uses.
#[derive(Debug, Clone)]
pub struct LinearClient {
    client: reqwest::Client,
    api_url: String,
    team_id: Option<String>,
}

impl LinearClient {
    /// Build a client from an API key and an optional team filter.
    pub fn new(api_key: &str, team_id: Option<String>) -> Result<Self, LinearError> {
        Self::with_api_url(api_key, team_id, LINEAR_API_URL)
    }

    /// Build a client against a custom endpoint (tests).
    pub fn with_api_url(
        api_key: &str,
        team_id: Option<String>,
        api_url: impl Into<String>,
    ) -> Result<Self, LinearError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LinearError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(api_key)
                .map_err(|e| LinearError::InvalidResponse(format!("invalid API key: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            team_id,
        })
    }

    /// Execute one GraphQL request and return the `data` object.
    async fn query(&self, query: &str, variables: Value) -> Result<Value, LinearError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        if let Some(errors) = body.get("errors") {
            return Err(LinearError::Api(errors.to_string()));
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| LinearError::InvalidResponse("missing data field".to_owned()))
    }

    /// Fetch issues ready to be worked on: backlog/unstarted state,
    /// optionally restricted to the configured team and a label.
    pub async fn pending_issues(
        &self,
        label: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Issue>, LinearError> {
        let filter = pending_filter(self.team_id.as_deref(), label);
        let data = self
            .query(
                PENDING_ISSUES_QUERY,
                json!({ "first": limit, "filter": filter }),
            )
            .await?;

        let nodes = data
            .pointer("/issues/nodes")
            .cloned()
            .ok_or_else(|| LinearError::InvalidResponse("missing issues.nodes".to_owned()))?;
        serde_json::from_value(nodes)
            .map_err(|e| LinearError::InvalidResponse(format!("malformed issue node: {e}")))
    }

    /// Move an issue to the named workflow state ("In Progress", "Done", ...).
    ///
    /// An unknown state name is a warning, not an error; the worker keeps
    /// going when a workspace lacks one of the conventional states.
    pub async fn update_issue_state(
        &self,
        issue_id: &str,
        state_name: &str,
    ) -> Result<(), LinearError> {
        let states = self
            .query(
                WORKFLOW_STATES_QUERY,
                json!({ "filter": { "name": { "eq": state_name } } }),
            )
            .await?;

        let Some(state_id) = states
            .pointer("/workflowStates/nodes/0/id")
            .and_then(Value::as_str)
        else {
            warn!(state = state_name, "workflow state not found, leaving issue untouched");
            return Ok(());
        };

        self.query(
            UPDATE_ISSUE_MUTATION,
            json!({ "id": issue_id, "stateId": state_id }),
        )
        .await?;
        Ok(())
    }

    /// Add a markdown comment to an issue.
    pub async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), LinearError> {
        self.query(
            ADD_COMMENT_MUTATION,
            json!({ "issueId": issue_id, "body": body }),
        )
        .await?;
        Ok(())
    }
}
