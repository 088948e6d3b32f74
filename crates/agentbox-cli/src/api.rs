//! HTTP client for a running agentbox server, shared by the client
//! commands and the backlog worker.

use std::path::Path;
use std::pin::Pin;

use anyhow::Result;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("agent is busy (current task: {current_task})")]
    Busy { current_task: String },
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

/// Live event stream from a task submission; ends after `done`.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

#[derive(Debug, Clone)]
pub struct ApiClient {
    base: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            base: base.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Submit a task and return the live event stream.
    pub async fn submit_task(
        &self,
        prompt: &str,
        workdir: Option<&Path>,
    ) -> Result<SseStream, ApiError> {
        let mut payload = json!({ "prompt": prompt });
        if let Some(workdir) = workdir {
            payload["workdir"] = json!(workdir.display().to_string());
        }

        let response = self
            .client
            .post(format!("{}/task", self.base))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 409 {
            let body: Value = response.json().await.unwrap_or_default();
            let current_task = body["current_task"].as_str().unwrap_or("unknown").to_owned();
            return Err(ApiError::Busy { current_task });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(sse_stream(response))
    }

    pub async fn status(&self) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(format!("{}/status", self.base))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Request cancellation. The 404 "no task running" acknowledgment is
    /// returned as a normal body, not an error.
    pub async fn stop(&self) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(format!("{}/stop", self.base))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    pub async fn history(&self, limit: usize) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(format!("{}/history", self.base))
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Handle one SSE line: `event:` lines set the pending event name,
/// `data:` lines dispatch. Comment lines (heartbeats) and blanks are
/// skipped, as is data that is not valid JSON.
fn parse_sse_line(line: &str, current_event: &mut Option<String>) -> Option<SseEvent> {
    if let Some(name) = line.strip_prefix("event:") {
        *current_event = Some(name.trim().to_owned());
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    let value: Value = serde_json::from_str(data).ok()?;
    Some(SseEvent {
        event: current_event
            .clone()
            .unwrap_or_else(|| "message".to_owned()),
        data: value,
    })
}

/// Parse an SSE byte stream into events, ending after `done`.
fn sse_stream(response: reqwest::Response) -> SseStream {
    let stream = async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut line_buffer = String::new();
        let mut current_event: Option<String> = None;

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(anyhow::Error::new(e).context("error reading event stream"));
                    return;
                }
            };
            let Ok(fragment) = std::str::from_utf8(&chunk) else {
                yield Err(anyhow::anyhow!("invalid UTF-8 in event stream"));
                return;
            };
            line_buffer.push_str(fragment);

            while let Some(pos) = line_buffer.find('\n') {
                let line = line_buffer[..pos].trim_end_matches('\r').to_owned();
                line_buffer.drain(..=pos);

                if let Some(event) = parse_sse_line(&line, &mut current_event) {
                    let done = event.event == "done";
                    yield Ok(event);
                    if done {
                        return;
                    }
                }
            }
        }
    };
    Box::pin(stream)
}
