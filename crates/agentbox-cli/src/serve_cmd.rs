//! `agentbox serve`: the HTTP control surface.
//!
//! `POST /task` answers with a live SSE stream (`start`, `output`,
//! `done`) that closes after the terminal event; the query endpoints are
//! plain JSON. A client that disconnects mid-stream cancels its task.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use agentbox_core::harness::ClaudeCodeAdapter;
use agentbox_core::{AgentService, StopOutcome, SubmitError};
use agentbox_protocol::Task;

use crate::config::Settings;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    body: serde_json::Value,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": msg.into() }),
        }
    }

    pub fn busy(current_task: String) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            body: json!({ "error": "Agent is busy", "current_task": current_task }),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "error": format!("{err:#}") }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TaskRequest {
    /// Task prompt; `task` is accepted as an alias.
    #[serde(default, alias = "task")]
    prompt: Option<String>,
    #[serde(default)]
    workdir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(service: Arc<AgentService>) -> Router {
    Router::new()
        .route("/task", post(handle_task))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .route("/stop", post(handle_stop))
        .route("/history", get(handle_history))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(settings: &Settings) -> Result<()> {
    let mut adapter =
        ClaudeCodeAdapter::with_binary(settings.agent_binary.as_str()).workspace(&settings.workspace);
    if let Some(key) = &settings.anthropic_api_key {
        adapter = adapter.api_key(key.as_str());
    }
    let service = AgentService::new(&settings.protocol, Arc::new(adapter)).await?;

    let app = build_router(service);
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!("agentbox serve listening on http://{addr}");
    tracing::info!(workspace = %settings.workspace.display(), "task workspace");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("agentbox serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Stops the task if the SSE client goes away before the run finishes.
struct CancelOnDisconnect {
    service: Arc<AgentService>,
    task_id: String,
    armed: bool,
}

impl Drop for CancelOnDisconnect {
    fn drop(&mut self) {
        if self.armed && self.service.current_task_id().as_deref() == Some(self.task_id.as_str()) {
            tracing::info!(task_id = %self.task_id, "client disconnected, stopping task");
            self.service.stop();
        }
    }
}

async fn handle_task(
    State(service): State<Arc<AgentService>>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload.map_err(|_| AppError::bad_request("Invalid JSON"))?;
    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Missing 'prompt' field"))?;

    let task = Task::new(prompt, request.workdir);
    let task_id = task.id.clone();

    let mut stream = match service.submit(task).await {
        Ok(stream) => stream,
        Err(SubmitError::Busy { current }) => return Err(AppError::busy(current)),
        Err(SubmitError::Internal(e)) => return Err(AppError::internal(e)),
    };

    let events = async_stream::stream! {
        let mut guard = CancelOnDisconnect {
            service,
            task_id,
            armed: true,
        };
        while let Some(event) = stream.next().await {
            if event.is_done() {
                guard.armed = false;
            }
            yield Ok::<_, Infallible>(
                Event::default()
                    .event(event.name())
                    .data(event.payload().to_string()),
            );
        }
    };

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("heartbeat"),
    ))
}

async fn handle_status(
    State(service): State<Arc<AgentService>>,
) -> Result<axum::response::Response, AppError> {
    let status = service.status().await.map_err(AppError::internal)?;
    Ok(Json(status).into_response())
}

async fn handle_health(
    State(service): State<Arc<AgentService>>,
) -> Result<axum::response::Response, AppError> {
    let status = service.status().await.map_err(AppError::internal)?;
    Ok(Json(json!({ "status": "ok", "agent": status.state.to_string() })).into_response())
}

async fn handle_stop(State(service): State<Arc<AgentService>>) -> axum::response::Response {
    match service.stop() {
        StopOutcome::Stopping { task_id } => {
            Json(json!({ "status": "stopping", "task_id": task_id })).into_response()
        }
        StopOutcome::NoActiveTask => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "no task running" })),
        )
            .into_response(),
    }
}

async fn handle_history(
    State(service): State<Arc<AgentService>>,
    Query(query): Query<HistoryQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(10);
    let history = service.history(limit);
    Json(json!({ "history": history })).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use agentbox_protocol::ProtocolConfig;

    fn fake_agent(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake_agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    async fn test_service(tmp: &tempfile::TempDir, script_body: &str) -> Arc<AgentService> {
        let script = fake_agent(tmp.path(), script_body);
        let config = ProtocolConfig::new(tmp.path().join("proto"));
        let harness = Arc::new(
            ClaudeCodeAdapter::with_binary(script.to_str().unwrap()).workspace(tmp.path()),
        );
        AgentService::new(&config, harness).await.unwrap()
    }

    async fn get(service: Arc<AgentService>, uri: &str) -> axum::response::Response {
        let app = build_router(service);
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post_json(
        service: Arc<AgentService>,
        uri: &str,
        body: &str,
    ) -> axum::response::Response {
        let app = build_router(service);
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn status_starts_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "exit 0\n").await;

        let resp = get(service, "/status").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["state"], "idle");
    }

    #[tokio::test]
    async fn health_reports_agent_state() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "exit 0\n").await;

        let resp = get(service, "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["agent"], "idle");
    }

    #[tokio::test]
    async fn stop_with_no_task_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "exit 0\n").await;

        let resp = post_json(service, "/stop", "").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "no task running");
    }

    #[tokio::test]
    async fn task_without_prompt_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "exit 0\n").await;

        let resp = post_json(service, "/task", "{}").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "Missing 'prompt' field");
    }

    #[tokio::test]
    async fn task_with_invalid_json_is_bad_request() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "exit 0\n").await;

        let resp = post_json(service, "/task", "this is not json").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "Invalid JSON");
    }

    #[tokio::test]
    async fn task_streams_sse_events_until_done() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "echo 'hello from agent'\nexit 0\n").await;

        let resp = post_json(service, "/task", r#"{"prompt":"say hello"}"#).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/event-stream"));

        let body = body_text(resp).await;
        assert!(body.contains("event: start"), "body: {body}");
        assert!(body.contains("event: output"), "body: {body}");
        assert!(body.contains("hello from agent"), "body: {body}");
        assert!(body.contains("event: done"), "body: {body}");
        // The stream closed after done, so completed must be last.
        let done_pos = body.find("event: done").unwrap();
        assert!(body[done_pos..].contains("\"state\":\"completed\""));
    }

    #[tokio::test]
    async fn second_task_while_busy_is_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "sleep 3600\n").await;

        // Occupy the slot directly through the service.
        let task = Task::new("long", None);
        let task_id = task.id.clone();
        let mut stream = service.submit(task).await.unwrap();
        let start = stream.next().await.unwrap();
        assert_eq!(start.name(), "start");

        let resp = post_json(Arc::clone(&service), "/task", r#"{"prompt":"rejected"}"#).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "Agent is busy");
        assert_eq!(json["current_task"], task_id);

        service.stop();
        let _: Vec<_> = stream.collect().await;
    }

    #[tokio::test]
    async fn history_returns_terminal_runs_most_recent_first() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "echo 'done'\nexit 0\n").await;

        for n in 0..2 {
            let stream = service
                .submit(Task::new(format!("run {n}"), None))
                .await
                .unwrap();
            let _: Vec<_> = stream.collect().await;
        }

        let resp = get(Arc::clone(&service), "/history?limit=1").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let history = json["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["task"]["prompt"], "run 1");
        assert_eq!(history[0]["state"], "completed");

        let resp = get(service, "/history").await;
        let json = body_json(resp).await;
        assert_eq!(json["history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn accepts_task_alias_for_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let service = test_service(&tmp, "exit 0\n").await;

        let resp = post_json(service, "/task", r#"{"task":"aliased"}"#).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("\"prompt\":\"aliased\""), "body: {body}");
    }
}
