use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures_util::Stream;
use maestro_core::MaestroError;
use maestro_orchestrator::{AgentCall, RunHandle, Variables};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "maestro",
        "workflows": state.runner.catalog().len(),
    }))
}

pub async fn list_workflows(State(state): State<Arc<AppState>>) -> Json<Value> {
    let workflows = state.runner.list_workflows();
    Json(json!({
        "totalCount": workflows.len(),
        "workflows": workflows,
    }))
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Value> {
    let agents = state.runner.list_agents();
    Json(json!({
        "totalCount": agents.len(),
        "agents": agents,
    }))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "metrics": state.runner.metrics().snapshot(),
        "timestamp": Utc::now(),
    }))
}

/// Body of `POST /api/workflows/run`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub workflow_type: Option<String>,
    #[serde(default)]
    pub variables: Variables,
}

/// Validate the request, start the run, and stream its events.
///
/// Every rejection happens before the stream opens so the caller gets a
/// plain JSON error with the right status. Once streaming, dropping the
/// connection cancels the run.
pub async fn run_workflow(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let workflow_type = request
        .workflow_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("workflowType is required"))?;

    match state.runner.validate(&workflow_type, &request.variables) {
        Ok(_) => {}
        Err(MaestroError::UnknownWorkflow(workflow_type)) => {
            return Err(ApiError::UnknownWorkflow {
                workflow_type,
                available: state.runner.catalog().workflow_types(),
            });
        }
        Err(e) => return Err(e.into()),
    }

    let handle = state.runner.start(&workflow_type, request.variables)?;
    let run_id = handle.run_id();
    info!(run_id = %run_id, workflow = %workflow_type, "Streaming workflow run");

    Ok(Sse::new(event_stream(handle)).keep_alive(KeepAlive::default()))
}

/// Body of `POST /api/agents/execute` and `POST /api/agents/stream`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub agent_name: Option<String>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

impl AgentRequest {
    fn into_call(self) -> Result<AgentCall, ApiError> {
        let present = |field: Option<String>| field.filter(|v| !v.trim().is_empty());
        match (present(self.agent_name), present(self.prompt)) {
            (Some(agent_name), Some(prompt)) => Ok(AgentCall {
                agent_name,
                prompt,
                context: self.context,
            }),
            _ => Err(ApiError::bad_request("agentName and prompt are required")),
        }
    }
}

/// Run one agent and return its outcome.
pub async fn execute_agent(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let call = request.into_call()?;

    let outcome = state
        .runner
        .run_agent(&call)
        .await
        .map_err(|e| agent_error(&state, e))?;
    Ok(Json(json!({
        "success": outcome.result.success,
        "result": outcome,
        "timestamp": Utc::now(),
    })))
}

/// Run one agent and stream `start`, `content` and `end` events. Dropping
/// the connection stops the provider stream.
pub async fn stream_agent(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AgentRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let call = request.into_call()?;
    let agent_name = call.agent_name.clone();

    let events = state
        .runner
        .stream_agent(call)
        .map_err(|e| agent_error(&state, e))?;
    info!(agent = %agent_name, "Streaming agent call");

    let stream = ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(to_sse(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn agent_error(state: &AppState, err: MaestroError) -> ApiError {
    match err {
        MaestroError::UnknownAgent(agent_name) => ApiError::UnknownAgent {
            agent_name,
            available: state
                .runner
                .list_agents()
                .iter()
                .map(|agent| agent.name.clone())
                .collect(),
        },
        other => other.into(),
    }
}

/// SSE view of a run's events. The stream owns the run's cancellation
/// guard, so dropping it (client disconnect) cancels the run.
fn event_stream(handle: RunHandle) -> impl Stream<Item = Result<Event, Infallible>> {
    let (events, cancel) = handle.into_events();
    let guard = cancel.drop_guard();
    ReceiverStream::new(events).map(move |event| {
        let _guard = &guard;
        Ok::<_, Infallible>(to_sse(&event))
    })
}

fn to_sse<T: Serialize>(event: &T) -> Event {
    match Event::default().json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            warn!(error = %e, "Failed to encode event");
            Event::default().data(json!({ "type": "error", "message": e.to_string() }).to_string())
        }
    }
}
