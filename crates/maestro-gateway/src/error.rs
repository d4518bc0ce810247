use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use maestro_core::MaestroError;
use serde_json::json;
use tracing::error;

/// Error returned by an API handler, rendered as a JSON body.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request or failed validation (400).
    BadRequest(String),
    /// The requested workflow type is not registered (404).
    UnknownWorkflow {
        workflow_type: String,
        available: Vec<String>,
    },
    /// The requested agent is not registered (404).
    UnknownAgent {
        agent_name: String,
        available: Vec<String>,
    },
    /// Anything else (500).
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownWorkflow { .. } | ApiError::UnknownAgent { .. } => {
                StatusCode::NOT_FOUND
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MaestroError> for ApiError {
    fn from(err: MaestroError) -> Self {
        if err.is_validation() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::BadRequest(message) => json!({ "error": message }),
            ApiError::UnknownWorkflow {
                workflow_type,
                available,
            } => json!({
                "error": format!("Workflow '{workflow_type}' not found"),
                "availableWorkflows": available,
            }),
            ApiError::UnknownAgent {
                agent_name,
                available,
            } => json!({
                "error": format!("Agent '{agent_name}' not found"),
                "availableAgents": available,
            }),
            ApiError::Internal(message) => {
                error!(error = %message, "Request failed");
                json!({ "error": message })
            }
        };
        (status, Json(body)).into_response()
    }
}
