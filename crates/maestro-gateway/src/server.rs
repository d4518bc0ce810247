use crate::middleware::{auth_middleware, trace_requests, AuthConfig};
use crate::routes;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use maestro_core::MaestroResult;
use maestro_orchestrator::WorkflowRunner;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router without authentication.
    pub fn build(runner: Arc<WorkflowRunner>) -> Router {
        Self::build_with_auth(runner, AuthConfig::default())
    }

    /// Build the router. `/health` is always open; the `/api` routes require
    /// a key when `auth` lists any.
    pub fn build_with_auth(runner: Arc<WorkflowRunner>, auth: AuthConfig) -> Router {
        let state = Arc::new(AppState { runner });

        let api = Router::new()
            .route("/workflows", get(routes::list_workflows))
            .route("/workflows/run", post(routes::run_workflow))
            .route("/agents", get(routes::list_agents))
            .route("/agents/execute", post(routes::execute_agent))
            .route("/agents/stream", post(routes::stream_agent))
            .route("/metrics", get(routes::metrics))
            .layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware));

        Router::new()
            .route("/health", get(routes::health))
            .nest("/api", api)
            .layer(axum_mw::from_fn(trace_requests))
            .with_state(state)
    }

    /// Serve `app` on `listener` until `shutdown` resolves.
    pub async fn serve(
        listener: TcpListener,
        app: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> MaestroResult<()> {
        info!(addr = %listener.local_addr()?, "Maestro gateway listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
