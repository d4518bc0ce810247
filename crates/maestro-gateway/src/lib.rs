//! HTTP surface for Maestro.
//!
//! Exposes workflow and agent introspection, the metrics snapshot, and a
//! `POST /api/workflows/run` endpoint that streams run events as
//! server-sent events.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use server::{AppState, GatewayServer};
