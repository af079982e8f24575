//! Gateway binary crate: HTTP/WebSocket routing, auth middleware, and
//! Prometheus metrics on top of `voice_agent_transport`'s session handlers.

pub mod auth;
pub mod http;
pub mod metrics;

pub use auth::auth_middleware;
pub use http::create_router;
pub use metrics::init_metrics;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
