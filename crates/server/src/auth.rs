//! Bearer-token authentication middleware for the HTTP/WebSocket surface.
//!
//! Auth is an external collaborator the core only gates a stub in front of
//! (spec §1); this middleware checks `Authorization: Bearer <api_key>`
//! against `ServerConfig.auth` and lets public paths (health, readiness,
//! metrics) through unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use voice_agent_transport::GatewayState;

static AUTH_DISABLED_WARNED: AtomicBool = AtomicBool::new(false);

pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let auth = &state.settings.server.auth;

    if !auth.enabled {
        if !AUTH_DISABLED_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!("api authentication is disabled, set VOICE_AGENT__SERVER__AUTH__ENABLED=true for production");
        }
        return next.run(request).await;
    }

    let path = request.uri().path();
    if auth.public_paths.iter().any(|p| path.starts_with(p.as_str())) {
        return next.run(request).await;
    }

    let Some(expected_key) = auth.api_key.as_deref().filter(|k| !k.is_empty()) else {
        tracing::error!("auth is enabled but no api key is configured");
        return (StatusCode::INTERNAL_SERVER_ERROR, "server authentication not configured").into_response();
    };

    let header_value = request.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    match header_value {
        Some(header) if header.starts_with("Bearer ") => {
            let provided = &header[7..];
            if constant_time_compare(provided.as_bytes(), expected_key.as_bytes()) {
                next.run(request).await
            } else {
                tracing::warn!("invalid api key presented");
                (StatusCode::UNAUTHORIZED, "invalid api key").into_response()
            }
        }
        Some(_) => (StatusCode::BAD_REQUEST, "expected Authorization: Bearer <token>").into_response(),
        None => (StatusCode::UNAUTHORIZED, "missing authorization header").into_response(),
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_compare_matches_and_rejects() {
        assert!(constant_time_compare(b"secret", b"secret"));
        assert!(!constant_time_compare(b"secret", b"secre"));
        assert!(!constant_time_compare(b"secret", b"secreT"));
    }
}
