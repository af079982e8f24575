//! HTTP/WebSocket router: health, readiness, Prometheus metrics, and the
//! browser/telephony WebSocket upgrade endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use voice_agent_transport::GatewayState;

use crate::auth::auth_middleware;

pub fn create_router(state: Arc<GatewayState>, metrics_handle: PrometheusHandle) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_origins, state.settings.server.cors_enabled);

    Router::new()
        .route("/ws", get(voice_agent_transport::browser::handle))
        .route("/media", get(voice_agent_transport::media::handle))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("cors is disabled, allowing all origins (not for production)");
        return CorsLayer::permissive();
    }

    if origins.is_empty() {
        tracing::info!("no cors origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(%origin, "invalid cors origin, skipping");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::error!("all configured cors origins are invalid, falling back to localhost");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    tracing::info!(count = parsed.len(), "cors configured with explicit origins");
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_credentials(true)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness_check(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let stt_degraded = state.stt_pool.is_degraded();
    let tts_degraded = state.tts_pool.is_degraded();
    let status = if stt_degraded || tts_degraded { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };

    (
        status,
        Json(serde_json::json!({
            "status": if status == StatusCode::OK { "ready" } else { "degraded" },
            "sessions": state.sessions.count(),
            "connections": state.connection_manager.stats().connections,
            "stt_pool": state.stt_pool.snapshot().to_string(),
            "tts_pool": state.tts_pool.snapshot().to_string(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use voice_agent_config::Settings;
    use voice_agent_connection::ConnectionManager;
    use voice_agent_engines::pool::{EnginePool, PoolLimits};
    use voice_agent_engines::{AzureSttFactory, AzureTtsFactory};
    use voice_agent_kv::InMemoryKvStore;
    use voice_agent_llm::AzureOpenAiBackend;
    use voice_agent_tools::ToolRegistry;
    use voice_agent_turn::Memory;

    fn test_state() -> Arc<GatewayState> {
        let limits = PoolLimits { dedicated: 0, shared: 0, overflow: 1, acquire_timeout: Duration::from_millis(50), construction_max_retries: 1, name: "test" };
        Arc::new(GatewayState {
            settings: Arc::new(Settings::default()),
            kv: Arc::new(InMemoryKvStore::new()),
            stt_pool: EnginePool::new(Arc::new(AzureSttFactory::new(Default::default(), vec![])), limits.clone()),
            tts_pool: EnginePool::new(Arc::new(AzureTtsFactory::new(Default::default(), vec![])), limits),
            connection_manager: ConnectionManager::new(),
            sessions: Arc::new(voice_agent_connection::SessionManager::<Memory>::new(Duration::from_secs(600))),
            tools: ToolRegistry::with_mock_tools(),
            llm: Arc::new(AzureOpenAiBackend::new(Default::default()).unwrap()),
            voice: Default::default(),
        })
    }

    #[test]
    fn router_builds_without_panicking() {
        let handle = crate::metrics::init_metrics();
        let _ = create_router(test_state(), handle);
    }
}
