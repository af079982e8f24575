//! Gateway binary entrypoint: loads settings, builds the engine pools, KV
//! store, connection/session registries, tool registry, and LLM backend,
//! then serves the HTTP/WebSocket router.

use std::sync::Arc;
use std::time::Duration;

use voice_agent_config::{load_settings, Settings};
use voice_agent_connection::{ConnectionManager, SessionManager};
use voice_agent_engines::pool::{EnginePool, PoolLimits};
use voice_agent_engines::{AzureSttFactory, AzureTtsFactory};
use voice_agent_kv::{InMemoryKvStore, KvStore, RedisKvStore};
use voice_agent_llm::AzureOpenAiBackend;
use voice_agent_tools::ToolRegistry;
use voice_agent_transport::GatewayState;
use voice_agent_turn::Memory;

const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Arc::new(load_settings()?);
    let metrics_handle = voice_agent_server::init_metrics();

    let kv = build_kv_store(&settings).await;
    let stt_pool = build_stt_pool(&settings);
    let tts_pool = build_tts_pool(&settings);
    stt_pool.warm_dedicated().await.unwrap_or_else(|err| tracing::warn!(%err, "stt pool warm-up failed, starting degraded"));
    tts_pool.warm_dedicated().await.unwrap_or_else(|err| tracing::warn!(%err, "tts pool warm-up failed, starting degraded"));

    let llm = Arc::new(AzureOpenAiBackend::new(settings.azure_openai.clone())?);
    let sessions = Arc::new(SessionManager::<Memory>::new(SESSION_IDLE_TIMEOUT));
    sessions.start_idle_reaper(IDLE_SWEEP_INTERVAL);

    let state = Arc::new(GatewayState {
        settings: settings.clone(),
        kv,
        stt_pool,
        tts_pool,
        connection_manager: ConnectionManager::new(),
        sessions,
        tools: ToolRegistry::with_mock_tools(),
        llm,
        voice: voice_agent_core::voice_config::VoiceConfig::default(),
    });

    let router = voice_agent_server::create_router(state, metrics_handle);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    tracing::info!(%addr, "starting voice agent gateway");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn build_kv_store(settings: &Settings) -> Arc<dyn KvStore> {
    if settings.redis.access_key.is_some() {
        match RedisKvStore::connect(settings.redis.clone(), None).await {
            Ok(store) => return store,
            Err(err) => tracing::error!(%err, "failed to connect to redis, falling back to in-memory kv store"),
        }
    } else {
        tracing::warn!("no redis access key configured, using in-memory kv store (state does not survive a restart)");
    }
    Arc::new(InMemoryKvStore::new())
}

fn build_stt_pool(settings: &Settings) -> Arc<EnginePool<voice_agent_engines::AzureSpeechRecognizer>> {
    let pools = &settings.pools;
    let factory = Arc::new(AzureSttFactory::new(settings.azure_speech.clone(), vec!["en-US".to_string()]));
    EnginePool::new(
        factory,
        PoolLimits {
            dedicated: pools.stt_dedicated,
            shared: pools.stt_shared,
            overflow: pools.stt_overflow,
            acquire_timeout: Duration::from_millis(pools.acquire_timeout_ms),
            construction_max_retries: pools.construction_max_retries,
            name: "stt",
        },
    )
}

fn build_tts_pool(settings: &Settings) -> Arc<EnginePool<voice_agent_engines::AzureSpeechSynthesizer>> {
    let pools = &settings.pools;
    let factory = Arc::new(AzureTtsFactory::new(settings.azure_speech.clone(), vec![]));
    EnginePool::new(
        factory,
        PoolLimits {
            dedicated: pools.tts_dedicated,
            shared: pools.tts_shared,
            overflow: pools.tts_overflow,
            acquire_timeout: Duration::from_millis(pools.acquire_timeout_ms),
            construction_max_retries: pools.construction_max_retries,
            name: "tts",
        },
    )
}
