//! Shared collaborators the browser and media handlers pull from (spec
//! §2's leaf components, bundled for axum's `State` extractor).

use std::sync::Arc;

use voice_agent_config::Settings;
use voice_agent_connection::ConnectionManager;
use voice_agent_core::traits::LanguageModel;
use voice_agent_core::voice_config::VoiceConfig;
use voice_agent_engines::pool::EnginePool;
use voice_agent_engines::{AzureSpeechRecognizer, AzureSpeechSynthesizer};
use voice_agent_kv::KvStore;
use voice_agent_tools::ToolRegistry;
use voice_agent_turn::Memory;

/// Everything the gateway binary constructs once at startup and every
/// connection handler borrows for the life of the process.
#[derive(Clone)]
pub struct GatewayState {
    pub settings: Arc<Settings>,
    pub kv: Arc<dyn KvStore>,
    pub stt_pool: Arc<EnginePool<AzureSpeechRecognizer>>,
    pub tts_pool: Arc<EnginePool<AzureSpeechSynthesizer>>,
    pub connection_manager: ConnectionManager,
    pub sessions: Arc<voice_agent_connection::SessionManager<Memory>>,
    pub tools: ToolRegistry,
    pub llm: Arc<dyn LanguageModel>,
    pub voice: VoiceConfig,
}
