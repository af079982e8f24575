//! The typed `SessionContext` record spec §9 calls for in place of a
//! dynamic attribute bag on the socket object (`websocket.state.cm`,
//! `websocket.state.lt`, ...): every piece of per-session mutable state a
//! receive loop, the barge-in protocol, and TTS egress need to share
//! lives here as a named field instead of an untyped lookup.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voice_agent_connection::ConnectionManager;
use voice_agent_core::audio::SampleRate;
use voice_agent_core::voice_config::VoiceConfig;
use voice_agent_engines::pool::{EngineHandle, EnginePool};
use voice_agent_engines::{AzureSpeechRecognizer, AzureSpeechSynthesizer};
use voice_agent_turn::Memory;

/// The per-session set of tracked background orchestration tasks (turn
/// router invocations, in-flight TTS egress). Cancellable in bulk within
/// a bounded grace period on barge-in (300 ms) or disconnect (1 s), per
/// spec §5.
#[derive(Default)]
pub struct TaskSet {
    inner: Mutex<Vec<(CancellationToken, JoinHandle<()>)>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, token: CancellationToken, handle: JoinHandle<()>) {
        self.inner.lock().retain(|(_, h)| !h.is_finished());
        self.inner.lock().push((token, handle));
    }

    /// Cancels every tracked task and waits up to `grace` for them to
    /// unwind. Tasks still running past the deadline are abandoned, not
    /// awaited further (spec §4.7 step 3 / §4.8 step 7: a bounded wait,
    /// never an unbounded one).
    pub async fn cancel_all_with_grace(&self, grace: Duration) {
        let tasks: Vec<(CancellationToken, JoinHandle<()>)> = std::mem::take(&mut *self.inner.lock());
        for (token, _) in &tasks {
            token.cancel();
        }
        let joins = tasks.into_iter().map(|(_, handle)| handle);
        let _ = tokio::time::timeout(grace, futures::future::join_all(joins)).await;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Everything one live session needs, bundled as a typed record (spec §9).
pub struct SessionContext {
    pub session_id: String,
    pub memory: Arc<Memory>,
    pub connection_manager: ConnectionManager,
    pub primary_conn_id: String,

    pub stt_pool: Arc<EnginePool<AzureSpeechRecognizer>>,
    pub tts_pool: Arc<EnginePool<AzureSpeechSynthesizer>>,
    pub stt: EngineHandle<AzureSpeechRecognizer>,
    pub tts: EngineHandle<AzureSpeechSynthesizer>,

    pub voice: VoiceConfig,
    pub sample_rate: SampleRate,

    /// True while a synthesis call is in flight (spec §4.7 trigger).
    pub is_synthesizing: Arc<AtomicBool>,
    /// True while frames from a completed synthesis are still being sent.
    pub audio_playing: Arc<AtomicBool>,
    pub tts_cancel_requested: Arc<AtomicBool>,
    pub tts_cancel_event: Arc<Notify>,

    /// `(voice, style, rate)` keys already warmed up on this session's
    /// held TTS engine (spec §4.5 step 2).
    warmed_voices: Mutex<HashSet<(String, String, String)>>,

    pub tasks: TaskSet,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        memory: Arc<Memory>,
        connection_manager: ConnectionManager,
        primary_conn_id: impl Into<String>,
        stt_pool: Arc<EnginePool<AzureSpeechRecognizer>>,
        tts_pool: Arc<EnginePool<AzureSpeechSynthesizer>>,
        stt: EngineHandle<AzureSpeechRecognizer>,
        tts: EngineHandle<AzureSpeechSynthesizer>,
        voice: VoiceConfig,
        sample_rate: SampleRate,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            memory,
            connection_manager,
            primary_conn_id: primary_conn_id.into(),
            stt_pool,
            tts_pool,
            stt,
            tts,
            voice,
            sample_rate,
            is_synthesizing: Arc::new(AtomicBool::new(false)),
            audio_playing: Arc::new(AtomicBool::new(false)),
            tts_cancel_requested: Arc::new(AtomicBool::new(false)),
            tts_cancel_event: Arc::new(Notify::new()),
            warmed_voices: Mutex::new(HashSet::new()),
            tasks: TaskSet::new(),
        }
    }

    fn voice_key(&self) -> (String, String, String) {
        (self.voice.voice.clone(), self.voice.style.clone().unwrap_or_default(), self.voice.rate.clone())
    }

    pub fn voice_is_warmed(&self) -> bool {
        self.warmed_voices.lock().contains(&self.voice_key())
    }

    pub fn mark_voice_warmed(&self) {
        self.warmed_voices.lock().insert(self.voice_key());
    }

    /// Triggered by an STT `partial` event arriving while the assistant
    /// is mid-speech (spec §4.7).
    pub fn is_speaking(&self) -> bool {
        use std::sync::atomic::Ordering::Relaxed;
        self.is_synthesizing.load(Relaxed) || self.audio_playing.load(Relaxed)
    }

    /// Releases both engine slots back to their pools. `healthy` follows
    /// the engine pool's own discard-on-release contract.
    pub fn release_engines(&self, healthy: bool) {
        self.stt_pool.release_for_session(&self.session_id, healthy);
        self.tts_pool.release_for_session(&self.session_id, healthy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_all_with_grace_cancels_tracked_tokens() {
        let tasks = TaskSet::new();
        let token = CancellationToken::new();
        let token2 = token.clone();
        let handle = tokio::spawn(async move {
            token2.cancelled().await;
        });
        tasks.track(token.clone(), handle);

        tasks.cancel_all_with_grace(Duration::from_millis(200)).await;
        assert!(token.is_cancelled());
        assert_eq!(tasks.len(), 0);
    }

    #[tokio::test]
    async fn cancel_all_with_grace_does_not_hang_on_a_stuck_task() {
        let tasks = TaskSet::new();
        let token = CancellationToken::new();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        tasks.track(token, handle);

        let start = std::time::Instant::now();
        tasks.cancel_all_with_grace(Duration::from_millis(50)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
