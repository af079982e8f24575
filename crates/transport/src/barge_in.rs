//! Barge-in protocol (spec §4.7): an STT `partial` arriving while the
//! assistant is mid-speech cancels the current TTS and any in-flight turn
//! tasks within a bounded grace period.

use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use crate::context::SessionContext;
use crate::envelope;

/// Runs the full 5-step barge-in effect sequence. Safe to call whenever a
/// `partial` event arrives; a no-op cost (one `is_speaking` check by the
/// caller) is expected when the assistant is not currently speaking — this
/// function itself does not re-check, callers gate on [`SessionContext::is_speaking`].
///
/// `task_cancel_grace` is `SessionConfig::barge_in_grace_ms` (spec §5),
/// read by the caller so an operator override actually takes effect.
pub async fn handle_barge_in(ctx: &SessionContext, task_cancel_grace: Duration) {
    ctx.tts.engine.stop_speaking();

    ctx.is_synthesizing.store(false, Relaxed);
    ctx.audio_playing.store(false, Relaxed);
    ctx.tts_cancel_requested.store(true, Relaxed);
    ctx.tts_cancel_event.notify_waiters();

    ctx.tasks.cancel_all_with_grace(task_cancel_grace).await;

    ctx.connection_manager
        .broadcast_session(&ctx.session_id, envelope::control_tts_cancelled(&ctx.session_id));

    // tts_cancel_requested is cleared unconditionally at the end of the
    // next `synthesize_and_send` call (spec §4.7 step 5), not here.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use voice_agent_config::AzureSpeechConfig;
    use voice_agent_connection::{ConnectionKind, ConnectionManager};
    use voice_agent_engines::pool::{EngineHandle, EnginePool, PoolLimits, Tier};
    use voice_agent_engines::{AzureSpeechRecognizer, AzureSpeechSynthesizer, AzureSttFactory, AzureTtsFactory};
    use voice_agent_kv::InMemoryKvStore;
    use voice_agent_turn::Memory;

    fn limits() -> PoolLimits {
        PoolLimits { dedicated: 0, shared: 0, overflow: 1, acquire_timeout: StdDuration::from_millis(100), construction_max_retries: 1, name: "test" }
    }

    fn ctx() -> (SessionContext, ConnectionManager) {
        let stt_pool = EnginePool::new(Arc::new(AzureSttFactory::new(AzureSpeechConfig::default(), vec![])), limits());
        let tts_pool = EnginePool::new(Arc::new(AzureTtsFactory::new(AzureSpeechConfig::default(), vec![])), limits());
        let stt = EngineHandle { engine: Arc::new(AzureSpeechRecognizer::new(AzureSpeechConfig::default(), vec![]).unwrap()), tier: Tier::Overflow };
        let tts = EngineHandle { engine: Arc::new(AzureSpeechSynthesizer::new(AzureSpeechConfig::default(), vec![]).unwrap()), tier: Tier::Overflow };
        let connection_manager = ConnectionManager::new();
        let memory = Arc::new(Memory::new("s1", "be helpful", Arc::new(InMemoryKvStore::new())));
        let ctx = SessionContext::new(
            "s1",
            memory,
            connection_manager.clone(),
            "conn-1",
            stt_pool,
            tts_pool,
            stt,
            tts,
            voice_agent_core::voice_config::VoiceConfig::default(),
            voice_agent_core::audio::SampleRate::Hz16000,
        );
        (ctx, connection_manager)
    }

    #[tokio::test]
    async fn barge_in_clears_speaking_flags_and_broadcasts_control_envelope() {
        let (ctx, connection_manager) = ctx();
        ctx.is_synthesizing.store(true, Relaxed);
        ctx.audio_playing.store(true, Relaxed);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        connection_manager.register(ConnectionKind::Conversation, [], Some("s1".to_string()), tx);

        handle_barge_in(&ctx, StdDuration::from_millis(300)).await;

        assert!(!ctx.is_synthesizing.load(Relaxed));
        assert!(!ctx.audio_playing.load(Relaxed));
        assert!(ctx.tts_cancel_requested.load(Relaxed));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope["action"], "tts_cancelled");
        assert_eq!(envelope["reason"], "barge_in");
    }

    #[tokio::test]
    async fn barge_in_cancels_tracked_tasks_within_grace() {
        let (ctx, _connection_manager) = ctx();
        let token = tokio_util::sync::CancellationToken::new();
        let token2 = token.clone();
        let handle = tokio::spawn(async move { token2.cancelled().await });
        ctx.tasks.track(token.clone(), handle);

        handle_barge_in(&ctx, StdDuration::from_millis(300)).await;

        assert!(token.is_cancelled());
        assert_eq!(ctx.tasks.len(), 0);
    }
}
