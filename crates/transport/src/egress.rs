//! TTS synthesis and frame egress for both transport framings (spec
//! §4.5). One `synthesize_and_send` drives the whole protocol; the two
//! wire framings live behind the small [`EgressSink`] trait so the
//! synthesis/cancellation/latency logic is written once.

use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use voice_agent_core::audio::AudioFrame;
use voice_agent_core::traits::Synthesizer;
use voice_agent_engines::AzureSpeechSynthesizer;

use crate::context::SessionContext;
use crate::envelope;
use crate::error::{Result, TransportError};

/// Abstracts the two wire framings named in spec §4.5 step 4. `ctx`
/// carries everything else (voice, cancel flags, latency timers); this
/// trait only knows how to put one frame, or a stop sentinel, on the wire.
#[async_trait]
pub trait EgressSink: Send + Sync {
    async fn send_frame(&self, pcm: &[u8], frame_index: usize, total_frames: usize, is_final: bool) -> Result<()>;

    /// Telephony sends an explicit `StopAudio` sentinel on completion or
    /// cancellation; browser framing carries `is_final` on the last frame
    /// instead and this is a no-op.
    async fn send_stop(&self) -> Result<()> {
        Ok(())
    }

    /// `Some(20ms)` for telephony real-time pacing; `None` for browser,
    /// which sends frames back-to-back (spec §4.5 step 4).
    fn frame_pacing(&self) -> Option<Duration> {
        None
    }
}

pub struct BrowserEgress {
    pub connection_manager: voice_agent_connection::ConnectionManager,
    pub session_id: String,
    pub sample_rate_hz: u32,
}

#[async_trait]
impl EgressSink for BrowserEgress {
    async fn send_frame(&self, pcm: &[u8], frame_index: usize, total_frames: usize, is_final: bool) -> Result<()> {
        let envelope = envelope::audio_data(pcm, frame_index, total_frames, self.sample_rate_hz, is_final);
        self.connection_manager.broadcast_session(&self.session_id, envelope);
        Ok(())
    }
}

pub struct TelephonyEgress {
    pub connection_manager: voice_agent_connection::ConnectionManager,
    pub session_id: String,
    pub sequence: std::sync::atomic::AtomicU64,
}

impl TelephonyEgress {
    pub fn new(connection_manager: voice_agent_connection::ConnectionManager, session_id: impl Into<String>) -> Self {
        Self { connection_manager, session_id: session_id.into(), sequence: std::sync::atomic::AtomicU64::new(0) }
    }
}

#[async_trait]
impl EgressSink for TelephonyEgress {
    async fn send_frame(&self, pcm: &[u8], _frame_index: usize, _total_frames: usize, _is_final: bool) -> Result<()> {
        let seq = self.sequence.fetch_add(1, Relaxed);
        let envelope = envelope::telephony_audio_data(pcm, seq);
        self.connection_manager.broadcast_session(&self.session_id, envelope);
        Ok(())
    }

    async fn send_stop(&self) -> Result<()> {
        self.connection_manager.broadcast_session(&self.session_id, envelope::telephony_stop_audio());
        Ok(())
    }

    fn frame_pacing(&self) -> Option<Duration> {
        Some(Duration::from_millis(u64::from(voice_agent_core::FRAME_DURATION_MS)))
    }
}

/// Runs the full synthesis-to-egress protocol of spec §4.5 for one
/// assistant sentence fragment. Best-effort warm-up, cancellable
/// synthesis, frame splitting/pacing, and the cancel-flag lifecycle all
/// live here so callers (the turn sink, the greeting path) only decide
/// *what* text to speak.
pub async fn synthesize_and_send(ctx: &SessionContext, text: &str, sink: &dyn EgressSink) -> Result<()> {
    if ctx.voice_is_warmed() {
        // already prepared on this session's held engine
    } else {
        match tokio::time::timeout(Duration::from_secs(4), ctx.tts.engine.warm_up(&ctx.voice)).await {
            Ok(Ok(())) => ctx.mark_voice_warmed(),
            Ok(Err(err)) => warn!(session_id = %ctx.session_id, %err, "tts voice warm-up failed, synthesizing anyway"),
            Err(_) => warn!(session_id = %ctx.session_id, "tts voice warm-up timed out, synthesizing anyway"),
        }
    }

    ctx.is_synthesizing.store(true, Relaxed);
    let result = run_synthesis(ctx, text, sink).await;
    ctx.is_synthesizing.store(false, Relaxed);
    ctx.audio_playing.store(false, Relaxed);
    // Barge-in sets tts_cancel_requested for the *next* call to clear
    // (spec §4.7 step 5); this is that clear, unconditional on outcome.
    ctx.tts_cancel_requested.store(false, Relaxed);
    result
}

async fn run_synthesis(ctx: &SessionContext, text: &str, sink: &dyn EgressSink) -> Result<()> {
    let synthesizer = ctx.tts.engine.clone();
    let voice = ctx.voice.clone();
    let text_owned = text.to_string();
    let started = std::time::Instant::now();
    let synthesis = tokio::spawn(async move { synthesizer.synthesize(&text_owned, &voice).await });

    let pcm = tokio::select! {
        biased;
        _ = ctx.tts_cancel_event.notified() => {
            ctx.tts.engine.stop_speaking();
            synthesis.abort();
            return Ok(());
        }
        result = synthesis => {
            match result {
                Ok(Ok(frame)) => {
                    voice_agent_core::metrics::record_tts_latency(started.elapsed().as_secs_f64() * 1000.0);
                    frame.samples
                }
                Ok(Err(err)) => return Err(TransportError::Synthesis(err.to_string())),
                Err(_) => return Ok(()), // aborted from elsewhere or panicked; treated as cancelled
            }
        }
    };

    if pcm.is_empty() {
        return Ok(());
    }

    let frames = AudioFrame::split_into_frames(&pcm, tts_sample_rate(ctx));
    let total = frames.len();
    let pacing = sink.frame_pacing();

    for (index, frame) in frames.into_iter().enumerate() {
        if ctx.tts_cancel_requested.load(Relaxed) {
            sink.send_stop().await?;
            return Ok(());
        }

        if index == 0 {
            ctx.memory.with_latency(|l| l.stop("greeting_ttfb"));
        }

        ctx.audio_playing.store(true, Relaxed);
        let is_final = index + 1 == total;
        sink.send_frame(&frame, index, total, is_final).await?;

        if let Some(delay) = pacing {
            tokio::time::sleep(delay).await;
        }
    }

    sink.send_stop().await
}

fn tts_sample_rate(ctx: &SessionContext) -> voice_agent_core::audio::SampleRate {
    // The Azure REST adapter always returns raw-16khz PCM regardless of
    // the session's negotiated inbound rate; framing is computed against
    // what the engine actually produced.
    let _ = ctx.sample_rate;
    voice_agent_core::audio::SampleRate::Hz16000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use parking_lot::Mutex as PMutex;
    use voice_agent_config::AzureSpeechConfig;
    use voice_agent_connection::ConnectionManager;
    use voice_agent_engines::pool::{EngineHandle, EnginePool, PoolLimits, Tier};
    use voice_agent_kv::InMemoryKvStore;
    use voice_agent_turn::Memory;

    #[derive(Default)]
    struct RecordingSink {
        frames: PMutex<Vec<(usize, usize, bool)>>,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl EgressSink for RecordingSink {
        async fn send_frame(&self, _pcm: &[u8], frame_index: usize, total_frames: usize, is_final: bool) -> Result<()> {
            self.frames.lock().push((frame_index, total_frames, is_final));
            Ok(())
        }

        async fn send_stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Relaxed);
            Ok(())
        }
    }

    fn ctx_with_synth(synth: AzureSpeechSynthesizer) -> SessionContext {
        let stt_pool = EnginePool::new(
            Arc::new(voice_agent_engines::AzureSttFactory::new(Default::default(), vec![])),
            PoolLimits { dedicated: 0, shared: 0, overflow: 1, acquire_timeout: Duration::from_millis(100), construction_max_retries: 1, name: "test" },
        );
        let tts_pool = EnginePool::new(
            Arc::new(voice_agent_engines::AzureTtsFactory::new(Default::default(), vec![])),
            PoolLimits { dedicated: 0, shared: 0, overflow: 1, acquire_timeout: Duration::from_millis(100), construction_max_retries: 1, name: "test" },
        );
        let stt = EngineHandle { engine: Arc::new(voice_agent_engines::AzureSpeechRecognizer::new(Default::default(), vec![]).unwrap()), tier: Tier::Overflow };
        let tts = EngineHandle { engine: Arc::new(synth), tier: Tier::Overflow };
        let memory = Arc::new(Memory::new("s1", "be helpful", Arc::new(InMemoryKvStore::new())));
        SessionContext::new(
            "s1",
            memory,
            ConnectionManager::new(),
            "conn-1",
            stt_pool,
            tts_pool,
            stt,
            tts,
            voice_agent_core::voice_config::VoiceConfig::default(),
            voice_agent_core::audio::SampleRate::Hz16000,
        )
    }

    #[tokio::test]
    async fn cancel_event_aborts_before_any_frame_is_sent() {
        // `Notify::notify_waiters` only wakes waiters registered at the time
        // it's called; firing it before `run_synthesis` has reached its
        // `select!` would be silently dropped. So the driving task is
        // spawned and given one `yield_now` to run up to that `select!`
        // (registering the `.notified()` waiter) before we fire the cancel.
        let ctx = Arc::new(ctx_with_synth(AzureSpeechSynthesizer::new(AzureSpeechConfig::default(), vec![]).unwrap()));
        let sink = Arc::new(RecordingSink::default());

        let ctx_task = ctx.clone();
        let sink_task = sink.clone();
        let handle = tokio::spawn(async move { synthesize_and_send(&ctx_task, "hello", &*sink_task).await });

        tokio::task::yield_now().await;
        ctx.tts_cancel_event.notify_waiters();

        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert!(sink.frames.lock().is_empty());
        assert_eq!(sink.stops.load(Relaxed), 0);
        assert!(!ctx.is_synthesizing.load(Relaxed));
    }
}
