//! Thin wrappers over the `metrics` facade macros.
//!
//! The process-wide Prometheus recorder is installed once by the server
//! binary (`voice_agent_server::metrics::init_metrics`); every other crate
//! only ever calls these helpers, so the `metrics` facade can be a no-op
//! recorder in tests and a real exporter in the running gateway without
//! either side knowing about the other.

/// Records one STT recognition round-trip latency (callback arrival minus
/// push-stream write), in milliseconds.
pub fn record_stt_latency(ms: f64) {
    metrics::histogram!("voice_agent_stt_latency_ms").record(ms);
}

/// Records one LLM streaming call's time-to-first-token, in milliseconds.
pub fn record_llm_latency(ms: f64) {
    metrics::histogram!("voice_agent_llm_latency_ms").record(ms);
}

/// Records one TTS synthesis call's latency, in milliseconds.
pub fn record_tts_latency(ms: f64) {
    metrics::histogram!("voice_agent_tts_latency_ms").record(ms);
}

/// Increments the turn-outcome counter for one completed `TurnRouter`
/// invocation. `status` is one of `"completed"`, `"cancelled"`, `"error"`.
pub fn record_turn(status: &'static str) {
    metrics::counter!("voice_agent_turns_total", "status" => status).increment(1);
}

/// Increments the capacity-rejection counter when a pool acquire times out.
/// `pool` names which pool rejected (`"stt"` or `"tts"`).
pub fn record_capacity_rejection(pool: &'static str) {
    metrics::counter!("voice_agent_capacity_rejections_total", "pool" => pool).increment(1);
}
