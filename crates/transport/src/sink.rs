//! `TurnSink` implementation wiring the turn router's callbacks to both
//! the UI broadcast envelopes and TTS egress (spec §4.6/§4.8's "emits
//! assistant text fragments to TTS and to the UI").

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use voice_agent_turn::{ToolStatus, TurnSink};

use crate::context::SessionContext;
use crate::egress::{self, EgressSink};
use crate::envelope;

/// Bridges `TurnRouter`'s callback surface to one session's UI broadcast
/// and TTS egress sink. One instance per in-flight turn task; cheap to
/// construct since it only borrows the session's long-lived collaborators.
pub struct TurnUiSink {
    ctx: Arc<SessionContext>,
    egress: Arc<dyn EgressSink>,
}

impl TurnUiSink {
    pub fn new(ctx: Arc<SessionContext>, egress: Arc<dyn EgressSink>) -> Self {
        Self { ctx, egress }
    }
}

#[async_trait]
impl TurnSink for TurnUiSink {
    async fn on_fragment(&self, text: &str) {
        self.ctx
            .connection_manager
            .broadcast_session(&self.ctx.session_id, envelope::assistant_streaming(text));

        if let Err(err) = egress::synthesize_and_send(&self.ctx, text, self.egress.as_ref()).await {
            warn!(session_id = %self.ctx.session_id, %err, "tts synthesis failed for fragment");
            self.ctx.connection_manager.broadcast_session(
                &self.ctx.session_id,
                envelope::tts_error(&err.to_string(), text),
            );
        }
    }

    async fn on_tool_start(&self, call_id: &str, name: &str) {
        self.ctx.connection_manager.broadcast_session(
            &self.ctx.session_id,
            envelope::event("assistant", &format!("calling {name}"), "session", &self.ctx.session_id),
        );
        let _ = call_id;
    }

    async fn on_tool_end(&self, call_id: &str, name: &str, elapsed_ms: u64, status: ToolStatus, result: &serde_json::Value) {
        let _ = (call_id, result);
        self.ctx.connection_manager.broadcast_session(
            &self.ctx.session_id,
            envelope::event(
                "assistant",
                &format!("{name} finished ({}) in {elapsed_ms}ms", status.as_str()),
                "session",
                &self.ctx.session_id,
            ),
        );
    }

    async fn on_final(&self, text: &str) {
        self.ctx
            .connection_manager
            .broadcast_session(&self.ctx.session_id, envelope::assistant_final(text, "assistant"));
    }
}
