//! Drives one user turn from a final utterance to an assistant turn,
//! including tool calls (spec §4.6).
//!
//! Grounded in the think -> tool-dispatch -> generate -> persist turn shape,
//! generalized to a provider-agnostic `{delta:{content?, tool_calls?}}`
//! streaming contract and sentence-terminator buffering using the exact
//! terminator set named in spec §4.6.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use voice_agent_core::llm_types::{FinishReason, GenerateRequest, Message, ToolCallDelta};
use voice_agent_core::traits::LanguageModel;
use voice_agent_tools::ToolRegistry;

use crate::error::{Result, TurnError};
use crate::memory::Memory;

/// Sentence terminators that trigger an immediate flush (spec §4.6):
/// ASCII and full-width punctuation plus a bare newline.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；', '\n'];

/// Callback surface the turn router drives as it streams an assistant
/// turn; the `voice_agent_transport` crate implements this to push
/// fragments through TTS egress and UI envelopes without the turn crate
/// depending on any transport/WebSocket concern.
#[async_trait]
pub trait TurnSink: Send + Sync {
    /// One sentence-fragment of assistant text, in emission order.
    async fn on_fragment(&self, text: &str);

    /// A tool call is about to execute.
    async fn on_tool_start(&self, call_id: &str, name: &str);

    /// A tool call finished, successfully or not.
    async fn on_tool_end(&self, call_id: &str, name: &str, elapsed_ms: u64, status: ToolStatus, result: &Value);

    /// The full assistant turn text, after the stream completed (not
    /// cancelled).
    async fn on_final(&self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Error,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
        }
    }
}

/// Accumulates a tool call's fragments as they stream in (spec §4.6 step
/// 3): `id`/`name` only arrive on the opening chunk, `arguments` must be
/// concatenated in order.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingToolCall {
    fn accumulate(&mut self, delta: ToolCallDelta) {
        if let Some(id) = delta.id {
            self.id = id;
        }
        if let Some(name) = delta.name {
            self.name = name;
        }
        self.arguments.push_str(&delta.arguments);
    }
}

/// A rolling text buffer that flushes on sentence terminators (spec
/// §4.6): flush is strict (a terminator flushes immediately, even if the
/// next token would continue the phrase) and flushed fragments are
/// trimmed and suffixed with a single space so concatenation of
/// fragments equals the full assistant turn.
#[derive(Default)]
struct SentenceBuffer {
    buf: String,
    full_text: String,
}

impl SentenceBuffer {
    fn push(&mut self, text: &str) -> Vec<String> {
        self.full_text.push_str(text);
        let mut fragments = Vec::new();
        for ch in text.chars() {
            self.buf.push(ch);
            if SENTENCE_TERMINATORS.contains(&ch) {
                fragments.push(self.flush());
            }
        }
        fragments
    }

    fn flush(&mut self) -> String {
        let trimmed = self.buf.trim().to_string();
        self.buf.clear();
        if trimmed.is_empty() {
            return trimmed;
        }
        if trimmed.ends_with(char::is_whitespace) {
            trimmed
        } else {
            format!("{trimmed} ")
        }
    }

    /// Flushes any remainder after the stream ends (spec §4.6 step 4).
    fn flush_remainder(&mut self) -> Option<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            None
        } else {
            Some(self.flush())
        }
    }
}

/// Drives turns for one session: one `TurnRouter` is owned by the
/// session task for its lifetime (spec §3, `TurnTask` is one per
/// utterance but shares the router's `Memory`/collaborators).
pub struct TurnRouter {
    memory: Arc<Memory>,
    llm: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
}

impl TurnRouter {
    pub fn new(memory: Arc<Memory>, llm: Arc<dyn LanguageModel>, tools: ToolRegistry) -> Self {
        Self { memory, llm, tools }
    }

    /// Runs one turn to completion (spec §4.6 steps 1-6). `user_text`
    /// empty means this is a tool-call follow-up recursion, not a fresh
    /// utterance (step 5's "recurse with no new user content").
    #[instrument(skip(self, sink, cancel), fields(session_id = %self.memory.session_id()))]
    pub async fn run_turn(
        &self,
        user_text: &str,
        sink: &dyn TurnSink,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        if !user_text.is_empty() {
            self.memory.append(Message::user(user_text));
        }

        let result = self.drive_completion(sink, cancel).await;
        voice_agent_core::metrics::record_turn(match &result {
            Ok(()) => "completed",
            Err(TurnError::Cancelled) => "cancelled",
            Err(_) => "error",
        });
        result?;

        self.memory.persist().await?;
        Ok(())
    }

    async fn drive_completion(&self, sink: &dyn TurnSink, cancel: &tokio_util::sync::CancellationToken) -> Result<()> {
        let tool_defs = self.tools.definitions();
        let request = GenerateRequest {
            messages: self.memory.history(),
            stream: true,
            tools: tool_defs,
            ..Default::default()
        };

        let mut stream = self.llm.generate_stream(request);
        let mut sentence = SentenceBuffer::default();
        let mut pending_tool: Option<PendingToolCall> = None;
        let mut completed_normally = false;
        let started = Instant::now();
        let mut first_chunk_seen = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("turn cancelled mid-stream, dropping partial assistant content");
                    return Err(TurnError::Cancelled);
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.map_err(|e| TurnError::Llm(e.to_string()))?;

                    if !first_chunk_seen {
                        first_chunk_seen = true;
                        voice_agent_core::metrics::record_llm_latency(started.elapsed().as_secs_f64() * 1000.0);
                    }

                    if let Some(content) = chunk.delta.content.as_deref() {
                        for fragment in sentence.push(content) {
                            if !fragment.is_empty() {
                                sink.on_fragment(&fragment).await;
                            }
                        }
                    }

                    for delta in chunk.delta.tool_calls {
                        pending_tool.get_or_insert_with(PendingToolCall::default).accumulate(delta);
                    }

                    if chunk.is_final {
                        completed_normally = matches!(
                            chunk.finish_reason,
                            Some(FinishReason::Stop) | Some(FinishReason::ToolCalls)
                        );
                        break;
                    }
                }
            }
        }

        if let Some(remainder) = sentence.flush_remainder() {
            sink.on_fragment(&remainder).await;
        }

        if !completed_normally {
            warn!("llm stream ended without a recognized finish reason");
        }

        let full_text = sentence.full_text.clone();

        if let Some(tool_call) = pending_tool {
            self.dispatch_tool_call(tool_call, sink, cancel).await?;
        } else if !full_text.trim().is_empty() {
            self.memory.append(Message::assistant(full_text.trim()));
            sink.on_final(full_text.trim()).await;
        }

        Ok(())
    }

    /// Spec §4.6 step 5: append the assistant tool-call message, execute
    /// it, append the tool-result message, emit start/end UI envelopes,
    /// then recurse to produce follow-up assistant text.
    async fn dispatch_tool_call(
        &self,
        call: PendingToolCall,
        sink: &dyn TurnSink,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<()> {
        let call_id = if call.id.is_empty() { uuid::Uuid::new_v4().to_string() } else { call.id };
        let arguments_text = if call.arguments.trim().is_empty() { "{}".to_string() } else { call.arguments };

        self.memory.append(tool_call_message(&call_id, &call.name, &arguments_text));

        sink.on_tool_start(&call_id, &call.name).await;
        let started = Instant::now();

        let arguments: Value = match serde_json::from_str(&arguments_text) {
            Ok(v) => v,
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let error = Value::String(format!("invalid tool arguments: {e}"));
                sink.on_tool_end(&call_id, &call.name, elapsed, ToolStatus::Error, &error).await;
                self.memory.append(Message::tool(error.to_string(), call_id));
                error!(tool = %call.name, "tool call aborted: unparseable arguments, not recursing");
                return Ok(());
            }
        };

        match self.tools.call(&call.name, arguments).await {
            Ok(result) => {
                let elapsed = started.elapsed().as_millis() as u64;
                sink.on_tool_end(&call_id, &call.name, elapsed, ToolStatus::Success, &result).await;
                self.memory.append(Message::tool(result.to_string(), call_id));
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let error = Value::String(e.to_string());
                sink.on_tool_end(&call_id, &call.name, elapsed, ToolStatus::Error, &error).await;
                self.memory.append(Message::tool(error.to_string(), call_id));
                error!(tool = %call.name, error = %e, "tool call failed, not recursing");
                return Ok(());
            }
        }

        // Recurse with no new user content to produce the follow-up
        // assistant text (spec §4.6 step 5).
        self.drive_completion(sink, cancel).await
    }
}

/// An assistant message carrying a tool-call structure. `Message` has no
/// dedicated tool-call field (the provider-agnostic core keeps that
/// structure out of the wire type); the call is serialized into the
/// content so the next request still carries it in history for the
/// model's own bookkeeping.
fn tool_call_message(call_id: &str, name: &str, arguments: &str) -> Message {
    let mut msg = Message::assistant(format!("{{\"tool_call\":{{\"name\":\"{name}\",\"arguments\":{arguments}}}}}"));
    msg.tool_call_id = Some(call_id.to_string());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;

    use futures::Stream;
    use voice_agent_core::llm_types::{Delta, GenerateResponse, StreamChunk, ToolDefinition};
    use voice_agent_core::Result as CoreResult;
    use voice_agent_kv::InMemoryKvStore;
    use voice_agent_tools::error::ToolError;
    use voice_agent_tools::Tool;

    struct ScriptedLlm {
        chunks: StdMutex<Vec<StreamChunk>>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate(&self, _request: GenerateRequest) -> CoreResult<GenerateResponse> {
            Ok(GenerateResponse::text("unused"))
        }

        fn generate_stream<'a>(
            &'a self,
            _request: GenerateRequest,
        ) -> Pin<Box<dyn Stream<Item = CoreResult<StreamChunk>> + Send + 'a>> {
            let chunks = std::mem::take(&mut *self.chunks.lock().unwrap());
            Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
        }

        async fn generate_with_tools(
            &self,
            request: GenerateRequest,
            _tools: &[ToolDefinition],
        ) -> CoreResult<GenerateResponse> {
            self.generate(request).await
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "echoes its input", serde_json::json!({"type": "object"}))
        }

        async fn call(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
            Ok(arguments)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        fragments: StdMutex<Vec<String>>,
        finals: StdMutex<Vec<String>>,
        tool_starts: StdMutex<Vec<String>>,
        tool_ends: StdMutex<Vec<(String, ToolStatus)>>,
    }

    #[async_trait]
    impl TurnSink for RecordingSink {
        async fn on_fragment(&self, text: &str) {
            self.fragments.lock().unwrap().push(text.to_string());
        }

        async fn on_tool_start(&self, _call_id: &str, name: &str) {
            self.tool_starts.lock().unwrap().push(name.to_string());
        }

        async fn on_tool_end(&self, _call_id: &str, name: &str, _elapsed_ms: u64, status: ToolStatus, _result: &Value) {
            self.tool_ends.lock().unwrap().push((name.to_string(), status));
        }

        async fn on_final(&self, text: &str) {
            self.finals.lock().unwrap().push(text.to_string());
        }
    }

    fn memory() -> Arc<Memory> {
        Arc::new(Memory::new("s1", "be helpful", Arc::new(InMemoryKvStore::new())))
    }

    #[tokio::test]
    async fn plain_text_flushes_on_sentence_terminators() {
        let llm = Arc::new(ScriptedLlm {
            chunks: StdMutex::new(vec![
                StreamChunk::text("Hello there. "),
                StreamChunk::text("How are you?"),
                StreamChunk::final_chunk(FinishReason::Stop),
            ]),
        });
        let router = TurnRouter::new(memory(), llm, ToolRegistry::new());
        let sink = RecordingSink::default();
        let cancel = tokio_util::sync::CancellationToken::new();

        router.run_turn("hi", &sink, &cancel).await.unwrap();

        let fragments = sink.fragments.lock().unwrap().clone();
        assert_eq!(fragments, vec!["Hello there. ".to_string(), "How are you? ".to_string()]);
        assert_eq!(sink.finals.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_call_round_trip_recurses_for_follow_up_text() {
        let llm = Arc::new(ScriptedLlm {
            chunks: StdMutex::new(vec![
                StreamChunk::tool_call(ToolCallDelta {
                    id: Some("call_1".into()),
                    name: Some("echo".into()),
                    arguments: "{\"a\":1}".into(),
                }),
                StreamChunk::final_chunk(FinishReason::ToolCalls),
                StreamChunk::text("Done."),
                StreamChunk::final_chunk(FinishReason::Stop),
            ]),
        });
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let router = TurnRouter::new(memory(), llm, tools);
        let sink = RecordingSink::default();
        let cancel = tokio_util::sync::CancellationToken::new();

        router.run_turn("call the tool", &sink, &cancel).await.unwrap();

        assert_eq!(sink.tool_starts.lock().unwrap().clone(), vec!["echo".to_string()]);
        assert_eq!(sink.tool_ends.lock().unwrap()[0].1, ToolStatus::Success);
        assert_eq!(sink.finals.lock().unwrap(), vec!["Done.".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_aborts_without_recursing() {
        let llm = Arc::new(ScriptedLlm {
            chunks: StdMutex::new(vec![
                StreamChunk::tool_call(ToolCallDelta {
                    id: Some("call_1".into()),
                    name: Some("nonexistent".into()),
                    arguments: "{}".into(),
                }),
                StreamChunk::final_chunk(FinishReason::ToolCalls),
            ]),
        });
        let router = TurnRouter::new(memory(), llm, ToolRegistry::new());
        let sink = RecordingSink::default();
        let cancel = tokio_util::sync::CancellationToken::new();

        router.run_turn("call the tool", &sink, &cancel).await.unwrap();

        assert_eq!(sink.tool_ends.lock().unwrap()[0].1, ToolStatus::Error);
        assert!(sink.finals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_drops_partial_assistant_content() {
        let llm = Arc::new(ScriptedLlm { chunks: StdMutex::new(vec![StreamChunk::text("partial")]) });
        let router = TurnRouter::new(memory(), llm, ToolRegistry::new());
        let sink = RecordingSink::default();
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();

        let result = router.run_turn("hi", &sink, &cancel).await;
        assert!(matches!(result, Err(TurnError::Cancelled)));
        assert!(sink.finals.lock().unwrap().is_empty());
    }

    #[test]
    fn sentence_buffer_pads_fragments_so_concatenation_is_lossless() {
        let mut buffer = SentenceBuffer::default();
        let mut out = String::new();
        for fragment in buffer.push("One. Two! Three?") {
            out.push_str(&fragment);
        }
        if let Some(rest) = buffer.flush_remainder() {
            out.push_str(&rest);
        }
        assert_eq!(out.replace("  ", " "), "One. Two! Three? ");
    }
}
