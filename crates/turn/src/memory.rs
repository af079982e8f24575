//! Per-session conversation memory (spec §3, `Memory`) plus the "Latency
//! tool" named in the glossary: a timer registry persisted alongside the
//! memory record for diagnostics.
//!
//! Grounded in a conversation-history shape generalized from a fixed turn
//! struct to the provider-agnostic `{role, name?, content, tool_call_id?}`
//! message the turn router streams against (spec §3).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use voice_agent_core::llm_types::Message;
use voice_agent_kv::KvStore;

use crate::error::{Result, TurnError};

/// Named timer spans recorded as milliseconds (spec glossary: "Latency
/// tool"): `greeting_ttfb`, `tts:synthesis`, `tts:send_frames`, etc.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct LatencyTool {
    spans: HashMap<String, u64>,
    #[serde(skip)]
    open: HashMap<String, std::time::Instant>,
}

impl LatencyTool {
    pub fn start(&mut self, label: impl Into<String>) {
        self.open.insert(label.into(), std::time::Instant::now());
    }

    /// Stops the named span if it is open, recording its elapsed
    /// milliseconds. A span can only be stopped once; subsequent calls
    /// are no-ops (spec §4.5: "the first assistant frame ... stops a
    /// `greeting_ttfb` timer exactly once").
    pub fn stop(&mut self, label: &str) {
        if let Some(start) = self.open.remove(label) {
            self.spans.insert(label.to_string(), start.elapsed().as_millis() as u64);
        }
    }

    pub fn is_running(&self, label: &str) -> bool {
        self.open.contains_key(label)
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.spans.get(label).copied()
    }

    pub fn as_map(&self) -> &HashMap<String, u64> {
        &self.spans
    }
}

/// Per-session mutable state: conversation history, an arbitrary context
/// map, and the latency tool (spec §3, `Memory`).
///
/// Ownership: `Memory` is exclusively owned by its `Session` (spec §3's
/// ownership invariant); the turn router is handed an `Arc<Memory>` and
/// never mutates it concurrently because the owning session is pinned to
/// one task.
pub struct Memory {
    session_id: String,
    inner: RwLock<MemoryState>,
    kv: Arc<dyn KvStore>,
}

struct MemoryState {
    history: Vec<Message>,
    context: HashMap<String, Value>,
    latency: LatencyTool,
    greeting_sent: bool,
}

impl Memory {
    /// Builds a fresh in-memory state seeded with a system prompt; callers
    /// that want to resume a prior session should call [`Memory::load`]
    /// instead.
    pub fn new(session_id: impl Into<String>, system_prompt: impl Into<String>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            session_id: session_id.into(),
            inner: RwLock::new(MemoryState {
                history: vec![Message::system(system_prompt)],
                context: HashMap::new(),
                latency: LatencyTool::default(),
                greeting_sent: false,
            }),
            kv,
        }
    }

    /// Lazily loads prior state from the KV store, falling back to a
    /// fresh session if nothing is stored under `session_id` (spec §3,
    /// "Lazy-loaded from KV by id").
    pub async fn load(session_id: impl Into<String>, system_prompt: impl Into<String>, kv: Arc<dyn KvStore>) -> Result<Self> {
        let session_id = session_id.into();
        let key = history_key(&session_id);
        let stored = kv.get(&key).await.map_err(|e| TurnError::Memory(e.to_string()))?;

        let (history, context, latency, greeting_sent) = match stored {
            Some(value) => {
                let record: PersistedMemory = serde_json::from_value(value)
                    .map_err(|e| TurnError::Memory(e.to_string()))?;
                (record.history, record.context, LatencyTool { spans: record.latency, open: HashMap::new() }, record.greeting_sent)
            }
            None => (vec![Message::system(system_prompt)], HashMap::new(), LatencyTool::default(), false),
        };

        Ok(Self {
            session_id,
            inner: RwLock::new(MemoryState { history, context, latency, greeting_sent }),
            kv,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append-only within a turn (spec §3 invariant): all mutation goes
    /// through this method.
    pub fn append(&self, message: Message) {
        self.inner.write().history.push(message);
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.read().history.clone()
    }

    pub fn history_len(&self) -> usize {
        self.inner.read().history.len()
    }

    pub fn set_context(&self, key: impl Into<String>, value: Value) {
        self.inner.write().context.insert(key.into(), value);
    }

    pub fn get_context(&self, key: &str) -> Option<Value> {
        self.inner.read().context.get(key).cloned()
    }

    pub fn greeting_sent(&self) -> bool {
        self.inner.read().greeting_sent
    }

    pub fn mark_greeting_sent(&self) {
        self.inner.write().greeting_sent = true;
    }

    pub fn with_latency<R>(&self, f: impl FnOnce(&mut LatencyTool) -> R) -> R {
        f(&mut self.inner.write().latency)
    }

    /// Persists the full memory record to the KV store. Idempotent at
    /// turn boundaries (spec §5): overwriting with the current snapshot
    /// is always safe because the owning session is single-tasked.
    pub async fn persist(&self) -> Result<()> {
        let record = {
            let state = self.inner.read();
            PersistedMemory {
                history: state.history.clone(),
                context: state.context.clone(),
                latency: state.latency.as_map().clone(),
                greeting_sent: state.greeting_sent,
            }
        };
        let value = serde_json::to_value(&record).map_err(|e| TurnError::Memory(e.to_string()))?;
        self.kv
            .set(&history_key(&self.session_id), &value)
            .await
            .map_err(|e| TurnError::Memory(e.to_string()))?;
        Ok(())
    }
}

fn history_key(session_id: &str) -> String {
    format!("session:{session_id}:memory")
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedMemory {
    history: Vec<Message>,
    context: HashMap<String, Value>,
    latency: HashMap<String, u64>,
    #[serde(default)]
    greeting_sent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_agent_kv::InMemoryKvStore;

    fn kv() -> Arc<dyn KvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    #[test]
    fn new_memory_starts_with_system_prompt_at_slot_zero() {
        let memory = Memory::new("s1", "be helpful", kv());
        let history = memory.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, voice_agent_core::llm_types::Role::System);
    }

    #[tokio::test]
    async fn persist_then_load_roundtrips_history_and_greeting_flag() {
        let store = kv();
        let memory = Memory::new("s1", "be helpful", store.clone());
        memory.append(Message::assistant("hello there"));
        memory.mark_greeting_sent();
        memory.persist().await.unwrap();

        let reloaded = Memory::load("s1", "be helpful", store).await.unwrap();
        assert_eq!(reloaded.history().len(), 2);
        assert!(reloaded.greeting_sent());
    }

    #[tokio::test]
    async fn load_without_prior_state_falls_back_to_fresh_session() {
        let reloaded = Memory::load("never-seen", "be helpful", kv()).await.unwrap();
        assert_eq!(reloaded.history().len(), 1);
        assert!(!reloaded.greeting_sent());
    }

    #[test]
    fn latency_tool_stops_a_span_exactly_once() {
        let memory = Memory::new("s1", "be helpful", kv());
        memory.with_latency(|l| l.start("greeting_ttfb"));
        memory.with_latency(|l| l.stop("greeting_ttfb"));
        let first = memory.with_latency(|l| l.get("greeting_ttfb"));
        assert!(first.is_some());

        // stopping again (span no longer open) must not clobber the value
        memory.with_latency(|l| l.stop("greeting_ttfb"));
        assert_eq!(memory.with_latency(|l| l.get("greeting_ttfb")), first);
    }
}
