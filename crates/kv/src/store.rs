//! Key/value + append-only stream client contract (spec §6).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

/// One entry appended to a stream by `append_event`/read back by
/// `read_events`. Mirrors a Redis stream entry: an opaque id plus a flat
/// field map (the manager.py original stores events as Redis stream
/// field/value pairs).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }
}

/// The KV store interface the core depends on (spec §6).
///
/// Implementations own credential refresh and cluster redirects
/// transparently; callers never see a `MOVED`-shaped error or an expired
/// AAD token, only the category of failure in [`crate::KvError`].
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, key: &str, value: &Value) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set_hash(&self, session_id: &str, map: &HashMap<String, Value>) -> Result<()>;
    async fn get_hash(&self, session_id: &str) -> Result<HashMap<String, Value>>;
    async fn update_field(&self, session_id: &str, field: &str, value: &Value) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Append one event to `stream_key`, returning the assigned entry id.
    async fn append_event(&self, stream_key: &str, event: &HashMap<String, String>) -> Result<String>;

    /// Block up to `block_ms` reading events newer than `last_id` (`"$"`
    /// means "only new events"); returns up to `count` events, or an empty
    /// vec on timeout.
    async fn read_events(
        &self,
        stream_key: &str,
        last_id: &str,
        block_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEvent>>;

    async fn ping(&self) -> Result<bool>;
}
