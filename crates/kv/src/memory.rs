//! In-memory `KvStore` fake used in tests and local development without a
//! Redis cluster. Streams are append-only `Vec`s guarded by the same
//! `DashMap` sharding the hash/value maps use.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::store::{KvStore, StreamEvent};

#[derive(Default)]
pub struct InMemoryKvStore {
    values: DashMap<String, Value>,
    hashes: DashMap<String, HashMap<String, Value>>,
    streams: DashMap<String, Vec<StreamEvent>>,
    next_id: AtomicU64,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_stream_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-0", seq)
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set_hash(&self, session_id: &str, map: &HashMap<String, Value>) -> Result<()> {
        self.hashes
            .entry(session_id.to_string())
            .or_default()
            .extend(map.clone());
        Ok(())
    }

    async fn get_hash(&self, session_id: &str) -> Result<HashMap<String, Value>> {
        Ok(self.hashes.get(session_id).map(|m| m.clone()).unwrap_or_default())
    }

    async fn update_field(&self, session_id: &str, field: &str, value: &Value) -> Result<()> {
        self.hashes
            .entry(session_id.to_string())
            .or_default()
            .insert(field.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.hashes.remove(session_id);
        self.values.remove(session_id);
        Ok(())
    }

    async fn append_event(&self, stream_key: &str, event: &HashMap<String, String>) -> Result<String> {
        let id = self.next_stream_id();
        self.streams.entry(stream_key.to_string()).or_default().push(StreamEvent {
            id: id.clone(),
            fields: event.clone(),
        });
        Ok(id)
    }

    async fn read_events(
        &self,
        stream_key: &str,
        last_id: &str,
        block_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEvent>> {
        // Poll with a short sleep rather than a real blocking XREAD; the
        // caller-visible contract (empty vec on timeout) is identical.
        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_millis(block_ms);
        // "$" means "only events appended after this call starts" - snapshot
        // the current tail so we never replay history already on the stream.
        let floor = if last_id == "$" {
            self.streams.get(stream_key).and_then(|entries| entries.last().map(|e| e.id.clone()))
        } else {
            Some(last_id.to_string())
        };
        loop {
            let matches: Vec<StreamEvent> = self
                .streams
                .get(stream_key)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| match &floor {
                            Some(floor) => id_gt(&e.id, floor),
                            None => true,
                        })
                        .take(count)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            if !matches.is_empty() {
                return Ok(matches);
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        }
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }
}

fn id_gt(id: &str, last_id: &str) -> bool {
    let parse = |s: &str| -> u64 { s.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0) };
    parse(id) > parse(last_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let kv = InMemoryKvStore::new();
        kv.set("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn hash_fields_update_independently() {
        let kv = InMemoryKvStore::new();
        let mut map = HashMap::new();
        map.insert("greeting_sent".to_string(), json!(false));
        kv.set_hash("sess-1", &map).await.unwrap();
        kv.update_field("sess-1", "greeting_sent", &json!(true)).await.unwrap();

        let hash = kv.get_hash("sess-1").await.unwrap();
        assert_eq!(hash.get("greeting_sent"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn delete_clears_hash() {
        let kv = InMemoryKvStore::new();
        let mut map = HashMap::new();
        map.insert("x".to_string(), json!(1));
        kv.set_hash("sess-2", &map).await.unwrap();
        kv.delete("sess-2").await.unwrap();
        assert!(kv.get_hash("sess-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_and_read_events_in_order() {
        let kv = InMemoryKvStore::new();
        let mut e1 = HashMap::new();
        e1.insert("validation_status".to_string(), "completed".to_string());
        let id1 = kv.append_event("call:1:dtmf", &e1).await.unwrap();

        let events = kv.read_events("call:1:dtmf", "0", 50, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id1);
        assert_eq!(events[0].field("validation_status"), Some("completed"));
    }

    #[tokio::test]
    async fn read_events_times_out_when_nothing_new() {
        let kv = InMemoryKvStore::new();
        let events = kv.read_events("empty-stream", "$", 20, 5).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn ping_is_always_healthy_for_the_fake() {
        let kv = InMemoryKvStore::new();
        assert!(kv.ping().await.unwrap());
    }
}
