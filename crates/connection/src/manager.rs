//! Registry of live WebSocket connections (spec §4.2).
//!
//! Grounded in a bounded-registry style guarded by a single lock, matching
//! this workspace's other shared-state registries. The actual socket write
//! lives one layer up in
//! `voice_agent_transport`; this crate only routes JSON envelopes onto an
//! `mpsc` sender that the transport layer drains into the real socket, so
//! sends never happen while the registry's lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// The three connection roles named in spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Dashboard,
    Conversation,
    Media,
}

/// A registered connection's routable metadata. The actual socket is not
/// owned here — `outbox` is the write-side of a channel whose read side a
/// transport-layer task pumps into the real WebSocket.
struct Connection {
    kind: ConnectionKind,
    topics: HashSet<String>,
    session_id: Option<String>,
    outbox: mpsc::UnboundedSender<Value>,
}

#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    pub connections: usize,
    pub by_topic: HashMap<String, usize>,
    pub by_kind: HashMap<&'static str, usize>,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Connection>,
    by_topic: HashMap<String, HashSet<String>>,
    by_session: HashMap<String, HashSet<String>>,
}

/// Authoritative registry of live WebSocket endpoints (spec §4.2). A
/// single lock guards all three indices; `send_to_connection` and
/// `broadcast_session` clone the target sender(s) out of the lock before
/// the (non-blocking, channel-based) send, so no send ever happens while
/// holding the lock.
#[derive(Clone)]
pub struct ConnectionManager {
    indices: Arc<RwLock<Indices>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            indices: Arc::new(RwLock::new(Indices::default())),
        }
    }

    /// Registers a connection and returns its id. The caller has already
    /// performed the WebSocket upgrade; `outbox` is the sender half of the
    /// channel the transport layer reads from to write frames out.
    pub fn register(
        &self,
        kind: ConnectionKind,
        topics: impl IntoIterator<Item = String>,
        session_id: Option<String>,
        outbox: mpsc::UnboundedSender<Value>,
    ) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();
        let topics: HashSet<String> = topics.into_iter().collect();

        let mut indices = self.indices.write();
        for topic in &topics {
            indices
                .by_topic
                .entry(topic.clone())
                .or_default()
                .insert(conn_id.clone());
        }
        if let Some(ref sid) = session_id {
            indices
                .by_session
                .entry(sid.clone())
                .or_default()
                .insert(conn_id.clone());
        }
        indices.by_id.insert(
            conn_id.clone(),
            Connection {
                kind,
                topics,
                session_id,
                outbox,
            },
        );

        tracing::debug!(conn_id = %conn_id, ?kind, "connection registered");
        conn_id
    }

    /// Removes a connection from all indices. Never blocks on the socket:
    /// dropping the sender half simply lets the transport-side reader see
    /// the channel close on its own.
    pub fn unregister(&self, conn_id: &str) {
        let mut indices = self.indices.write();
        let Some(conn) = indices.by_id.remove(conn_id) else {
            return;
        };
        for topic in &conn.topics {
            if let Some(set) = indices.by_topic.get_mut(topic) {
                set.remove(conn_id);
                if set.is_empty() {
                    indices.by_topic.remove(topic);
                }
            }
        }
        if let Some(sid) = &conn.session_id {
            if let Some(set) = indices.by_session.get_mut(sid) {
                set.remove(conn_id);
                if set.is_empty() {
                    indices.by_session.remove(sid);
                }
            }
        }
        tracing::debug!(conn_id = %conn_id, "connection unregistered");
    }

    /// Best-effort JSON send. Disconnects are logged and swallowed — the
    /// caller never finds out synchronously that a send failed.
    pub fn send_to_connection(&self, conn_id: &str, envelope: Value) -> Result<(), ConnectionError> {
        let sender = {
            let indices = self.indices.read();
            indices
                .by_id
                .get(conn_id)
                .map(|c| c.outbox.clone())
                .ok_or_else(|| ConnectionError::NotFound(conn_id.to_string()))?
        };

        if sender.send(envelope).is_err() {
            tracing::warn!(conn_id = %conn_id, "dropped send to a disconnected connection");
        }
        Ok(())
    }

    /// Sends to every connection whose `session_id` matches. Broadcasting
    /// without a session id is rejected per spec §9's "relay dashboard"
    /// re-architecture note — there is no sessionless fan-out in the core.
    pub fn broadcast_session(&self, session_id: &str, envelope: Value) -> usize {
        if session_id.is_empty() {
            tracing::error!("refusing to broadcast without a session id");
            return 0;
        }

        let targets: Vec<mpsc::UnboundedSender<Value>> = {
            let indices = self.indices.read();
            indices
                .by_session
                .get(session_id)
                .into_iter()
                .flatten()
                .filter_map(|id| indices.by_id.get(id).map(|c| c.outbox.clone()))
                .collect()
        };

        let mut sent = 0;
        for sender in targets {
            if sender.send(envelope.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub fn stats(&self) -> ConnectionStats {
        let indices = self.indices.read();
        let mut by_kind: HashMap<&'static str, usize> = HashMap::new();
        for conn in indices.by_id.values() {
            let key = match conn.kind {
                ConnectionKind::Dashboard => "dashboard",
                ConnectionKind::Conversation => "conversation",
                ConnectionKind::Media => "media",
            };
            *by_kind.entry(key).or_default() += 1;
        }
        let by_topic = indices
            .by_topic
            .iter()
            .map(|(topic, conns)| (topic.clone(), conns.len()))
            .collect();

        ConnectionStats {
            connections: indices.by_id.len(),
            by_topic,
            by_kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel() -> (mpsc::UnboundedSender<Value>, mpsc::UnboundedReceiver<Value>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_indexes_by_topic_and_session() {
        let mgr = ConnectionManager::new();
        let (tx, _rx) = channel();
        let conn_id = mgr.register(
            ConnectionKind::Conversation,
            ["conversation".to_string()],
            Some("sess-1".to_string()),
            tx,
        );

        let stats = mgr.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.by_topic["conversation"], 1);
        assert_eq!(stats.by_kind["conversation"], 1);

        mgr.unregister(&conn_id);
        assert_eq!(mgr.stats().connections, 0);
    }

    #[test]
    fn broadcast_only_reaches_matching_session() {
        let mgr = ConnectionManager::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        mgr.register(ConnectionKind::Conversation, [], Some("sess-a".to_string()), tx_a);
        mgr.register(ConnectionKind::Conversation, [], Some("sess-b".to_string()), tx_b);

        let sent = mgr.broadcast_session("sess-a", json!({"type": "status"}));
        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_session_id_is_rejected() {
        let mgr = ConnectionManager::new();
        assert_eq!(mgr.broadcast_session("", json!({})), 0);
    }

    #[test]
    fn send_to_unknown_connection_is_an_error() {
        let mgr = ConnectionManager::new();
        assert!(matches!(
            mgr.send_to_connection("nope", json!({})),
            Err(ConnectionError::NotFound(_))
        ));
    }

    #[test]
    fn send_to_disconnected_connection_is_swallowed() {
        let mgr = ConnectionManager::new();
        let (tx, rx) = channel();
        let conn_id = mgr.register(ConnectionKind::Media, [], None, tx);
        drop(rx);
        assert!(mgr.send_to_connection(&conn_id, json!({})).is_ok());
    }
}
