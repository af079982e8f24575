//! Registry from session id to `(memory-manager, primary-socket)` (spec
//! §4.2/§4.8). Generic over the memory type `M` the same way
//! `voice_agent_engines::EnginePool<E>` is generic over the engine type —
//! `voice_agent_turn::Memory` is the concrete `M` the server wires up, but
//! this crate sits below `voice_agent_turn` in the dependency graph so it
//! cannot name that type directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;

/// One session's registry entry. `memory` is whatever per-session mutable
/// state the caller's layer owns (conversation history, context map);
/// `primary_conn_id` is the connection the session was created on.
pub struct SessionEntry<M> {
    pub memory: Arc<M>,
    pub primary_conn_id: String,
    last_activity: Instant,
}

impl<M> SessionEntry<M> {
    pub fn new(memory: Arc<M>, primary_conn_id: impl Into<String>) -> Self {
        Self {
            memory,
            primary_conn_id: primary_conn_id.into(),
            last_activity: Instant::now(),
        }
    }
}

/// Thread-safe session registry: add/remove/count, plus a touch() to keep
/// an idle-session reaper (not mandated by spec, a safety net against
/// premature eviction) from reclaiming a live session whose owning task is
/// between receive-loop iterations.
pub struct SessionManager<M> {
    sessions: RwLock<HashMap<String, SessionEntry<M>>>,
    idle_timeout: Duration,
}

impl<M> SessionManager<M> {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Registers a session. Per spec §3's ownership invariant, the caller
    /// must do this *before* the greeting is emitted.
    pub fn add(&self, session_id: impl Into<String>, entry: SessionEntry<M>) {
        self.sessions.write().insert(session_id.into(), entry);
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionEntry<M>> {
        self.sessions.write().remove(session_id)
    }

    pub fn get_memory(&self, session_id: &str) -> Option<Arc<M>> {
        self.sessions.read().get(session_id).map(|e| e.memory.clone())
    }

    pub fn primary_conn_id(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .get(session_id)
            .map(|e| e.primary_conn_id.clone())
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.last_activity = Instant::now();
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Session ids idle longer than `idle_timeout`. The caller decides
    /// what "idle too long" means to do (the session's owning task is
    /// authoritative over its own teardown per spec §4.8; this is only
    /// ever a last-resort reaper for abandoned entries).
    fn expired_ids(&self) -> Vec<String> {
        let now = Instant::now();
        self.sessions
            .read()
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_activity) > self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl<M: Send + Sync + 'static> SessionManager<M> {
    /// Spawns a periodic reaper of idle entries. Returns a shutdown
    /// sender the caller may use to stop the sweep early.
    pub fn start_idle_reaper(self: &Arc<Self>, sweep_interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for id in manager.expired_ids() {
                            tracing::warn!(session_id = %id, "reaping idle session entry");
                            manager.remove(&id);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Memo;

    #[test]
    fn add_get_remove_roundtrip() {
        let mgr: SessionManager<Memo> = SessionManager::new(Duration::from_secs(60));
        mgr.add("sess-1", SessionEntry::new(Arc::new(Memo), "conn-1"));

        assert!(mgr.contains("sess-1"));
        assert_eq!(mgr.count(), 1);
        assert_eq!(mgr.primary_conn_id("sess-1").as_deref(), Some("conn-1"));

        mgr.remove("sess-1");
        assert!(!mgr.contains("sess-1"));
    }

    #[test]
    fn touch_refreshes_activity_and_prevents_expiry() {
        let mgr: SessionManager<Memo> = SessionManager::new(Duration::from_millis(0));
        mgr.add("sess-1", SessionEntry::new(Arc::new(Memo), "conn-1"));
        mgr.touch("sess-1");
        assert!(mgr.contains("sess-1"));
    }
}
