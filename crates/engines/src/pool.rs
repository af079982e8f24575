//! Bounded, tiered, session-affine engine pool (spec §4.1).
//!
//! Generic over the engine type so one implementation backs both the STT
//! and TTS pools. Grounded in `core/traits/speech.rs` for the capability
//! shape an engine must satisfy, and in the semaphore-based checkout
//! pattern of a reference TTS engine pool, reworked into three explicitly
//! ranked tiers with FIFO waiter hand-off instead of a single semaphore.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

/// Constructs new engine instances on demand. Implemented once per concrete
/// engine type (the Azure STT/TTS adapters in this crate).
#[async_trait]
pub trait EngineFactory<E>: Send + Sync {
    async fn construct(&self) -> Result<E>;
}

/// Tier an engine slot currently belongs to (spec §3, `EngineSlot.tier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Dedicated,
    Shared,
    Overflow,
}

/// Sizing for each tier plus the failure-handling knobs from spec §4.1.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    pub dedicated: usize,
    pub shared: usize,
    pub overflow: usize,
    pub acquire_timeout: Duration,
    pub construction_max_retries: u32,
    /// Label used on the `voice_agent_capacity_rejections_total` metric
    /// (e.g. `"stt"`, `"tts"`) so the two pools are distinguishable on the
    /// `/metrics` endpoint.
    pub name: &'static str,
}

struct Slot<E> {
    engine: Arc<E>,
    tier: Tier,
    /// (voice, style, rate) already warmed up on this engine (spec §4.1).
    prepared_voices: HashSet<(String, String, u32)>,
}

struct Waiter<E> {
    reply: oneshot::Sender<EngineHandle<E>>,
}

struct State<E> {
    /// Slots currently checked out, keyed by the session holding them.
    held: HashMap<String, Slot<E>>,
    /// Free slots available for the next acquire, per tier.
    free: HashMap<Tier, Vec<Slot<E>>>,
    waiters: VecDeque<Waiter<E>>,
    dedicated_capacity: usize,
    shared_capacity: usize,
    overflow_capacity: usize,
    overflow_in_use: usize,
    degraded: bool,
}

/// A checked-out engine plus the tier it came from, handed back to the
/// caller of `acquire_for_session` (spec §4.1).
pub struct EngineHandle<E> {
    pub engine: Arc<E>,
    pub tier: Tier,
}

#[derive(Debug, serde::Serialize)]
pub struct PoolSnapshot {
    pub size: usize,
    pub in_use: usize,
    pub waiters: usize,
    pub by_tier: HashMap<String, usize>,
}

impl std::fmt::Display for PoolSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "size={} in_use={} waiters={} by_tier={:?}",
            self.size, self.in_use, self.waiters, self.by_tier
        )
    }
}

enum Immediate<E> {
    Handle(EngineHandle<E>),
    OverflowReserved,
    NoCapacity,
}

pub struct EnginePool<E: Send + Sync + 'static> {
    factory: Arc<dyn EngineFactory<E>>,
    limits: PoolLimits,
    state: Mutex<State<E>>,
}

impl<E: Send + Sync + 'static> EnginePool<E> {
    pub fn new(factory: Arc<dyn EngineFactory<E>>, limits: PoolLimits) -> Arc<Self> {
        let dedicated_capacity = limits.dedicated;
        let shared_capacity = limits.shared;
        let overflow_capacity = limits.overflow;
        Arc::new(Self {
            factory,
            limits,
            state: Mutex::new(State {
                held: HashMap::new(),
                free: HashMap::new(),
                waiters: VecDeque::new(),
                dedicated_capacity,
                shared_capacity,
                overflow_capacity,
                overflow_in_use: 0,
                degraded: false,
            }),
        })
    }

    /// Pre-construct the dedicated tier so its engines are warm before the
    /// first session ever acquires one.
    pub async fn warm_dedicated(&self) -> Result<()> {
        let n = self.limits.dedicated;
        for _ in 0..n {
            let engine = self.construct_with_retry().await?;
            let mut state = self.state.lock();
            state.free.entry(Tier::Dedicated).or_default().push(Slot {
                engine,
                tier: Tier::Dedicated,
                prepared_voices: HashSet::new(),
            });
        }
        Ok(())
    }

    /// Acquire an engine for `session_id`, re-entrant if the session
    /// already holds one (spec §4.1).
    pub async fn acquire_for_session(&self, session_id: &str) -> Result<EngineHandle<E>> {
        if let Some(slot) = self.state.lock().held.get(session_id) {
            return Ok(EngineHandle { engine: slot.engine.clone(), tier: slot.tier });
        }

        match self.try_acquire_immediate(session_id) {
            Immediate::Handle(handle) => return Ok(handle),
            Immediate::OverflowReserved => return self.acquire_overflow_for_session(session_id).await,
            Immediate::NoCapacity => {}
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.waiters.push_back(Waiter { reply: tx });
        }

        match timeout(self.limits.acquire_timeout, rx).await {
            Ok(Ok(handle)) => {
                self.state.lock().held.insert(
                    session_id.to_string(),
                    Slot { engine: handle.engine.clone(), tier: handle.tier, prepared_voices: HashSet::new() },
                );
                Ok(handle)
            }
            _ => {
                voice_agent_core::metrics::record_capacity_rejection(self.limits.name);
                let snapshot = self.snapshot();
                Err(EngineError::Capacity { snapshot: snapshot.to_string() })
            }
        }
    }

    /// Resolves immediately available capacity without blocking: a free
    /// dedicated/shared slot, an overflow reservation still needing
    /// construction, or nothing.
    fn try_acquire_immediate(&self, session_id: &str) -> Immediate<E> {
        let mut state = self.state.lock();

        for tier in [Tier::Dedicated, Tier::Shared] {
            if let Some(slot) = state.free.entry(tier).or_default().pop() {
                let handle = EngineHandle { engine: slot.engine.clone(), tier };
                state.held.insert(session_id.to_string(), slot);
                return Immediate::Handle(handle);
            }
        }

        if state.overflow_in_use < state.overflow_capacity {
            state.overflow_in_use += 1;
            return Immediate::OverflowReserved;
        }

        Immediate::NoCapacity
    }

    async fn construct_with_retry(&self) -> Result<Arc<E>> {
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(100);
        loop {
            match self.factory.construct().await {
                Ok(engine) => {
                    self.state.lock().degraded = false;
                    return Ok(Arc::new(engine));
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.limits.construction_max_retries {
                        self.state.lock().degraded = true;
                        warn!(%err, attempt, "engine pool entering degraded state");
                        return Err(EngineError::Degraded(err.to_string()));
                    }
                    debug!(%err, attempt, "engine construction failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    /// Releases `session_id`'s engine. If a waiter is queued, hands the
    /// slot directly to it instead of returning it to the free list.
    /// Idempotent: returns `false` if the session held nothing.
    pub fn release_for_session(&self, session_id: &str, healthy: bool) -> bool {
        let mut state = self.state.lock();
        let Some(mut slot) = state.held.remove(session_id) else {
            return false;
        };

        if !healthy {
            info!(session_id, "discarding unhealthy engine slot on release");
            if slot.tier == Tier::Overflow {
                state.overflow_in_use = state.overflow_in_use.saturating_sub(1);
            }
            return true;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            let handle = EngineHandle { engine: slot.engine.clone(), tier: slot.tier };
            match waiter.reply.send(handle) {
                Ok(()) => return true,
                Err(_) => continue, // waiter gave up (timed out); try the next one
            }
        }

        slot.prepared_voices.clear();
        state.free.entry(slot.tier).or_default().push(slot);
        true
    }

    /// Call after `try_acquire_immediate` returns `None` with an overflow
    /// reservation pending, to actually construct the overflow engine.
    pub async fn acquire_overflow_for_session(&self, session_id: &str) -> Result<EngineHandle<E>> {
        match self.construct_with_retry().await {
            Ok(engine) => {
                let handle = EngineHandle { engine: engine.clone(), tier: Tier::Overflow };
                self.state.lock().held.insert(
                    session_id.to_string(),
                    Slot { engine, tier: Tier::Overflow, prepared_voices: HashSet::new() },
                );
                Ok(handle)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.overflow_in_use = state.overflow_in_use.saturating_sub(1);
                Err(err)
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.state.lock().degraded
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        let mut by_tier = HashMap::new();
        by_tier.insert("dedicated_free".to_string(), state.free.get(&Tier::Dedicated).map_or(0, |v| v.len()));
        by_tier.insert("shared_free".to_string(), state.free.get(&Tier::Shared).map_or(0, |v| v.len()));
        by_tier.insert("overflow_in_use".to_string(), state.overflow_in_use);
        PoolSnapshot {
            size: state.dedicated_capacity + state.shared_capacity + state.overflow_capacity,
            in_use: state.held.len(),
            waiters: state.waiters.len(),
            by_tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFactory {
        constructed: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl EngineFactory<u32> for CountingFactory {
        async fn construct(&self) -> Result<u32> {
            let n = self.constructed.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(EngineError::Construction("simulated failure".to_string()));
            }
            Ok(n)
        }
    }

    fn limits(dedicated: usize, shared: usize, overflow: usize) -> PoolLimits {
        PoolLimits {
            dedicated,
            shared,
            overflow,
            acquire_timeout: Duration::from_millis(200),
            construction_max_retries: 3,
            name: "test",
        }
    }

    #[tokio::test]
    async fn dedicated_slot_is_reused_across_release_and_acquire() {
        let factory = Arc::new(CountingFactory { constructed: AtomicU32::new(0), fail_first_n: 0 });
        let pool = EnginePool::new(factory, limits(1, 0, 0));
        pool.warm_dedicated().await.unwrap();

        let handle = pool.acquire_for_session("s1").await.unwrap();
        assert_eq!(handle.tier, Tier::Dedicated);
        assert!(pool.release_for_session("s1", true));

        let handle2 = pool.acquire_for_session("s2").await.unwrap();
        assert_eq!(*handle2.engine, 0); // same engine instance reused
    }

    #[tokio::test]
    async fn acquire_is_reentrant_for_the_same_session() {
        let factory = Arc::new(CountingFactory { constructed: AtomicU32::new(0), fail_first_n: 0 });
        let pool = EnginePool::new(factory, limits(1, 0, 0));
        pool.warm_dedicated().await.unwrap();

        let first = pool.acquire_for_session("s1").await.unwrap();
        let second = pool.acquire_for_session("s1").await.unwrap();
        assert_eq!(*first.engine, *second.engine);
    }

    #[tokio::test]
    async fn capacity_error_after_timeout_when_pool_exhausted() {
        let factory = Arc::new(CountingFactory { constructed: AtomicU32::new(0), fail_first_n: 0 });
        let pool = EnginePool::new(factory, limits(1, 0, 0));
        pool.warm_dedicated().await.unwrap();

        let _held = pool.acquire_for_session("s1").await.unwrap();
        let err = pool.acquire_for_session("s2").await.unwrap_err();
        assert!(matches!(err, EngineError::Capacity { .. }));
    }

    #[tokio::test]
    async fn waiter_receives_slot_directly_on_release_without_reenqueue() {
        let factory = Arc::new(CountingFactory { constructed: AtomicU32::new(0), fail_first_n: 0 });
        let pool = EnginePool::new(factory, limits(1, 0, 0));
        pool.warm_dedicated().await.unwrap();

        let _held = pool.acquire_for_session("s1").await.unwrap();

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire_for_session("s2").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.release_for_session("s1", true));

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.tier, Tier::Dedicated);
    }

    #[tokio::test]
    async fn release_of_unheld_session_is_a_noop() {
        let factory = Arc::new(CountingFactory { constructed: AtomicU32::new(0), fail_first_n: 0 });
        let pool = EnginePool::new(factory, limits(1, 0, 0));
        assert!(!pool.release_for_session("never-acquired", true));
    }

    #[tokio::test]
    async fn construction_retries_then_enters_degraded_state() {
        let factory = Arc::new(CountingFactory { constructed: AtomicU32::new(0), fail_first_n: 10 });
        let pool = EnginePool::new(factory, limits(1, 0, 0));
        let err = pool.warm_dedicated().await.unwrap_err();
        assert!(matches!(err, EngineError::Degraded(_)));
        assert!(pool.is_degraded());
    }
}
