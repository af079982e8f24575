//! Translates `SpeechEvent`s from an SDK's non-cooperative callback thread
//! into a per-session cooperative queue, and safely schedules futures onto
//! the owning tokio runtime from that thread (spec §4.3).
//!
//! Rust has no GIL-bound event loop to hand work back to, so "the callback
//! thread" is whatever `std::thread::spawn`'d worker drives the speech
//! SDK's blocking API, and "the owning loop" is the `tokio::runtime::Handle`
//! captured once by `set_scheduler` when the session task starts.

use std::collections::VecDeque;
use std::future::Future;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Notify;

use voice_agent_core::transcript::{SpeechEvent, SpeechEventKind};

/// A bounded per-session speech-event queue with overflow policies that
/// differ by event kind (spec §4.3): partials are drop-tolerant (the
/// oldest one is evicted to make room), finals must be preserved when
/// capacity allows (the new one is dropped instead).
pub struct SpeechEventQueue {
    inner: Mutex<VecDeque<SpeechEvent>>,
    capacity: usize,
    notify: Notify,
}

impl SpeechEventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, event: SpeechEvent) {
        let mut inner = self.inner.lock();
        if inner.len() >= self.capacity {
            match event.kind {
                SpeechEventKind::Partial => {
                    inner.pop_front();
                    inner.push_back(event);
                    tracing::warn!("speech event queue full, dropped oldest partial");
                }
                SpeechEventKind::Final | SpeechEventKind::Cancel => {
                    tracing::warn!("speech event queue full, dropping incoming final/cancel event");
                }
            }
        } else {
            inner.push_back(event);
        }
        drop(inner);
        self.notify.notify_one();
    }

    pub async fn dequeue(&self) -> SpeechEvent {
        loop {
            if let Some(event) = self.inner.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns the scheduler-loop handle and exposes the two cross-thread
/// primitives a callback-driven STT adapter needs.
#[derive(Default)]
pub struct ThreadBridge {
    scheduler: RwLock<Option<Handle>>,
}

impl ThreadBridge {
    pub fn new() -> Self {
        Self {
            scheduler: RwLock::new(None),
        }
    }

    /// Called once when the session task starts.
    pub fn set_scheduler(&self, handle: Handle) {
        *self.scheduler.write() = Some(handle);
    }

    /// Enqueues an event using the queue's own overflow policy.
    pub fn queue_speech_result(&self, queue: &SpeechEventQueue, event: SpeechEvent) {
        queue.enqueue(event);
    }

    /// Safely submits `future` to the owning loop. Never blocks the
    /// calling thread; if no scheduler has been registered yet, logs and
    /// discards as a last resort.
    pub fn schedule<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.scheduler.read().clone();
        match handle {
            Some(handle) => {
                handle.spawn(future);
            }
            None => {
                tracing::error!("thread bridge has no scheduler handle; discarding scheduled task");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_oldest_partial() {
        let queue = SpeechEventQueue::new(2);
        queue.enqueue(SpeechEvent::partial("a", 0));
        queue.enqueue(SpeechEvent::partial("b", 1));
        queue.enqueue(SpeechEvent::partial("c", 2));

        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn full_queue_drops_incoming_final_not_existing_ones() {
        let queue = SpeechEventQueue::new(1);
        queue.enqueue(SpeechEvent::final_("first", 0));
        queue.enqueue(SpeechEvent::final_("second", 1));

        assert_eq!(queue.len(), 1);
        let kept = queue.dequeue().await;
        assert_eq!(kept.text, "first");
    }

    #[tokio::test]
    async fn schedule_without_a_registered_scheduler_does_not_panic() {
        let bridge = ThreadBridge::new();
        bridge.schedule(async {});
    }

    #[tokio::test]
    async fn schedule_runs_on_the_registered_handle() {
        let bridge = ThreadBridge::new();
        bridge.set_scheduler(Handle::current());

        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge.schedule(async move {
            let _ = tx.send(());
        });

        rx.await.unwrap();
    }
}
