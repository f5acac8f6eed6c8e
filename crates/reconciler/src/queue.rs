//! Deduplicating work queue.
//!
//! Keys are handed to at most one worker at a time. Adding a key that is
//! already waiting is a no-op; adding a key that is being processed marks
//! it dirty, and it is queued again when the worker calls [`WorkQueue::done`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::trace;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys waiting to be processed, queued or not.
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Work queue of identity keys.
#[derive(Debug)]
pub struct WorkQueue {
    name: &'static str,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn new_arc(name: &'static str) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Queue `key` unless it is already waiting.
    pub async fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            trace!(queue = self.name, key = %key, "key in flight, marked dirty");
            return;
        }
        trace!(queue = self.name, key = %key, "queued");
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue `key` after `delay`.
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed, re-queueing it if it was added meanwhile.
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out new keys once the queue is drained, and refuse adds.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `key` is waiting to be processed.
    pub async fn contains(&self, key: &str) -> bool {
        self.state.lock().await.dirty.contains(key)
    }

}
