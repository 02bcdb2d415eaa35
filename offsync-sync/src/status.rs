//! Sync status observers.
//!
//! The engine publishes a [`SyncState`] snapshot at the start of a pass,
//! after every batch, and at the end. Listeners register a callback and get
//! back a [`Subscription`]; dropping it (or calling
//! [`unsubscribe`](Subscription::unsubscribe)) stops delivery.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

/// Phase of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    PartialFailure,
    Error,
}

/// Snapshot delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    /// Operations processed so far in the current pass.
    pub completed: usize,
    /// Operations selected for the current pass.
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncState {
    pub fn idle() -> Self {
        Self {
            status: SyncStatus::Idle,
            completed: 0,
            total: 0,
            error: None,
        }
    }

    pub fn syncing(completed: usize, total: usize) -> Self {
        Self {
            status: SyncStatus::Syncing,
            completed,
            total,
            error: None,
        }
    }

    pub fn finished(status: SyncStatus, total: usize, error: Option<String>) -> Self {
        Self {
            status,
            completed: total,
            total,
            error,
        }
    }
}

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

struct Inner {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    latest: watch::Sender<SyncState>,
}

impl Inner {
    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fan-out of [`SyncState`] snapshots.
///
/// Delivery happens on the emitting task, outside of any internal lock, so a
/// listener may subscribe or unsubscribe from inside its callback.
#[derive(Clone)]
pub struct StatusBroadcaster {
    inner: Arc<Inner>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(SyncState::idle());
        Self {
            inner: Arc::new(Inner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                latest,
            }),
        }
    }

    /// Registers a listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().insert(id, Arc::new(listener));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Publishes a snapshot to every listener.
    pub fn emit(&self, state: SyncState) {
        self.inner.latest.send_replace(state.clone());
        let listeners: Vec<Listener> = self.inner.listeners().values().cloned().collect();
        for listener in listeners {
            listener(&state);
        }
    }

    /// The most recent snapshot.
    pub fn latest(&self) -> SyncState {
        self.inner.latest.borrow().clone()
    }

    /// Async view of the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.inner.latest.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

/// Registration handle returned by [`StatusBroadcaster::subscribe`].
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Stops delivery to this listener.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners().remove(&self.id);
        }
    }
}
