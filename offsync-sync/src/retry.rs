//! Retry backoff and delayed re-trigger timers.

use crate::scheduler::Trigger;
use offsync_types::OperationId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Returns the retry delay at `index` in a millisecond table, clamping to the
/// last entry.
pub fn backoff_delay(table_ms: &[u64], index: u32) -> Duration {
    let Some(last) = table_ms.len().checked_sub(1) else {
        return Duration::ZERO;
    };
    let index = (index as usize).min(last);
    Duration::from_millis(table_ms[index])
}

struct PendingRetry {
    deadline: Instant,
    timer: AbortHandle,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<OperationId, PendingRetry>,
    notify: Option<mpsc::Sender<Trigger>>,
}

/// Tracks when each backing-off operation becomes eligible again.
///
/// Every scheduled retry owns a timer task that wakes the scheduler with
/// [`Trigger::RetryDue`] when the delay elapses. Deadlines are in memory only:
/// after a restart every Pending operation is immediately eligible.
#[derive(Clone, Default)]
pub struct RetryScheduler {
    inner: Arc<Mutex<Inner>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Routes due retries to a scheduler.
    pub fn attach(&self, notify: mpsc::Sender<Trigger>) {
        self.lock().notify = Some(notify);
    }

    /// Schedules a retry of `id` after `delay`, replacing any earlier timer.
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, id: OperationId, delay: Duration) {
        let mut inner = self.lock();
        let notify = inner.notify.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(notify) = notify {
                let _ = notify.send(Trigger::RetryDue).await;
            }
        })
        .abort_handle();

        debug!(operation = %id, delay_ms = delay.as_millis() as u64, "Scheduled retry");
        let previous = inner.pending.insert(
            id,
            PendingRetry {
                deadline: Instant::now() + delay,
                timer,
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
    }

    /// Cancels the retry of `id`. Returns true if one was scheduled.
    pub fn cancel(&self, id: &OperationId) -> bool {
        match self.lock().pending.remove(id) {
            Some(retry) => {
                retry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Returns true if `id` has no retry delay left to wait out.
    pub fn is_ready(&self, id: &OperationId) -> bool {
        self.lock()
            .pending
            .get(id)
            .is_none_or(|retry| retry.deadline <= Instant::now())
    }

    /// Time until `id` becomes eligible, if it is still waiting.
    pub fn remaining(&self, id: &OperationId) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .pending
            .get(id)
            .map(|retry| retry.deadline.saturating_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    /// Number of tracked retries.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every timer.
    pub fn cancel_all(&self) {
        let mut inner = self.lock();
        for (_, retry) in inner.pending.drain() {
            retry.timer.abort();
        }
    }
}
