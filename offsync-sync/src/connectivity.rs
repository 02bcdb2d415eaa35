//! Connectivity detection.
//!
//! The platform's reachability flag is necessary but not sufficient: the
//! monitor is Online only after an active probe against the endpoint's
//! liveness route succeeds within the probe timeout. A failed or slow probe
//! downgrades to Offline even while the platform reports online.

use crate::transport::SyncTransport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Derived, process-wide connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Offline,
    /// The platform reports online and a probe is running.
    Verifying,
    Online,
}

/// Tracks [`Connectivity`] from platform signals and active probes.
pub struct ConnectivityMonitor {
    transport: Arc<dyn SyncTransport>,
    platform_online: AtomicBool,
    state: watch::Sender<Connectivity>,
    probe_timeout: Duration,
    wake: Notify,
}

impl ConnectivityMonitor {
    /// Creates a monitor from the platform's reachability at startup. The
    /// state starts Offline, or Verifying until the first probe when the
    /// platform reports online.
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        platform_online: bool,
        probe_timeout: Duration,
    ) -> Self {
        let initial = if platform_online {
            Connectivity::Verifying
        } else {
            Connectivity::Offline
        };
        let (state, _) = watch::channel(initial);
        Self {
            transport,
            platform_online: AtomicBool::new(platform_online),
            state,
            probe_timeout,
            wake: Notify::new(),
        }
    }

    pub fn state(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == Connectivity::Online
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Records a platform reachability signal. Going offline takes effect
    /// immediately; coming online moves to Verifying and wakes the probe loop.
    pub fn set_platform_online(&self, online: bool) {
        let was = self.platform_online.swap(online, Ordering::SeqCst);
        if online {
            if !was {
                self.transition(Connectivity::Verifying);
                self.wake.notify_one();
            }
        } else {
            self.transition(Connectivity::Offline);
        }
    }

    /// Probes the endpoint and updates the state.
    pub async fn verify(&self) -> Connectivity {
        if !self.platform_online.load(Ordering::SeqCst) {
            self.transition(Connectivity::Offline);
            return Connectivity::Offline;
        }

        // An Online monitor stays Online while re-probing.
        if self.state() != Connectivity::Online {
            self.transition(Connectivity::Verifying);
        }

        let probe = tokio::time::timeout(self.probe_timeout, self.transport.probe()).await;
        let reachable = match probe {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Connectivity probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "Connectivity probe timed out"
                );
                false
            }
        };

        let next = if reachable && self.platform_online.load(Ordering::SeqCst) {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        self.transition(next);
        next
    }

    /// Probes once now and then every `interval`, or sooner when the platform
    /// comes back online.
    pub fn spawn_probe_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = monitor.wake.notified() => {}
                }
                monitor.verify().await;
            }
        })
    }

    fn transition(&self, next: Connectivity) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("Connectivity {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }
}
