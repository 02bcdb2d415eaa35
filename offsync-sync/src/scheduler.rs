//! Sync scheduler: decides when to run a pass.
//!
//! The scheduler is a single task that is either idle, waiting on its
//! triggers, or running a pass (followed by a pull when configured). Triggers
//! that arrive while a pass runs queue up in the command channel and are
//! coalesced into exactly one follow-up pass.
//!
//! Triggers:
//! - connectivity transition into Online
//! - a periodic timer, honored only while Online
//! - manual requests and due retries
//! - local writes, debounced so a burst yields one pass

use crate::connectivity::Connectivity;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use offsync_types::OwnerId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the command channel. Triggers beyond it are redundant.
const COMMAND_CAPACITY: usize = 64;

/// Why a pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    /// A local mutation was enqueued; debounced.
    LocalWrite,
    /// A backed-off operation became eligible.
    RetryDue,
    /// Connectivity came back.
    Reconnect,
    Periodic,
}

enum Command {
    Trigger(Trigger),
    Shutdown,
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    triggers: mpsc::Sender<Trigger>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a pass. Never blocks; a full queue already implies a pass.
    pub fn trigger(&self, trigger: Trigger) -> SyncResult<()> {
        match self.tx.try_send(Command::Trigger(trigger)) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::ChannelClosed),
        }
    }

    pub fn request_sync(&self) -> SyncResult<()> {
        self.trigger(Trigger::Manual)
    }

    pub fn notify_local_write(&self) -> SyncResult<()> {
        self.trigger(Trigger::LocalWrite)
    }

    /// Sender for components that raise triggers asynchronously (retry
    /// timers).
    pub fn trigger_sender(&self) -> mpsc::Sender<Trigger> {
        self.triggers.clone()
    }

    /// Stops the loop after any running pass finishes.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Sync scheduler task ended abnormally: {}", e);
        }
    }
}

/// Spawns the scheduler loop.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Starts scheduling passes on `engine`, pulling for `owner_id` after each
    /// push when the engine's config asks for it.
    pub fn spawn(engine: Arc<SyncEngine>, owner_id: OwnerId) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (triggers, trigger_rx) = mpsc::channel(COMMAND_CAPACITY);
        engine.retries().attach(triggers.clone());

        let connectivity = engine.connectivity().subscribe();
        let worker = Worker {
            engine,
            owner_id,
            rx,
            trigger_rx,
            connectivity,
            was_online: false,
        };
        let task = tokio::spawn(worker.run());

        SchedulerHandle { tx, triggers, task }
    }
}

struct Worker {
    engine: Arc<SyncEngine>,
    owner_id: OwnerId,
    rx: mpsc::Receiver<Command>,
    trigger_rx: mpsc::Receiver<Trigger>,
    connectivity: watch::Receiver<Connectivity>,
    was_online: bool,
}

impl Worker {
    async fn run(mut self) {
        let config = self.engine.config().clone();
        let debounce = config.debounce();
        let period = config.periodic_interval();

        let mut periodic = tokio::time::interval_at(Instant::now() + period, period);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.was_online = *self.connectivity.borrow_and_update() == Connectivity::Online;
        let mut debounce_deadline: Option<Instant> = None;
        info!("Sync scheduler started");

        loop {
            let mut due = false;
            let sleep_until = debounce_deadline.unwrap_or_else(|| Instant::now() + period);

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Trigger(Trigger::LocalWrite)) => {
                        debounce_deadline = Some(Instant::now() + debounce);
                    }
                    Some(Command::Trigger(trigger)) => {
                        debug!("Sync triggered: {:?}", trigger);
                        due = true;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(trigger) = self.trigger_rx.recv() => {
                    debug!("Sync triggered: {:?}", trigger);
                    due = true;
                }
                _ = tokio::time::sleep_until(sleep_until), if debounce_deadline.is_some() => {
                    debug!("Sync triggered: {:?}", Trigger::LocalWrite);
                    debounce_deadline = None;
                    due = true;
                }
                _ = periodic.tick() => {
                    if self.engine.connectivity().is_online() {
                        debug!("Sync triggered: {:?}", Trigger::Periodic);
                        due = true;
                    }
                }
                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if self.observe_connectivity() {
                        debug!("Sync triggered: {:?}", Trigger::Reconnect);
                        due = true;
                    }
                }
            }

            while due {
                let rerun = self.cycle(config.pull_after_push).await;
                let (queued, shutdown) = self.drain_queued(&mut debounce_deadline);
                if shutdown {
                    info!("Sync scheduler stopped");
                    return;
                }
                due = rerun || queued;
            }
        }
        info!("Sync scheduler stopped");
    }

    /// Runs one pass (and pull). Returns true if the pass left work for an
    /// immediate follow-up.
    async fn cycle(&self, pull_after_push: bool) -> bool {
        let rerun = match self.engine.run_sync_pass().await {
            Ok(report) => report.wants_rerun(),
            Err(SyncError::Offline) => return false,
            Err(SyncError::AlreadyInProgress) => {
                debug!("Sync pass already running elsewhere");
                return false;
            }
            Err(e) => {
                warn!("Scheduled sync pass failed: {}", e);
                false
            }
        };

        if pull_after_push {
            if let Err(e) = self.engine.pull(self.owner_id).await {
                warn!("Scheduled pull failed: {}", e);
            }
        }
        rerun
    }

    /// Reads the latest connectivity. Returns true on a transition into
    /// Online.
    fn observe_connectivity(&mut self) -> bool {
        let online = *self.connectivity.borrow_and_update() == Connectivity::Online;
        let reconnected = online && !self.was_online;
        self.was_online = online;
        reconnected
    }

    /// Consumes triggers that arrived during a pass. Returns whether any did
    /// and whether shutdown was requested.
    fn drain_queued(&mut self, debounce_deadline: &mut Option<Instant>) -> (bool, bool) {
        let mut queued = false;
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Trigger(_) => queued = true,
                Command::Shutdown => return (queued, true),
            }
        }
        while self.trigger_rx.try_recv().is_ok() {
            queued = true;
        }
        if self.connectivity.has_changed().unwrap_or(false) && self.observe_connectivity() {
            queued = true;
        }
        if queued {
            // The follow-up pass covers pending local writes too.
            *debounce_deadline = None;
        }
        (queued, false)
    }
}
