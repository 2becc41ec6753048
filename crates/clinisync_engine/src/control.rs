//! The control loop that decides when cycles run.

use crate::filter::SyncFilter;
use crate::processor::SyncCore;
use crate::retry::RetryFire;
use crate::status::CycleOutcome;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Why a cycle was started, for logs.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Periodic,
    Reconnected,
    Requested,
    Retry,
}

/// Background task selecting over shutdown, connectivity transitions, the
/// periodic ticker, explicit sync requests and retry timers.
///
/// Cycles run inline, so the loop itself never overlaps two cycles; cycles
/// started through the facade are excluded by the single-flight flag.
/// Wakeups queued while a cycle runs are merged into the next one.
pub(crate) struct ControlLoop {
    core: Arc<SyncCore>,
    shutdown_rx: broadcast::Receiver<()>,
    requests: mpsc::UnboundedReceiver<SyncFilter>,
    retries: mpsc::UnboundedReceiver<RetryFire>,
}

impl ControlLoop {
    /// Spawns the loop on `runtime`.
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        core: Arc<SyncCore>,
        shutdown_rx: broadcast::Receiver<()>,
        requests: mpsc::UnboundedReceiver<SyncFilter>,
        retries: mpsc::UnboundedReceiver<RetryFire>,
    ) -> JoinHandle<()> {
        let task = Self {
            core,
            shutdown_rx,
            requests,
            retries,
        };
        runtime.spawn(task.run())
    }

    async fn run(mut self) {
        let period = self.core.config.sync_interval;
        info!(interval_secs = period.as_secs(), "sync control loop started");

        let first_tick = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity = self.core.connectivity.subscribe();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("sync control loop shutting down");
                    break;
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    if online {
                        ticker.reset();
                        let filter = self.drain_wakeups(SyncFilter::all());
                        self.cycle(&filter, Trigger::Reconnected).await;
                    }
                }
                _ = ticker.tick(), if self.core.connectivity.is_online() => {
                    let filter = self.drain_wakeups(SyncFilter::all());
                    self.cycle(&filter, Trigger::Periodic).await;
                }
                Some(filter) = self.requests.recv() => {
                    let filter = self.drain_wakeups(filter);
                    self.cycle(&filter, Trigger::Requested).await;
                }
                Some(fire) = self.retries.recv() => {
                    let filter = self.drain_wakeups(SyncFilter::for_type(fire.key.entity_type));
                    self.cycle(&filter, Trigger::Retry).await;
                }
            }
        }
    }

    /// Folds every queued request and retry fire into `filter`, so a burst
    /// of wakeups costs one cycle.
    fn drain_wakeups(&mut self, mut filter: SyncFilter) -> SyncFilter {
        let mut merged = 0usize;
        while let Ok(request) = self.requests.try_recv() {
            filter.widen(&request);
            merged += 1;
        }
        while let Ok(fire) = self.retries.try_recv() {
            filter.widen(&SyncFilter::for_type(fire.key.entity_type));
            merged += 1;
        }
        if merged > 0 {
            debug!(merged, "coalesced queued sync wakeups");
        }
        filter
    }

        async fn cycle(&self, filter: &SyncFilter, trigger: Trigger) {
        let outcome = self.core.run_cycle(filter).await;
        if !matches!(outcome, CycleOutcome::Completed { .. }) {
            debug!(?trigger, ?outcome, "triggered cycle did not complete");
        }
    }
}
