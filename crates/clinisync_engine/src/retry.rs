//! Per-entity exponential backoff.

use crate::config::RetryConfig;
use clinisync_protocol::EntityKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What the scheduler decided for a failed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// A retry fires after the delay.
    Scheduled(Duration),
    /// The retry budget is spent; the entity is terminal.
    Exhausted,
}

/// Sent to the control loop when a retry timer elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFire {
    /// Entity whose backoff elapsed.
    pub key: EntityKey,
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<EntityKey, Timer>>>;

/// Owns at most one backoff timer per entity.
///
/// Scheduling a key that already has a timer aborts the old one.
pub struct RetryScheduler {
    config: RetryConfig,
    timers: Timers,
    generation: AtomicU64,
    fire_tx: mpsc::UnboundedSender<RetryFire>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("config", &self.config)
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl RetryScheduler {
    /// Creates a scheduler that reports elapsed timers on `fire_tx`.
    pub fn new(config: RetryConfig, fire_tx: mpsc::UnboundedSender<RetryFire>) -> Self {
        Self {
            config,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fire_tx,
        }
    }

    /// Schedules the retry following failure number `retry_count`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: &EntityKey, retry_count: u32) -> RetryDecision {
        if retry_count >= self.config.max_retries {
            self.cancel(key);
            warn!(
                entity_type = %key.entity_type,
                entity_id = %key.id,
                retry = retry_count,
                "retry budget exhausted"
            );
            return RetryDecision::Exhausted;
        }

        let delay = self.config.delay_for_attempt(retry_count);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let fire_tx = self.fire_tx.clone();
        let fire_key = key.clone();

        let mut guard = self.timers.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = timers.lock();
                match timers.get(&fire_key) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&fire_key);
                    }
                    _ => return,
                }
            }
            // Receiver gone means the engine shut down.
            let _ = fire_tx.send(RetryFire { key: fire_key });
        });
        if let Some(previous) = guard.insert(key.clone(), Timer { generation, handle }) {
            previous.handle.abort();
        }
        drop(guard);

        debug!(
            entity_type = %key.entity_type,
            entity_id = %key.id,
            retry = retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "retry scheduled"
        );
        RetryDecision::Scheduled(delay)
    }

    /// Cancels the timer for `key`, if any.
    pub fn cancel(&self, key: &EntityKey) -> bool {
        match self.timers.lock().remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every timer.
    pub fn cancel_all(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.handle.abort();
        }
    }

    /// Number of timers not yet fired.
    pub fn outstanding(&self) -> usize {
        self.timers.lock().len()
    }

    /// Returns true if `key` has a timer.
    pub fn is_scheduled(&self, key: &EntityKey) -> bool {
        self.timers.lock().contains_key(key)
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
