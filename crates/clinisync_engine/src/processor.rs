//! One sync cycle: select, batch, transmit, record outcomes.

use crate::config::TierConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::filter::SyncFilter;
use crate::retry::{RetryDecision, RetryScheduler};
use crate::status::CycleOutcome;
use crate::store::{ConflictStore, EntityStore, MetaStore, StoreGuard};
use crate::transport::SyncTransport;
use clinisync_protocol::{
    EntityKey, PushRequest, PushResponse, SyncConflict, SyncEntity, SyncStatus, Timestamp,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Message stored on entities blocked by a conflict.
pub(crate) const CONFLICT_MESSAGE: &str = "Conflict detected";

/// Everything a running engine shares between the facade, the control loop
/// and in-flight cycles.
pub(crate) struct SyncCore {
    pub(crate) config: TierConfig,
    pub(crate) entities: Mutex<EntityStore>,
    pub(crate) conflicts: Mutex<ConflictStore>,
    pub(crate) meta: Mutex<MetaStore>,
    pub(crate) connectivity: ConnectivityMonitor,
    pub(crate) retry: RetryScheduler,
    pub(crate) events: Arc<EventBus>,
    pub(crate) transport: Arc<dyn SyncTransport>,
    in_progress: AtomicBool,
    progress: Mutex<f64>,
    _guard: StoreGuard,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    processed: usize,
    synced: usize,
    errors: usize,
}

/// Holds the single-flight flag; clears it when dropped.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl SyncCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: TierConfig,
        entities: EntityStore,
        conflicts: ConflictStore,
        meta: MetaStore,
        guard: StoreGuard,
        retry: RetryScheduler,
        events: Arc<EventBus>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            connectivity: ConnectivityMonitor::new(config.start_online),
            config,
            entities: Mutex::new(entities),
            conflicts: Mutex::new(conflicts),
            meta: Mutex::new(meta),
            retry,
            events,
            transport,
            in_progress: AtomicBool::new(false),
            progress: Mutex::new(0.0),
            _guard: guard,
        }
    }

    /// Returns true while a cycle holds the single-flight flag.
    pub(crate) fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Percentage processed by the current or last cycle.
    pub(crate) fn progress(&self) -> f64 {
        *self.progress.lock()
    }

    /// Runs one cycle over the pending entities selected by `filter`.
    ///
    /// Never fails: per-entity errors become entity state, and an aborted
    /// cycle is reported as [`CycleOutcome::Aborted`] after `syncError`.
    pub(crate) async fn run_cycle(&self, filter: &SyncFilter) -> CycleOutcome {
        if !self.connectivity.is_online() {
            debug!("offline, skipping sync cycle");
            return CycleOutcome::SkippedOffline;
        }
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            debug!("sync cycle already running");
            return CycleOutcome::SkippedInProgress;
        };

        *self.progress.lock() = 0.0;
        self.events.emit(SyncEvent::SyncStarted);

        match self.process(filter).await {
            Ok(tally) => {
                *self.progress.lock() = 100.0;
                info!(
                    synced = tally.synced,
                    errors = tally.errors,
                    "sync cycle completed"
                );
                self.events.emit(SyncEvent::SyncCompleted {
                    synced: tally.synced,
                    errors: tally.errors,
                });
                CycleOutcome::Completed {
                    synced: tally.synced,
                    errors: tally.errors,
                }
            }
            Err(err) => {
                error!(error = %err, "sync cycle aborted");
                self.release_syncing();
                self.events.emit(SyncEvent::SyncError {
                    message: err.to_string(),
                });
                CycleOutcome::Aborted {
                    error: err.to_string(),
                }
            }
        }
    }

    async fn process(&self, filter: &SyncFilter) -> SyncResult<Tally> {
        let queue = self.entities.lock().list_pending(filter);
        let total = queue.len();
        let mut tally = Tally::default();
        if total == 0 {
            return Ok(tally);
        }
        info!(total, batch_size = self.config.batch_size, "sync cycle started");

        for (batch, chunk) in queue.chunks(self.config.batch_size).enumerate() {
            if batch > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            self.transmit_batch(chunk, &mut tally).await?;
            tally.processed += chunk.len();

            #[allow(clippy::cast_precision_loss)]
            let progress = tally.processed as f64 / total as f64 * 100.0;
            *self.progress.lock() = progress;
            debug!(
                batch,
                processed = tally.processed,
                total,
                synced = tally.synced,
                errors = tally.errors,
                "batch finished"
            );
            self.events.emit(SyncEvent::SyncProgress {
                progress,
                processed: tally.processed,
                total,
                synced: tally.synced,
                errors: tally.errors,
            });
        }

        self.meta.lock().set_last_sync(Timestamp::now())?;
        Ok(tally)
    }

    /// Marks the batch `syncing`, pushes every entity concurrently and
    /// applies each outcome as it arrives.
    async fn transmit_batch(&self, chunk: &[SyncEntity], tally: &mut Tally) -> SyncResult<()> {
        let mut requests = Vec::with_capacity(chunk.len());
        {
            let mut store = self.entities.lock();
            for queued in chunk {
                // Re-read: the entity may have been removed or changed since selection.
                let still_pending = store
                    .get(queued.key())
                    .is_some_and(|e| e.status == SyncStatus::Pending);
                if !still_pending {
                    continue;
                }
                if let Some(entity) =
                    store.update(queued.key(), |e| e.status = SyncStatus::Syncing)?
                {
                    requests.push(PushRequest::from_entity(&entity));
                }
            }
        }
        for request in &requests {
            self.emit_status(&request.key, SyncStatus::Syncing, None);
        }

        let mut inflight = JoinSet::new();
        for request in requests {
            let transport = Arc::clone(&self.transport);
            let timeout = self.config.request_timeout;
            inflight.spawn(async move {
                let result = match tokio::time::timeout(timeout, transport.push(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout),
                };
                (request, result)
            });
        }

        while let Some(joined) = inflight.join_next().await {
            let (request, result) =
                joined.map_err(|e| SyncError::Internal(format!("push task failed: {e}")))?;
            match result {
                Ok(PushResponse::Accepted) => {
                    if self.on_accepted(&request)? {
                        tally.synced += 1;
                    }
                }
                Ok(PushResponse::Conflict {
                    remote_payload,
                    remote_checksum,
                    conflict_type,
                }) => {
                    tally.errors += 1;
                    let conflict = SyncConflict {
                        key: request.key,
                        local_payload: request.payload,
                        local_checksum: request.checksum,
                        remote_payload,
                        remote_checksum,
                        conflict_type,
                        detected_at: Timestamp::now(),
                    };
                    self.on_conflict(conflict)?;
                }
                Err(err) => {
                    tally.errors += 1;
                    self.on_failure(&request, &err)?;
                }
            }
        }
        Ok(())
    }

    /// Returns true if the entity is now `synced`.
    fn on_accepted(&self, request: &PushRequest) -> SyncResult<bool> {
        let key = &request.key;
        self.retry.cancel(key);
        let updated = self.entities.lock().update(key, |e| {
            e.base_checksum = Some(request.checksum.clone());
            // A payload changed mid-flight stays pending for the next cycle.
            if e.checksum() == request.checksum {
                e.status = SyncStatus::Synced;
                e.retry_count = 0;
                e.error_message = None;
            }
        })?;
        let Some(entity) = updated else {
            return Ok(false);
        };
        debug!(entity_type = %key.entity_type, entity_id = %key.id, status = %entity.status,
            "push accepted");
        self.emit_status(key, entity.status, None);
        Ok(entity.status == SyncStatus::Synced)
    }

    fn on_conflict(&self, conflict: SyncConflict) -> SyncResult<()> {
        let key = conflict.key.clone();
        let conflict_type = conflict.conflict_type;
        self.retry.cancel(&key);
        self.conflicts.lock().record(conflict)?;
        let updated = self.entities.lock().update(&key, |e| {
            e.status = SyncStatus::Error;
            e.error_message = Some(CONFLICT_MESSAGE.to_string());
        })?;

        warn!(
            entity_type = %key.entity_type,
            entity_id = %key.id,
            conflict = %conflict_type,
            "conflict detected"
        );
        self.events.emit(SyncEvent::ConflictDetected {
            key: key.clone(),
            conflict_type,
        });
        if updated.is_some() {
            self.emit_status(&key, SyncStatus::Error, Some(CONFLICT_MESSAGE.to_string()));
        }
        Ok(())
    }

    fn on_failure(&self, request: &PushRequest, err: &SyncError) -> SyncResult<()> {
        let key = &request.key;
        let mut store = self.entities.lock();
        let Some(mut entity) = store.get(key).cloned() else {
            return Ok(());
        };
        // Re-added while in flight: already a fresh pending attempt.
        if entity.status != SyncStatus::Syncing {
            return Ok(());
        }

        entity.retry_count += 1;
        entity.error_message = Some(err.to_string());
        entity.status = match self.retry.schedule(key, entity.retry_count) {
            RetryDecision::Scheduled(_) => SyncStatus::Pending,
            RetryDecision::Exhausted => SyncStatus::Error,
        };
        let status = entity.status;
        store.upsert(entity)?;
        drop(store);

        warn!(
            entity_type = %key.entity_type,
            entity_id = %key.id,
            error = %err,
            retryable = err.is_retryable(),
            status = %status,
            "push failed"
        );
        self.emit_status(key, status, Some(err.to_string()));
        Ok(())
    }

    /// Returns entities stranded in `syncing` by an aborted cycle to `pending`.
    fn release_syncing(&self) {
        let mut store = self.entities.lock();
        let stranded: Vec<EntityKey> = store
            .iter()
            .filter(|e| e.status == SyncStatus::Syncing)
            .map(|e| e.key().clone())
            .collect();
        for key in stranded {
            if let Err(err) = store.update(&key, |e| e.status = SyncStatus::Pending) {
                error!(entity_type = %key.entity_type, entity_id = %key.id, error = %err,
                    "failed to release entity after aborted cycle");
            }
        }
    }

    pub(crate) fn emit_status(
        &self,
        key: &EntityKey,
        status: SyncStatus,
        error_message: Option<String>,
    ) {
        self.events.emit(SyncEvent::EntityStatusChanged {
            key: key.clone(),
            status,
            error_message,
        });
    }
}
