//! The public sync engine facade.

use crate::config::TierConfig;
use crate::control::ControlLoop;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, EventKind, Subscription, SyncEvent};
use crate::filter::SyncFilter;
use crate::processor::SyncCore;
use crate::retry::RetryScheduler;
use crate::status::{CycleOutcome, SyncStatusReport};
use crate::store::SyncStorage;
use crate::transport::SyncTransport;
use clinisync_protocol::{
    default_priority, EntityKey, Priority, ResolutionStrategy, SyncConflict, SyncEntity,
    SyncStatus, Timestamp, HIGHEST_PRIORITY,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Lifecycle {
    /// Constructed; storage not yet loaded. `None` after a failed load.
    Created(Option<SyncStorage>),
    Running(Running),
    ShutDown,
}

struct Running {
    core: Arc<SyncCore>,
    requests: mpsc::UnboundedSender<SyncFilter>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Offline-first synchronization engine.
///
/// Construct one per store with [`SyncEngine::new`], then call
/// [`SyncEngine::initialize`] from within a Tokio runtime. Entities added
/// while offline are persisted as `pending` and pushed to the remote
/// authority in priority order once connectivity allows.
///
/// # Example
///
/// ```no_run
/// use clinisync_engine::{MemoryRemote, SyncEngine, SyncFilter, SyncStorage, TierConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> clinisync_engine::SyncResult<()> {
/// let engine = SyncEngine::new(SyncStorage::in_memory(), Arc::new(MemoryRemote::new()));
/// engine.initialize(TierConfig::default())?;
///
/// engine.add_entity("case", "c-17", br#"{"title":"Knee pain"}"#.to_vec(), 1)?;
/// let outcome = engine.trigger_sync(SyncFilter::all()).await?;
/// println!("{outcome:?}");
///
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    transport: Arc<dyn SyncTransport>,
    events: Arc<EventBus>,
    lifecycle: RwLock<Lifecycle>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lifecycle.read() {
            Lifecycle::Created(_) => "created",
            Lifecycle::Running(_) => "running",
            Lifecycle::ShutDown => "shut down",
        };
        f.debug_struct("SyncEngine")
            .field("state", &state)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine over `storage` that pushes through `transport`.
    ///
    /// Nothing is loaded until [`SyncEngine::initialize`].
    pub fn new(storage: SyncStorage, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            transport,
            events: Arc::new(EventBus::new()),
            lifecycle: RwLock::new(Lifecycle::Created(Some(storage))),
        }
    }

    /// Loads the stores and starts the control loop.
    ///
    /// Must be called from within a Tokio runtime. Emits `initialized`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidArgument`] for an invalid configuration or when
    ///   called outside a runtime
    /// - [`SyncError::AlreadyInitialized`] / [`SyncError::ShutDown`] on misuse
    /// - storage and corruption errors from loading the journals
    pub fn initialize(&self, config: TierConfig) -> SyncResult<()> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SyncError::InvalidArgument("initialize must run inside a Tokio runtime".into())
        })?;

        let mut lifecycle = self.lifecycle.write();
        let storage = match &mut *lifecycle {
            Lifecycle::Created(storage) => storage.take().ok_or_else(|| {
                SyncError::InvalidArgument("storage was consumed by a failed initialize".into())
            })?,
            Lifecycle::Running(_) => return Err(SyncError::AlreadyInitialized),
            Lifecycle::ShutDown => return Err(SyncError::ShutDown),
        };

        let (entities, conflicts, meta, guard) = storage.load()?.into_parts();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let retry = RetryScheduler::new(config.retry, retry_tx);
        let core = Arc::new(SyncCore::new(
            config,
            entities,
            conflicts,
            meta,
            guard,
            retry,
            Arc::clone(&self.events),
            Arc::clone(&self.transport),
        ));

        let total = core.entities.lock().len();
        let conflict_count = core.conflicts.lock().len();
        let task = ControlLoop::spawn(
            &runtime,
            Arc::clone(&core),
            shutdown_rx,
            request_rx,
            retry_rx,
        );
        *lifecycle = Lifecycle::Running(Running {
            core,
            requests: request_tx,
            shutdown_tx,
            task,
        });
        drop(lifecycle);

        info!(
            entities = total,
            conflicts = conflict_count,
            "sync engine initialized"
        );
        self.events.emit(SyncEvent::Initialized);
        Ok(())
    }

    fn core(&self) -> SyncResult<Arc<SyncCore>> {
        match &*self.lifecycle.read() {
            Lifecycle::Running(running) => Ok(Arc::clone(&running.core)),
            Lifecycle::Created(_) => Err(SyncError::NotInitialized),
            Lifecycle::ShutDown => Err(SyncError::ShutDown),
        }
    }

    /// Asks the control loop to run a cycle soon.
    fn request_sync(&self, filter: SyncFilter) {
        if let Lifecycle::Running(running) = &*self.lifecycle.read() {
            if running.requests.send(filter).is_err() {
                warn!("control loop stopped, sync request dropped");
            }
        }
    }

    /// Enqueues an entity, overwriting any existing version.
    ///
    /// The entity becomes `pending` with a fresh retry budget. The checksum
    /// the remote last acknowledged is carried over.
    ///
    /// # Errors
    ///
    /// Fails on misuse, empty type or id, or a storage failure.
    pub fn add_entity(
        &self,
        entity_type: &str,
        id: &str,
        payload: Vec<u8>,
        priority: Priority,
    ) -> SyncResult<SyncEntity> {
        if entity_type.is_empty() || id.is_empty() {
            return Err(SyncError::InvalidArgument(
                "entity type and id must be non-empty".into(),
            ));
        }
        let core = self.core()?;
        let key = EntityKey::new(entity_type, id);
        let mut entity = SyncEntity::new(key.clone(), payload, priority, Timestamp::now());

        {
            let mut store = core.entities.lock();
            if let Some(existing) = store.get(&key) {
                entity.base_checksum = existing.base_checksum.clone();
            }
            store.upsert(entity.clone())?;
        }
        core.retry.cancel(&key);

        debug!(entity_type, entity_id = id, priority, "entity enqueued");
        self.events.emit(SyncEvent::EntityAdded { key, priority });
        Ok(entity)
    }

    /// Enqueues an entity at its type's default priority.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::add_entity`].
    pub fn add_entity_default(
        &self,
        entity_type: &str,
        id: &str,
        payload: Vec<u8>,
    ) -> SyncResult<SyncEntity> {
        self.add_entity(entity_type, id, payload, default_priority(entity_type))
    }

    /// Removes an entity; returns whether it existed.
    ///
    /// An open conflict for the entity is kept.
    ///
    /// # Errors
    ///
    /// Fails on misuse or a storage failure.
    pub fn remove_entity(&self, entity_type: &str, id: &str) -> SyncResult<bool> {
        let core = self.core()?;
        let key = EntityKey::new(entity_type, id);
        let removed = core.entities.lock().delete(&key)?;
        core.retry.cancel(&key);

        if removed.is_some() {
            debug!(entity_type, entity_id = id, "entity removed");
            self.events.emit(SyncEvent::EntityRemoved { key });
        }
        Ok(removed.is_some())
    }

    /// Returns an entity.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn get_entity(&self, entity_type: &str, id: &str) -> SyncResult<Option<SyncEntity>> {
        let core = self.core()?;
        let entity = core
            .entities
            .lock()
            .get(&EntityKey::new(entity_type, id))
            .cloned();
        Ok(entity)
    }

    /// Returns every entity of a type, unordered.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn list_entities_by_type(&self, entity_type: &str) -> SyncResult<Vec<SyncEntity>> {
        let core = self.core()?;
        let entities = core.entities.lock().list_by_type(entity_type);
        Ok(entities)
    }

    /// Returns pending entities in transmission order.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn list_pending(&self, filter: &SyncFilter) -> SyncResult<Vec<SyncEntity>> {
        let core = self.core()?;
        let pending = core.entities.lock().list_pending(filter);
        Ok(pending)
    }

    /// Runs a sync cycle now and waits for it.
    ///
    /// Returns [`CycleOutcome::SkippedInProgress`] if another cycle is
    /// running and [`CycleOutcome::SkippedOffline`] while offline.
    /// Transmission failures are entity state, not errors.
    ///
    /// # Errors
    ///
    /// Fails only on misuse.
    pub async fn trigger_sync(&self, filter: SyncFilter) -> SyncResult<CycleOutcome> {
        let core = self.core()?;
        Ok(core.run_cycle(&filter).await)
    }

    /// Returns a snapshot of the engine's state.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn sync_status(&self) -> SyncResult<SyncStatusReport> {
        let core = self.core()?;
        let counts = core.entities.lock().status_counts();
        let conflicts = core.conflicts.lock().list_all();
        let last_sync = core.meta.lock().last_sync();

        Ok(SyncStatusReport {
            is_online: core.connectivity.is_online(),
            last_sync,
            pending_count: counts.pending,
            syncing_count: counts.syncing,
            synced_count: counts.synced,
            error_count: counts.error,
            total_entities: counts.total(),
            conflicts,
            progress: core.progress(),
            sync_in_progress: core.is_syncing(),
        })
    }

    /// Returns open conflicts, oldest first.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn list_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        let core = self.core()?;
        let conflicts = core.conflicts.lock().list_all();
        Ok(conflicts)
    }

    /// Returns the open conflict for an entity.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn get_conflict(&self, entity_type: &str, id: &str) -> SyncResult<Option<SyncConflict>> {
        let core = self.core()?;
        let conflict = core
            .conflicts
            .lock()
            .get(&EntityKey::new(entity_type, id))
            .cloned();
        Ok(conflict)
    }

    /// Resolves a conflict and re-enqueues the result at the highest priority.
    ///
    /// - `Local` keeps the payload the client pushed
    /// - `Remote` adopts the remote payload
    /// - `Merge` uses `merged`, falling back to the local payload
    ///
    /// The conflict record is removed, the entity is stored `pending` with
    /// `retry_count = 0` and a sync of its type is requested. Resolving to
    /// `Remote` when the remote deleted the entity removes it locally and
    /// returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if no conflict exists for the key.
    pub fn resolve_conflict(
        &self,
        entity_type: &str,
        id: &str,
        strategy: ResolutionStrategy,
        merged: Option<Vec<u8>>,
    ) -> SyncResult<Option<SyncEntity>> {
        let core = self.core()?;
        let key = EntityKey::new(entity_type, id);
        let conflict = core
            .conflicts
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(key.clone()))?;

        let payload = match strategy {
            ResolutionStrategy::Local => Some(conflict.local_payload.clone()),
            ResolutionStrategy::Remote => conflict.remote_payload.clone(),
            ResolutionStrategy::Merge => {
                Some(merged.unwrap_or_else(|| conflict.local_payload.clone()))
            }
        };

        core.conflicts.lock().remove(&key)?;
        core.retry.cancel(&key);

        let Some(payload) = payload else {
            let removed = core.entities.lock().delete(&key)?;
            info!(entity_type, entity_id = id, "conflict resolved by adopting remote delete");
            if removed.is_some() {
                self.events.emit(SyncEvent::EntityRemoved { key: key.clone() });
            }
            self.events
                .emit(SyncEvent::ConflictResolved { key, strategy });
            return Ok(None);
        };

        let mut entity = SyncEntity::new(key.clone(), payload, HIGHEST_PRIORITY, Timestamp::now());
        entity.base_checksum = conflict.remote_checksum.clone();
        core.entities.lock().upsert(entity.clone())?;

        info!(entity_type, entity_id = id, %strategy, "conflict resolved");
        self.events.emit(SyncEvent::ConflictResolved {
            key: key.clone(),
            strategy,
        });
        core.emit_status(&key, SyncStatus::Pending, None);
        self.request_sync(SyncFilter::for_type(entity_type));
        Ok(Some(entity))
    }

    /// Resolves a conflict with the configured default strategy.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::resolve_conflict`].
    pub fn resolve_conflict_default(
        &self,
        entity_type: &str,
        id: &str,
    ) -> SyncResult<Option<SyncEntity>> {
        let strategy = self.core()?.config.conflict_resolution_default;
        self.resolve_conflict(entity_type, id, strategy, None)
    }

    /// Gives entities parked in `error` a fresh retry budget.
    ///
    /// Entities blocked by an open conflict are skipped; they need
    /// [`SyncEngine::resolve_conflict`]. Returns how many were reset and
    /// requests a sync for them.
    ///
    /// # Errors
    ///
    /// Fails on misuse or a storage failure.
    pub fn retry_failed(&self, filter: &SyncFilter) -> SyncResult<usize> {
        let core = self.core()?;
        let candidates: Vec<EntityKey> = core
            .entities
            .lock()
            .iter()
            .filter(|e| e.status == SyncStatus::Error && filter.matches(e))
            .map(|e| e.key().clone())
            .collect();

        let mut reset = Vec::new();
        for key in candidates {
            if core.conflicts.lock().contains(&key) {
                continue;
            }
            if core
                .entities
                .lock()
                .update(&key, SyncEntity::reset_pending)?
                .is_some()
            {
                reset.push(key);
            }
        }

        for key in &reset {
            core.emit_status(key, SyncStatus::Pending, None);
        }
        if !reset.is_empty() {
            info!(count = reset.len(), "failed entities re-enqueued");
            self.request_sync(filter.clone());
        }
        Ok(reset.len())
    }

    /// Removes `synced` entities not modified within `max_age`.
    ///
    /// # Errors
    ///
    /// Fails on misuse or a storage failure.
    pub fn prune_synced(&self, max_age: Duration) -> SyncResult<usize> {
        let core = self.core()?;
        let cutoff = Timestamp::now().saturating_sub(max_age);
        let removed = {
            let mut store = core.entities.lock();
            let stale: Vec<EntityKey> = store
                .iter()
                .filter(|e| e.status == SyncStatus::Synced && e.last_modified < cutoff)
                .map(|e| e.key().clone())
                .collect();
            for key in &stale {
                store.delete(key)?;
            }
            stale
        };

        if !removed.is_empty() {
            info!(count = removed.len(), "pruned synced entities");
        }
        let count = removed.len();
        for key in removed {
            self.events.emit(SyncEvent::EntityRemoved { key });
        }
        Ok(count)
    }

    /// Rewrites every journal with live records only.
    ///
    /// # Errors
    ///
    /// Fails on misuse or a storage failure.
    pub fn compact(&self) -> SyncResult<()> {
        let core = self.core()?;
        core.entities.lock().compact()?;
        core.conflicts.lock().compact()?;
        core.meta.lock().compact()?;
        Ok(())
    }

    /// Reports connectivity from the platform probe.
    ///
    /// A transition to online starts a cycle and restarts the periodic
    /// timer; a transition to offline pauses the timer but lets a running
    /// cycle finish.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn set_online(&self, online: bool) -> SyncResult<()> {
        let core = self.core()?;
        if core.connectivity.set_online(online) {
            self.events.emit(SyncEvent::NetworkStatusChanged { online });
        }
        Ok(())
    }

    /// Current connectivity.
    ///
    /// # Errors
    ///
    /// Fails on misuse.
    pub fn is_online(&self) -> SyncResult<bool> {
        Ok(self.core()?.connectivity.is_online())
    }

    /// Registers an event handler. Works before initialization.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, handler)
    }

    /// Unregisters an event handler.
    pub fn off(&self, subscription: Subscription) {
        self.events.off(subscription);
    }

    /// Returns a broadcast receiver of every subsequent event.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.stream()
    }

    /// Stops the engine.
    ///
    /// Waits for the control loop (and any cycle it is running), cancels
    /// every retry timer, flushes the journals and closes the transport.
    /// Every later call fails with [`SyncError::ShutDown`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ShutDown`] if already shut down, or the first
    /// flush or transport error.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let previous = std::mem::replace(&mut *self.lifecycle.write(), Lifecycle::ShutDown);
        let running = match previous {
            Lifecycle::Running(running) => running,
            Lifecycle::Created(_) => return Ok(()),
            Lifecycle::ShutDown => return Err(SyncError::ShutDown),
        };

        // A send error means the loop already exited.
        let _ = running.shutdown_tx.send(());
        if let Err(err) = running.task.await {
            warn!(error = %err, "control loop ended abnormally");
        }

        let core = running.core;
        core.retry.cancel_all();
        core.entities.lock().sync()?;
        core.conflicts.lock().sync()?;
        core.meta.lock().sync()?;
        self.transport.close().await?;

        info!("sync engine shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> SyncEngine {
        SyncEngine::new(SyncStorage::in_memory(), Arc::new(MemoryRemote::new()))
    }

    #[test]
    fn initialize_requires_a_runtime() {
        let engine = engine();
        assert!(matches!(
            engine.initialize(TierConfig::default()),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let engine = engine();
        assert!(matches!(
            engine.add_entity_default("case", "1", b"{}".to_vec()),
            Err(SyncError::NotInitialized)
        ));
        assert!(matches!(
            engine.trigger_sync(SyncFilter::all()).await,
            Err(SyncError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let engine = engine();
        engine.initialize(TierConfig::default()).unwrap();
        assert!(matches!(
            engine.initialize(TierConfig::default()),
            Err(SyncError::AlreadyInitialized)
        ));

        engine.shutdown().await.unwrap();
        assert!(matches!(engine.shutdown().await, Err(SyncError::ShutDown)));
        assert!(matches!(engine.sync_status(), Err(SyncError::ShutDown)));
        assert!(matches!(
            engine.initialize(TierConfig::default()),
            Err(SyncError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_and_engine_stays_usable() {
        let engine = engine();
        let bad = TierConfig::default().with_batch_size(0);
        assert!(matches!(
            engine.initialize(bad),
            Err(SyncError::InvalidArgument(_))
        ));
        engine.initialize(TierConfig::default()).unwrap();
    }

    #[tokio::test]
    async fn handlers_registered_before_initialize_see_it() {
        let engine = engine();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _sub = engine.on(EventKind::Initialized, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine.initialize(TierConfig::default()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_type_or_id_is_rejected() {
        let engine = engine();
        engine.initialize(TierConfig::default()).unwrap();
        assert!(matches!(
            engine.add_entity("", "1", b"{}".to_vec(), 1),
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.add_entity("case", "", b"{}".to_vec(), 1),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn set_online_emits_only_on_change() {
        let engine = engine();
        engine.initialize(TierConfig::default()).unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);
        let _sub = engine.on(EventKind::NetworkStatusChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine.set_online(true).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 0);
        engine.set_online(false).unwrap();
        engine.set_online(false).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(!engine.is_online().unwrap());
    }

    #[tokio::test]
    async fn remove_entity_reports_existence() {
        let engine = engine();
        engine.initialize(TierConfig::default()).unwrap();
        engine.add_entity_default("note", "n1", b"{}".to_vec()).unwrap();

        assert!(engine.remove_entity("note", "n1").unwrap());
        assert!(!engine.remove_entity("note", "n1").unwrap());
        assert!(engine.get_entity("note", "n1").unwrap().is_none());
    }

    #[tokio::test]
    async fn resolving_a_missing_conflict_is_not_found() {
        let engine = engine();
        engine.initialize(TierConfig::default()).unwrap();
        assert!(matches!(
            engine.resolve_conflict("case", "1", ResolutionStrategy::Local, None),
            Err(SyncError::NotFound(_))
        ));
    }
}
