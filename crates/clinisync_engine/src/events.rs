//! In-process lifecycle events.
//!
//! Handlers registered with [`EventBus::on`] run synchronously on the
//! emitting task, in registration order. A handler that panics is logged and
//! skipped; the remaining handlers still run. Async observers can instead
//! consume the [`EventBus::stream`] broadcast channel.

use clinisync_protocol::{ConflictType, EntityKey, Priority, ResolutionStrategy, SyncStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the broadcast stream; slow receivers see `Lagged`.
const STREAM_CAPACITY: usize = 256;

/// Event discriminant used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`SyncEvent::Initialized`].
    Initialized,
    /// See [`SyncEvent::EntityAdded`].
    EntityAdded,
    /// See [`SyncEvent::EntityRemoved`].
    EntityRemoved,
    /// See [`SyncEvent::EntityStatusChanged`].
    EntityStatusChanged,
    /// See [`SyncEvent::SyncStarted`].
    SyncStarted,
    /// See [`SyncEvent::SyncProgress`].
    SyncProgress,
    /// See [`SyncEvent::SyncCompleted`].
    SyncCompleted,
    /// See [`SyncEvent::SyncError`].
    SyncError,
    /// See [`SyncEvent::ConflictDetected`].
    ConflictDetected,
    /// See [`SyncEvent::ConflictResolved`].
    ConflictResolved,
    /// See [`SyncEvent::NetworkStatusChanged`].
    NetworkStatusChanged,
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The engine finished initialization.
    Initialized,
    /// An entity was enqueued or overwritten.
    EntityAdded {
        /// Entity key.
        key: EntityKey,
        /// Assigned priority.
        priority: Priority,
    },
    /// An entity was removed.
    EntityRemoved {
        /// Entity key.
        key: EntityKey,
    },
    /// An entity changed status.
    EntityStatusChanged {
        /// Entity key.
        key: EntityKey,
        /// New status.
        status: SyncStatus,
        /// Failure description for `error`.
        error_message: Option<String>,
    },
    /// A cycle began.
    SyncStarted,
    /// A batch finished.
    SyncProgress {
        /// Percentage of the cycle's entities processed.
        progress: f64,
        /// Entities processed so far.
        processed: usize,
        /// Entities selected for the cycle.
        total: usize,
        /// Entities synced so far.
        synced: usize,
        /// Entities failed so far.
        errors: usize,
    },
    /// A cycle finished.
    SyncCompleted {
        /// Entities synced.
        synced: usize,
        /// Entities that failed or conflicted.
        errors: usize,
    },
    /// A cycle aborted.
    SyncError {
        /// Failure description.
        message: String,
    },
    /// The remote reported a conflict.
    ConflictDetected {
        /// Entity key.
        key: EntityKey,
        /// Kind of divergence.
        conflict_type: ConflictType,
    },
    /// A conflict was resolved.
    ConflictResolved {
        /// Entity key.
        key: EntityKey,
        /// Strategy applied.
        strategy: ResolutionStrategy,
    },
    /// Connectivity changed.
    NetworkStatusChanged {
        /// New connectivity.
        online: bool,
    },
}

impl SyncEvent {
    /// Returns the event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::Initialized => EventKind::Initialized,
            SyncEvent::EntityAdded { .. } => EventKind::EntityAdded,
            SyncEvent::EntityRemoved { .. } => EventKind::EntityRemoved,
            SyncEvent::EntityStatusChanged { .. } => EventKind::EntityStatusChanged,
            SyncEvent::SyncStarted => EventKind::SyncStarted,
            SyncEvent::SyncProgress { .. } => EventKind::SyncProgress,
            SyncEvent::SyncCompleted { .. } => EventKind::SyncCompleted,
            SyncEvent::SyncError { .. } => EventKind::SyncError,
            SyncEvent::ConflictDetected { .. } => EventKind::ConflictDetected,
            SyncEvent::ConflictResolved { .. } => EventKind::ConflictResolved,
            SyncEvent::NetworkStatusChanged { .. } => EventKind::NetworkStatusChanged,
        }
    }
}

/// A registered event handler.
pub type EventHandler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

type Registry = RwLock<HashMap<EventKind, Vec<(u64, EventHandler)>>>;

/// Publish/subscribe hub for [`SyncEvent`]s.
pub struct EventBus {
    handlers: Arc<Registry>,
    next_id: AtomicU64,
    stream: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    /// Registers `handler` for events of `kind`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or passed to [`EventBus::off`].
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.handlers),
        }
    }

    /// Unregisters a handler.
    pub fn off(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Returns a receiver of every event emitted from now on.
    pub fn stream(&self) -> broadcast::Receiver<SyncEvent> {
        self.stream.subscribe()
    }

    /// Delivers `event` to its handlers, then to stream receivers.
    pub fn emit(&self, event: SyncEvent) {
        let kind = event.kind();
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(event = ?kind, "event handler panicked");
            }
        }
        // No receivers is fine.
        let _ = self.stream.send(event);
    }

    /// Number of registered handlers across all kinds.
    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}

/// Registration handle returned by [`EventBus::on`]; unsubscribes on drop.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Keeps the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }

    /// Kind this subscription listens to.
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Some(list) = registry.write().get_mut(&self.kind) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(bus: &EventBus, kind: EventKind) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sub = bus.on(kind, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn handlers_receive_only_their_kind() {
        let bus = EventBus::new();
        let (started, _s1) = counter(&bus, EventKind::SyncStarted);
        let (completed, _s2) = counter(&bus, EventKind::SyncCompleted);

        bus.emit(SyncEvent::SyncStarted);
        bus.emit(SyncEvent::SyncStarted);
        bus.emit(SyncEvent::SyncCompleted {
            synced: 1,
            errors: 0,
        });

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let (count, sub) = counter(&bus, EventKind::Initialized);
        bus.emit(SyncEvent::Initialized);
        bus.off(sub);
        bus.emit(SyncEvent::Initialized);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn detached_subscription_stays() {
        let bus = EventBus::new();
        let (count, sub) = counter(&bus, EventKind::Initialized);
        sub.detach();
        bus.emit(SyncEvent::Initialized);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let bus = EventBus::new();
        let _bad = bus.on(EventKind::SyncError, |_| panic!("observer bug"));
        let (count, _good) = counter(&bus, EventKind::SyncError);

        bus.emit(SyncEvent::SyncError {
            message: "boom".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        let _sub = bus.on(EventKind::SyncStarted, move |_| {
            inner.on(EventKind::SyncStarted, |_| {}).detach();
        });
        bus.emit(SyncEvent::SyncStarted);
        assert_eq!(bus.handler_count(), 2);
    }

    #[tokio::test]
    async fn stream_sees_every_event() {
        let bus = EventBus::new();
        let mut rx = bus.stream();
        bus.emit(SyncEvent::NetworkStatusChanged { online: false });
        bus.emit(SyncEvent::SyncStarted);

        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::NetworkStatusChanged { online: false }
        );
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::SyncStarted);
    }
}
