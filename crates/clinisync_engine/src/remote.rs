//! An in-process remote authority.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use clinisync_protocol::{checksum, ConflictType, EntityKey, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

/// What the remote holds for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    /// Current payload; `None` once deleted remotely.
    pub payload: Option<Vec<u8>>,
    /// Checksum of `payload`.
    pub checksum: Option<String>,
    /// Incremented on every accepted write.
    pub version: u64,
}

/// Failure injected by [`MemoryRemote::fail_next`] and [`MemoryRemote::fail_always`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Retryable transport error.
    Transport,
    /// Retryable server error.
    Server,
    /// Non-retryable transport error.
    Fatal,
}

impl ScriptedFailure {
    fn to_error(self, key: &EntityKey) -> SyncError {
        match self {
            ScriptedFailure::Transport => {
                SyncError::transport_retryable(format!("connection reset pushing {key}"))
            }
            ScriptedFailure::Server => SyncError::ServerError(format!("failed to store {key}")),
            ScriptedFailure::Fatal => SyncError::transport_fatal(format!("{key} rejected")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Script {
    failure: ScriptedFailure,
    remaining: Option<u32>,
}

/// A remote authority living in memory.
///
/// Writes are versioned per entity. A push conflicts when the client's
/// `base_checksum` differs from what the remote holds, unless the pushed
/// content already equals the remote's.
#[derive(Debug)]
pub struct MemoryRemote {
    records: Mutex<HashMap<EntityKey, RemoteRecord>>,
    scripts: Mutex<HashMap<EntityKey, Script>>,
    pushes: Mutex<Vec<EntityKey>>,
    latency: Mutex<Duration>,
    online: AtomicBool,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty, reachable remote.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            pushes: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            online: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes the remote reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delays every push by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Writes `payload` on the remote side, as another client would.
    pub fn seed(&self, key: EntityKey, payload: &[u8]) {
        let mut records = self.records.lock();
        let version = records.get(&key).map_or(0, |r| r.version) + 1;
        records.insert(
            key,
            RemoteRecord {
                payload: Some(payload.to_vec()),
                checksum: Some(checksum(payload)),
                version,
            },
        );
    }

    /// Deletes an entity on the remote side, leaving a tombstone.
    pub fn delete(&self, key: &EntityKey) {
        if let Some(record) = self.records.lock().get_mut(key) {
            record.payload = None;
            record.checksum = None;
            record.version += 1;
        }
    }

    /// Returns what the remote holds for `key`.
    pub fn record(&self, key: &EntityKey) -> Option<RemoteRecord> {
        self.records.lock().get(key).cloned()
    }

    /// Number of live entities held.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.payload.is_some())
            .count()
    }

    /// Returns true if the remote holds no live entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails the next `times` pushes of `key`.
    pub fn fail_next(&self, key: EntityKey, times: u32, failure: ScriptedFailure) {
        self.scripts.lock().insert(
            key,
            Script {
                failure,
                remaining: Some(times),
            },
        );
    }

    /// Fails every push of `key` until [`MemoryRemote::clear_failures`].
    pub fn fail_always(&self, key: EntityKey, failure: ScriptedFailure) {
        self.scripts.lock().insert(
            key,
            Script {
                failure,
                remaining: None,
            },
        );
    }

    /// Removes every scripted failure.
    pub fn clear_failures(&self) {
        self.scripts.lock().clear();
    }

    /// Keys of every push received, in arrival order.
    pub fn pushed_keys(&self) -> Vec<EntityKey> {
        self.pushes.lock().clone()
    }

    /// Number of pushes received.
    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    /// Largest number of pushes observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, key: &EntityKey) -> Option<SyncError> {
        let mut scripts = self.scripts.lock();
        let script = *scripts.get(key)?;
        match script.remaining {
            None => Some(script.failure.to_error(key)),
            Some(0) => {
                scripts.remove(key);
                None
            }
            Some(1) => {
                scripts.remove(key);
                Some(script.failure.to_error(key))
            }
            Some(n) => {
                scripts.insert(
                    key.clone(),
                    Script {
                        remaining: Some(n - 1),
                        ..script
                    },
                );
                Some(script.failure.to_error(key))
            }
        }
    }

    fn apply(&self, request: &PushRequest) -> PushResponse {
        let mut records = self.records.lock();
        if let Some(current) = records.get(&request.key) {
            let same_content = current.checksum.as_deref() == Some(request.checksum.as_str());
            if !same_content && current.checksum != request.base_checksum {
                let conflict_type = match (&request.base_checksum, &current.payload) {
                    (_, None) => ConflictType::Delete,
                    (None, Some(_)) => ConflictType::Create,
                    (Some(_), Some(_)) => ConflictType::Update,
                };
                return PushResponse::Conflict {
                    remote_payload: current.payload.clone(),
                    remote_checksum: current.checksum.clone(),
                    conflict_type,
                };
            }
        }

        let version = records.get(&request.key).map_or(0, |r| r.version) + 1;
        records.insert(
            request.key.clone(),
            RemoteRecord {
                payload: Some(request.payload.clone()),
                checksum: Some(request.checksum.clone()),
                version,
            },
        );
        PushResponse::Accepted
    }
}

/// Counts a push as in flight until dropped, including on cancellation.
struct InFlight<'a> {
    remote: &'a MemoryRemote,
}

impl<'a> InFlight<'a> {
    fn enter(remote: &'a MemoryRemote) -> Self {
        let now = remote.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        remote.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { remote }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.remote.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncTransport for MemoryRemote {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::transport_fatal("transport closed"));
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("remote unreachable"));
        }

        let _in_flight = InFlight::enter(self);
        self.pushes.lock().push(request.key.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = self.scripted_failure(&request.key) {
            return Err(err);
        }

        let response = self.apply(request);
        trace!(key = %request.key, conflict = response.is_conflict(), "push handled");
        Ok(response)
    }

    async fn close(&self) -> SyncResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
