//! Durable local state: entities, conflicts and the meta record.
//!
//! Each table lives in its own journal. In-memory indexes are rebuilt from
//! the journals at load time; the journals remain the source of truth.

mod conflicts;
mod entities;
mod meta;

pub use conflicts::ConflictStore;
pub use entities::{EntityStore, StatusCounts};
pub use meta::MetaStore;

use crate::error::{SyncError, SyncResult};
use crate::journal::Journal;
use clinisync_codec::{from_cbor, to_canonical_cbor, Value};
use clinisync_protocol::EntityKey;
use clinisync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

const LOCK_FILE: &str = "LOCK";
const ENTITIES_FILE: &str = "entities.log";
const CONFLICTS_FILE: &str = "conflicts.log";
const META_FILE: &str = "meta.log";

/// Superseded records tolerated before a journal is compacted.
const COMPACTION_MIN_DEAD: u64 = 64;

/// Size and liveness of one journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalStats {
    /// Journal name.
    pub name: &'static str,
    /// Records in the journal, including superseded ones.
    pub records: u64,
    /// Records still describing live state.
    pub live: u64,
    /// Journal size in bytes.
    pub bytes: u64,
}

impl JournalStats {
    fn of(journal: &Journal, live: usize) -> SyncResult<Self> {
        Ok(Self {
            name: journal.name(),
            records: journal.record_count(),
            live: live as u64,
            bytes: journal.size()?,
        })
    }

    /// Records that compaction would drop.
    pub fn dead(&self) -> u64 {
        self.records.saturating_sub(self.live)
    }
}

/// Returns true when dead records outnumber live ones by enough to rewrite.
fn needs_compaction(records: u64, live: usize) -> bool {
    let dead = records.saturating_sub(live as u64);
    dead > live as u64 && dead >= COMPACTION_MIN_DEAD
}

fn encode_key(key: &EntityKey) -> SyncResult<Vec<u8>> {
    Ok(to_canonical_cbor(&Value::Array(vec![
        Value::text(key.entity_type.as_str()),
        Value::text(key.id.as_str()),
    ]))?)
}

fn decode_key(journal: &str, bytes: &[u8]) -> SyncResult<EntityKey> {
    match from_cbor(bytes)? {
        Value::Array(items) => match items.as_slice() {
            [Value::Text(entity_type), Value::Text(id)] => Ok(EntityKey::new(entity_type, id)),
            _ => Err(SyncError::corrupted(journal, 0, "malformed delete key")),
        },
        _ => Err(SyncError::corrupted(journal, 0, "malformed delete key")),
    }
}

/// Exclusive advisory lock on a store directory, released on drop.
#[derive(Debug)]
struct DirLock {
    _file: File,
}

impl DirLock {
    fn acquire(dir: &Path) -> SyncResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(clinisync_storage::StorageError::from)?;
        if file.try_lock_exclusive().is_err() {
            return Err(SyncError::StoreLocked(dir.to_path_buf()));
        }
        Ok(Self { _file: file })
    }
}

/// The backends holding the three persisted tables.
///
/// Nothing is read until [`SyncStorage::load`].
pub struct SyncStorage {
    entities: Box<dyn StorageBackend>,
    conflicts: Box<dyn StorageBackend>,
    meta: Box<dyn StorageBackend>,
    dir: Option<PathBuf>,
    lock: Option<DirLock>,
}

impl std::fmt::Debug for SyncStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStorage")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SyncStorage {
    /// Creates volatile storage, for tests.
    pub fn in_memory() -> Self {
        Self::from_backends(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Creates storage over caller-provided backends.
    pub fn from_backends(
        entities: Box<dyn StorageBackend>,
        conflicts: Box<dyn StorageBackend>,
        meta: Box<dyn StorageBackend>,
    ) -> Self {
        Self {
            entities,
            conflicts,
            meta,
            dir: None,
            lock: None,
        }
    }

    /// Opens (creating if needed) a store directory and locks it.
    ///
    /// ```text
    /// <dir>/
    /// ├─ LOCK
    /// ├─ entities.log
    /// ├─ conflicts.log
    /// └─ meta.log
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StoreLocked`] if another process holds the
    /// directory, or a storage error if it cannot be created.
    pub fn open_dir(dir: &Path) -> SyncResult<Self> {
        fs::create_dir_all(dir).map_err(clinisync_storage::StorageError::from)?;
        let lock = DirLock::acquire(dir)?;

        let entities = FileBackend::open(&dir.join(ENTITIES_FILE))?;
        let conflicts = FileBackend::open(&dir.join(CONFLICTS_FILE))?;
        let meta = FileBackend::open(&dir.join(META_FILE))?;
        info!(path = %dir.display(), "opened store directory");

        Ok(Self {
            entities: Box::new(entities),
            conflicts: Box::new(conflicts),
            meta: Box::new(meta),
            dir: Some(dir.to_path_buf()),
            lock: Some(lock),
        })
    }

    /// Returns true if `dir` holds a store.
    pub fn exists(dir: &Path) -> bool {
        dir.join(ENTITIES_FILE).is_file()
    }

    /// Directory backing this storage, if file-based.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Replays every journal and builds the in-memory stores.
    ///
    /// # Errors
    ///
    /// Propagates storage failures and journal corruption.
    pub fn load(self) -> SyncResult<Stores> {
        Ok(Stores {
            entities: EntityStore::load(self.entities)?,
            conflicts: ConflictStore::load(self.conflicts)?,
            meta: MetaStore::load(self.meta)?,
            lock: self.lock,
        })
    }
}

/// The loaded stores. Holds the directory lock, if any, until dropped.
#[derive(Debug)]
pub struct Stores {
    /// Entity table.
    pub entities: EntityStore,
    /// Conflict table.
    pub conflicts: ConflictStore,
    /// Meta record.
    pub meta: MetaStore,
    lock: Option<DirLock>,
}

impl Stores {
    /// Splits into the tables and an opaque lock guard.
    pub fn into_parts(self) -> (EntityStore, ConflictStore, MetaStore, StoreGuard) {
        (
            self.entities,
            self.conflicts,
            self.meta,
            StoreGuard { _lock: self.lock },
        )
    }

    /// Compacts every journal.
    pub fn compact(&mut self) -> SyncResult<()> {
        self.entities.compact()?;
        self.conflicts.compact()?;
        self.meta.compact()
    }

    /// Returns statistics for every journal.
    pub fn journal_stats(&self) -> SyncResult<[JournalStats; 3]> {
        Ok([
            self.entities.journal_stats()?,
            self.conflicts.journal_stats()?,
            self.meta.journal_stats()?,
        ])
    }
}

/// Keeps a store directory locked while alive.
#[derive(Debug)]
pub struct StoreGuard {
    _lock: Option<DirLock>,
}
