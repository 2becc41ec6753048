//! The durable entity table.

use super::{decode_key, encode_key, needs_compaction, JournalStats};
use crate::error::SyncResult;
use crate::filter::SyncFilter;
use crate::journal::{Journal, JournalRecord, RecordKind};
use clinisync_protocol::{digest, EntityKey, Priority, SyncEntity, SyncStatus, Timestamp};
use clinisync_storage::StorageBackend;
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Position of a pending entity in transmission order.
type PendingSlot = (Priority, Timestamp, EntityKey);

/// Number of entities in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Waiting for transmission.
    pub pending: usize,
    /// In the batch currently in flight.
    pub syncing: usize,
    /// Acknowledged by the remote.
    pub synced: usize,
    /// Conflicted or out of retries.
    pub error: usize,
}

impl StatusCounts {
    /// Total entities counted.
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.synced + self.error
    }

    fn bump(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::Syncing => self.syncing += 1,
            SyncStatus::Synced => self.synced += 1,
            SyncStatus::Error => self.error += 1,
        }
    }
}

/// Sync-tracked entities keyed by `(type, id)`.
///
/// Every mutation is journaled before the in-memory state changes, so a
/// failed write leaves the table untouched. Pending entities are also kept
/// in an index ordered by `(priority, last_modified, key)`.
#[derive(Debug)]
pub struct EntityStore {
    journal: Journal,
    entities: HashMap<EntityKey, SyncEntity>,
    pending: BTreeSet<PendingSlot>,
}

impl EntityStore {
    /// Replays the journal into a new store.
    ///
    /// Entities left `syncing` by an interrupted cycle are reset to `pending`.
    pub fn load(backend: Box<dyn StorageBackend>) -> SyncResult<Self> {
        let (journal, records) = Journal::open("entities", backend)?;

        let mut entities = HashMap::new();
        for record in records {
            match record.kind {
                RecordKind::Put => {
                    let entity = SyncEntity::decode(&record.payload)?;
                    entities.insert(entity.key().clone(), entity);
                }
                RecordKind::Delete => {
                    entities.remove(&decode_key(journal.name(), &record.payload)?);
                }
            }
        }

        let mut store = Self {
            journal,
            entities,
            pending: BTreeSet::new(),
        };

        let interrupted: Vec<SyncEntity> = store
            .entities
            .values()
            .filter(|e| e.status == SyncStatus::Syncing)
            .cloned()
            .collect();
        if !interrupted.is_empty() {
            info!(count = interrupted.len(), "resetting entities left mid-sync");
        }
        for mut entity in interrupted {
            entity.status = SyncStatus::Pending;
            store.journal.append(&JournalRecord::put(entity.encode()?))?;
            store.entities.insert(entity.key().clone(), entity);
        }

        store.pending = store
            .entities
            .values()
            .filter(|e| e.status == SyncStatus::Pending)
            .map(slot)
            .collect();
        store.maybe_compact()?;
        Ok(store)
    }

    /// Inserts or overwrites an entity, returning the previous version.
    pub fn upsert(&mut self, entity: SyncEntity) -> SyncResult<Option<SyncEntity>> {
        self.journal.append(&JournalRecord::put(entity.encode()?))?;

        let previous = self.entities.insert(entity.key().clone(), entity.clone());
        if let Some(old) = &previous {
            self.pending.remove(&slot(old));
        }
        if entity.status == SyncStatus::Pending {
            self.pending.insert(slot(&entity));
        }
        self.maybe_compact()?;
        Ok(previous)
    }

    /// Removes an entity. Removing a missing key is a no-op.
    pub fn delete(&mut self, key: &EntityKey) -> SyncResult<Option<SyncEntity>> {
        if !self.entities.contains_key(key) {
            return Ok(None);
        }
        self.journal
            .append(&JournalRecord::delete(encode_key(key)?))?;

        let removed = self.entities.remove(key);
        if let Some(old) = &removed {
            self.pending.remove(&slot(old));
        }
        self.maybe_compact()?;
        Ok(removed)
    }

    /// Applies `f` to a copy of the entity and persists the result.
    ///
    /// Returns `None` without writing if the entity does not exist.
    pub fn update<F>(&mut self, key: &EntityKey, f: F) -> SyncResult<Option<SyncEntity>>
    where
        F: FnOnce(&mut SyncEntity),
    {
        let Some(mut entity) = self.entities.get(key).cloned() else {
            return Ok(None);
        };
        f(&mut entity);
        self.upsert(entity.clone())?;
        Ok(Some(entity))
    }

    /// Returns an entity.
    pub fn get(&self, key: &EntityKey) -> Option<&SyncEntity> {
        self.entities.get(key)
    }

    /// Returns every entity of a type, unordered.
    pub fn list_by_type(&self, entity_type: &str) -> Vec<SyncEntity> {
        self.entities
            .values()
            .filter(|e| e.entity_type() == entity_type)
            .cloned()
            .collect()
    }

    /// Returns pending entities ordered by priority, then last modification.
    pub fn list_pending(&self, filter: &SyncFilter) -> Vec<SyncEntity> {
        self.pending
            .iter()
            .take_while(|(priority, _, _)| filter.max_priority.map_or(true, |max| *priority <= max))
            .filter(|(_, _, key)| filter.matches_type(&key.entity_type))
            .filter_map(|(_, _, key)| self.entities.get(key))
            .cloned()
            .collect()
    }

    /// Iterates every entity, unordered.
    pub fn iter(&self) -> impl Iterator<Item = &SyncEntity> {
        self.entities.values()
    }

    /// Counts entities per status.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entity in self.entities.values() {
            counts.bump(entity.status);
        }
        counts
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Digest over every `(key, checksum)` pair, for comparing replicas.
    pub fn digest(&self) -> String {
        digest(self.entities.values().map(|e| (e.key(), e.checksum())))
    }

    /// Rewrites the journal with one record per live entity.
    pub fn compact(&mut self) -> SyncResult<()> {
        let mut live: Vec<&SyncEntity> = self.entities.values().collect();
        live.sort_by(|a, b| a.key().cmp(b.key()));
        let records = live
            .into_iter()
            .map(|e| e.encode().map(JournalRecord::put))
            .collect::<Result<Vec<_>, _>>()?;
        self.journal.rewrite(&records)
    }

    /// Journal statistics.
    pub fn journal_stats(&self) -> SyncResult<JournalStats> {
        JournalStats::of(&self.journal, self.entities.len())
    }

    /// Forces journal writes to durable storage.
    pub fn sync(&mut self) -> SyncResult<()> {
        self.journal.sync()
    }

    fn maybe_compact(&mut self) -> SyncResult<()> {
        if needs_compaction(self.journal.record_count(), self.entities.len()) {
            self.compact()?;
        }
        Ok(())
    }
}

fn slot(entity: &SyncEntity) -> PendingSlot {
    (entity.priority, entity.last_modified, entity.key().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinisync_storage::InMemoryBackend;

    fn entity(ty: &str, id: &str, priority: Priority, modified: u64) -> SyncEntity {
        SyncEntity::new(
            EntityKey::new(ty, id),
            format!(r#"{{"id":"{id}"}}"#).into_bytes(),
            priority,
            Timestamp::from_millis(modified),
        )
    }

    fn fresh() -> (EntityStore, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let store = EntityStore::load(Box::new(backend.clone())).unwrap();
        (store, backend)
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let (mut store, _) = fresh();
        store.upsert(entity("note", "a", 2, 1)).unwrap();
        let mut second = entity("note", "a", 1, 2);
        second.set_payload(br#"{"v":2}"#.to_vec(), Timestamp::from_millis(2));
        let previous = store.upsert(second.clone()).unwrap();

        assert!(previous.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(second.key()), Some(&second));
        assert_eq!(store.list_pending(&SyncFilter::all()).len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let (mut store, backend) = fresh();
        let key = EntityKey::new("note", "a");
        store.upsert(entity("note", "a", 2, 1)).unwrap();

        assert!(store.delete(&key).unwrap().is_some());
        let size = backend.size().unwrap();
        assert!(store.delete(&key).unwrap().is_none());
        assert_eq!(backend.size().unwrap(), size);
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn pending_order_is_priority_then_age() {
        let (mut store, _) = fresh();
        store.upsert(entity("note", "p3", 3, 1)).unwrap();
        store.upsert(entity("note", "p1-late", 1, 9)).unwrap();
        store.upsert(entity("case", "p1-early", 1, 5)).unwrap();
        store.upsert(entity("note", "p2", 2, 1)).unwrap();

        let ids: Vec<_> = store
            .list_pending(&SyncFilter::all())
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids, ["p1-early", "p1-late", "p2", "p3"]);
    }

    #[test]
    fn pending_filter_by_type_and_ceiling() {
        let (mut store, _) = fresh();
        store.upsert(entity("note", "n1", 1, 1)).unwrap();
        store.upsert(entity("case", "c1", 1, 1)).unwrap();
        store.upsert(entity("note", "n3", 3, 1)).unwrap();

        let notes = store.list_pending(&SyncFilter::for_type("note"));
        assert_eq!(notes.len(), 2);

        let urgent_notes =
            store.list_pending(&SyncFilter::for_type("note").with_max_priority(2));
        assert_eq!(urgent_notes.len(), 1);
        assert_eq!(urgent_notes[0].id(), "n1");
    }

    #[test]
    fn non_pending_entities_leave_the_queue() {
        let (mut store, _) = fresh();
        let e = entity("note", "a", 2, 1);
        store.upsert(e.clone()).unwrap();
        store
            .update(e.key(), |e| e.status = SyncStatus::Synced)
            .unwrap();

        assert!(store.list_pending(&SyncFilter::all()).is_empty());
        assert_eq!(store.status_counts().synced, 1);
        assert!(store
            .update(&EntityKey::new("note", "missing"), |_| {})
            .unwrap()
            .is_none());
    }

    #[test]
    fn state_survives_reload() {
        let (mut store, backend) = fresh();
        store.upsert(entity("note", "keep", 2, 1)).unwrap();
        store.upsert(entity("note", "drop", 2, 1)).unwrap();
        store.delete(&EntityKey::new("note", "drop")).unwrap();
        let digest = store.digest();
        drop(store);

        let reloaded = EntityStore::load(Box::new(backend)).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&EntityKey::new("note", "keep")).is_some());
        assert_eq!(reloaded.digest(), digest);
    }

    #[test]
    fn syncing_is_reset_on_load() {
        let (mut store, backend) = fresh();
        let mut e = entity("note", "a", 2, 1);
        e.status = SyncStatus::Syncing;
        store.upsert(e.clone()).unwrap();
        drop(store);

        let reloaded = EntityStore::load(Box::new(backend)).unwrap();
        assert_eq!(reloaded.get(e.key()).unwrap().status, SyncStatus::Pending);
        assert_eq!(reloaded.list_pending(&SyncFilter::all()).len(), 1);
    }

    #[test]
    fn rewrites_compact_the_journal() {
        let (mut store, backend) = fresh();
        let e = entity("note", "hot", 2, 1);
        for _ in 0..200 {
            store.upsert(e.clone()).unwrap();
        }
        let stats = store.journal_stats().unwrap();
        assert!(stats.records < 200);
        assert_eq!(stats.live, 1);

        store.compact().unwrap();
        assert_eq!(store.journal_stats().unwrap().records, 1);
        let reloaded = EntityStore::load(Box::new(backend)).unwrap();
        assert_eq!(reloaded.get(e.key()), Some(&e));
    }
}
