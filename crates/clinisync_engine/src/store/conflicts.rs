//! The durable conflict table.

use super::{decode_key, encode_key, needs_compaction, JournalStats};
use crate::error::SyncResult;
use crate::journal::{Journal, JournalRecord, RecordKind};
use clinisync_protocol::{EntityKey, SyncConflict};
use clinisync_storage::StorageBackend;
use std::collections::HashMap;

/// Open conflicts, at most one per entity key.
#[derive(Debug)]
pub struct ConflictStore {
    journal: Journal,
    conflicts: HashMap<EntityKey, SyncConflict>,
}

impl ConflictStore {
    /// Replays the journal into a new store.
    pub fn load(backend: Box<dyn StorageBackend>) -> SyncResult<Self> {
        let (journal, records) = Journal::open("conflicts", backend)?;

        let mut conflicts = HashMap::new();
        for record in records {
            match record.kind {
                RecordKind::Put => {
                    let conflict = SyncConflict::decode(&record.payload)?;
                    conflicts.insert(conflict.key.clone(), conflict);
                }
                RecordKind::Delete => {
                    conflicts.remove(&decode_key(journal.name(), &record.payload)?);
                }
            }
        }

        let mut store = Self { journal, conflicts };
        if needs_compaction(store.journal.record_count(), store.conflicts.len()) {
            store.compact()?;
        }
        Ok(store)
    }

    /// Records a conflict, replacing any open one for the same key.
    pub fn record(&mut self, conflict: SyncConflict) -> SyncResult<()> {
        self.journal
            .append(&JournalRecord::put(conflict.encode()?))?;
        self.conflicts.insert(conflict.key.clone(), conflict);
        Ok(())
    }

    /// Removes and returns the conflict for `key`.
    pub fn remove(&mut self, key: &EntityKey) -> SyncResult<Option<SyncConflict>> {
        if !self.conflicts.contains_key(key) {
            return Ok(None);
        }
        self.journal
            .append(&JournalRecord::delete(encode_key(key)?))?;
        let removed = self.conflicts.remove(key);
        if needs_compaction(self.journal.record_count(), self.conflicts.len()) {
            self.compact()?;
        }
        Ok(removed)
    }

    /// Returns the conflict for `key`.
    pub fn get(&self, key: &EntityKey) -> Option<&SyncConflict> {
        self.conflicts.get(key)
    }

    /// Returns true if `key` has an open conflict.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.conflicts.contains_key(key)
    }

    /// Returns every conflict, oldest first.
    pub fn list_all(&self) -> Vec<SyncConflict> {
        let mut all: Vec<_> = self.conflicts.values().cloned().collect();
        all.sort_by(|a, b| {
            a.detected_at
                .cmp(&b.detected_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        all
    }

    /// Number of open conflicts.
    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// Returns true if there are no open conflicts.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Rewrites the journal with one record per open conflict.
    pub fn compact(&mut self) -> SyncResult<()> {
        let records = self
            .list_all()
            .iter()
            .map(|c| c.encode().map(JournalRecord::put))
            .collect::<Result<Vec<_>, _>>()?;
        self.journal.rewrite(&records)
    }

    /// Journal statistics.
    pub fn journal_stats(&self) -> SyncResult<JournalStats> {
        JournalStats::of(&self.journal, self.conflicts.len())
    }

    /// Forces journal writes to durable storage.
    pub fn sync(&mut self) -> SyncResult<()> {
        self.journal.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinisync_protocol::{checksum, ConflictType, Timestamp};
    use clinisync_storage::InMemoryBackend;

    fn conflict(id: &str, at: u64, remote: &str) -> SyncConflict {
        let local = br#"{"note":"v1"}"#.to_vec();
        SyncConflict {
            key: EntityKey::new("note", id),
            local_checksum: checksum(&local),
            local_payload: local,
            remote_checksum: Some(checksum(remote.as_bytes())),
            remote_payload: Some(remote.as_bytes().to_vec()),
            conflict_type: ConflictType::Update,
            detected_at: Timestamp::from_millis(at),
        }
    }

    #[test]
    fn one_conflict_per_key() {
        let mut store = ConflictStore::load(Box::new(InMemoryBackend::new())).unwrap();
        store.record(conflict("x", 1, r#"{"note":"v2"}"#)).unwrap();
        store.record(conflict("x", 2, r#"{"note":"v3"}"#)).unwrap();

        assert_eq!(store.len(), 1);
        let open = store.get(&EntityKey::new("note", "x")).unwrap();
        assert_eq!(open.remote_payload.as_deref(), Some(&br#"{"note":"v3"}"#[..]));
    }

    #[test]
    fn list_is_oldest_first() {
        let mut store = ConflictStore::load(Box::new(InMemoryBackend::new())).unwrap();
        store.record(conflict("late", 20, "{}")).unwrap();
        store.record(conflict("early", 10, "{}")).unwrap();

        let ids: Vec<_> = store.list_all().into_iter().map(|c| c.key.id).collect();
        assert_eq!(ids, ["early", "late"]);
    }

    #[test]
    fn removal_persists() {
        let backend = InMemoryBackend::new();
        let mut store = ConflictStore::load(Box::new(backend.clone())).unwrap();
        store.record(conflict("a", 1, "{}")).unwrap();
        store.record(conflict("b", 2, "{}")).unwrap();

        let key = EntityKey::new("note", "a");
        assert!(store.remove(&key).unwrap().is_some());
        assert!(store.remove(&key).unwrap().is_none());
        drop(store);

        let reloaded = ConflictStore::load(Box::new(backend)).unwrap();
        assert!(!reloaded.contains(&key));
        assert!(reloaded.contains(&EntityKey::new("note", "b")));
    }
}
