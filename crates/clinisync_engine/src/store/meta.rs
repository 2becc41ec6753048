//! The meta record.

use super::JournalStats;
use crate::error::SyncResult;
use crate::journal::{Journal, JournalRecord, RecordKind};
use clinisync_protocol::{SyncMeta, Timestamp};
use clinisync_storage::StorageBackend;

/// Superseded meta records kept before rewriting.
const MAX_META_RECORDS: u64 = 32;

/// Holds [`SyncMeta`]; the last put in the journal wins.
#[derive(Debug)]
pub struct MetaStore {
    journal: Journal,
    meta: SyncMeta,
}

impl MetaStore {
    /// Replays the journal.
    pub fn load(backend: Box<dyn StorageBackend>) -> SyncResult<Self> {
        let (journal, records) = Journal::open("meta", backend)?;
        let mut meta = SyncMeta::default();
        for record in records {
            if record.kind == RecordKind::Put {
                meta = SyncMeta::decode(&record.payload)?;
            }
        }
        Ok(Self { journal, meta })
    }

    /// Returns the current meta record.
    pub fn get(&self) -> SyncMeta {
        self.meta
    }

    /// Completion time of the last finished cycle.
    pub fn last_sync(&self) -> Option<Timestamp> {
        self.meta.last_sync
    }

    /// Persists the completion time of a cycle.
    pub fn set_last_sync(&mut self, at: Timestamp) -> SyncResult<()> {
        let meta = SyncMeta {
            last_sync: Some(at),
        };
        self.journal.append(&JournalRecord::put(meta.encode()?))?;
        self.meta = meta;
        if self.journal.record_count() > MAX_META_RECORDS {
            self.compact()?;
        }
        Ok(())
    }

    /// Rewrites the journal with the current record only.
    pub fn compact(&mut self) -> SyncResult<()> {
        let record = JournalRecord::put(self.meta.encode()?);
        self.journal.rewrite(std::slice::from_ref(&record))
    }

    /// Journal statistics.
    pub fn journal_stats(&self) -> SyncResult<JournalStats> {
        JournalStats::of(&self.journal, usize::from(self.journal.record_count() > 0))
    }

    /// Forces journal writes to durable storage.
    pub fn sync(&mut self) -> SyncResult<()> {
        self.journal.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinisync_storage::InMemoryBackend;

    #[test]
    fn last_sync_persists_and_compacts() {
        let backend = InMemoryBackend::new();
        let mut store = MetaStore::load(Box::new(backend.clone())).unwrap();
        assert_eq!(store.last_sync(), None);

        for t in 1..=40 {
            store.set_last_sync(Timestamp::from_millis(t)).unwrap();
        }
        assert!(store.journal_stats().unwrap().records <= MAX_META_RECORDS);
        drop(store);

        let reloaded = MetaStore::load(Box::new(backend)).unwrap();
        assert_eq!(reloaded.last_sync(), Some(Timestamp::from_millis(40)));
    }
}
