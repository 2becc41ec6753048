//! Append-only record journal.
//!
//! Each persisted table is a journal of CRC-protected records:
//!
//! ```text
//! | magic "CSJR" (4) | version (2) | kind (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it. Replay stops at a record whose
//! header or body runs past the end of the store (a write torn by a crash)
//! and truncates it away; any other malformed record is corruption.

use crate::error::{SyncError, SyncResult};
use clinisync_storage::StorageBackend;
use tracing::{debug, warn};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"CSJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// Kind of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Insert or overwrite a record.
    Put = 1,
    /// Remove a record by key.
    Delete = 2,
}

impl RecordKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One replayed or appended journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Record kind.
    pub kind: RecordKind,
    /// Canonical CBOR body.
    pub payload: Vec<u8>,
}

impl JournalRecord {
    /// Creates a put record.
    pub fn put(payload: Vec<u8>) -> Self {
        Self {
            kind: RecordKind::Put,
            payload,
        }
    }

    /// Creates a delete record.
    pub fn delete(payload: Vec<u8>) -> Self {
        Self {
            kind: RecordKind::Delete,
            payload,
        }
    }

    fn encode(&self) -> SyncResult<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).map_err(|_| {
            SyncError::InvalidArgument(format!(
                "record of {} bytes exceeds journal limit",
                self.payload.len()
            ))
        })?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len() + CRC_SIZE);
        buf.extend_from_slice(&JOURNAL_MAGIC);
        buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

/// A journal bound to one storage backend.
pub struct Journal {
    name: &'static str,
    backend: Box<dyn StorageBackend>,
    records: u64,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("name", &self.name)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Opens a journal and replays every intact record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Corrupted`] for a bad magic, version, kind or CRC.
    pub fn open(
        name: &'static str,
        mut backend: Box<dyn StorageBackend>,
    ) -> SyncResult<(Self, Vec<JournalRecord>)> {
        let data = backend.read_all()?;
        let (records, valid_len) = parse(name, &data)?;

        if valid_len < data.len() {
            warn!(
                journal = name,
                valid_len,
                total = data.len(),
                "truncating torn journal tail"
            );
            backend.truncate(valid_len as u64)?;
            backend.sync()?;
        }
        debug!(journal = name, records = records.len(), "journal replayed");

        let journal = Self {
            name,
            backend,
            records: records.len() as u64,
        };
        Ok((journal, records))
    }

    /// Appends a record and makes it durable.
    pub fn append(&mut self, record: &JournalRecord) -> SyncResult<()> {
        let bytes = record.encode()?;
        self.backend.append(&bytes)?;
        self.backend.sync()?;
        self.records += 1;
        Ok(())
    }

    /// Atomically replaces the journal with `records`.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> SyncResult<()> {
        let mut buf = Vec::new();
        for record in records {
            buf.extend_from_slice(&record.encode()?);
        }
        self.backend.replace(&buf)?;
        self.records = records.len() as u64;
        debug!(journal = self.name, records = self.records, "journal compacted");
        Ok(())
    }

    /// Forces pending writes to durable storage.
    pub fn sync(&mut self) -> SyncResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Number of records currently in the journal, live or superseded.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> SyncResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Journal name used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Returns the parsed records and the length of the intact prefix.
fn parse(name: &str, data: &[u8]) -> SyncResult<(Vec<JournalRecord>, usize)> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let rest = &data[pos..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        let offset = pos as u64;

        if rest[0..4] != JOURNAL_MAGIC {
            return Err(SyncError::corrupted(name, offset, "bad magic"));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != JOURNAL_VERSION {
            return Err(SyncError::corrupted(
                name,
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let kind = RecordKind::from_byte(rest[6]).ok_or_else(|| {
            SyncError::corrupted(name, offset, format!("unknown record kind {}", rest[6]))
        })?;
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            break;
        }
        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        if compute_crc32(&rest[..body_end]) != stored {
            return Err(SyncError::corrupted(name, offset, "crc mismatch"));
        }

        records.push(JournalRecord {
            kind,
            payload: rest[HEADER_SIZE..body_end].to_vec(),
        });
        pos += total;
    }

    Ok((records, pos))
}

/// Computes the IEEE CRC-32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let crc = data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    });
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinisync_storage::{InMemoryBackend, StorageBackend};

    fn open(backend: &InMemoryBackend) -> (Journal, Vec<JournalRecord>) {
        Journal::open("test", Box::new(backend.clone())).unwrap()
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn replays_appended_records() {
        let backend = InMemoryBackend::new();
        let (mut journal, replayed) = open(&backend);
        assert!(replayed.is_empty());

        journal.append(&JournalRecord::put(b"one".to_vec())).unwrap();
        journal.append(&JournalRecord::delete(b"two".to_vec())).unwrap();
        assert_eq!(journal.record_count(), 2);

        let (_, replayed) = open(&backend);
        assert_eq!(
            replayed,
            vec![
                JournalRecord::put(b"one".to_vec()),
                JournalRecord::delete(b"two".to_vec())
            ]
        );
    }

    #[test]
    fn torn_tail_is_dropped() {
        let backend = InMemoryBackend::new();
        let (mut journal, _) = open(&backend);
        journal.append(&JournalRecord::put(b"intact".to_vec())).unwrap();
        let intact_len = backend.size().unwrap();
        journal.append(&JournalRecord::put(b"torn".to_vec())).unwrap();

        let mut bytes = backend.snapshot();
        bytes.truncate(bytes.len() - 3);
        let damaged = InMemoryBackend::with_data(bytes);

        let (_, replayed) = open(&damaged);
        assert_eq!(replayed, vec![JournalRecord::put(b"intact".to_vec())]);
        assert_eq!(damaged.size().unwrap(), intact_len);
    }

    #[test]
    fn flipped_bit_is_corruption() {
        let backend = InMemoryBackend::new();
        let (mut journal, _) = open(&backend);
        journal.append(&JournalRecord::put(b"payload".to_vec())).unwrap();

        let mut bytes = backend.snapshot();
        bytes[HEADER_SIZE + 2] ^= 0x01;
        let err = Journal::open("test", Box::new(InMemoryBackend::with_data(bytes))).unwrap_err();
        assert!(matches!(err, SyncError::Corrupted { offset: 0, .. }));
    }

    #[test]
    fn garbage_is_corruption() {
        let err = Journal::open(
            "test",
            Box::new(InMemoryBackend::with_data(b"definitely not a journal".to_vec())),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Corrupted { .. }));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let backend = InMemoryBackend::new();
        let (mut journal, _) = open(&backend);
        for i in 0..5u8 {
            journal.append(&JournalRecord::put(vec![i])).unwrap();
        }
        journal.rewrite(&[JournalRecord::put(vec![4])]).unwrap();
        assert_eq!(journal.record_count(), 1);

        let (_, replayed) = open(&backend);
        assert_eq!(replayed, vec![JournalRecord::put(vec![4])]);
    }

    proptest::proptest! {
        #[test]
        fn any_cut_replays_a_prefix(
            payloads in proptest::collection::vec(
                proptest::collection::vec(proptest::prelude::any::<u8>(), 0..40),
                1..8,
            ),
            cut_seed in proptest::prelude::any::<usize>(),
        ) {
            let backend = InMemoryBackend::new();
            let (mut journal, _) = open(&backend);
            let written: Vec<JournalRecord> =
                payloads.into_iter().map(JournalRecord::put).collect();
            for record in &written {
                journal.append(record).unwrap();
            }

            let mut bytes = backend.snapshot();
            let cut = cut_seed % (bytes.len() + 1);
            bytes.truncate(cut);

            let (_, replayed) =
                Journal::open("test", Box::new(InMemoryBackend::with_data(bytes))).unwrap();
            proptest::prop_assert!(replayed.len() <= written.len());
            proptest::prop_assert_eq!(&replayed[..], &written[..replayed.len()]);
        }
    }
}
