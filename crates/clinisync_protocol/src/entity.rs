//! Sync-tracked entities.

use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{self, entry, Fields};
use crate::integrity::checksum;
use crate::priority::Priority;
use crate::time::Timestamp;
use clinisync_codec::{to_canonical_cbor, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of an entity: its type discriminator plus an id unique within that type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Type discriminator, e.g. `"case"` or `"note"`.
    pub entity_type: String,
    /// Id, unique within `entity_type`.
    pub id: String,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// Synchronization state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting to be transmitted.
    Pending,
    /// Part of the batch currently in flight.
    Syncing,
    /// Acknowledged by the remote authority.
    Synced,
    /// Blocked by a conflict or out of retries.
    Error,
}

impl SyncStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::Pending,
        SyncStatus::Syncing,
        SyncStatus::Synced,
        SyncStatus::Error,
    ];

    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    fn to_code(self) -> u64 {
        match self {
            SyncStatus::Pending => 0,
            SyncStatus::Syncing => 1,
            SyncStatus::Synced => 2,
            SyncStatus::Error => 3,
        }
    }

    fn from_code(code: u64) -> ProtocolResult<Self> {
        match code {
            0 => Ok(SyncStatus::Pending),
            1 => Ok(SyncStatus::Syncing),
            2 => Ok(SyncStatus::Synced),
            3 => Ok(SyncStatus::Error),
            other => Err(ProtocolError::unknown_variant("sync status", other)),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::unknown_variant("sync status", s))
    }
}

/// A unit of synchronizable state.
///
/// `payload` is opaque to the engine; `checksum` is always the integrity
/// checksum of `payload`. The only way to change the payload is
/// [`SyncEntity::set_payload`], which recomputes both together.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEntity {
    key: EntityKey,
    payload: Vec<u8>,
    checksum: String,
    /// Time of the last local mutation.
    pub last_modified: Timestamp,
    /// Transmission priority, lower is sooner.
    pub priority: Priority,
    /// Current synchronization state.
    pub status: SyncStatus,
    /// Failed transmission attempts since the last fresh enqueue.
    pub retry_count: u32,
    /// Description of the last failure.
    pub error_message: Option<String>,
    /// Checksum last acknowledged by the remote authority.
    pub base_checksum: Option<String>,
}

impl SyncEntity {
    /// Creates a pending entity.
    pub fn new(key: EntityKey, payload: Vec<u8>, priority: Priority, now: Timestamp) -> Self {
        let checksum = checksum(&payload);
        Self {
            key,
            payload,
            checksum,
            last_modified: now,
            priority,
            status: SyncStatus::Pending,
            retry_count: 0,
            error_message: None,
            base_checksum: None,
        }
    }

    /// Returns the identity key.
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Returns the type discriminator.
    pub fn entity_type(&self) -> &str {
        &self.key.entity_type
    }

    /// Returns the id.
    pub fn id(&self) -> &str {
        &self.key.id
    }

    /// Returns the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload checksum.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Replaces the payload, recomputing its checksum and stamping `now`.
    pub fn set_payload(&mut self, payload: Vec<u8>, now: Timestamp) {
        self.checksum = checksum(&payload);
        self.payload = payload;
        self.last_modified = now;
    }

    /// Resets the entity to a fresh pending attempt.
    pub fn reset_pending(&mut self) {
        self.status = SyncStatus::Pending;
        self.retry_count = 0;
        self.error_message = None;
    }

    /// Returns true if the stored checksum matches the payload.
    pub fn verify(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }

    /// Encodes to a canonical CBOR record.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut pairs = vec![
            entry("type", self.key.entity_type.as_str()),
            entry("id", self.key.id.as_str()),
            entry("payload", self.payload.clone()),
            entry("checksum", self.checksum.as_str()),
            ("modified".into(), fields::unsigned(self.last_modified.as_millis())),
            entry("priority", self.priority),
            ("status".into(), fields::unsigned(self.status.to_code())),
            entry("retries", self.retry_count),
        ];
        if let Some(message) = &self.error_message {
            pairs.push(entry("error", message.as_str()));
        }
        if let Some(base) = &self.base_checksum {
            pairs.push(entry("base", base.as_str()));
        }
        Ok(to_canonical_cbor(&Value::map(pairs))?)
    }

    /// Decodes a record produced by [`SyncEntity::encode`].
    ///
    /// The stored checksum is kept as-is so corruption stays detectable via
    /// [`SyncEntity::verify`].
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        const RECORD: &str = "entity";
        let fields = Fields::decode(RECORD, bytes)?;

        let key = EntityKey::new(fields.text("type")?, fields.text("id")?);
        let priority = Priority::try_from(fields.unsigned("priority")?)
            .map_err(|_| ProtocolError::invalid_field(RECORD, "priority", "out of range"))?;
        let retry_count = u32::try_from(fields.unsigned("retries")?)
            .map_err(|_| ProtocolError::invalid_field(RECORD, "retries", "out of range"))?;

        Ok(Self {
            key,
            payload: fields.bytes("payload")?,
            checksum: fields.text("checksum")?,
            last_modified: Timestamp::from_millis(fields.unsigned("modified")?),
            priority,
            status: SyncStatus::from_code(fields.unsigned("status")?)?,
            retry_count,
            error_message: fields.opt_text("error")?,
            base_checksum: fields.opt_text("base")?,
        })
    }
}
