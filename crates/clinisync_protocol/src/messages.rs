//! Messages exchanged with the remote authority.

use crate::conflict::ConflictType;
use crate::entity::{EntityKey, SyncEntity};
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{self, entry, Fields};
use crate::time::Timestamp;
use clinisync_codec::{to_canonical_cbor, Value};

/// Upload of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    /// Entity identity.
    pub key: EntityKey,
    /// Current local payload.
    pub payload: Vec<u8>,
    /// Checksum of `payload`.
    pub checksum: String,
    /// Time of the last local mutation.
    pub last_modified: Timestamp,
    /// Checksum the client believes the remote holds, `None` for a new entity.
    pub base_checksum: Option<String>,
}

impl PushRequest {
    /// Builds a request from the stored entity.
    pub fn from_entity(entity: &SyncEntity) -> Self {
        Self {
            key: entity.key().clone(),
            payload: entity.payload().to_vec(),
            checksum: entity.checksum().to_string(),
            last_modified: entity.last_modified,
            base_checksum: entity.base_checksum.clone(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut pairs = vec![
            entry("type", self.key.entity_type.as_str()),
            entry("id", self.key.id.as_str()),
            entry("payload", self.payload.clone()),
            entry("checksum", self.checksum.as_str()),
            ("modified".into(), fields::unsigned(self.last_modified.as_millis())),
        ];
        if let Some(base) = &self.base_checksum {
            pairs.push(entry("base", base.as_str()));
        }
        Ok(to_canonical_cbor(&Value::map(pairs))?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let fields = Fields::decode("push request", bytes)?;
        Ok(Self {
            key: EntityKey::new(fields.text("type")?, fields.text("id")?),
            payload: fields.bytes("payload")?,
            checksum: fields.text("checksum")?,
            last_modified: Timestamp::from_millis(fields.unsigned("modified")?),
            base_checksum: fields.opt_text("base")?,
        })
    }
}

/// Outcome of a push the remote processed.
///
/// Transport and server failures are not responses; transports report them
/// as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PushResponse {
    /// Stored; the remote now holds the pushed checksum.
    Accepted,
    /// The remote's state differs from what the client assumed.
    Conflict {
        /// Remote payload, `None` if the remote deleted the entity.
        remote_payload: Option<Vec<u8>>,
        /// Remote checksum.
        remote_checksum: Option<String>,
        /// Kind of divergence.
        conflict_type: ConflictType,
    },
}

impl PushResponse {
    /// Returns true for [`PushResponse::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, PushResponse::Conflict { .. })
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let pairs = match self {
            PushResponse::Accepted => vec![entry("status", "accepted")],
            PushResponse::Conflict {
                remote_payload,
                remote_checksum,
                conflict_type,
            } => {
                let mut pairs = vec![
                    entry("status", "conflict"),
                    ("kind".into(), fields::unsigned(conflict_type.to_code())),
                ];
                if let Some(payload) = remote_payload {
                    pairs.push(entry("payload", payload.clone()));
                }
                if let Some(sum) = remote_checksum {
                    pairs.push(entry("checksum", sum.as_str()));
                }
                pairs
            }
        };
        Ok(to_canonical_cbor(&Value::map(pairs))?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let fields = Fields::decode("push response", bytes)?;
        match fields.text("status")?.as_str() {
            "accepted" => Ok(PushResponse::Accepted),
            "conflict" => Ok(PushResponse::Conflict {
                remote_payload: fields.opt_bytes("payload")?,
                remote_checksum: fields.opt_text("checksum")?,
                conflict_type: ConflictType::from_code(fields.unsigned("kind")?)?,
            }),
            other => Err(ProtocolError::unknown_variant("push status", other)),
        }
    }
}
