//! Conflicts between local and remote state.

use crate::entity::EntityKey;
use crate::error::{ProtocolError, ProtocolResult};
use crate::fields::{self, entry, Fields};
use crate::time::Timestamp;
use clinisync_codec::{to_canonical_cbor, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of divergence reported by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// Both sides created the entity independently.
    Create,
    /// Both sides modified the entity.
    Update,
    /// One side deleted the entity while the other modified it.
    Delete,
}

impl ConflictType {
    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictType::Create => "create",
            ConflictType::Update => "update",
            ConflictType::Delete => "delete",
        }
    }

    pub(crate) fn to_code(self) -> u64 {
        match self {
            ConflictType::Create => 1,
            ConflictType::Update => 2,
            ConflictType::Delete => 3,
        }
    }

    pub(crate) fn from_code(code: u64) -> ProtocolResult<Self> {
        match code {
            1 => Ok(ConflictType::Create),
            2 => Ok(ConflictType::Update),
            3 => Ok(ConflictType::Delete),
            other => Err(ProtocolError::unknown_variant("conflict type", other)),
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Keep the local payload.
    #[default]
    Local,
    /// Adopt the remote payload.
    Remote,
    /// Use a caller-supplied merged payload, falling back to local.
    Merge,
}

impl ResolutionStrategy {
    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::Local => "local",
            ResolutionStrategy::Remote => "remote",
            ResolutionStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ResolutionStrategy::Local),
            "remote" => Ok(ResolutionStrategy::Remote),
            "merge" => Ok(ResolutionStrategy::Merge),
            _ => Err(ProtocolError::unknown_variant("resolution strategy", s)),
        }
    }
}

/// A detected divergence awaiting explicit resolution.
///
/// At most one conflict exists per entity key.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict {
    /// Entity the conflict is about.
    pub key: EntityKey,
    /// Payload the client tried to push.
    pub local_payload: Vec<u8>,
    /// Checksum of `local_payload`.
    pub local_checksum: String,
    /// Payload held by the remote, `None` if the remote deleted it.
    pub remote_payload: Option<Vec<u8>>,
    /// Checksum held by the remote.
    pub remote_checksum: Option<String>,
    /// Kind of divergence.
    pub conflict_type: ConflictType,
    /// Detection time.
    pub detected_at: Timestamp,
}

impl SyncConflict {
    /// Encodes to a canonical CBOR record.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut pairs = vec![
            entry("type", self.key.entity_type.as_str()),
            entry("id", self.key.id.as_str()),
            entry("local", self.local_payload.clone()),
            entry("local_sum", self.local_checksum.as_str()),
            ("kind".into(), fields::unsigned(self.conflict_type.to_code())),
            ("at".into(), fields::unsigned(self.detected_at.as_millis())),
        ];

        if let Some(payload) = &self.remote_payload {
            pairs.push(entry("remote", payload.clone()));
        }
        if let Some(sum) = &self.remote_checksum {
            pairs.push(entry("remote_sum", sum.as_str()));
        }

        Ok(to_canonical_cbor(&Value::map(pairs))?)
    }

    /// Decodes a record produced by [`SyncConflict::encode`].
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let fields = Fields::decode("conflict", bytes)?;
        Ok(Self {
            key: EntityKey::new(fields.text("type")?, fields.text("id")?),
            local_payload: fields.bytes("local")?,
            local_checksum: fields.text("local_sum")?,
            remote_payload: fields.opt_bytes("remote")?,
            remote_checksum: fields.opt_text("remote_sum")?,
            conflict_type: ConflictType::from_code(fields.unsigned("kind")?)?,
            detected_at: Timestamp::from_millis(fields.unsigned("at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::checksum;

    fn conflict(remote: Option<&[u8]>) -> SyncConflict {
        let local = br#"{"note":"v1"}"#.to_vec();
        SyncConflict {
            key: EntityKey::new("note", "n1"),
            local_checksum: checksum(&local),
            local_payload: local,
            remote_checksum: remote.map(checksum),
            remote_payload: remote.map(<[u8]>::to_vec),
            conflict_type: if remote.is_some() {
                ConflictType::Update
            } else {
                ConflictType::Delete
            },
            detected_at: Timestamp::from_millis(42),
        }
    }

    #[test]
    fn update_conflict_record() {
        let original = conflict(Some(br#"{"note":"v2"}"#));
        let decoded = SyncConflict::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn delete_conflict_has_no_remote_side() {
        let original = conflict(None);
        let decoded = SyncConflict::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded.remote_payload, None);
        assert_eq!(decoded.conflict_type, ConflictType::Delete);
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!(
            "REMOTE".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::Remote
        );
        assert!("theirs".parse::<ResolutionStrategy>().is_err());
        assert_eq!(ResolutionStrategy::default(), ResolutionStrategy::Local);
    }
}
