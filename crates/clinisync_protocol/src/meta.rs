//! Engine-wide persisted state.

use crate::error::ProtocolResult;
use crate::fields::{self, Fields};
use crate::time::Timestamp;
use clinisync_codec::{to_canonical_cbor, Value};

/// The single meta record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMeta {
    /// Completion time of the last finished cycle.
    pub last_sync: Option<Timestamp>,
}

impl SyncMeta {
    /// Encodes to a canonical CBOR record.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut pairs = Vec::new();
        if let Some(ts) = self.last_sync {
            pairs.push(("last_sync".into(), fields::unsigned(ts.as_millis())));
        }
        Ok(to_canonical_cbor(&Value::map(pairs))?)
    }

    /// Decodes a record produced by [`SyncMeta::encode`].
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let fields = Fields::decode("meta", bytes)?;
        Ok(Self {
            last_sync: fields.opt_unsigned("last_sync")?.map(Timestamp::from_millis),
        })
    }
}
