//! Field access for decoded CBOR record maps.

use crate::error::{ProtocolError, ProtocolResult};
use clinisync_codec::{from_cbor, Value};

/// A decoded record map with typed field lookups.
pub(crate) struct Fields {
    record: &'static str,
    pairs: Vec<(Value, Value)>,
}

impl Fields {
    /// Decodes `bytes` and checks that the top-level item is a map.
    pub(crate) fn decode(record: &'static str, bytes: &[u8]) -> ProtocolResult<Self> {
        match from_cbor(bytes)? {
            Value::Map(pairs) => Ok(Self { record, pairs }),
            _ => Err(ProtocolError::invalid_field(record, "<root>", "expected map")),
        }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(k, _)| k.as_text() == Some(name))
            .map(|(_, v)| v)
            .filter(|v| !v.is_null())
    }

    fn missing(&self, field: &'static str) -> ProtocolError {
        ProtocolError::MissingField {
            record: self.record,
            field,
        }
    }

    fn wrong_type(&self, field: &'static str, expected: &str) -> ProtocolError {
        ProtocolError::invalid_field(self.record, field, format!("expected {expected}"))
    }

    pub(crate) fn text(&self, field: &'static str) -> ProtocolResult<String> {
        self.opt_text(field)?.ok_or_else(|| self.missing(field))
    }

    pub(crate) fn opt_text(&self, field: &'static str) -> ProtocolResult<Option<String>> {
        self.get(field)
            .map(|v| {
                v.as_text()
                    .map(str::to_owned)
                    .ok_or_else(|| self.wrong_type(field, "text"))
            })
            .transpose()
    }

    pub(crate) fn bytes(&self, field: &'static str) -> ProtocolResult<Vec<u8>> {
        self.opt_bytes(field)?.ok_or_else(|| self.missing(field))
    }

    pub(crate) fn opt_bytes(&self, field: &'static str) -> ProtocolResult<Option<Vec<u8>>> {
        self.get(field)
            .map(|v| {
                v.as_bytes()
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| self.wrong_type(field, "bytes"))
            })
            .transpose()
    }

    pub(crate) fn unsigned(&self, field: &'static str) -> ProtocolResult<u64> {
        self.opt_unsigned(field)?.ok_or_else(|| self.missing(field))
    }

    pub(crate) fn opt_unsigned(&self, field: &'static str) -> ProtocolResult<Option<u64>> {
        self.get(field)
            .map(|v| {
                v.as_integer()
                    .and_then(|i| u64::try_from(i).ok())
                    .ok_or_else(|| self.wrong_type(field, "unsigned integer"))
            })
            .transpose()
    }
}

/// Encodes a `u64` as a CBOR integer, clamping at `i64::MAX`.
pub(crate) fn unsigned(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Builds a `(key, value)` map entry.
pub(crate) fn entry(key: &str, value: impl Into<Value>) -> (Value, Value) {
    (Value::text(key), value.into())
}
