//! Content checksums.
//!
//! A checksum must depend only on what a payload *means*. JSON payloads are
//! canonicalized first (object keys sorted, whitespace dropped, numbers
//! normalized) so `{"a":1,"b":2}` and `{"b":2,"a":1}` agree. Anything that
//! does not parse as JSON is hashed byte-for-byte.

use crate::entity::EntityKey;
use clinisync_codec::{canonicalize_json, to_canonical_cbor, Value};
use sha2::{Digest, Sha256};

const JSON_DOMAIN: u8 = b'j';
const RAW_DOMAIN: u8 = b'r';

/// Returns the lowercase hex SHA-256 checksum of a payload.
///
/// ```
/// use clinisync_protocol::checksum;
///
/// assert_eq!(checksum(br#"{"a":1,"b":2}"#), checksum(br#"{"b":2,"a":1}"#));
/// assert_ne!(checksum(br#"{"a":1,"b":2}"#), checksum(br#"{"a":1,"b":3}"#));
/// ```
#[must_use]
pub fn checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    match canonicalize_json(payload) {
        Ok(canonical) => {
            hasher.update([JSON_DOMAIN]);
            hasher.update(&canonical);
        }
        Err(_) => {
            hasher.update([RAW_DOMAIN]);
            hasher.update(payload);
        }
    }
    hex::encode(hasher.finalize())
}

/// Returns a digest over a set of `(key, checksum)` pairs.
///
/// Input order does not matter. Two replicas holding the same entities with
/// the same content produce the same digest.
#[must_use]
pub fn digest<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a EntityKey, &'a str)>,
{
    let mut sorted: Vec<_> = entries.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (key, sum) in sorted {
        let row = Value::Array(vec![
            Value::text(key.entity_type.as_str()),
            Value::text(key.id.as_str()),
            Value::text(sum),
        ]);
        // Text-only arrays always encode.
        if let Ok(bytes) = to_canonical_cbor(&row) {
            hasher.update(&bytes);
        }
    }
    hex::encode(hasher.finalize())
}
