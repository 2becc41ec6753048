//! JSON canonicalization.
//!
//! Entity payloads cross the engine boundary as JSON bytes owned by the
//! application. For checksumming they are parsed into a [`Value`] tree and
//! re-encoded canonically, which removes key order and whitespace from the
//! digest input.
//!
//! Numbers never pass through `f64`. Integers that fit in 64 bits become CBOR
//! integers; every other number is kept as its decimal text under
//! [`NUMBER_TEXT_TAG`], so two payloads share a digest only when their numbers
//! are written identically.

use crate::encoder::to_canonical_cbor;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Tag wrapping the decimal text of a non-integral or out-of-range number.
pub const NUMBER_TEXT_TAG: u64 = 0x006a_736e;

/// Converts a parsed JSON document into a codec value.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => from_number(n),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        serde_json::Value::Object(fields) => Value::map(
            fields
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), from_json(v)))
                .collect(),
        ),
    }
}

fn from_number(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Integer(i)
    } else if let Some(u) = n.as_u64() {
        Value::Unsigned(u)
    } else {
        // Display yields the source text (serde_json `arbitrary_precision`).
        Value::Tag(NUMBER_TEXT_TAG, Box::new(Value::Text(n.to_string())))
    }
}

/// Parses JSON bytes and returns their canonical CBOR encoding.
///
/// # Errors
///
/// Returns [`CodecError::InvalidJson`] when `bytes` is not a JSON document.
pub fn canonicalize_json(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    let parsed: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidJson {
            message: e.to_string(),
        })?;
    to_canonical_cbor(&from_json(&parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_and_whitespace_do_not_matter() {
        let a = canonicalize_json(br#"{"a":1,"b":2}"#).unwrap();
        let b = canonicalize_json(b"{ \"b\" : 2,\n  \"a\" : 1 }").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = canonicalize_json(br#"{"patient":{"name":"Ana","age":41},"tags":["x"]}"#).unwrap();
        let b = canonicalize_json(br#"{"tags":["x"],"patient":{"age":41,"name":"Ana"}}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn values_still_matter() {
        let a = canonicalize_json(br#"{"a":1,"b":2}"#).unwrap();
        let b = canonicalize_json(br#"{"a":1,"b":3}"#).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn array_order_matters() {
        let a = canonicalize_json(b"[1,2]").unwrap();
        let b = canonicalize_json(b"[2,1]").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn numbers_keep_their_exact_value() {
        let json: serde_json::Value =
            serde_json::from_str("[3, -7, 18446744073709551615, 2.50]").unwrap();
        assert_eq!(
            from_json(&json),
            Value::Array(vec![
                Value::Integer(3),
                Value::Integer(-7),
                Value::Unsigned(u64::MAX),
                Value::Tag(NUMBER_TEXT_TAG, Box::new(Value::text("2.50"))),
            ])
        );
    }

    #[test]
    fn large_integers_are_not_rounded() {
        let a = canonicalize_json(br#"{"mrn":18446744073709551615}"#).unwrap();
        let b = canonicalize_json(br#"{"mrn":18446744073709551614}"#).unwrap();
        assert_ne!(a, b);

        let c = canonicalize_json(br#"{"mrn":123456789012345678901234567890}"#).unwrap();
        let d = canonicalize_json(br#"{"mrn":123456789012345678901234567891}"#).unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn decimals_beyond_f64_precision_still_differ() {
        let a = canonicalize_json(br#"{"dose":0.1}"#).unwrap();
        let b = canonicalize_json(br#"{"dose":0.10000000000000000001}"#).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn number_text_is_not_a_string() {
        let number = canonicalize_json(br#"{"v":2.5}"#).unwrap();
        let string = canonicalize_json(br#"{"v":"2.5"}"#).unwrap();
        assert_ne!(number, string);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            canonicalize_json(b"not json"),
            Err(CodecError::InvalidJson { .. })
        ));
    }
}
