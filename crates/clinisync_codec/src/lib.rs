//! # Clinisync Codec
//!
//! Canonical CBOR encoding for Clinisync.
//!
//! Two things in the sync engine need bytes that depend only on *meaning*:
//! content checksums (so `{a:1,b:2}` and `{b:2,a:1}` hash identically) and
//! journal records (so replaying a store is reproducible). Both go through
//! the encoder in this crate.
//!
//! ## Canonical rules
//!
//! - Map keys are sorted by their encoded bytes (length-first, then bytewise)
//! - Integers use the shortest encoding
//! - Floats are always encoded as 64-bit; NaN is rejected
//! - No indefinite-length items
//! - JSON numbers are never rounded through `f64`
//!
//! ## Usage
//!
//! ```
//! use clinisync_codec::{canonicalize_json, from_cbor, to_canonical_cbor, Value};
//!
//! let a = canonicalize_json(br#"{"a":1,"b":2}"#).unwrap();
//! let b = canonicalize_json(br#"{"b":2,"a":1}"#).unwrap();
//! assert_eq!(a, b);
//!
//! let bytes = to_canonical_cbor(&Value::Integer(42)).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), Value::Integer(42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod json;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use json::{canonicalize_json, from_json, NUMBER_TEXT_TAG};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-z]{0,12}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::vec(("[a-z]{1,6}", inner), 0..6).prop_map(|pairs| {
                    let mut seen = std::collections::HashSet::new();
                    Value::map(
                        pairs
                            .into_iter()
                            .filter(|(k, _)| seen.insert(k.clone()))
                            .map(|(k, v)| (Value::Text(k), v))
                            .collect(),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in arb_value()) {
            let bytes = to_canonical_cbor(&value).unwrap();
            prop_assert_eq!(from_cbor(&bytes).unwrap(), value);
        }

        #[test]
        fn map_insertion_order_is_irrelevant(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let forward: Vec<_> = pairs
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), Value::Integer(*v)))
                .collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            let a = to_canonical_cbor(&Value::Map(forward)).unwrap();
            let b = to_canonical_cbor(&Value::Map(reversed)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
