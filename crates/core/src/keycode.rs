// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Order-preserving encoding of index field values and forward keys.
//!
//! A forward key is `encode(value) || identity`: range scans order by the
//! indexed value with deterministic tie-breaking by identity. Because the
//! identity suffix has a fixed 16-byte width, value encodings need no
//! terminator and the split is length-determined.

use crate::{IndexKind, ObjectKey};
use serde_json::Value;

const OBJECT_KEY_LEN: usize = 16;

/// Encodes an already-coerced field value. Strings are raw UTF-8 bytes.
/// Booleans are a single 0x00/0x01 byte.
///
/// f64 is encoded in big-endian IEEE 754 form, but flips the sign bit to
/// order positive numbers after negative numbers, and also flips all
/// other bits for negative numbers to order them from smallest to
/// largest.
pub fn encode_field_value(value: &Value, kind: IndexKind) -> Vec<u8> {
    match (kind, value) {
        (IndexKind::String, Value::String(s)) => s.as_bytes().to_vec(),
        (IndexKind::Number, Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(0.0);
            let mut bytes = v.to_be_bytes();
            match v.is_sign_negative() {
                false => bytes[0] ^= 1 << 7,
                true => bytes.iter_mut().for_each(|b| *b = !*b),
            }
            bytes.to_vec()
        }
        (IndexKind::Boolean, Value::Bool(b)) => vec![u8::from(*b)],
        _ => Vec::new(),
    }
}

pub fn decode_field_value(bytes: &[u8], kind: IndexKind) -> Option<Value> {
    match kind {
        IndexKind::String => std::str::from_utf8(bytes).ok().map(Value::from),
        IndexKind::Number => {
            let mut raw: [u8; 8] = bytes.try_into().ok()?;
            match raw[0] & (1 << 7) != 0 {
                true => raw[0] ^= 1 << 7,
                false => raw.iter_mut().for_each(|b| *b = !*b),
            }
            Some(Value::from(f64::from_be_bytes(raw)))
        }
        IndexKind::Boolean => match bytes {
            [0x00] => Some(Value::Bool(false)),
            [0x01] => Some(Value::Bool(true)),
            _ => None,
        },
    }
}

pub fn make_forward_key(value: &Value, kind: IndexKind, identity: &ObjectKey) -> Vec<u8> {
    let mut key = encode_field_value(value, kind);
    key.extend_from_slice(identity.as_bytes());
    key
}

/// Splits a forward key back into its field value and identity.
pub fn forward_key_split(key: &[u8], kind: IndexKind) -> Option<(Value, ObjectKey)> {
    if key.len() < OBJECT_KEY_LEN {
        return None;
    }
    let (value_bytes, identity_bytes) = key.split_at(key.len() - OBJECT_KEY_LEN);
    let value = decode_field_value(value_bytes, kind)?;
    let identity = ObjectKey::from_bytes(identity_bytes)?;
    Some((value, identity))
}

pub fn make_forward_value(identity: &ObjectKey) -> Vec<u8> {
    identity.as_bytes().to_vec()
}

pub fn forward_value_split(value: &[u8]) -> Option<ObjectKey> {
    ObjectKey::from_bytes(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_encoding_orders_like_f64() {
        let values = [-1.0e9, -2.5, -1.0, -0.5, 0.0, 0.5, 1.0, 2.5, 1.0e9];
        let mut encoded: Vec<Vec<u8>> =
            values.iter().map(|v| encode_field_value(&json!(v), IndexKind::Number)).collect();
        let sorted = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn test_number_round_trip() {
        for v in [-1234.5, -0.0, 0.0, 42.0, 1.0e300] {
            let bytes = encode_field_value(&json!(v), IndexKind::Number);
            assert_eq!(decode_field_value(&bytes, IndexKind::Number), Some(json!(v)));
        }
    }

    #[test]
    fn test_string_encoding_is_raw_utf8() {
        assert_eq!(encode_field_value(&json!("abc"), IndexKind::String), b"abc".to_vec());
        assert!(
            encode_field_value(&json!("alpha"), IndexKind::String)
                < encode_field_value(&json!("beta"), IndexKind::String)
        );
    }

    #[test]
    fn test_forward_key_split() {
        let identity = ObjectKey::generate();
        let key = make_forward_key(&json!("alpha"), IndexKind::String, &identity);
        let (value, split_identity) = forward_key_split(&key, IndexKind::String).unwrap();
        assert_eq!(value, json!("alpha"));
        assert_eq!(split_identity, identity);

        let key = make_forward_key(&json!(2.0), IndexKind::Number, &identity);
        let (value, _) = forward_key_split(&key, IndexKind::Number).unwrap();
        assert_eq!(value, json!(2.0));
    }

    #[test]
    fn test_forward_keys_tie_break_by_identity() {
        let a = ObjectKey::from_bytes(&[1u8; 16]).unwrap();
        let b = ObjectKey::from_bytes(&[2u8; 16]).unwrap();
        let ka = make_forward_key(&json!("same"), IndexKind::String, &a);
        let kb = make_forward_key(&json!("same"), IndexKind::String, &b);
        assert!(ka < kb);
    }

    #[test]
    fn test_forward_value_round_trip() {
        let identity = ObjectKey::generate();
        assert_eq!(forward_value_split(&make_forward_value(&identity)), Some(identity));
        assert_eq!(forward_value_split(b"short"), None);
    }
}
