//! Canonical binary codec
//!
//! Every [`Value`] has exactly one encoding. Each value starts with a type
//! byte; scalars are fixed width, strings/bytes/collections carry a u32
//! big-endian length, and map keys are written in strictly increasing byte
//! order. The decoder rejects anything `encode` would not have produced, so
//! a CID computed over decoded-then-reencoded bytes never drifts.
//!
//! ```text
//! 0x00 null        0x05 string  u32 len + utf8
//! 0x01 false       0x06 bytes   u32 len + raw
//! 0x02 true        0x07 array   u32 count + items
//! 0x03 i64 BE      0x08 map     u32 count + (u32 len + key + value)*
//! 0x04 f64 BE      0x09 link    34-byte binary CID
//! ```

mod decoder;
mod encoder;

pub use decoder::decode;
pub use encoder::encode;
pub(crate) use encoder::canonical_float_bits;

use crate::model::{BlockTag, Cid};

pub(crate) const T_NULL: u8 = 0x00;
pub(crate) const T_FALSE: u8 = 0x01;
pub(crate) const T_TRUE: u8 = 0x02;
pub(crate) const T_INT: u8 = 0x03;
pub(crate) const T_FLOAT: u8 = 0x04;
pub(crate) const T_STRING: u8 = 0x05;
pub(crate) const T_BYTES: u8 = 0x06;
pub(crate) const T_ARRAY: u8 = 0x07;
pub(crate) const T_MAP: u8 = 0x08;
pub(crate) const T_LINK: u8 = 0x09;

/// Bit pattern every NaN is normalised to
pub(crate) const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;

/// Maximum nesting of arrays and maps accepted by the decoder
pub const MAX_DEPTH: usize = 64;

/// Compute the CID of tagged canonical bytes
pub fn cid_of(bytes: &[u8], tag: BlockTag) -> Cid {
    Cid::digest(tag, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecErrorKind;
    use crate::model::Value;
    use bytes::Bytes;
    use std::collections::BTreeMap;

    fn sample() -> Value {
        let link = cid_of(b"child", BlockTag::Record);
        Value::map([
            ("text", Value::from("hello, world")),
            ("count", Value::Int(-42)),
            ("ratio", Value::Float(1.25)),
            ("flag", Value::Bool(true)),
            ("nothing", Value::Null),
            ("raw", Value::Bytes(Bytes::from_static(&[0, 1, 2, 255]))),
            (
                "nested",
                Value::map([
                    ("list", Value::Array(vec![Value::Int(1), Value::from("two")])),
                    ("ref", Value::Link(link)),
                ]),
            ),
            ("empty", Value::Map(BTreeMap::new())),
        ])
    }

    #[test]
    fn test_decode_inverts_encode() {
        let value = sample();
        let bytes = encode(&value);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_encoding_ignores_insertion_order() {
        let a = Value::map([("b", Value::Int(2)), ("a", Value::Int(1))]);
        let b = Value::map([("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn test_cid_of_deterministic() {
        let bytes = encode(&sample());
        assert_eq!(
            cid_of(&bytes, BlockTag::Record),
            cid_of(&bytes, BlockTag::Record)
        );
        assert_ne!(cid_of(&bytes, BlockTag::Record), cid_of(&bytes, BlockTag::Node));
    }

    #[test]
    fn test_scalar_layout() {
        assert_eq!(encode(&Value::Null), vec![T_NULL]);
        assert_eq!(encode(&Value::Bool(true)), vec![T_TRUE]);
        assert_eq!(
            encode(&Value::Int(1)),
            vec![T_INT, 0, 0, 0, 0, 0, 0, 0, 1]
        );
        assert_eq!(
            encode(&Value::from("hi")),
            vec![T_STRING, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn test_float_normalisation() {
        assert_eq!(encode(&Value::Float(-0.0)), encode(&Value::Float(0.0)));
        let nan_a = f64::from_bits(0x7ff8_0000_0000_0001);
        assert_eq!(encode(&Value::Float(nan_a)), encode(&Value::Float(f64::NAN)));

        let decoded = decode(&encode(&Value::Float(f64::NAN))).unwrap();
        match decoded {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_input_reports_offset() {
        let bytes = encode(&Value::from("hello"));
        let err = decode(&bytes[..4]).unwrap_err();
        assert_eq!(err.offset, 1);
        assert_eq!(err.kind, CodecErrorKind::UnexpectedEof);

        let err = decode(&bytes[..7]).unwrap_err();
        assert_eq!(err.offset, 5);
    }

    #[test]
    fn test_unknown_type_byte() {
        let mut bytes = encode(&Value::Array(vec![Value::Null, Value::Null]));
        bytes[6] = 0xee;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.offset, 6);
        assert_eq!(err.kind, CodecErrorKind::UnknownType(0xee));
    }

    #[test]
    fn test_unsorted_keys_rejected() {
        // map { "b": null, "a": null } written by hand
        let bytes = vec![
            T_MAP, 0, 0, 0, 2, //
            0, 0, 0, 1, b'b', T_NULL, //
            0, 0, 0, 1, b'a', T_NULL,
        ];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.offset, 11);
        assert_eq!(err.kind, CodecErrorKind::UnsortedKey);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let bytes = vec![
            T_MAP, 0, 0, 0, 2, //
            0, 0, 0, 1, b'a', T_NULL, //
            0, 0, 0, 1, b'a', T_NULL,
        ];
        assert_eq!(decode(&bytes).unwrap_err().kind, CodecErrorKind::UnsortedKey);
    }

    #[test]
    fn test_non_canonical_float_rejected() {
        let mut bytes = vec![T_FLOAT];
        bytes.extend_from_slice(&(-0.0f64).to_bits().to_be_bytes());
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.offset, 1);
        assert_eq!(err.kind, CodecErrorKind::NonCanonicalFloat);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&Value::Bool(false));
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.offset, 1);
        assert_eq!(err.kind, CodecErrorKind::TrailingBytes);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = vec![T_STRING, 0, 0, 0, 2, 0xc3, 0x28];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.offset, 5);
        assert_eq!(err.kind, CodecErrorKind::InvalidUtf8);
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Value::Null;
        for _ in 0..=MAX_DEPTH {
            value = Value::Array(vec![value]);
        }
        let err = decode(&encode(&value)).unwrap_err();
        assert_eq!(err.kind, CodecErrorKind::TooDeep);
    }

    #[test]
    fn test_huge_length_does_not_allocate() {
        let bytes = vec![T_ARRAY, 0xff, 0xff, 0xff, 0xff];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind, CodecErrorKind::UnexpectedEof);
        // Points at the count field, not the end of input
        assert_eq!(err.offset, 1);

        // {"k": <map claiming u32::MAX entries>}
        let mut nested = vec![T_MAP, 0, 0, 0, 1, 0, 0, 0, 1, b'k'];
        nested.extend_from_slice(&[T_MAP, 0xff, 0xff, 0xff, 0xff]);
        let err = decode(&nested).unwrap_err();
        assert_eq!(err.kind, CodecErrorKind::UnexpectedEof);
        assert_eq!(err.offset, 11);
    }
}
