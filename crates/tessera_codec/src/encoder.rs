//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::head::{key_order, write_head, Major, FALSE, FLOAT64, NULL, TRUE};
use crate::value::Value;
use std::cmp::Ordering;

/// Encodes a value to canonical CBOR bytes.
///
/// The output follows RFC 8949 section 4.2.1: shortest heads, definite
/// lengths only, map keys ordered by their encoding (shorter first, then
/// bytewise). Floats always take the 8-byte form.
///
/// # Errors
///
/// Returns [`CodecError::NaNForbidden`] for NaN and
/// [`CodecError::InvalidStructure`] for a map holding the same key twice.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Appends canonical CBOR items to an owned buffer.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    out: Vec<u8>,
}

impl CanonicalEncoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder whose buffer can hold `capacity` bytes without
    /// reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    /// Appends one item.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.out.push(NULL),
            Value::Bool(b) => self.out.push(if *b { TRUE } else { FALSE }),
            Value::Integer(n) if *n >= 0 => {
                write_head(&mut self.out, Major::Unsigned, n.unsigned_abs());
            }
            // -1 - n, which is the bitwise complement for negative n.
            #[allow(clippy::cast_sign_loss)]
            Value::Integer(n) => write_head(&mut self.out, Major::Negative, !*n as u64),
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(CodecError::NaNForbidden);
                }
                self.out.push(FLOAT64);
                self.out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Bytes(bytes) => self.string(Major::Bytes, bytes),
            Value::Text(text) => self.string(Major::Text, text.as_bytes()),
            Value::Array(items) => {
                write_head(&mut self.out, Major::Array, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Map(pairs) => self.map(pairs)?,
        }
        Ok(())
    }

    /// Consumes the encoder, returning the bytes written so far.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    fn string(&mut self, major: Major, bytes: &[u8]) {
        write_head(&mut self.out, major, bytes.len() as u64);
        self.out.extend_from_slice(bytes);
    }

    fn map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut entries = pairs
            .iter()
            .map(|(key, value)| Ok((to_canonical_cbor(key)?, value)))
            .collect::<CodecResult<Vec<_>>>()?;
        entries.sort_by(|a, b| key_order(&a.0, &b.0));
        if entries
            .windows(2)
            .any(|w| key_order(&w[0].0, &w[1].0) == Ordering::Equal)
        {
            return Err(CodecError::invalid_structure("duplicate map key"));
        }

        write_head(&mut self.out, Major::Map, entries.len() as u64);
        for (key, value) in entries {
            self.out.extend_from_slice(&key);
            self.encode(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(value: Value) -> Vec<u8> {
        to_canonical_cbor(&value).unwrap()
    }

    #[test]
    fn simple_values() {
        assert_eq!(bytes_of(Value::Null), [0xf6]);
        assert_eq!(bytes_of(Value::Bool(false)), [0xf4]);
        assert_eq!(bytes_of(Value::Bool(true)), [0xf5]);
    }

    #[test]
    fn integers_take_the_shortest_head() {
        let cases: [(i64, &[u8]); 10] = [
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 0x18]),
            (255, &[0x18, 0xff]),
            (256, &[0x19, 0x01, 0x00]),
            (65_536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
            (-1, &[0x20]),
            (-24, &[0x37]),
            (-25, &[0x38, 0x18]),
            (-100, &[0x38, 0x63]),
        ];
        for (n, expected) in cases {
            assert_eq!(bytes_of(Value::Integer(n)), expected, "encoding {n}");
        }
    }

    #[test]
    fn extreme_integers() {
        let max = bytes_of(Value::Integer(i64::MAX));
        assert_eq!(max[0], 0x1b);
        assert_eq!(&max[1..], &i64::MAX.to_be_bytes());

        let min = bytes_of(Value::Integer(i64::MIN));
        assert_eq!(min[0], 0x3b);
        assert_eq!(&min[1..], &i64::MAX.to_be_bytes());
    }

    #[test]
    fn strings_and_arrays() {
        assert_eq!(bytes_of(Value::Bytes(vec![])), [0x40]);
        assert_eq!(bytes_of(Value::Bytes(vec![1, 2, 3])), [0x43, 1, 2, 3]);
        assert_eq!(bytes_of(Value::from("")), [0x60]);
        assert_eq!(bytes_of(Value::from("hi")), [0x62, b'h', b'i']);
        assert_eq!(
            bytes_of(Value::Array(vec![Value::Integer(1), Value::from("a")])),
            [0x82, 0x01, 0x61, b'a']
        );
    }

    #[test]
    fn map_keys_follow_encoded_order() {
        // Insertion order is irrelevant; "a" encodes shorter than "bb", and
        // the integer key sorts before both.
        let map = Value::Map(vec![
            (Value::from("bb"), Value::Integer(2)),
            (Value::from("a"), Value::Integer(1)),
            (Value::Integer(7), Value::Null),
        ]);
        assert_eq!(
            bytes_of(map),
            [0xa3, 0x07, 0xf6, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]
        );
    }

    #[test]
    fn duplicate_map_keys_are_rejected() {
        let map = Value::Map(vec![
            (Value::from("k"), Value::Integer(1)),
            (Value::from("k"), Value::Integer(2)),
        ]);
        assert!(matches!(
            to_canonical_cbor(&map),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn floats_are_doubles_and_never_nan() {
        assert_eq!(
            bytes_of(Value::Float(1.5)),
            [0xfb, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0]
        );
        let nested = Value::text_map([("x", Value::Float(f64::NAN))]);
        assert_eq!(to_canonical_cbor(&nested), Err(CodecError::NaNForbidden));
    }

    #[test]
    fn encoder_appends_items() {
        let mut encoder = CanonicalEncoder::with_capacity(4);
        encoder.encode(&Value::Integer(1)).unwrap();
        encoder.encode(&Value::Null).unwrap();
        assert_eq!(encoder.as_bytes(), [0x01, 0xf6]);
    }
}
