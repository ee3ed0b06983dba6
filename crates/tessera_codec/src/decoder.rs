//! Canonical CBOR decoder.
//!
//! The decoder accepts exactly what the encoder produces. Anything another
//! encoder might legally emit but ours never does (short floats, tags,
//! indefinite lengths, non-shortest heads, unsorted map keys) is rejected,
//! so every accepted input has one byte representation.

use crate::error::{CodecError, CodecResult};
use crate::head::{argument_width, key_order, Major};
use crate::value::Value;
use std::cmp::Ordering;

/// Most elements an array or map may announce.
const MAX_ITEMS: u64 = 16 * 1024 * 1024;

/// Longest byte or text string.
const MAX_LENGTH: u64 = 256 * 1024 * 1024;

/// Deepest nesting of arrays and maps.
const MAX_DEPTH: usize = 128;

/// Decodes exactly one value from `bytes`.
///
/// # Errors
///
/// Fails on malformed or non-canonical input, and on trailing bytes after
/// the value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    match decoder.remaining().len() {
        0 => Ok(value),
        count => Err(CodecError::TrailingBytes { count }),
    }
}

/// Reads canonical CBOR items from a borrowed buffer.
#[derive(Debug)]
pub struct CanonicalDecoder<'a> {
    input: &'a [u8],
    offset: usize,
    depth: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Starts reading at the beginning of `input`.
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            offset: 0,
            depth: 0,
        }
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining().is_empty()
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.offset..]
    }

    /// Reads the next item.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial = self.byte()?;
        let info = initial & 0x1f;
        match Major::of(initial) {
            Major::Unsigned => {
                let arg = self.argument(info)?;
                i64::try_from(arg)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::invalid_structure("integer out of range"))
            }
            Major::Negative => {
                let arg = self.argument(info)?;
                i64::try_from(arg)
                    .map(|n| Value::Integer(!n))
                    .map_err(|_| CodecError::invalid_structure("integer out of range"))
            }
            Major::Bytes => {
                let len = self.argument(info)?;
                Ok(Value::Bytes(self.string(len)?.to_vec()))
            }
            Major::Text => {
                let len = self.argument(info)?;
                let text = std::str::from_utf8(self.string(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_owned()))
            }
            Major::Array => {
                let count = self.argument(info)?;
                self.nested(|d| d.array(count))
            }
            Major::Map => {
                let count = self.argument(info)?;
                self.nested(|d| d.map(count))
            }
            Major::Tag => Err(CodecError::unsupported_type("tagged item")),
            Major::Simple => self.simple(info),
        }
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let input = self.input;
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= input.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &input[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn byte(&mut self) -> CodecResult<u8> {
        self.take_array::<1>().map(|[b]| b)
    }

    /// Reads the argument that follows an initial byte, insisting on the
    /// shortest form.
    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (width, arg) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (1, u64::from(self.byte()?)),
            25 => (2, u64::from(u16::from_be_bytes(self.take_array()?))),
            26 => (4, u64::from(u32::from_be_bytes(self.take_array()?))),
            27 => (8, u64::from_be_bytes(self.take_array()?)),
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional information")),
        };
        if argument_width(arg) != width {
            return Err(CodecError::invalid_structure(
                "non-canonical: argument not in shortest form",
            ));
        }
        Ok(arg)
    }

    fn string(&mut self, len: u64) -> CodecResult<&'a [u8]> {
        let len = Self::bounded(len, MAX_LENGTH)?;
        self.take(len)
    }

    /// Element count, capped so a hostile length cannot force a large
    /// allocation: every element needs at least one input byte.
    fn count(&self, count: u64) -> CodecResult<(usize, usize)> {
        let count = Self::bounded(count, MAX_ITEMS)?;
        Ok((count, count.min(self.remaining().len())))
    }

    fn bounded(claimed: u64, max_allowed: u64) -> CodecResult<usize> {
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed,
        })
    }

    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> CodecResult<Value>,
    ) -> CodecResult<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::NestingTooDeep { max: MAX_DEPTH });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn array(&mut self, count: u64) -> CodecResult<Value> {
        let (count, capacity) = self.count(count)?;
        let mut items = Vec::with_capacity(capacity);
        for _ in 0..count {
            items.push(self.decode()?);
        }
        Ok(Value::Array(items))
    }

    fn map(&mut self, count: u64) -> CodecResult<Value> {
        let (count, capacity) = self.count(count)?;
        let input = self.input;
        let mut pairs = Vec::with_capacity(capacity);
        let mut previous: Option<&[u8]> = None;
        for _ in 0..count {
            let start = self.offset;
            let key = self.decode()?;
            let encoded = &input[start..self.offset];
            if previous.is_some_and(|p| key_order(p, encoded) != Ordering::Less) {
                return Err(CodecError::invalid_structure(
                    "non-canonical: map keys not strictly increasing",
                ));
            }
            previous = Some(encoded);
            let value = self.decode()?;
            pairs.push((key, value));
        }
        Ok(Value::Map(pairs))
    }

    fn simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            25 | 26 => Err(CodecError::NonCanonicalFloat),
            27 => {
                let f = f64::from_bits(u64::from_be_bytes(self.take_array()?));
                if f.is_nan() {
                    Err(CodecError::NaNForbidden)
                } else {
                    Ok(Value::Float(f))
                }
            }
            31 => Err(CodecError::invalid_structure(
                "break outside an indefinite-length item",
            )),
            other => Err(CodecError::unsupported_type(format!("simple value {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_items() {
        let cases: Vec<(&[u8], Value)> = vec![
            (&[0xf6], Value::Null),
            (&[0xf4], Value::Bool(false)),
            (&[0xf5], Value::Bool(true)),
            (&[0x17], Value::Integer(23)),
            (&[0x18, 0x18], Value::Integer(24)),
            (&[0x19, 0xff, 0xff], Value::Integer(65_535)),
            (&[0x20], Value::Integer(-1)),
            (&[0x38, 0x63], Value::Integer(-100)),
            (&[0x43, 1, 2, 3], Value::Bytes(vec![1, 2, 3])),
            (&[0x62, b'h', b'i'], Value::from("hi")),
            (&[0x80], Value::Array(vec![])),
            (
                &[0xa1, 0x61, b'a', 0x01],
                Value::Map(vec![(Value::from("a"), Value::Integer(1))]),
            ),
            (&[0xfb, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0], Value::Float(1.5)),
        ];
        for (bytes, expected) in cases {
            assert_eq!(from_cbor(bytes).unwrap(), expected, "decoding {bytes:02x?}");
        }
    }

    #[test]
    fn full_integer_range() {
        let mut max = vec![0x1b];
        max.extend_from_slice(&i64::MAX.to_be_bytes());
        assert_eq!(from_cbor(&max).unwrap(), Value::Integer(i64::MAX));

        let mut min = vec![0x3b];
        min.extend_from_slice(&i64::MAX.to_be_bytes());
        assert_eq!(from_cbor(&min).unwrap(), Value::Integer(i64::MIN));

        let mut too_big = vec![0x1b];
        too_big.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(
            from_cbor(&too_big),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn rejects_non_canonical_input() {
        let cases: [&[u8]; 6] = [
            &[0x18, 0x17],
            &[0x19, 0x00, 0xff],
            &[0x1a, 0x00, 0x00, 0xff, 0xff],
            &[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02],
            &[0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02],
            &[0xa2, 0x62, b'a', b'a', 0x01, 0x61, b'b', 0x02],
        ];
        for bytes in cases {
            assert!(
                matches!(from_cbor(bytes), Err(CodecError::InvalidStructure { .. })),
                "accepted {bytes:02x?}"
            );
        }
    }

    #[test]
    fn rejects_forbidden_constructs() {
        assert_eq!(
            from_cbor(&[0xf9, 0x00, 0x00]),
            Err(CodecError::NonCanonicalFloat)
        );
        assert_eq!(
            from_cbor(&[0xfa, 0, 0, 0, 0]),
            Err(CodecError::NonCanonicalFloat)
        );
        assert_eq!(
            from_cbor(&[0xfb, 0x7f, 0xf8, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::NaNForbidden)
        );
        for indefinite in [0x5f, 0x7f, 0x9f, 0xbf] {
            assert_eq!(
                from_cbor(&[indefinite, 0xff]),
                Err(CodecError::IndefiniteLengthForbidden)
            );
        }
        assert!(matches!(
            from_cbor(&[0xc1, 0x01]),
            Err(CodecError::UnsupportedType { .. })
        ));
        assert!(matches!(
            from_cbor(&[0xf7]),
            Err(CodecError::UnsupportedType { .. })
        ));
        assert_eq!(from_cbor(&[0x62, 0xff, 0xfe]), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn truncated_and_trailing_input() {
        assert_eq!(from_cbor(&[]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x19, 0x01]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x43, 1]), Err(CodecError::UnexpectedEof));
        assert_eq!(
            from_cbor(&[0x01, 0x02]),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn hostile_lengths_fail_without_allocating() {
        // Array announcing 2^32 elements with none present.
        assert!(matches!(
            from_cbor(&[0x9b, 0, 0, 0, 1, 0, 0, 0, 0]),
            Err(CodecError::SizeLimitExceeded { .. })
        ));
        // Within the limit but truncated.
        assert_eq!(
            from_cbor(&[0x9a, 0x00, 0x10, 0x00, 0x00]),
            Err(CodecError::UnexpectedEof)
        );
    }

    #[test]
    fn nesting_is_bounded() {
        let mut deep = vec![0x81; MAX_DEPTH + 1];
        deep.push(0xf6);
        assert_eq!(
            from_cbor(&deep),
            Err(CodecError::NestingTooDeep { max: MAX_DEPTH })
        );

        let mut ok = vec![0x81; MAX_DEPTH];
        ok.push(0xf6);
        assert!(from_cbor(&ok).is_ok());
    }

    #[test]
    fn decoder_reads_a_stream() {
        let mut decoder = CanonicalDecoder::new(&[0x01, 0x61, b'x']);
        assert_eq!(decoder.decode().unwrap(), Value::Integer(1));
        assert!(!decoder.is_empty());
        assert_eq!(decoder.decode().unwrap(), Value::from("x"));
        assert!(decoder.is_empty());
    }
}
