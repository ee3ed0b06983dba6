//! # tessera codec
//!
//! The byte format under every cell value and every replicated operation.
//! Two replicas that hold equal values must produce equal bytes, so only
//! one encoding of each value is written or accepted:
//!
//! - heads take their shortest form
//! - map keys are ordered by encoded length, then bytewise, and never repeat
//! - floats are 8-byte doubles and NaN is refused
//! - lengths are definite and text is valid UTF-8
//! - tags are not part of the format
//!
//! ```
//! use tessera_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let cell = Value::text_map([("key", Value::from("views")), ("val", Value::Integer(42))]);
//! let bytes = to_canonical_cbor(&cell).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), cell);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod head;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Types with a canonical byte form.
pub trait Encode {
    /// Returns the canonical bytes of `self`.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be read back from their canonical bytes.
pub trait Decode: Sized {
    /// Parses `bytes`, rejecting anything non-canonical.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
