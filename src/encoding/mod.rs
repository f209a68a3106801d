//! Big-endian field codec for log payloads.
//!
//! Only three shapes ever appear inside a payload:
//!
//! | Field         | Bytes                         |
//! |---------------|-------------------------------|
//! | tag           | `u8`                          |
//! | length        | `u32`, big-endian             |
//! | byte string   | `[u32 len][len bytes]`        |
//!
//! Byte strings are written from borrowed slices and read back into owned
//! `Vec<u8>`.  A length that does not fit in `u32` is rejected on write;
//! nothing smaller is enforced.
//!
//! Every decoder checks the declared length against what is left in the
//! buffer before slicing, so malformed input yields an [`EncodingError`],
//! never a panic.


use thiserror::Error;

/// Why a field could not be written or read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// A field ran past the end of the buffer.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes the field declared.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// Unknown discriminant byte.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag {
        /// Byte that was read.
        tag: u8,
        /// Type being decoded.
        type_name: &'static str,
    },

    /// A length did not fit the 32-bit length field.
    #[error("length overflow: {0}")]
    LengthOverflow(String),
}

/// Appends a value's wire form to a buffer.
///
/// Output must depend only on the value, so the same record always
/// produces the same bytes and the same checksum.
pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Reads a value from the front of a buffer, returning it together with
/// the number of bytes consumed.
pub trait Decode: Sized {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encodes `value` into a new buffer.
pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decodes a `T` from the front of `buf`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

/// `usize` → `u32` for a length field.
pub(crate) fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

/// Splits `n` bytes off the front of `buf`.
fn take(buf: &[u8], n: usize) -> Result<&[u8], EncodingError> {
    buf.get(..n).ok_or(EncodingError::UnexpectedEof {
        needed: n,
        available: buf.len(),
    })
}

impl Encode for u8 {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take(buf, 1)?[0], 1))
    }
}

impl Encode for u32 {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_be_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let b = take(buf, 4)?;
        Ok((u32::from_be_bytes([b[0], b[1], b[2], b[3]]), 4))
    }
}

/// `[u32 len][bytes]`.
impl Encode for [u8] {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

/// `[u32 len][bytes]`, copied out of the buffer.
impl Decode for Vec<u8> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, head) = u32::decode_from(buf)?;
        let bytes = take(&buf[head..], len as usize)?;
        Ok((bytes.to_vec(), head + bytes.len()))
    }
}
