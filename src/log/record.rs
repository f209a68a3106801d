//! Log payload records.
//!
//! A payload is the body of one log entry.  Its first byte is a tag that
//! selects one of exactly two record shapes:
//!
//! ```text
//! Set    := 0x01 [u32 key_len][key][u32 value_len][value]
//! Delete := 0x02 [u32 key_len][key]
//! ```
//!
//! Bytes after the last field are ignored on decode.

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Tag byte of a [`Record::Set`] payload.
pub const TAG_SET: u8 = 1;

/// Tag byte of a [`Record::Delete`] payload (tombstone).
pub const TAG_DELETE: u8 = 2;

/// A decoded log payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Insert or overwrite `key` with `value`.
    Set { key: Vec<u8>, value: Vec<u8> },

    /// Remove `key`.
    Delete { key: Vec<u8> },
}

impl Record {
    /// The key this record applies to.
    pub fn key(&self) -> &[u8] {
        match self {
            Record::Set { key, .. } | Record::Delete { key } => key,
        }
    }

    /// Returns `true` for a tombstone.
    pub fn is_delete(&self) -> bool {
        matches!(self, Record::Delete { .. })
    }

    /// Serializes the record into a payload.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        encoding::encode_to_vec(self)
    }

    /// Parses a payload, failing if the tag is unknown or a declared
    /// length runs past the end of `payload`.
    pub fn decode(payload: &[u8]) -> Result<Self, EncodingError> {
        let (record, _) = encoding::decode_from_slice::<Record>(payload)?;
        Ok(record)
    }
}

/// Builds a Set payload from borrowed key and value.
pub fn encode_set(key: &[u8], value: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::with_capacity(1 + 4 + key.len() + 4 + value.len());
    write_set(key, value, &mut buf)?;
    Ok(buf)
}

/// Builds a Delete payload (tombstone) from a borrowed key.
pub fn encode_delete(key: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::with_capacity(1 + 4 + key.len());
    write_delete(key, &mut buf)?;
    Ok(buf)
}

fn write_set(key: &[u8], value: &[u8], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    TAG_SET.encode_to(buf)?;
    key.encode_to(buf)?;
    value.encode_to(buf)
}

fn write_delete(key: &[u8], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    TAG_DELETE.encode_to(buf)?;
    key.encode_to(buf)
}

// ------------------------------------------------------------------------------------------------
// Encode / Decode — Record
// ------------------------------------------------------------------------------------------------

impl Encode for Record {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Record::Set { key, value } => write_set(key, value, buf),
            Record::Delete { key } => write_delete(key, buf),
        }
    }
}

impl Decode for Record {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u8::decode_from(buf)?;
        match tag {
            TAG_SET => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Ok((Record::Set { key, value }, offset))
            }
            TAG_DELETE => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Ok((Record::Delete { key }, offset))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "Record",
            }),
        }
    }
}
