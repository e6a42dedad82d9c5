//! Codec for the NUL-delimited mesh object frame.
//!
//! Wire format:
//! ```text
//! [metadata: compact UTF-8 JSON object][0x00][payload: metadata.size bytes]
//! ```
//! There is no length prefix.  The single NUL byte terminates the metadata and
//! the payload length is carried by the `size` metadata field.

use serde_json::Value;
use thiserror::Error;

use crate::domain::object::{Metadata, MeshObject, KEY_SIZE};

/// Upper bound for the metadata JSON text, excluding the NUL terminator.
pub const METADATA_MAX_SIZE: usize = 2048;

/// Upper bound for a payload (10 MiB).
pub const PAYLOAD_MAX_SIZE: usize = 10_485_760;

/// Largest possible frame: metadata + NUL + payload.
pub const MAX_OBJECT_SIZE: usize = METADATA_MAX_SIZE + 1 + PAYLOAD_MAX_SIZE;

/// Metadata terminator.
pub const NUL: u8 = 0x00;

/// Errors that can occur while encoding or decoding an object frame.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The metadata bytes are not valid UTF-8.
    #[error("metadata is not valid UTF-8")]
    MetadataNotUtf8,

    /// The metadata text is not valid JSON.
    #[error("malformed metadata JSON: {0}")]
    MalformedMetadata(String),

    /// The metadata JSON is valid but is not an object.
    #[error("metadata must be a JSON object")]
    MetadataNotObject,

    /// The metadata exceeds [`METADATA_MAX_SIZE`].
    #[error("metadata too large: {size} bytes (max {max})")]
    MetadataTooLarge { size: usize, max: usize },

    /// The payload exceeds [`PAYLOAD_MAX_SIZE`].
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The `size` field is negative or not an integer.
    #[error("invalid size field: {0}")]
    InvalidSize(String),

    /// The buffer does not yet hold a complete frame.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `obj` into one complete frame.
///
/// `id` and `size` are stamped into the object's metadata first (overwriting
/// any existing values), which is why the object is taken mutably.
///
/// Callers must not put raw NUL characters in metadata values; JSON escapes
/// them as `\u0000` so they never reach the wire unescaped.
///
/// # Errors
///
/// Returns [`ProtocolError::MetadataTooLarge`] or
/// [`ProtocolError::PayloadTooLarge`] when the frame would exceed the limits.
///
/// # Examples
///
/// ```rust
/// use mesh_core::protocol::{decode_object, encode_object};
/// use mesh_core::MeshObject;
///
/// let mut obj = MeshObject::event("ping");
/// let bytes = encode_object(&mut obj).unwrap();
/// let (decoded, consumed) = decode_object(&bytes).unwrap();
/// assert_eq!(decoded, obj);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_object(obj: &mut MeshObject) -> Result<Vec<u8>, ProtocolError> {
    if obj.size() > PAYLOAD_MAX_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: obj.size(),
            max: PAYLOAD_MAX_SIZE,
        });
    }

    obj.stamp();
    let metadata = serde_json::to_vec(obj.metadata())
        .map_err(|e| ProtocolError::MalformedMetadata(e.to_string()))?;
    if metadata.len() > METADATA_MAX_SIZE {
        return Err(ProtocolError::MetadataTooLarge {
            size: metadata.len(),
            max: METADATA_MAX_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(metadata.len() + 1 + obj.size());
    buf.extend_from_slice(&metadata);
    buf.push(NUL);
    if let Some(payload) = obj.payload() {
        buf.extend_from_slice(payload);
    }
    Ok(buf)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Parses the metadata segment (without its NUL terminator).
///
/// # Errors
///
/// [`ProtocolError::MetadataNotUtf8`], [`ProtocolError::MalformedMetadata`]
/// or [`ProtocolError::MetadataNotObject`].
pub fn parse_metadata(bytes: &[u8]) -> Result<Metadata, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::MetadataNotUtf8)?;
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProtocolError::MetadataNotObject),
        Err(e) => Err(ProtocolError::MalformedMetadata(e.to_string())),
    }
}

/// Returns the payload length announced by `metadata["size"]`.
///
/// An absent size announces no payload.  Negative and non-integer sizes are
/// rejected rather than treated as "no payload".
///
/// # Errors
///
/// [`ProtocolError::InvalidSize`] or [`ProtocolError::PayloadTooLarge`].
pub fn declared_payload_size(metadata: &Metadata) -> Result<usize, ProtocolError> {
    let size = match metadata.get(KEY_SIZE) {
        None | Some(Value::Null) => return Ok(0),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| ProtocolError::InvalidSize(value.to_string()))?,
    };
    let size = usize::try_from(size).map_err(|_| ProtocolError::InvalidSize(size.to_string()))?;
    if size > PAYLOAD_MAX_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: PAYLOAD_MAX_SIZE,
        });
    }
    Ok(size)
}

/// Decodes one object from the beginning of `bytes`.
///
/// Returns the object and the number of bytes consumed (metadata + NUL +
/// payload) so the caller can advance its cursor.
///
/// # Errors
///
/// [`ProtocolError::InsufficientData`] when `bytes` holds only part of a
/// frame; any metadata error otherwise.
pub fn decode_object(bytes: &[u8]) -> Result<(MeshObject, usize), ProtocolError> {
    let search_len = bytes.len().min(METADATA_MAX_SIZE + 1);
    let nul_index = match bytes[..search_len].iter().position(|&b| b == NUL) {
        Some(index) => index,
        None if bytes.len() > METADATA_MAX_SIZE => {
            return Err(ProtocolError::MetadataTooLarge {
                size: bytes.len(),
                max: METADATA_MAX_SIZE,
            });
        }
        None => {
            return Err(ProtocolError::InsufficientData {
                needed: bytes.len() + 1,
                available: bytes.len(),
            });
        }
    };

    let metadata = parse_metadata(&bytes[..nul_index])?;
    let size = declared_payload_size(&metadata)?;

    let payload_start = nul_index + 1;
    let total = payload_start + size;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let payload = (size > 0).then(|| bytes[payload_start..total].to_vec());
    Ok((MeshObject::new(metadata, payload), total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
