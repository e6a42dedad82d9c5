//! Protocol module containing the frame codec and the control objects.

pub mod codec;
pub mod messages;

pub use codec::{
    declared_payload_size, decode_object, encode_object, parse_metadata, ProtocolError,
    MAX_OBJECT_SIZE, METADATA_MAX_SIZE, NUL, PAYLOAD_MAX_SIZE,
};
