//! # mesh-core
//!
//! Shared library for the object mesh client containing the object model and
//! the wire codec.
//!
//! It has no dependencies on sockets or the async runtime, so it can be used
//! wherever whole frames are available in memory.
//!
//! - **`domain`** – the [`MeshObject`]: ordered JSON metadata plus an optional
//!   payload, identified by its `id`.
//! - **`protocol`** – how objects travel over the stream: compact JSON
//!   metadata, a single NUL terminator, then `size` payload bytes.

pub mod domain;
pub mod protocol;

pub use domain::object::{Metadata, MeshObject};
pub use protocol::codec::{decode_object, encode_object, ProtocolError};
