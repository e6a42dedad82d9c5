//! Domain entities for the object mesh.
//!
//! The only entity is the [`object::MeshObject`]; it has no dependencies on
//! sockets or the async runtime.

pub mod object;
