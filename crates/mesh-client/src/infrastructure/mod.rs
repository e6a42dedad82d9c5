//! Infrastructure layer for the mesh client.
//!
//! Contains the adapters that touch the outside world: sockets and the
//! session machinery in `network`, the configuration file in `storage`.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `mesh_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
