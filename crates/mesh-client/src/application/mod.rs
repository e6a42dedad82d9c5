//! Application layer of the mesh client.
//!
//! The session in `infrastructure::network` owns the socket; everything the
//! embedding program decides about inbound objects lives here, behind the
//! [`handler::ObjectHandler`] trait.
//!
//! # Sub-modules
//!
//! - **`handler`** – The callback contract invoked once per inbound object,
//!   threading an owned state value through every call.
//!
//! - **`observe`** – A ready-made handler that logs objects and keeps
//!   per-event counters; the `mesh-client` binary runs it.

pub mod handler;
pub mod observe;
