//! mesh-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client keeps one subscribed connection to a mesh object bus:
//!
//! 1. Connects over TCP and subscribes with a `routing/subscribe` request;
//!    the reply carries the routing id the server assigned to us.
//! 2. Reads objects one at a time and hands each to an
//!    [`application::handler::ObjectHandler`] together with an owned state
//!    value, queuing whatever the handler answers.
//! 3. Pings a quiet server and drops the connection when no pong arrives in
//!    time.
//! 4. Reconnects after every failure with a fixed backoff until cancelled.

/// Application layer: the handler contract and ready-made handlers.
pub mod application;

/// Infrastructure layer: network session machinery and configuration.
pub mod infrastructure;
