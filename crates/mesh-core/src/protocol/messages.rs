//! Control objects understood by the mesh router.
//!
//! Application objects are free-form; only subscription and liveness objects
//! have a fixed shape that the client itself produces or consumes.

use serde_json::{json, Value};

use crate::domain::object::{Metadata, MeshObject, KEY_EVENT};

pub const EVENT_SUBSCRIBE: &str = "routing/subscribe";
pub const EVENT_PING: &str = "ping";
pub const EVENT_PONG: &str = "pong";

/// Subscription patterns sent by default during the handshake.
pub const DEFAULT_SUBSCRIPTIONS: [&str; 4] = ["@routing/*", "@services/*", "@ping", "@pong"];

/// Receive mode of the pre-pattern subscription form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Receive every object, including our own.
    All,
    /// Receive every object except those we sent.
    NoEcho,
}

impl ReceiveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiveMode::All => "all",
            ReceiveMode::NoEcho => "no_echo",
        }
    }
}

/// Handshake object subscribing to `subscriptions`.
pub fn subscribe<S: AsRef<str>>(subscriptions: &[S]) -> MeshObject {
    let patterns: Vec<Value> = subscriptions
        .iter()
        .map(|s| Value::String(s.as_ref().to_string()))
        .collect();
    let mut metadata = Metadata::new();
    metadata.insert(KEY_EVENT.to_string(), json!(EVENT_SUBSCRIBE));
    metadata.insert("subscriptions".to_string(), Value::Array(patterns));
    MeshObject::new(metadata, None)
}

/// Handshake object in the legacy `receive-mode` / `types` form.
pub fn legacy_subscribe(mode: ReceiveMode) -> MeshObject {
    let mut metadata = Metadata::new();
    metadata.insert(KEY_EVENT.to_string(), json!(EVENT_SUBSCRIBE));
    metadata.insert("receive-mode".to_string(), json!(mode.as_str()));
    metadata.insert("types".to_string(), json!("all"));
    MeshObject::new(metadata, None)
}

pub fn ping() -> MeshObject {
    MeshObject::event(EVENT_PING)
}

pub fn pong() -> MeshObject {
    MeshObject::event(EVENT_PONG)
}

pub fn is_pong(obj: &MeshObject) -> bool {
    obj.event_name() == Some(EVENT_PONG)
}
