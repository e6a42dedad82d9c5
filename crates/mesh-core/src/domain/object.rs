//! The mesh object: the unit of exchange on the bus.
//!
//! An object is an ordered JSON metadata mapping plus an optional opaque
//! payload.  Identity is the `id` metadata value, which is assigned once at
//! construction (taken from the supplied metadata or freshly generated) and
//! never changes afterwards.
//!
//! ```rust
//! use mesh_core::MeshObject;
//!
//! let obj = MeshObject::event("services/request");
//! assert_eq!(obj.event_name(), Some("services/request"));
//! assert_eq!(obj.size(), 0);
//! assert!(obj.payload().is_none());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Ordered metadata mapping carried by every object.
pub type Metadata = Map<String, Value>;

// ── Well-known metadata keys ──────────────────────────────────────────────────

pub const KEY_ID: &str = "id";
pub const KEY_SIZE: &str = "size";
pub const KEY_TYPE: &str = "type";
pub const KEY_EVENT: &str = "event";
pub const KEY_IN_REPLY_TO: &str = "in-reply-to";
pub const KEY_ROUTING_ID: &str = "routing-id";

/// A single object exchanged with the mesh server.
///
/// Two objects are equal iff their ids are equal; metadata and payload do not
/// take part in equality or hashing.
#[derive(Debug, Clone)]
pub struct MeshObject {
    id: String,
    metadata: Metadata,
    /// `None` for both "no payload" and "zero-length payload".
    payload: Option<Vec<u8>>,
}

impl MeshObject {
    /// Builds an object from metadata and an optional payload.
    ///
    /// The id is read from `metadata["id"]` when it is a non-empty string;
    /// otherwise a fresh UUID v4 is generated.  An empty payload is stored as
    /// `None`, and a non-string `type` is coerced to its JSON text.
    pub fn new(metadata: Metadata, payload: Option<Vec<u8>>) -> Self {
        let id = match metadata.get(KEY_ID) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => generate_id(),
        };
        let mut obj = Self {
            id,
            metadata,
            payload: payload.filter(|p| !p.is_empty()),
        };
        obj.coerce_content_type();
        obj
    }

    /// Metadata-only object carrying `event = name`.
    pub fn event(name: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(KEY_EVENT.to_string(), Value::String(name.to_string()));
        Self::new(metadata, None)
    }

    /// Object with a payload and its `type`.
    pub fn with_payload(mut metadata: Metadata, payload: Vec<u8>, content_type: &str) -> Self {
        metadata.insert(KEY_TYPE.to_string(), Value::String(content_type.to_string()));
        Self::new(metadata, Some(payload))
    }

    /// Builds a reply to `original`: `in-reply-to` is set to its id.
    pub fn reply_to(original: &MeshObject, mut metadata: Metadata, payload: Option<Vec<u8>>) -> Self {
        metadata.insert(
            KEY_IN_REPLY_TO.to_string(),
            Value::String(original.id().to_string()),
        );
        Self::new(metadata, payload)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Payload length in bytes, `0` when absent.
    pub fn size(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.str_field(KEY_TYPE)
    }

    pub fn event_name(&self) -> Option<&str> {
        self.str_field(KEY_EVENT)
    }

    pub fn in_reply_to(&self) -> Option<&str> {
        self.str_field(KEY_IN_REPLY_TO)
    }

    pub fn routing_id(&self) -> Option<&str> {
        self.str_field(KEY_ROUTING_ID)
    }

    /// Sets an application metadata key.
    ///
    /// `id` and `size` are owned by the object and are not writable here.
    pub fn insert(&mut self, key: &str, value: Value) {
        if key == KEY_ID || key == KEY_SIZE {
            warn!(key, object = %self.id, "ignoring write to reserved metadata key");
            return;
        }
        self.metadata.insert(key.to_string(), value);
        if key == KEY_TYPE {
            self.coerce_content_type();
        }
    }

    /// Consumes the object, returning its metadata and payload.
    pub fn into_parts(self) -> (Metadata, Option<Vec<u8>>) {
        (self.metadata, self.payload)
    }

    /// Writes `id` and `size` into the metadata so the wire form is
    /// self-describing.  Called by the codec before every encode.
    pub(crate) fn stamp(&mut self) {
        self.metadata
            .insert(KEY_ID.to_string(), Value::String(self.id.clone()));
        self.metadata
            .insert(KEY_SIZE.to_string(), Value::from(self.size() as u64));
        self.coerce_content_type();
    }

    fn coerce_content_type(&mut self) {
        if let Some(value) = self.metadata.get_mut(KEY_TYPE) {
            match value {
                Value::String(_) | Value::Null => {}
                other => *other = Value::String(other.to_string()),
            }
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

impl PartialEq for MeshObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MeshObject {}

impl Hash for MeshObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for MeshObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<MeshObject {}>", self.content_type().unwrap_or("-"))
    }
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn meta(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => panic!("test metadata must be a JSON object"),
        }
    }

    #[test]
    fn test_new_takes_id_from_metadata() {
        // Arrange / Act
        let obj = MeshObject::new(meta(json!({"id": "abc-1", "event": "x"})), None);

        // Assert
        assert_eq!(obj.id(), "abc-1");
    }

    #[test]
    fn test_new_generates_unique_ids_when_absent() {
        // Arrange / Act
        let ids: HashSet<String> = (0..1000)
            .map(|_| MeshObject::new(Metadata::new(), None).id().to_string())
            .collect();

        // Assert
        assert_eq!(ids.len(), 1000, "generated ids must not collide");
    }

    #[test]
    fn test_new_ignores_non_string_id() {
        let obj = MeshObject::new(meta(json!({"id": 17})), None);
        assert_ne!(obj.id(), "17");
        assert!(!obj.id().is_empty());
    }

    #[test]
    fn test_empty_payload_is_normalised_to_none() {
        // Arrange / Act
        let obj = MeshObject::new(Metadata::new(), Some(Vec::new()));

        // Assert
        assert!(obj.payload().is_none());
        assert_eq!(obj.size(), 0);
    }

    #[test]
    fn test_size_follows_payload_length() {
        let obj = MeshObject::with_payload(Metadata::new(), b"hello".to_vec(), "text/plain");
        assert_eq!(obj.size(), 5);
        assert_eq!(obj.content_type(), Some("text/plain"));
    }

    #[test]
    fn test_equality_is_by_id_only() {
        // Arrange
        let a = MeshObject::new(meta(json!({"id": "same", "event": "a"})), None);
        let b = MeshObject::new(meta(json!({"id": "same", "event": "b"})), Some(b"x".to_vec()));
        let c = MeshObject::new(meta(json!({"id": "other", "event": "a"})), None);

        // Assert
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<MeshObject> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_non_string_type_is_coerced() {
        let obj = MeshObject::new(meta(json!({"type": 42})), None);
        assert_eq!(obj.content_type(), Some("42"));
    }

    #[test]
    fn test_insert_refuses_reserved_keys() {
        // Arrange
        let mut obj = MeshObject::new(meta(json!({"id": "fixed"})), None);

        // Act
        obj.insert(KEY_ID, json!("changed"));
        obj.insert(KEY_SIZE, json!(99));
        obj.insert("natures", json!(["hearing"]));

        // Assert
        assert_eq!(obj.id(), "fixed");
        assert_eq!(obj.get(KEY_ID), Some(&json!("fixed")));
        assert!(obj.get(KEY_SIZE).is_none());
        assert_eq!(obj.get("natures"), Some(&json!(["hearing"])));
    }

    #[test]
    fn test_reply_to_links_ids() {
        let original = MeshObject::event("services/request");
        let reply = MeshObject::reply_to(&original, Metadata::new(), None);
        assert_eq!(reply.in_reply_to(), Some(original.id()));
    }

    #[test]
    fn test_stamp_writes_id_and_size() {
        // Arrange
        let mut obj = MeshObject::with_payload(Metadata::new(), vec![1, 2, 3], "application/octet-stream");

        // Act
        obj.stamp();

        // Assert
        assert_eq!(obj.get(KEY_ID), Some(&json!(obj.id())));
        assert_eq!(obj.get(KEY_SIZE), Some(&json!(3)));
    }

    #[test]
    fn test_display_shows_content_type() {
        let obj = MeshObject::with_payload(Metadata::new(), b"hi".to_vec(), "text/plain");
        assert_eq!(obj.to_string(), "<MeshObject text/plain>");
        assert_eq!(MeshObject::event("ping").to_string(), "<MeshObject ->");
    }
}
