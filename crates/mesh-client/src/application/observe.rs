//! A passive handler: logs every inbound object and counts them.

use std::collections::BTreeMap;
use std::fmt;

use mesh_core::MeshObject;
use tracing::{debug, info};

use super::handler::ObjectHandler;

/// Label used for objects without an `event` key.
pub const UNNAMED_EVENT: &str = "-";

/// Counters threaded through [`LoggingHandler`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStats {
    pub total: u64,
    pub payload_bytes: u64,
    /// Objects per `event` name; objects without one count under
    /// [`UNNAMED_EVENT`].
    pub by_event: BTreeMap<String, u64>,
}

impl ObjectStats {
    pub fn record(&mut self, object: &MeshObject) {
        self.total += 1;
        self.payload_bytes += object.size() as u64;
        let event = object.event_name().unwrap_or(UNNAMED_EVENT);
        *self.by_event.entry(event.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, event: &str) -> u64 {
        self.by_event.get(event).copied().unwrap_or(0)
    }
}

impl fmt::Display for ObjectStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} objects, {} payload bytes", self.total, self.payload_bytes)?;
        for (event, count) in &self.by_event {
            write!(f, "\n  {event}: {count}")?;
        }
        Ok(())
    }
}

/// Logs objects addressed to anyone and never answers.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl ObjectHandler<ObjectStats> for LoggingHandler {
    fn handle(
        &mut self,
        object: MeshObject,
        own_routing_id: &str,
        mut state: ObjectStats,
    ) -> (ObjectStats, Option<MeshObject>) {
        let own = object.routing_id() == Some(own_routing_id);
        info!(
            id = object.id(),
            event = object.event_name().unwrap_or(UNNAMED_EVENT),
            content_type = object.content_type().unwrap_or(UNNAMED_EVENT),
            size = object.size(),
            own,
            "{object}"
        );
        debug!(metadata = %serde_json::Value::Object(object.metadata().clone()), "object metadata");
        state.record(&object);
        (state, None)
    }
}
