//! The per-object callback run by the session event loop.
//!
//! The handler receives the caller's state by value and must hand a state
//! back, so a session can never continue without one.  Calls are strictly
//! serialized: the loop waits for each call to return before reading the
//! next object or flushing outbound traffic.

use mesh_core::MeshObject;

/// Reacts to one inbound object.
///
/// Runs inline in the event loop; long computations delay keepalive traffic
/// and should be moved elsewhere by the implementor.
pub trait ObjectHandler<S> {
    /// Returns the next state and an optional object to send back.
    fn handle(&mut self, object: MeshObject, own_routing_id: &str, state: S) -> (S, Option<MeshObject>);
}

impl<S, F> ObjectHandler<S> for F
where
    F: FnMut(MeshObject, &str, S) -> (S, Option<MeshObject>),
{
    fn handle(&mut self, object: MeshObject, own_routing_id: &str, state: S) -> (S, Option<MeshObject>) {
        self(object, own_routing_id, state)
    }
}
