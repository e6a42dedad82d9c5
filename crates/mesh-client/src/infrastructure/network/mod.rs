//! Network infrastructure for the mesh client.
//!
//! Architecture:
//! - [`framing`] reads one object at a time from a buffered stream under an
//!   inactivity clock and an absolute clock, and writes whole frames.
//! - [`correlator`] waits for the object answering a sent object.
//! - [`liveness`] decides when to ping and when the peer is gone.
//! - [`session`] owns one connected stream: subscribe handshake, then the
//!   event loop multiplexing outbound queue, inbound dispatch and keepalive.
//! - [`supervisor`] reconnects forever with a fixed backoff.

use std::time::Duration;

use mesh_core::ProtocolError;
use thiserror::Error;

pub mod correlator;
pub mod framing;
pub mod liveness;
pub mod session;
pub mod supervisor;

pub use correlator::{await_reply, Reply};
pub use framing::{read_object, try_read_object, write_object, ReadError, ReadTimeouts};
pub use liveness::{Liveness, LivenessPolicy, PingDue};
pub use session::{ConnectionState, Session, SessionConfig, SessionEnd, SubscriptionMode};
pub use supervisor::{Connector, Supervisor, SupervisorConfig, TcpConnector};

/// Errors that end a session attempt.
///
/// Every variant is fatal to the current connection; the supervisor consumes
/// them all and reconnects, except [`NetworkError::Cancelled`].
#[derive(Debug, Error)]
pub enum NetworkError {
    /// TCP connection to the server failed.
    #[error("failed to connect to mesh server at {peer}: {source}")]
    ConnectFailed {
        peer: String,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Reading an inbound object failed.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// An outbound object could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The transport stopped accepting bytes partway through a frame.
    #[error("short write: transport stopped accepting a {expected}-byte frame")]
    ShortWrite { expected: usize },
    /// The transport did not accept a frame in time.
    #[error("write did not complete within {0:?}")]
    WriteTimedOut(Duration),
    /// The subscribe handshake got no usable reply.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    /// No pong was seen within the liveness deadline.
    #[error("no pong received for {silent:?}")]
    LivenessExpired { silent: Duration },
    /// The caller asked the session to stop.
    #[error("session cancelled")]
    Cancelled,
}

impl NetworkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetworkError::Cancelled)
    }
}
