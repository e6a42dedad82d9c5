//! Waiting for the reply to a sent object.
//!
//! A reply is any inbound object whose `in-reply-to` equals the sent object's
//! id.  Objects read while waiting that do not match are dropped: only one
//! reply can be awaited per stream at a time, and anything else that arrives
//! meanwhile is lost to other interested parties.

use std::time::Duration;

use mesh_core::MeshObject;
use tokio::io::AsyncBufRead;
use tokio::time::Instant;
use tracing::debug;

use super::framing::{try_read_object, ReadError, ReadTimeouts};

/// Readability poll granularity while waiting for a reply.
pub const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of [`await_reply`].
#[derive(Debug)]
pub struct Reply {
    /// The matching object, or `None` if the wait timed out.
    pub object: Option<MeshObject>,
    /// Time spent waiting; equals the timeout when nothing matched.
    pub elapsed: Duration,
}

impl Reply {
    pub fn timed_out(&self) -> bool {
        self.object.is_none()
    }
}

/// Polls `reader` until an object answering `sent` arrives or `timeout`
/// passes.
///
/// A timeout is a normal outcome, reported as `Reply { object: None, .. }`.
///
/// # Errors
///
/// Any [`ReadError`] from reading an object while waiting; a malformed
/// object leaves the stream unusable so it is never swallowed.
pub async fn await_reply<R>(
    sent: &MeshObject,
    reader: &mut R,
    timeout: Duration,
    read_timeouts: ReadTimeouts,
) -> Result<Reply, ReadError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(Reply {
                object: None,
                elapsed: timeout,
            });
        }

        let poll = REPLY_POLL_INTERVAL.min(deadline - now);
        let Some(candidate) = try_read_object(reader, poll, read_timeouts).await? else {
            continue;
        };

        if candidate.in_reply_to() == Some(sent.id()) {
            return Ok(Reply {
                object: Some(candidate),
                elapsed: started.elapsed(),
            });
        }
        debug!(
            discarded = candidate.id(),
            awaiting = sent.id(),
            "dropping object that does not answer the pending request"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
