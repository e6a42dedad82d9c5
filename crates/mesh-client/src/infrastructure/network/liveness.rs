//! Ping/pong liveness tracking.
//!
//! The tracker is pure: callers pass the current instant in, so the same
//! logic runs under the real clock and under a paused test clock.

use std::time::Duration;

use tokio::time::Instant;

use super::NetworkError;

/// When to probe a quiet peer and when to give up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    /// Silence (no pong) after which pings start.
    pub ping_after: Duration,
    /// Minimum gap between two pings.
    pub ping_spacing: Duration,
    /// Silence after which the connection is declared dead.
    pub pong_deadline: Duration,
    /// Upper bound on one event-loop wait; liveness is re-checked at least
    /// this often.
    pub poll_interval: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            ping_after: Duration::from_secs(60),
            ping_spacing: Duration::from_secs(7),
            pong_deadline: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Returned by [`Liveness::check`] when a ping should be sent now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingDue;

#[derive(Debug, Clone)]
pub struct Liveness {
    policy: LivenessPolicy,
    last_pong: Instant,
    last_ping: Option<Instant>,
}

impl Liveness {
    /// Starts tracking as if a pong had just been seen at `now`.
    pub fn new(policy: LivenessPolicy, now: Instant) -> Self {
        Self {
            policy,
            last_pong: now,
            last_ping: None,
        }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    pub fn last_pong(&self) -> Instant {
        self.last_pong
    }

    /// Evaluates the peer's liveness at `now`.
    ///
    /// Returns `Ok(Some(PingDue))` and records the ping when one should be
    /// sent.
    ///
    /// # Errors
    ///
    /// [`NetworkError::LivenessExpired`] once no pong has been seen for
    /// `pong_deadline`.
    pub fn check(&mut self, now: Instant) -> Result<Option<PingDue>, NetworkError> {
        let silent = now.saturating_duration_since(self.last_pong);
        if silent >= self.policy.pong_deadline {
            return Err(NetworkError::LivenessExpired { silent });
        }
        if silent < self.policy.ping_after {
            return Ok(None);
        }
        let spaced = self
            .last_ping
            .map_or(true, |at| now.saturating_duration_since(at) >= self.policy.ping_spacing);
        if !spaced {
            return Ok(None);
        }
        self.last_ping = Some(now);
        Ok(Some(PingDue))
    }

    pub fn pong_seen(&mut self, now: Instant) {
        self.last_pong = now;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
