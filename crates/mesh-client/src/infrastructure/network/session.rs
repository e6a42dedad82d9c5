//! One connected stream: subscribe handshake, then the event loop.
//!
//! # Event loop
//!
//! Each iteration:
//! 1. consults [`Liveness`]: enqueue a ping when the peer has been quiet,
//!    fail with [`NetworkError::LivenessExpired`] once it has been quiet for
//!    too long;
//! 2. writes every queued outbound object, oldest first;
//! 3. waits up to `poll_interval` for inbound bytes or cancellation;
//! 4. reads exactly one object if bytes arrived.  Pongs feed the liveness
//!    tracker; everything else goes to the [`ObjectHandler`], whose optional
//!    answer joins the outbound queue.
//!
//! Nothing inside the loop is retried.  Every failure ends [`Session::run`]
//! and is handed back in [`SessionEnd`] for the supervisor to act on.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use mesh_core::protocol::messages::{self, ReceiveMode, DEFAULT_SUBSCRIPTIONS};
use mesh_core::MeshObject;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument, Span};

use super::correlator::{await_reply, Reply};
use super::framing::{read_object, write_object, ReadError, ReadTimeouts};
use super::liveness::{Liveness, LivenessPolicy, PingDue};
use super::NetworkError;
use crate::application::handler::ObjectHandler;

/// How the session subscribes during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// `subscriptions` pattern list, e.g. `@routing/*`.
    Patterns(Vec<String>),
    /// The older `receive-mode`/`types` form.
    Legacy(ReceiveMode),
}

impl SubscriptionMode {
    /// Builds the handshake request object.
    pub fn request(&self) -> MeshObject {
        match self {
            SubscriptionMode::Patterns(patterns) => messages::subscribe(patterns.as_slice()),
            SubscriptionMode::Legacy(mode) => messages::legacy_subscribe(*mode),
        }
    }
}

impl Default for SubscriptionMode {
    fn default() -> Self {
        SubscriptionMode::Patterns(DEFAULT_SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect())
    }
}

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub subscriptions: SubscriptionMode,
    /// How long to wait for the reply to the subscribe request.
    pub handshake_timeout: Duration,
    pub read_timeouts: ReadTimeouts,
    /// Upper bound on handing one frame to the transport.
    pub write_timeout: Duration,
    pub liveness: LivenessPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscriptions: SubscriptionMode::default(),
            handshake_timeout: Duration::from_secs(1),
            read_timeouts: ReadTimeouts::default(),
            write_timeout: Duration::from_secs(5),
            liveness: LivenessPolicy::default(),
        }
    }
}

/// Lifecycle of a connection.
///
/// A [`Session`] moves through `Handshaking → Active → Closing → Closed`;
/// `Connecting` and `Reconnecting` are reported by the supervisor around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Active,
    Closing,
    Closed,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Why [`Session::run`] returned, together with the caller's state.
#[derive(Debug)]
pub struct SessionEnd<S> {
    pub state: S,
    pub reason: NetworkError,
}

/// Outcome of one bounded wait in the event loop.
enum Wait {
    Cancelled,
    Idle,
    Readable,
    Closed,
    Failed(std::io::Error),
}

/// An established, subscribed connection.
pub struct Session<T> {
    reader: BufReader<ReadHalf<T>>,
    writer: WriteHalf<T>,
    config: SessionConfig,
    routing_id: String,
    outbound: VecDeque<MeshObject>,
    state: ConnectionState,
    span: Span,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Subscribes on a freshly connected `stream`.
    ///
    /// All of the session's log records are emitted inside `span`.
    ///
    /// # Errors
    ///
    /// [`NetworkError::HandshakeFailed`] if no reply arrives within
    /// `handshake_timeout` or the reply carries no `routing-id`; any write or
    /// read failure on the way.  The stream is shut down before returning
    /// an error.
    pub async fn handshake(stream: T, config: SessionConfig, span: Span) -> Result<Self, NetworkError> {
        let (read, writer) = tokio::io::split(stream);
        let mut session = Self {
            reader: BufReader::new(read),
            writer,
            config,
            routing_id: String::new(),
            outbound: VecDeque::new(),
            state: ConnectionState::Connecting,
            span,
        };

        let span = session.span.clone();
        async {
            session.transition(ConnectionState::Handshaking);
            match session.subscribe().await {
                Ok(routing_id) => {
                    info!(routing_id = %routing_id, "subscribed");
                    session.routing_id = routing_id;
                    session.transition(ConnectionState::Active);
                    Ok(())
                }
                Err(e) => {
                    session.close().await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await?;

        Ok(session)
    }

    async fn subscribe(&mut self) -> Result<String, NetworkError> {
        let mut request = self.config.subscriptions.request();
        self.send(&mut request).await?;

        let reply = await_reply(
            &request,
            &mut self.reader,
            self.config.handshake_timeout,
            self.config.read_timeouts,
        )
        .await?;
        let Some(reply) = reply.object else {
            return Err(NetworkError::HandshakeFailed(format!(
                "no reply to subscribe within {:?}",
                self.config.handshake_timeout
            )));
        };
        reply
            .routing_id()
            .map(str::to_string)
            .ok_or_else(|| NetworkError::HandshakeFailed("subscribe reply has no routing-id".to_string()))
    }

    /// The id the server assigned to this connection.
    pub fn routing_id(&self) -> &str {
        &self.routing_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Queues `object` for the next flush.
    pub fn enqueue(&mut self, object: MeshObject) {
        self.outbound.push_back(object);
    }

    /// Number of objects waiting to be written.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Sends `object` and waits up to `timeout` for the object answering it.
    ///
    /// For one-shot queries outside [`Session::run`], e.g. a
    /// `services/request` listing.  Queued objects are flushed first so the
    /// request does not overtake them.  Any other object read during the
    /// wait is dropped and never reaches a handler.  A timeout is returned as
    /// `Reply { object: None, .. }`, not as an error.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Read`] with [`ReadError::Closed`] on a closed session,
    /// otherwise any write or read failure.  These are as fatal as they are
    /// inside the event loop.
    pub async fn request(&mut self, mut object: MeshObject, timeout: Duration) -> Result<Reply, NetworkError> {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Err(ReadError::Closed.into());
        }
        let span = self.span.clone();
        async {
            self.flush().await?;
            self.send(&mut object).await?;
            let reply = await_reply(&object, &mut self.reader, timeout, self.config.read_timeouts).await?;
            debug!(id = object.id(), answered = !reply.timed_out(), elapsed = ?reply.elapsed, "request finished");
            Ok::<_, NetworkError>(reply)
        }
        .instrument(span)
        .await
    }

    /// Runs the event loop until a fatal condition or `cancel` fires.
    ///
    /// `state` is moved into every handler call and the returned value
    /// replaces it; whatever the handler last returned comes back in
    /// [`SessionEnd::state`].
    pub async fn run<S, H>(&mut self, handler: &mut H, state: S, cancel: &CancellationToken) -> SessionEnd<S>
    where
        H: ObjectHandler<S>,
    {
        let span = self.span.clone();
        self.event_loop(handler, state, cancel).instrument(span).await
    }

    async fn event_loop<S, H>(&mut self, handler: &mut H, mut state: S, cancel: &CancellationToken) -> SessionEnd<S>
    where
        H: ObjectHandler<S>,
    {
        let mut liveness = Liveness::new(self.config.liveness, Instant::now());

        let reason = loop {
            match liveness.check(Instant::now()) {
                Ok(Some(PingDue)) => {
                    debug!("peer quiet, sending ping");
                    self.outbound.push_back(messages::ping());
                }
                Ok(None) => {}
                Err(e) => break e,
            }

            if let Err(e) = self.flush().await {
                break e;
            }

            match self.wait(cancel).await {
                Wait::Cancelled => break NetworkError::Cancelled,
                Wait::Idle => continue,
                Wait::Closed => break ReadError::Closed.into(),
                Wait::Failed(e) => break e.into(),
                Wait::Readable => {}
            }

            let object = match read_object(&mut self.reader, self.config.read_timeouts).await {
                Ok(object) => object,
                Err(e) => break e.into(),
            };

            if messages::is_pong(&object) {
                debug!("pong");
                liveness.pong_seen(Instant::now());
                continue;
            }

            debug!(id = object.id(), event = object.event_name(), size = object.size(), "inbound object");
            let (next, response) = handler.handle(object, &self.routing_id, state);
            state = next;
            if let Some(response) = response {
                self.outbound.push_back(response);
            }
        };

        SessionEnd { state, reason }
    }

    async fn wait(&mut self, cancel: &CancellationToken) -> Wait {
        let poll = self.config.liveness.poll_interval;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Cancelled,
            filled = time::timeout(poll, self.reader.fill_buf()) => match filled {
                Err(_) => Wait::Idle,
                Ok(Ok(buf)) if buf.is_empty() => Wait::Closed,
                Ok(Ok(_)) => Wait::Readable,
                Ok(Err(e)) => Wait::Failed(e),
            },
        }
    }

    /// Writes the whole outbound queue in order.
    async fn flush(&mut self) -> Result<(), NetworkError> {
        while let Some(mut object) = self.outbound.pop_front() {
            self.send(&mut object).await?;
        }
        Ok(())
    }

    async fn send(&mut self, object: &mut MeshObject) -> Result<(), NetworkError> {
        let limit = self.config.write_timeout;
        let writer = &mut self.writer;
        let written = time::timeout(limit, async {
            let written = write_object(writer, object).await?;
            writer.flush().await?;
            Ok::<_, NetworkError>(written)
        })
        .await
        .map_err(|_| NetworkError::WriteTimedOut(limit))??;
        debug!(id = object.id(), event = object.event_name(), bytes = written, "sent object");
        Ok(())
    }

    /// Shuts the write half down.  Safe to call more than once.
    pub async fn close(&mut self) {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        self.transition(ConnectionState::Closing);
        match time::timeout(self.config.write_timeout, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "ignoring error while closing stream"),
            Err(_) => debug!("stream shutdown timed out"),
        }
        self.transition(ConnectionState::Closed);
    }

    fn transition(&mut self, next: ConnectionState) {
        let _entered = self.span.enter();
        debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("routing_id", &self.routing_id)
            .field("state", &self.state)
            .field("queued", &self.outbound.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
