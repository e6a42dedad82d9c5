//! Keeps a session alive across failures.
//!
//! The supervisor connects, handshakes and runs a [`Session`] in a loop.  Any
//! failure is logged with the peer and cause, the stream is closed, and after
//! a fixed backoff the whole sequence starts again from `Connecting`.  Only
//! cancellation ends the loop.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::session::{ConnectionState, Session, SessionConfig, SessionEnd};
use super::NetworkError;
use crate::application::handler::ObjectHandler;

/// Opens transport streams to the mesh server.
#[cfg_attr(test, mockall::automock(type Stream = tokio::io::DuplexStream;))]
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a new stream.
    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable address for logs, e.g. `localhost:7890`.
    fn peer(&self) -> String;
}

/// Plain TCP to `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Pause between a failed attempt and the next one.
    pub backoff: Duration,
    /// Upper bound on opening the transport.
    pub connect_timeout: Duration,
    pub session: SessionConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            session: SessionConfig::default(),
        }
    }
}

/// Runs sessions through `connector` until cancelled.
pub struct Supervisor<C: Connector> {
    connector: C,
    config: SupervisorConfig,
    attempts: u64,
    state: watch::Sender<ConnectionState>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(connector: C, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            connector,
            config,
            attempts: 0,
            state,
        }
    }

    /// Connection attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Connects and serves until `cancel` fires, reconnecting after every
    /// failure.
    ///
    /// Returns the handler state as it stood when cancellation was observed.
    pub async fn run<S, H>(&mut self, handler: &mut H, mut state: S, cancel: &CancellationToken) -> S
    where
        H: ObjectHandler<S>,
    {
        let peer = self.connector.peer();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.attempts += 1;
            let span = info_span!("mesh_session", peer = %peer, attempt = self.attempts);

            let (next, reason) = self
                .attempt(handler, state, cancel, span.clone())
                .instrument(span)
                .await;
            state = next;
            if reason.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            warn!(
                peer = %peer,
                attempt = self.attempts,
                error = %reason,
                backoff = ?self.config.backoff,
                "mesh session failed; reconnecting"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.config.backoff) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        info!(peer = %peer, attempts = self.attempts, "mesh client stopped");
        state
    }

    /// One pass through `Connecting → Handshaking → Active → Closed`.
    async fn attempt<S, H>(
        &mut self,
        handler: &mut H,
        state: S,
        cancel: &CancellationToken,
        span: Span,
    ) -> (S, NetworkError)
    where
        H: ObjectHandler<S>,
    {
        self.set_state(ConnectionState::Connecting);
        let limit = self.config.connect_timeout;
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (state, NetworkError::Cancelled),
            connected = time::timeout(limit, self.connector.connect()) => connected,
        };
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                let peer = self.connector.peer();
                return (state, NetworkError::ConnectFailed { peer, source });
            }
            Err(_) => {
                let peer = self.connector.peer();
                let source = io::Error::new(io::ErrorKind::TimedOut, format!("no connection within {limit:?}"));
                return (state, NetworkError::ConnectFailed { peer, source });
            }
        };
        info!("connected");

        self.set_state(ConnectionState::Handshaking);
        let handshake = Session::handshake(stream, self.config.session.clone(), span);
        let mut session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (state, NetworkError::Cancelled),
            result = handshake => match result {
                Ok(session) => session,
                Err(e) => return (state, e),
            },
        };

        self.set_state(ConnectionState::Active);
        let SessionEnd { state, reason } = session.run(handler, state, cancel).await;
        session.close().await;
        (state, reason)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "supervisor state");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::infrastructure::network::framing::{read_object, ReadError};
    use crate::infrastructure::network::test_support::{pair, PATIENT};
    use mesh_core::MeshObject;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::Instant;

    fn count(_object: MeshObject, _me: &str, seen: u32) -> (u32, Option<MeshObject>) {
        (seen + 1, None)
    }

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
    }

    /// A connector handing out `streams` in order, then refusing.
    fn scripted(streams: Vec<io::Result<DuplexStream>>) -> MockConnector {
        let mut queue: VecDeque<_> = streams.into();
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .returning(move || queue.pop_front().unwrap_or_else(|| Err(refused())));
        connector.expect_peer().return_const("mesh.test:7890".to_string());
        connector
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            stopper.cancel();
        });
        cancel
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connections_are_retried_after_fixed_backoff() {
        // Arrange
        let mut supervisor = Supervisor::new(scripted(Vec::new()), SupervisorConfig::default());
        let cancel = cancel_after(Duration::from_secs(25));

        // Act
        let started = Instant::now();
        let state = supervisor.run(&mut count, 0u32, &cancel).await;

        // Assert
        assert_eq!(supervisor.attempts(), 3, "attempts at 0s, 10s and 20s");
        assert_eq!(state, 0);
        assert_eq!(supervisor.state(), ConnectionState::Closed);
        let stopped_after = started.elapsed();
        assert!(stopped_after >= Duration::from_secs(25) && stopped_after < Duration::from_secs(26));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_triggers_backoff_and_full_handshake() {
        // Arrange
        let (first, mut first_server) = pair();
        let (second, mut second_server) = pair();
        let mut supervisor = Supervisor::new(scripted(vec![Ok(first), Ok(second)]), SupervisorConfig::default());
        let mut states = supervisor.watch_state();
        let started = Instant::now();

        let first_task = tokio::spawn(async move {
            first_server.accept_subscription("rid-a").await;
            first_server.writer.write_all(b"garbage\0").await.unwrap();
            let outcome = read_object(&mut first_server.reader, PATIENT).await;
            (outcome, started.elapsed())
        });
        let second_task = tokio::spawn(async move {
            let request = second_server.accept_subscription("rid-b").await;
            let subscribed_at = started.elapsed();
            second_server.send(MeshObject::event("routing/join")).await;
            let outcome = read_object(&mut second_server.reader, PATIENT).await;
            (request, subscribed_at, outcome)
        });
        let cancel = cancel_after(Duration::from_secs(15));

        // Act
        let seen = supervisor.run(&mut count, 0u32, &cancel).await;

        // Assert
        let (first_outcome, first_closed_at) = first_task.await.unwrap();
        assert!(
            matches!(first_outcome, Err(ReadError::Closed)),
            "old stream must be closed before reconnecting"
        );

        let (request, subscribed_at, second_outcome) = second_task.await.unwrap();
        assert_eq!(request.event_name(), Some("routing/subscribe"));
        assert!(
            subscribed_at >= first_closed_at + Duration::from_secs(10),
            "closed at {first_closed_at:?}, resubscribed at {subscribed_at:?}"
        );
        assert!(matches!(second_outcome, Err(ReadError::Closed)));

        assert_eq!(supervisor.attempts(), 2);
        assert_eq!(seen, 1, "only the object from the second session reaches the handler");
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_failure_is_retried() {
        // Arrange: the first server never answers the subscribe request.
        let (first, mut silent_server) = pair();
        let (second, mut good_server) = pair();
        let mut supervisor = Supervisor::new(scripted(vec![Ok(first), Ok(second)]), SupervisorConfig::default());
        let silent_task = tokio::spawn(async move {
            let request = silent_server.recv().await;
            (request, silent_server)
        });
        let good_task = tokio::spawn(async move {
            let request = good_server.accept_subscription("rid-c").await;
            (request, good_server)
        });
        let cancel = cancel_after(Duration::from_secs(20));

        // Act
        supervisor.run(&mut count, 0u32, &cancel).await;

        // Assert
        assert_eq!(supervisor.attempts(), 2);
        let (silent_request, _silent_server) = silent_task.await.unwrap();
        let (good_request, _good_server) = good_task.await.unwrap();
        assert_eq!(silent_request.event_name(), Some("routing/subscribe"));
        assert_eq!(good_request.event_name(), Some("routing/subscribe"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_makes_no_connection() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();
        connector.expect_peer().return_const("mesh.test:7890".to_string());
        let mut supervisor = Supervisor::new(connector, SupervisorConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = supervisor.run(&mut count, 5u32, &cancel).await;

        assert_eq!(state, 5);
        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(supervisor.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_tcp_connector_peer() {
        assert_eq!(TcpConnector::new("localhost", 7890).peer(), "localhost:7890");
    }
}
