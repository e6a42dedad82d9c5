//! Reading and writing single object frames on a byte stream.
//!
//! TCP is a stream protocol: one `read()` may return part of a frame or
//! several frames at once.  The reader works on an [`AsyncBufRead`] so bytes
//! past the end of one frame stay buffered for the next call.
//!
//! Two clocks bound every read:
//! - the *inactivity* clock restarts whenever any byte arrives;
//! - the *total* clock runs from the start of the read.
//!
//! Exceeding either fails the read with [`ReadError::TimedOut`].

use std::fmt;
use std::io;
use std::time::Duration;

use mesh_core::protocol::{declared_payload_size, parse_metadata, METADATA_MAX_SIZE, NUL};
use mesh_core::{encode_object, MeshObject, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};

use super::NetworkError;

/// Timeout policy for one object read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTimeouts {
    /// Longest gap allowed between two received chunks.
    pub inactivity: Duration,
    /// Longest time allowed for the whole object.
    pub total: Duration,
}

impl Default for ReadTimeouts {
    fn default() -> Self {
        Self {
            inactivity: Duration::from_secs(5),
            total: Duration::from_secs(120),
        }
    }
}

/// Which part of the frame was being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Metadata,
    Payload,
}

impl fmt::Display for ReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPhase::Metadata => f.write_str("metadata"),
            ReadPhase::Payload => f.write_str("payload"),
        }
    }
}

/// Outcome of a failed object read.
#[derive(Debug, Error)]
pub enum ReadError {
    /// One of the two read clocks expired.
    #[error("timed out reading {phase} after {elapsed:?}")]
    TimedOut { phase: ReadPhase, elapsed: Duration },
    /// The bytes do not form a valid frame; stream alignment is lost.
    #[error("malformed object: {0}")]
    Malformed(#[from] ProtocolError),
    /// The peer closed the stream.
    #[error("stream closed by peer")]
    Closed,
    #[error("read I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct ReadClock {
    timeouts: ReadTimeouts,
    started: Instant,
    last_activity: Instant,
}

impl ReadClock {
    fn start(timeouts: ReadTimeouts) -> Self {
        let now = Instant::now();
        Self {
            timeouts,
            started: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time left before the earlier of the two deadlines.
    fn remaining(&self) -> Option<Duration> {
        let deadline = (self.last_activity + self.timeouts.inactivity)
            .min(self.started + self.timeouts.total);
        deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    fn timed_out(&self, phase: ReadPhase) -> ReadError {
        ReadError::TimedOut {
            phase,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Waits for buffered bytes within the clock's remaining budget.
async fn fill<'a, R>(
    reader: &'a mut R,
    clock: &ReadClock,
    phase: ReadPhase,
) -> Result<&'a [u8], ReadError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let Some(budget) = clock.remaining() else {
        return Err(clock.timed_out(phase));
    };
    match time::timeout(budget, reader.fill_buf()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(clock.timed_out(phase)),
    }
}

/// Reads exactly one object from `reader`.
///
/// # Errors
///
/// - [`ReadError::TimedOut`] if either clock expires before the frame ends.
/// - [`ReadError::Malformed`] for non-UTF-8 or non-JSON metadata, metadata
///   over [`METADATA_MAX_SIZE`], or an invalid `size`.
/// - [`ReadError::Closed`] if the stream ends before the frame is complete.
pub async fn read_object<R>(reader: &mut R, timeouts: ReadTimeouts) -> Result<MeshObject, ReadError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut clock = ReadClock::start(timeouts);

    let mut metadata = Vec::new();
    loop {
        let available = fill(reader, &clock, ReadPhase::Metadata).await?;
        if available.is_empty() {
            return Err(ReadError::Closed);
        }
        let (consumed, terminated) = match available.iter().position(|&b| b == NUL) {
            Some(index) => {
                metadata.extend_from_slice(&available[..index]);
                (index + 1, true)
            }
            None => {
                metadata.extend_from_slice(available);
                (available.len(), false)
            }
        };
        reader.consume(consumed);
        clock.touch();

        if metadata.len() > METADATA_MAX_SIZE {
            return Err(ProtocolError::MetadataTooLarge {
                size: metadata.len(),
                max: METADATA_MAX_SIZE,
            }
            .into());
        }
        if terminated {
            break;
        }
    }

    let metadata = parse_metadata(&metadata)?;
    let size = declared_payload_size(&metadata)?;

    let payload = if size > 0 {
        let mut payload = Vec::with_capacity(size);
        while payload.len() < size {
            let available = fill(reader, &clock, ReadPhase::Payload).await?;
            if available.is_empty() {
                return Err(ReadError::Closed);
            }
            let take = available.len().min(size - payload.len());
            payload.extend_from_slice(&available[..take]);
            reader.consume(take);
            clock.touch();
        }
        Some(payload)
    } else {
        None
    };

    Ok(MeshObject::new(metadata, payload))
}

/// Reads one object if the stream becomes readable within `poll_timeout`.
///
/// Returns `Ok(None)` when nothing arrived in the window.  Once a byte is
/// available the full read of [`read_object`] runs under `timeouts`.
pub async fn try_read_object<R>(
    reader: &mut R,
    poll_timeout: Duration,
    timeouts: ReadTimeouts,
) -> Result<Option<MeshObject>, ReadError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let readable = match time::timeout(poll_timeout, reader.fill_buf()).await {
        Err(_) => return Ok(None),
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(buf)) => !buf.is_empty(),
    };
    if !readable {
        return Err(ReadError::Closed);
    }
    read_object(reader, timeouts).await.map(Some)
}

/// Encodes `obj` and writes the whole frame to the transport.
///
/// The object's `id` and `size` metadata are stamped as a side effect.  A
/// non-blocking socket may accept a large frame over several writes;
/// `write_all` keeps going until every byte is taken.  Callers bound the
/// total time with their own write timeout.
///
/// # Errors
///
/// [`NetworkError::Protocol`] if the object exceeds the frame limits,
/// [`NetworkError::ShortWrite`] if the transport stops accepting bytes
/// before the frame is complete, [`NetworkError::Io`] otherwise.
pub async fn write_object<W>(writer: &mut W, obj: &mut MeshObject) -> Result<usize, NetworkError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_object(obj)?;
    match writer.write_all(&frame).await {
        Ok(()) => Ok(frame.len()),
        Err(e) if e.kind() == io::ErrorKind::WriteZero => Err(NetworkError::ShortWrite { expected: frame.len() }),
        Err(e) => Err(e.into()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::Metadata;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, BufReader};

    fn frame(obj: &mut MeshObject) -> Vec<u8> {
        encode_object(obj).unwrap()
    }

    fn sample() -> MeshObject {
        let mut metadata = Metadata::new();
        metadata.insert("event".to_string(), json!("services/request"));
        MeshObject::with_payload(metadata, b"payload bytes".to_vec(), "text/plain")
    }

    #[tokio::test]
    async fn test_read_object_all_at_once() {
        // Arrange
        let mut original = sample();
        let bytes = frame(&mut original);
        let mut reader = BufReader::new(&bytes[..]);

        // Act
        let decoded = read_object(&mut reader, ReadTimeouts::default()).await.unwrap();

        // Assert
        assert_eq!(decoded.id(), original.id());
        assert_eq!(decoded.metadata(), original.metadata());
        assert_eq!(decoded.payload(), original.payload());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_object_one_byte_at_a_time() {
        // Arrange – a slow sender delivering one byte per second
        let mut original = sample();
        let bytes = frame(&mut original);
        let mut builder = tokio_test::io::Builder::new();
        for byte in &bytes {
            builder.read(std::slice::from_ref(byte)).wait(Duration::from_secs(1));
        }
        let mut reader = BufReader::new(builder.build());
        let timeouts = ReadTimeouts {
            inactivity: Duration::from_secs(5),
            total: Duration::from_secs(3600),
        };

        // Act
        let decoded = read_object(&mut reader, timeouts).await.unwrap();

        // Assert
        assert_eq!(decoded.id(), original.id());
        assert_eq!(decoded.metadata(), original.metadata());
        assert_eq!(decoded.payload(), original.payload());
    }

    #[tokio::test]
    async fn test_back_to_back_frames_stay_aligned() {
        // Arrange
        let mut first = sample();
        let mut second = MeshObject::event("pong");
        let mut bytes = frame(&mut first);
        bytes.extend(frame(&mut second));
        let mut reader = BufReader::new(&bytes[..]);

        // Act
        let a = read_object(&mut reader, ReadTimeouts::default()).await.unwrap();
        let b = read_object(&mut reader, ReadTimeouts::default()).await.unwrap();

        // Assert
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert!(matches!(
            read_object(&mut reader, ReadTimeouts::default()).await,
            Err(ReadError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_mid_metadata_times_out() {
        // Arrange
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"{\"event\":").await.unwrap();
        let mut reader = BufReader::new(client);

        // Act – nothing more arrives; the server half stays open
        let result = read_object(&mut reader, ReadTimeouts::default()).await;

        // Assert
        assert!(matches!(
            result,
            Err(ReadError::TimedOut {
                phase: ReadPhase::Metadata,
                ..
            })
        ));
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_mid_payload_times_out() {
        // Arrange
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"{\"size\":10}\0abc").await.unwrap();
        let mut reader = BufReader::new(client);

        // Act
        let result = read_object(&mut reader, ReadTimeouts::default()).await;

        // Assert
        match result {
            Err(ReadError::TimedOut { phase, elapsed }) => {
                assert_eq!(phase, ReadPhase::Payload);
                assert!(elapsed >= Duration::from_secs(5));
            }
            other => panic!("expected payload timeout, got {other:?}"),
        }
        drop(server);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trickle_within_inactivity_still_hits_total_timeout() {
        // Arrange – one byte every 4s never trips the 5s inactivity clock
        let (client, mut server) = tokio::io::duplex(1024);
        let sender = tokio::spawn(async move {
            for byte in b"{\"event\":\"slow\"}" {
                if server.write_all(std::slice::from_ref(byte)).await.is_err() {
                    break;
                }
                time::sleep(Duration::from_secs(4)).await;
            }
            server
        });
        let mut reader = BufReader::new(client);
        let timeouts = ReadTimeouts {
            inactivity: Duration::from_secs(5),
            total: Duration::from_secs(20),
        };

        // Act
        let started = Instant::now();
        let result = read_object(&mut reader, timeouts).await;

        // Assert
        assert!(matches!(
            result,
            Err(ReadError::TimedOut {
                phase: ReadPhase::Metadata,
                ..
            })
        ));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(20) && waited < Duration::from_secs(21));
        drop(reader);
        let _ = sender.await;
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let mut reader = BufReader::new(&b"{not json}\0"[..]);
        let result = read_object(&mut reader, ReadTimeouts::default()).await;
        assert!(matches!(
            result,
            Err(ReadError::Malformed(ProtocolError::MalformedMetadata(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed() {
        let mut reader = BufReader::new(&b"\xff\xfe\0"[..]);
        let result = read_object(&mut reader, ReadTimeouts::default()).await;
        assert!(matches!(
            result,
            Err(ReadError::Malformed(ProtocolError::MetadataNotUtf8))
        ));
    }

    #[tokio::test]
    async fn test_unterminated_metadata_over_limit_is_rejected() {
        let bytes = vec![b' '; METADATA_MAX_SIZE + 100];
        let mut reader = BufReader::new(&bytes[..]);
        let result = read_object(&mut reader, ReadTimeouts::default()).await;
        assert!(matches!(
            result,
            Err(ReadError::Malformed(ProtocolError::MetadataTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_closed() {
        let mut reader = BufReader::new(&b"{\"size\":4}\0ab"[..]);
        let result = read_object(&mut reader, ReadTimeouts::default()).await;
        assert!(matches!(result, Err(ReadError::Closed)));
    }

    #[tokio::test]
    async fn test_negative_size_is_malformed() {
        let mut reader = BufReader::new(&b"{\"size\":-1}\0"[..]);
        let result = read_object(&mut reader, ReadTimeouts::default()).await;
        assert!(matches!(
            result,
            Err(ReadError::Malformed(ProtocolError::InvalidSize(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_read_object_returns_none_when_idle() {
        // Arrange
        let (client, _server) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(client);

        // Act
        let result = try_read_object(&mut reader, Duration::from_millis(100), ReadTimeouts::default())
            .await
            .unwrap();

        // Assert
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_try_read_object_reads_available_object() {
        let mut original = MeshObject::event("ping");
        let bytes = frame(&mut original);
        let mut reader = BufReader::new(&bytes[..]);

        let result = try_read_object(&mut reader, Duration::from_millis(100), ReadTimeouts::default())
            .await
            .unwrap();

        assert_eq!(result, Some(original));
    }

    #[tokio::test]
    async fn test_try_read_object_on_closed_stream_is_closed() {
        let mut reader = BufReader::new(&b""[..]);
        let result = try_read_object(&mut reader, Duration::from_millis(100), ReadTimeouts::default()).await;
        assert!(matches!(result, Err(ReadError::Closed)));
    }

    #[tokio::test]
    async fn test_write_object_writes_whole_frame() {
        // Arrange
        let mut obj = sample();
        let mut sink = Vec::new();

        // Act
        let written = write_object(&mut sink, &mut obj).await.unwrap();

        // Assert
        assert_eq!(written, sink.len());
        assert_eq!(sink, encode_object(&mut obj.clone()).unwrap());
    }

    #[tokio::test]
    async fn test_write_object_transport_that_stops_accepting_is_short_write() {
        // Arrange – the sink only has room for 8 bytes, then reports Ok(0)
        let mut room = [0u8; 8];
        let mut sink = std::io::Cursor::new(&mut room[..]);
        let mut obj = sample();

        // Act
        let result = write_object(&mut sink, &mut obj).await;

        // Assert
        let expected = encode_object(&mut obj.clone()).unwrap().len();
        assert!(matches!(
            result,
            Err(NetworkError::ShortWrite { expected: e }) if e == expected
        ));
    }

    #[tokio::test]
    async fn test_write_object_to_closed_peer_is_io_error() {
        let (mut client, server) = tokio::io::duplex(8);
        drop(server);
        let mut obj = sample();

        let result = write_object(&mut client, &mut obj).await;

        assert!(matches!(result, Err(NetworkError::Io(_))));
    }

    #[tokio::test]
    async fn test_write_object_sends_multi_megabyte_payload_over_tcp() {
        // Arrange – far larger than any kernel send buffer
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            read_object(&mut reader, ReadTimeouts::default()).await
        });
        let payload: Vec<u8> = (0..6 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let mut obj = MeshObject::with_payload(Metadata::new(), payload.clone(), "application/octet-stream");
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        // Act
        let written = write_object(&mut client, &mut obj).await.unwrap();

        // Assert
        let received = server.await.unwrap().unwrap();
        assert_eq!(written, encode_object(&mut obj.clone()).unwrap().len());
        assert_eq!(received.id(), obj.id());
        assert_eq!(received.size(), payload.len());
        assert_eq!(received.payload(), Some(payload.as_slice()));
    }
}
