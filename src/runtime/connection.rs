//! Per-connection read-respond loop.
//!
//! A `Handler` owns one stream and alternates between two operations:
//! read whatever the peer sent, then write the fixed response. Each
//! operation gets its own deadline, computed from the moment it starts, so a
//! slow but steady client is only cut off when a single read or write stalls.
//!
//! The loop has two states. It stays active while rounds succeed and closes
//! on the first failure. Closing consumes the handler, which drops (and so
//! closes) the stream on every exit path.

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::config::Config;
use crate::protocols::hello;

/// Settings shared read-only by every handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Deadline for each read; `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Deadline for each write; `None` waits forever.
    pub write_timeout: Option<Duration>,
    /// Size of the read buffer. Request bytes are discarded.
    pub buffer_size: usize,
    /// Payload written once per round.
    pub response: Bytes,
}

impl HandlerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            buffer_size: config.buffer_size,
            response: hello::response(),
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
            buffer_size: 1024,
            response: hello::response(),
        }
    }
}

/// Why a handler stopped.
#[derive(Debug)]
pub enum CloseReason {
    /// No data arrived before the read deadline.
    ReadTimeout,
    /// The read returned an error.
    ReadFailed(io::Error),
    /// The peer closed its side of the stream.
    PeerClosed,
    /// The response could not be flushed before the write deadline.
    WriteTimeout,
    /// The write returned an error.
    WriteFailed(io::Error),
    /// The write succeeded but moved fewer bytes than the payload holds.
    ShortWrite { written: usize, expected: usize },
}

impl CloseReason {
    /// True when the failure must take the whole process down rather than
    /// just this connection.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, CloseReason::ShortWrite { .. })
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::ReadTimeout => write!(f, "Reading failed: deadline exceeded"),
            CloseReason::ReadFailed(e) => write!(f, "Reading failed: {e}"),
            CloseReason::PeerClosed => write!(f, "Reading failed: EOF"),
            CloseReason::WriteTimeout => write!(f, "Writing failed: deadline exceeded"),
            CloseReason::WriteFailed(e) => write!(f, "Writing failed: {e}"),
            CloseReason::ShortWrite { written, expected } => {
                write!(f, "Writing failed: wrote {written} of {expected} bytes")
            }
        }
    }
}

impl std::error::Error for CloseReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CloseReason::ReadFailed(e) | CloseReason::WriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of a finished handler.
#[derive(Debug)]
pub struct Closed {
    pub reason: CloseReason,
    /// Completed read-then-write rounds.
    pub rounds: u64,
}

/// Owns one connection for its whole lifetime.
pub struct Handler<S> {
    stream: S,
    buf: Vec<u8>,
    rounds: u64,
}

impl<S> Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, buffer_size: usize) -> Self {
        Self {
            stream,
            buf: vec![0; buffer_size],
            rounds: 0,
        }
    }

    /// Run rounds until one fails. The stream is dropped before returning.
    pub async fn run(mut self, config: &HandlerConfig) -> Closed {
        loop {
            if let Err(reason) = self.round(config).await {
                return Closed {
                    reason,
                    rounds: self.rounds,
                };
            }
            self.rounds += 1;
        }
    }

    async fn round(&mut self, config: &HandlerConfig) -> Result<(), CloseReason> {
        let n = with_deadline(config.read_timeout, self.stream.read(&mut self.buf))
            .await
            .ok_or(CloseReason::ReadTimeout)?
            .map_err(CloseReason::ReadFailed)?;
        if n == 0 {
            return Err(CloseReason::PeerClosed);
        }

        // One write call, so a partial transfer is observable.
        let written = with_deadline(config.write_timeout, self.stream.write(&config.response))
            .await
            .ok_or(CloseReason::WriteTimeout)?
            .map_err(CloseReason::WriteFailed)?;
        if written != config.response.len() {
            return Err(CloseReason::ShortWrite {
                written,
                expected: config.response.len(),
            });
        }

        Ok(())
    }
}

/// Await `fut` until `now + timeout`. `None` when the deadline passed first.
async fn with_deadline<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(timeout) => timeout_at(Instant::now() + timeout, fut).await.ok(),
        None => Some(fut.await),
    }
}
