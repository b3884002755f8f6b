//! Query engine: one TCP connection, one line out, one read in.
//!
//! Turns a non-blocking tokio socket into a bounded request/response
//! primitive. Every wait (connect, write, read) is bounded by its own
//! [`Deadline`], armed fresh for that phase, so a slow write never eats into
//! the read budget. The worst case for one query is therefore twice the
//! configured timeout.
//!
//! ## Response framing
//!
//! `send_query` returns exactly the bytes available when the socket first
//! reports readability. There is no terminator scanning or reassembly: short
//! SCPI replies (`1\n`, an `*IDN?` string, an error-list entry) arrive in one
//! segment in practice. A reply split across several TCP segments would be
//! returned truncated.
//!
//! A receive timeout leaves the connection open, and the instrument may still
//! answer later. Bytes already buffered when the next exchange starts are
//! discarded before its line is written, so a late `1` never acknowledges a
//! different command. A reply arriving after that point is still mismatched.

use crate::endpoint::Endpoint;
use crate::error::{DeviceError, DeviceResult, QueryError};
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::error::Elapsed;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Timeout applied to every phase until changed.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Ceiling for the configurable timeout. A large value risks hanging the
/// control program; 2-3 seconds is usually more than enough.
pub const MAX_TIMEOUT_MS: u64 = 100_000;

const LINE_TERMINATOR: &str = "\n";
const READ_CHUNK: usize = 4096;

/// Connection lifecycle. Exactly one is current at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// TCP handshake in progress
    Connecting,
    /// Socket open; queries allowed
    Connected,
}

/// Single-shot expiry bound to one wait operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Arm a deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            timeout,
        }
    }

    /// Length of the wait this deadline bounds.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True once the expiry instant has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Drive `fut` until it completes or the deadline passes.
    pub async fn wait<F: Future>(self, fut: F) -> Result<F::Output, Elapsed> {
        timeout_at(self.expires_at, fut).await
    }
}

/// Check a timeout in milliseconds against [`MAX_TIMEOUT_MS`].
pub fn validate_timeout_ms(timeout_ms: u64) -> DeviceResult<Duration> {
    if timeout_ms > MAX_TIMEOUT_MS {
        return Err(DeviceError::TimeoutTooLarge {
            requested_ms: timeout_ms,
            limit_ms: MAX_TIMEOUT_MS,
        });
    }
    Ok(Duration::from_millis(timeout_ms))
}

/// Owns the socket of one instrument connection.
///
/// Methods take `&mut self`: only one exchange can be in flight, and replies
/// are matched to queries purely by order.
#[derive(Debug)]
pub struct QueryEngine {
    endpoint: Endpoint,
    timeout: Duration,
    state: ConnectionState,
    stream: Option<TcpStream>,
}

impl QueryEngine {
    /// Create a disconnected engine. No network activity happens here.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            state: ConnectionState::Disconnected,
            stream: None,
        }
    }

    /// Address and port of the instrument.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Per-phase timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the per-phase timeout for subsequent operations.
    ///
    /// # Errors
    /// `DeviceError::TimeoutTooLarge` above [`MAX_TIMEOUT_MS`]; the previous
    /// value stays in effect.
    pub fn set_timeout(&mut self, timeout_ms: u64) -> DeviceResult<()> {
        self.timeout = validate_timeout_ms(timeout_ms)?;
        Ok(())
    }

    /// True only when connected with a live socket.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    /// Open the connection, waiting at most one timeout for the handshake.
    ///
    /// Any existing connection is closed first. On failure the engine is
    /// left `Disconnected`.
    pub async fn connect(&mut self) -> DeviceResult<()> {
        self.disconnect().await;

        self.state = ConnectionState::Connecting;
        let deadline = Deadline::after(self.timeout);
        debug!(endpoint = %self.endpoint, timeout = ?self.timeout, "Connecting to instrument");

        match deadline.wait(TcpStream::connect(self.endpoint.socket_addr())).await {
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                warn!(endpoint = %self.endpoint, "Connection timeout expired");
                Err(DeviceError::ConnectTimeout {
                    endpoint: self.endpoint,
                    timeout: deadline.timeout(),
                })
            }
            Ok(Err(source)) => {
                self.state = ConnectionState::Disconnected;
                warn!(endpoint = %self.endpoint, error = %source, "Connection failed");
                Err(DeviceError::ConnectFailed {
                    endpoint: self.endpoint,
                    source,
                })
            }
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(endpoint = %self.endpoint, error = %e, "Failed to set TCP_NODELAY");
                }
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                info!(endpoint = %self.endpoint, "Connected to instrument");
                Ok(())
            }
        }
    }

    /// Request a graceful close. Safe to call in any state, any number of times.
    pub async fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        match Deadline::after(self.timeout).wait(stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(endpoint = %self.endpoint, error = %e, "Shutdown reported an error"),
            Err(_) => debug!(endpoint = %self.endpoint, "Shutdown did not complete in time"),
        }
        info!(endpoint = %self.endpoint, "Disconnected from instrument");
    }

    /// Send `text` plus the line terminator and return the raw reply.
    ///
    /// # Errors
    /// - `DeviceError::NotConnected` when called outside `Connected`
    /// - `QueryError::SendTimeout` if the line is not handed to the transport in time
    /// - `QueryError::ReceiveTimeout` if no reply becomes readable in time
    /// - `QueryError::ConnectionClosed` / `QueryError::Io` if the transport fails;
    ///   the engine drops to `Disconnected`
    pub async fn send_query(&mut self, text: &str) -> DeviceResult<String> {
        let timeout = self.timeout;
        self.exchange(text, timeout).await
    }

    /// Like [`send_query`](Self::send_query) with a one-off timeout.
    pub async fn send_query_with_timeout(
        &mut self,
        text: &str,
        timeout: Duration,
    ) -> DeviceResult<String> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        validate_timeout_ms(timeout_ms)?;
        self.exchange(text, timeout).await
    }

    async fn exchange(&mut self, text: &str, timeout: Duration) -> DeviceResult<String> {
        if self.state != ConnectionState::Connected {
            return Err(DeviceError::NotConnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(DeviceError::NotConnected);
        };

        debug!(endpoint = %self.endpoint, command = text, "SCPI query");
        let result = match discard_stale(stream) {
            Ok(discarded) => {
                if discarded > 0 {
                    warn!(endpoint = %self.endpoint, discarded, "Discarded late reply to an earlier query");
                }
                round_trip(stream, text, timeout).await
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(response) => {
                debug!(endpoint = %self.endpoint, response = response.trim_end(), "SCPI response");
            }
            Err(err @ (QueryError::ConnectionClosed | QueryError::Io(_))) => {
                warn!(endpoint = %self.endpoint, error = ?err, "Transport failed, dropping connection");
                self.stream = None;
                self.state = ConnectionState::Disconnected;
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, command = text, error = %err, "SCPI query failed");
            }
        }

        result.map_err(DeviceError::from)
    }
}

async fn round_trip(
    stream: &mut TcpStream,
    text: &str,
    timeout: Duration,
) -> Result<String, QueryError> {
    let line = format!("{text}{LINE_TERMINATOR}");

    Deadline::after(timeout)
        .wait(write_line(stream, line.as_bytes()))
        .await
        .map_err(|_| QueryError::SendTimeout(timeout))?
        .map_err(QueryError::Io)?;

    let bytes = Deadline::after(timeout)
        .wait(read_available(stream))
        .await
        .map_err(|_| QueryError::ReceiveTimeout(timeout))??;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_line(stream: &mut TcpStream, line: &[u8]) -> std::io::Result<()> {
    stream.write_all(line).await?;
    stream.flush().await
}

/// Drain input already buffered without waiting. Returns the byte count.
fn discard_stale(stream: &TcpStream) -> Result<usize, QueryError> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut discarded = 0;
    loop {
        match stream.try_read(&mut chunk) {
            Ok(0) => return Err(QueryError::ConnectionClosed),
            Ok(n) => discarded += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(discarded),
            Err(e) => return Err(QueryError::Io(e)),
        }
    }
}

/// Wait for readability, then drain what is already buffered without blocking.
async fn read_available(stream: &TcpStream) -> Result<Vec<u8>, QueryError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        stream.readable().await.map_err(QueryError::Io)?;

        let mut response = Vec::new();
        loop {
            match stream.try_read(&mut chunk) {
                Ok(0) if response.is_empty() => return Err(QueryError::ConnectionClosed),
                Ok(0) => return Ok(response),
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(QueryError::Io(e)),
            }
        }

        // Readiness can be spurious; keep waiting under the same deadline.
        if !response.is_empty() {
            return Ok(response);
        }
    }
}
