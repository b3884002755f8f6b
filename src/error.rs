//! Error types for the SCPI client.
//!
//! Two levels, using `thiserror`:
//!
//! - **`DeviceError`**: configuration and connection faults. Invalid address or
//!   port, an oversized timeout, connect timeout or refusal, a query attempted
//!   while disconnected, and an instrument whose identity matches no supported
//!   dialect.
//! - **`QueryError`**: faults during a protocol exchange. Send or receive
//!   timeout, an acknowledgement other than `1`, a non-zero error-list code,
//!   or the transport failing mid-exchange. It refines `DeviceError` through
//!   the `DeviceError::Query` variant.
//!
//! Each layer may wrap a `QueryError` in [`QueryError::Context`] to say what it
//! was doing. [`QueryError::root`] always recovers the original fault, so a
//! caller can tell "timeout" from "device reported an error" regardless of how
//! many layers added context.

use crate::endpoint::Endpoint;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the device error type.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Configuration and connection faults.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Address is not a literal IPv4/IPv6 address
    #[error("Invalid IP address '{0}'")]
    InvalidAddress(String),

    /// Port is 0 or above 65535
    #[error("Invalid TCP port {0} (must be 1-65535)")]
    InvalidPort(u32),

    /// Timeout above the configured ceiling
    #[error("SCPI timeout of {requested_ms} ms is too large (limit is {limit_ms} ms)")]
    TimeoutTooLarge {
        /// Rejected value
        requested_ms: u64,
        /// Ceiling
        limit_ms: u64,
    },

    /// The TCP handshake did not finish before the deadline
    #[error("Error connecting to {endpoint}: timeout of {timeout:?} expired")]
    ConnectTimeout {
        /// Target of the attempt
        endpoint: Endpoint,
        /// Deadline that expired
        timeout: Duration,
    },

    /// The connection was refused or failed before the deadline
    #[error("Error connecting to {endpoint}")]
    ConnectFailed {
        /// Target of the attempt
        endpoint: Endpoint,
        /// Socket error
        #[source]
        source: std::io::Error,
    },

    /// Query attempted without an open connection
    #[error("Incorrect socket state (not connected)")]
    NotConnected,

    /// Identity matched no supported dialect
    #[error(
        "Unsupported generator '{identity}'. Activate a SCPI command set compatible with \
         Rohde & Schwarz or Keysight/Agilent generators; such an option is usually \
         available in the generator settings"
    )]
    UnsupportedDevice {
        /// Trimmed `*IDN?` reply
        identity: String,
    },

    /// Fault during a protocol exchange
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Faults during one protocol exchange.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The line was not handed to the transport in time
    #[error("Sending timeout of {0:?} expired")]
    SendTimeout(Duration),

    /// No reply became readable in time
    #[error("Receiving timeout of {0:?} expired")]
    ReceiveTimeout(Duration),

    /// `*OPC?` answered with something other than `1`
    #[error("The device has returned an unexpected OPC code {0:?} (not 1)")]
    UnexpectedAck(String),

    /// Error list returned a non-zero code; carries the full reply
    #[error("Device reported an error: {0}")]
    DeviceReported(String),

    /// The peer closed the stream
    #[error("Connection closed by the device")]
    ConnectionClosed,

    /// Any other transport failure
    #[error("Transport I/O error")]
    Io(#[source] std::io::Error),

    /// What the caller was doing when `source` occurred
    #[error("{context}")]
    Context {
        /// Failed operation
        context: String,
        /// Underlying fault
        #[source]
        source: Box<QueryError>,
    },
}

impl QueryError {
    /// Wrap this fault with a description of the failed operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        QueryError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost fault, with every [`QueryError::Context`] layer peeled off.
    pub fn root(&self) -> &QueryError {
        let mut current = self;
        while let QueryError::Context { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// True for send and receive timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.root(),
            QueryError::SendTimeout(_) | QueryError::ReceiveTimeout(_)
        )
    }
}

impl DeviceError {
    /// The exchange fault, if this error is the query refinement.
    pub fn as_query(&self) -> Option<&QueryError> {
        match self {
            DeviceError::Query(err) => Some(err),
            _ => None,
        }
    }

    /// True for connect, send and receive timeouts.
    pub fn is_timeout(&self) -> bool {
        match self {
            DeviceError::ConnectTimeout { .. } => true,
            DeviceError::Query(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Adds operation context to the query refinement of a [`DeviceError`].
///
/// Configuration and connection faults already describe themselves and pass
/// through unchanged.
pub trait WithContext<T> {
    /// Wrap a query fault with the text returned by `context`.
    fn with_query_context<F, S>(self, context: F) -> DeviceResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> WithContext<T> for DeviceResult<T> {
    fn with_query_context<F, S>(self, context: F) -> DeviceResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| match err {
            DeviceError::Query(query) => DeviceError::Query(query.context(context())),
            other => other,
        })
    }
}
