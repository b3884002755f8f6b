//! SCPI conventions shared by every instrument.
//!
//! Built on [`QueryEngine`]: reset, clear-state, identification, the generic
//! error list, and command execution acknowledged through `*OPC?`.

use crate::endpoint::Endpoint;
use crate::engine::{ConnectionState, QueryEngine};
use crate::error::{DeviceResult, QueryError, WithContext};
use std::time::Duration;
use tracing::{debug, info};

/// Identification query.
pub const IDN_QUERY: &str = "*IDN?";
/// Factory reset.
pub const RESET_COMMAND: &str = "*RST;";
/// Clear status registers and the error queue.
pub const CLEAR_STATE_COMMAND: &str = "*CLS;";
/// Generic error list query.
pub const ERROR_QUERY: &str = "SYST:ERR?";

/// Completion request appended to every command.
const OPC_SUFFIX: &str = "; *OPC?";

/// Build the compound line sent for a command: the command itself followed
/// by an operation-complete query in the same round trip.
pub fn with_completion_request(command: &str) -> String {
    format!("{command}{OPC_SUFFIX}")
}

/// Check an `*OPC?` reply. Only the integer `1` acknowledges completion.
pub fn check_acknowledgement(response: &str) -> Result<(), QueryError> {
    match response.trim().parse::<i64>() {
        Ok(1) => Ok(()),
        _ => Err(QueryError::UnexpectedAck(response.trim().to_string())),
    }
}

/// Parse an error-list reply of the form `<code>,"<description>"`.
///
/// Code `0` means the list is empty. Any other code, or a first token that
/// is not an integer, is reported with the full reply text.
pub fn parse_error_list(response: &str) -> Result<(), QueryError> {
    let text = response.trim();
    let code = text.split(',').next().unwrap_or_default().trim();
    match code.parse::<i64>() {
        Ok(0) => Ok(()),
        _ => Err(QueryError::DeviceReported(text.to_string())),
    }
}

/// A SCPI instrument reachable over one TCP connection.
#[derive(Debug)]
pub struct ScpiDevice {
    engine: QueryEngine,
}

impl ScpiDevice {
    /// Create a disconnected device.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            engine: QueryEngine::new(endpoint),
        }
    }

    /// Address and port of the instrument.
    pub fn endpoint(&self) -> &Endpoint {
        self.engine.endpoint()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    /// True while the connection is up.
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Per-phase timeout.
    pub fn timeout(&self) -> Duration {
        self.engine.timeout()
    }

    /// Change the per-phase timeout; see [`QueryEngine::set_timeout`].
    pub fn set_timeout(&mut self, timeout_ms: u64) -> DeviceResult<()> {
        self.engine.set_timeout(timeout_ms)
    }

    /// Open the connection; see [`QueryEngine::connect`].
    pub async fn connect(&mut self) -> DeviceResult<()> {
        self.engine.connect().await
    }

    /// Close the connection. Never fails.
    pub async fn disconnect(&mut self) {
        self.engine.disconnect().await
    }

    /// Send an arbitrary query and return the raw reply.
    pub async fn query(&mut self, text: &str) -> DeviceResult<String> {
        self.engine.send_query(text).await
    }

    /// Execute `command` and wait until the instrument reports it finished.
    ///
    /// The command is sent as `<command>; *OPC?`; the instrument answers `1`
    /// only after it has actually executed the command.
    pub async fn send_command(&mut self, command: &str) -> DeviceResult<()> {
        let status = self.engine.send_query(&with_completion_request(command)).await?;
        check_acknowledgement(&status)?;
        debug!(endpoint = %self.endpoint(), command, "Command acknowledged");
        Ok(())
    }

    /// Identification string (`*IDN?`), trimmed.
    pub async fn identification(&mut self) -> DeviceResult<String> {
        let idn = self
            .engine
            .send_query(IDN_QUERY)
            .await
            .with_query_context(|| "Unable to get an ID string")?;
        Ok(idn.trim().to_string())
    }

    /// Reset the instrument (`*RST`).
    pub async fn reset(&mut self) -> DeviceResult<()> {
        self.send_command(RESET_COMMAND)
            .await
            .with_query_context(|| "Unable to reset the device")?;
        info!(endpoint = %self.endpoint(), "Instrument reset");
        Ok(())
    }

    /// Clear the status registers and error queue (`*CLS`).
    pub async fn clear_state(&mut self) -> DeviceResult<()> {
        self.send_command(CLEAR_STATE_COMMAND)
            .await
            .with_query_context(|| "Unable to clear the device's state register")?;
        info!(endpoint = %self.endpoint(), "Instrument state cleared");
        Ok(())
    }

    /// Query the generic error list (`SYST:ERR?`) and fail on a non-zero code.
    pub async fn check_errors(&mut self) -> DeviceResult<()> {
        let errors = self
            .engine
            .send_query(ERROR_QUERY)
            .await
            .with_query_context(|| "Unable to request the errors list")?;
        parse_error_list(&errors)?;
        Ok(())
    }
}
