//! Microwave signal generator controller.
//!
//! On connection the generator's identity string is classified into one of
//! the supported vendor [`Dialect`]s. Instrument operations are then
//! translated into that dialect's SCPI mnemonics for the lifetime of the
//! controller.
//!
//! Tested command sets: Keysight E8267D (and older Agilent firmware), Rohde &
//! Schwarz SMB100A and SMBV100A.
//!
//! ## Example
//!
//! ```no_run
//! use scpi_generator::{Endpoint, SignalGenerator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let endpoint = Endpoint::new("192.168.1.50", 5025)?;
//! let mut generator = SignalGenerator::connect(endpoint, 2000).await?;
//!
//! generator.set_frequency(9.4e9).await?;
//! generator.set_power(-10.0).await?;
//! generator.disable_alc().await?;
//! generator.set_pulse_width(1.0).await?;
//! generator.set_pulse_period(100.0).await?;
//! generator.enable_pulse_modulation().await?;
//! generator.set_rf_output(true).await?;
//! generator.check_errors().await?;
//!
//! generator.close().await;
//! # Ok(())
//! # }
//! ```

use crate::command::{parse_error_list, ScpiDevice};
use crate::endpoint::Endpoint;
use crate::engine::validate_timeout_ms;
use crate::error::{DeviceError, DeviceResult, WithContext};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Vendor command grammar spoken by the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Identity matched no known vendor
    Unknown,
    /// Rohde & Schwarz SMx series
    RohdeSchwarz,
    /// Keysight, including instruments still identifying as Agilent
    Keysight,
}

/// Identity substrings (lowercase) and the dialect they select.
const DIALECT_TABLE: &[(&str, Dialect)] = &[
    ("agilent", Dialect::Keysight),
    ("keysight", Dialect::Keysight),
    ("rohde&schwarz", Dialect::RohdeSchwarz),
];

impl Dialect {
    /// Classify an identity string by case-insensitive substring match.
    pub fn resolve(identity: &str) -> Dialect {
        let identity = identity.to_lowercase();
        DIALECT_TABLE
            .iter()
            .find(|(needle, _)| identity.contains(needle))
            .map(|(_, dialect)| *dialect)
            .unwrap_or(Dialect::Unknown)
    }

    /// False only for [`Dialect::Unknown`].
    pub fn is_supported(self) -> bool {
        self != Dialect::Unknown
    }

    /// Pulse width command, or `None` for an unsupported dialect.
    pub fn pulse_width_command(self, width_us: f64) -> Option<String> {
        match self {
            Dialect::Keysight => Some(format!(":PULM:INT:PWID {}uS", fixed(width_us, 2))),
            Dialect::RohdeSchwarz => Some(format!(":PULM:WIDT {}uS", fixed(width_us, 2))),
            Dialect::Unknown => None,
        }
    }

    /// Pulse repetition interval command, or `None` for an unsupported dialect.
    pub fn pulse_period_command(self, period_us: f64) -> Option<String> {
        match self {
            Dialect::Keysight => Some(format!(":PULM:INT:PER {}uS", fixed(period_us, 2))),
            Dialect::RohdeSchwarz => Some(format!(":PULM:PER {}uS", fixed(period_us, 2))),
            Dialect::Unknown => None,
        }
    }

    /// Static error list query; only Rohde & Schwarz keeps one.
    pub fn static_error_query(self) -> Option<&'static str> {
        match self {
            Dialect::RohdeSchwarz => Some("SYST:SERR?"),
            Dialect::Keysight | Dialect::Unknown => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Unknown => "unknown",
            Dialect::RohdeSchwarz => "Rohde & Schwarz",
            Dialect::Keysight => "Keysight/Agilent",
        };
        f.write_str(name)
    }
}

/// Fixed-point text with exact halves rounded away from zero (`2.5` -> `3`),
/// unlike `{:.N}` which rounds ties to even.
fn fixed(value: f64, decimals: u8) -> String {
    let scale = 10f64.powi(i32::from(decimals));
    let rounded = (value * scale).round() / scale;
    format!("{rounded:.prec$}", prec = usize::from(decimals))
}

/// Mnemonics shared by every supported dialect.
pub mod commands {
    use super::fixed;

    /// Carrier frequency, rounded to whole Hz.
    pub fn frequency(freq_hz: f64) -> String {
        format!(":FREQ {}Hz", fixed(freq_hz, 0))
    }

    /// Output level with two decimals.
    pub fn power(power_dbm: f64) -> String {
        format!(":POW {}dbm", fixed(power_dbm, 2))
    }

    /// Automatic level control off.
    pub const ALC_OFF: &str = ":POW:ALC OFF";
    /// Pulse modulation on, using the configured width and period.
    pub const PULSE_MODULATION_ON: &str = ":PULM:STAT ON";

    /// RF output switch.
    pub fn rf_output(on: bool) -> &'static str {
        if on {
            ":OUTP:STAT ON"
        } else {
            ":OUTP:STAT OFF"
        }
    }

    /// Front panel display update switch.
    pub fn display_update(on: bool) -> &'static str {
        if on {
            "SYST:DISP:UPD ON"
        } else {
            "SYST:DISP:UPD OFF"
        }
    }
}

/// CW or pulsed output configuration applied in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSetup {
    /// Carrier frequency in Hz
    pub frequency_hz: f64,
    /// Output power in dBm
    pub power_dbm: f64,
    /// Pulse width in microseconds; pulse modulation stays untouched when unset
    #[serde(default)]
    pub pulse_width_us: Option<f64>,
    /// Pulse repetition interval in microseconds
    #[serde(default)]
    pub pulse_period_us: Option<f64>,
    /// Turn ALC off (it usually fails on short pulses)
    #[serde(default)]
    pub alc_off: bool,
    /// Switch RF output on after configuring
    #[serde(default = "default_rf_on")]
    pub rf_on: bool,
    /// Freeze the front panel display while configuring
    #[serde(default)]
    pub display_off: bool,
}

fn default_rf_on() -> bool {
    true
}

impl GeneratorSetup {
    /// True when a pulse width or period is set.
    pub fn is_pulsed(&self) -> bool {
        self.pulse_width_us.is_some() || self.pulse_period_us.is_some()
    }
}

/// A connected signal generator with a resolved dialect.
///
/// Owns its connection exclusively. Dropping the controller releases the
/// socket; [`close`](Self::close) additionally requests a graceful shutdown.
#[derive(Debug)]
pub struct SignalGenerator {
    device: ScpiDevice,
    identity: String,
    dialect: Dialect,
}

impl SignalGenerator {
    /// Connect, identify and classify the generator.
    ///
    /// # Errors
    /// - Any `DeviceError` from timeout validation or connecting
    /// - Query faults while reading the identity
    /// - `DeviceError::UnsupportedDevice` if the identity matches no dialect
    ///
    /// The connection is always closed before an error is returned.
    pub async fn connect(endpoint: Endpoint, timeout_ms: u64) -> DeviceResult<Self> {
        validate_timeout_ms(timeout_ms)?;

        let mut device = ScpiDevice::new(endpoint);
        device.set_timeout(timeout_ms)?;
        device.connect().await?;

        let identity = match device.identification().await {
            Ok(identity) => identity,
            Err(err) => {
                device.disconnect().await;
                return Err(err);
            }
        };

        let dialect = Dialect::resolve(&identity);
        if !dialect.is_supported() {
            warn!(endpoint = %endpoint, identity = %identity, "Unsupported generator");
            device.disconnect().await;
            return Err(DeviceError::UnsupportedDevice { identity });
        }

        info!(endpoint = %endpoint, identity = %identity, dialect = %dialect, "Generator connected");
        Ok(Self {
            device,
            identity,
            dialect,
        })
    }

    /// Trimmed `*IDN?` reply read at connection.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Dialect resolved from the identity.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Address and port of the generator.
    pub fn endpoint(&self) -> &Endpoint {
        self.device.endpoint()
    }

    /// True while the connection is up.
    pub fn is_connected(&self) -> bool {
        self.device.is_connected()
    }

    /// Change the per-phase timeout for subsequent operations.
    pub fn set_timeout(&mut self, timeout_ms: u64) -> DeviceResult<()> {
        self.device.set_timeout(timeout_ms)
    }

    /// Set carrier frequency (whole Hz).
    pub async fn set_frequency(&mut self, freq_hz: f64) -> DeviceResult<()> {
        self.execute(&commands::frequency(freq_hz)).await
    }

    /// Set output power in dBm.
    pub async fn set_power(&mut self, power_dbm: f64) -> DeviceResult<()> {
        self.execute(&commands::power(power_dbm)).await
    }

    /// Turn off automatic level control.
    pub async fn disable_alc(&mut self) -> DeviceResult<()> {
        self.execute(commands::ALC_OFF).await
    }

    /// Set pulse width in microseconds.
    pub async fn set_pulse_width(&mut self, width_us: f64) -> DeviceResult<()> {
        let command = self
            .dialect
            .pulse_width_command(width_us)
            .ok_or_else(|| self.unsupported())?;
        self.execute(&command).await
    }

    /// Set pulse repetition interval in microseconds.
    pub async fn set_pulse_period(&mut self, period_us: f64) -> DeviceResult<()> {
        let command = self
            .dialect
            .pulse_period_command(period_us)
            .ok_or_else(|| self.unsupported())?;
        self.execute(&command).await
    }

    /// Turn pulse modulation on.
    pub async fn enable_pulse_modulation(&mut self) -> DeviceResult<()> {
        self.execute(commands::PULSE_MODULATION_ON).await
    }

    /// Switch RF output on or off.
    pub async fn set_rf_output(&mut self, on: bool) -> DeviceResult<()> {
        self.execute(commands::rf_output(on)).await
    }

    /// Enable or disable front panel display updates.
    ///
    /// Disabling them speeds up long command sequences on most generators.
    pub async fn set_display_update(&mut self, on: bool) -> DeviceResult<()> {
        self.execute(commands::display_update(on)).await
    }

    /// Reset to the factory state (`*RST`).
    pub async fn reset(&mut self) -> DeviceResult<()> {
        self.device.reset().await
    }

    /// Clear the status registers (`*CLS`).
    pub async fn clear_state(&mut self) -> DeviceResult<()> {
        self.device.clear_state().await
    }

    /// Check the static error list. A no-op unless the dialect keeps one.
    pub async fn check_static_errors(&mut self) -> DeviceResult<()> {
        let Some(query) = self.dialect.static_error_query() else {
            return Ok(());
        };

        let errors = self
            .device
            .query(query)
            .await
            .with_query_context(|| "Unable to request the static errors list")?;
        parse_error_list(&errors)?;
        Ok(())
    }

    /// Check the generic error list (`SYST:ERR?`).
    pub async fn check_errors(&mut self) -> DeviceResult<()> {
        self.device.check_errors().await
    }

    /// Apply a full output setup, stopping at the first fault.
    pub async fn apply(&mut self, setup: &GeneratorSetup) -> DeviceResult<()> {
        if setup.display_off {
            self.set_display_update(false).await?;
        }
        self.set_frequency(setup.frequency_hz).await?;
        self.set_power(setup.power_dbm).await?;
        if setup.alc_off {
            self.disable_alc().await?;
        }
        if let Some(width_us) = setup.pulse_width_us {
            self.set_pulse_width(width_us).await?;
        }
        if let Some(period_us) = setup.pulse_period_us {
            self.set_pulse_period(period_us).await?;
        }
        if setup.is_pulsed() {
            self.enable_pulse_modulation().await?;
        }
        self.set_rf_output(setup.rf_on).await?;

        info!(endpoint = %self.endpoint(), ?setup, "Generator setup applied");
        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(mut self) {
        self.device.disconnect().await;
    }

    async fn execute(&mut self, command: &str) -> DeviceResult<()> {
        let dialect = self.dialect;
        self.device
            .send_command(command)
            .await
            .with_query_context(|| format!("{dialect} generator rejected '{command}'"))
    }

    fn unsupported(&self) -> DeviceError {
        DeviceError::UnsupportedDevice {
            identity: self.identity.clone(),
        }
    }
}
