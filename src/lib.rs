//! SCPI-over-TCP client for laboratory signal generators.
//!
//! Three layers, leaves first:
//!
//! - [`engine`]: owns the TCP connection; every connect, write and read wait is
//!   bounded by its own deadline
//! - [`command`]: SCPI conventions shared by all instruments (`*RST`, `*CLS`,
//!   `*IDN?`, `*OPC?` acknowledgement, `SYST:ERR?`)
//! - [`generator`]: resolves the vendor dialect from the identity string and
//!   translates generator operations into that dialect's mnemonics
//!
//! Control flow is strictly sequential: each operation issues its queries one
//! after another, and each query completes a full round trip before the next.

pub mod command;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod generator;
pub mod logging;

pub use command::ScpiDevice;
pub use config::{ConfigError, GeneratorConfig};
pub use endpoint::Endpoint;
pub use engine::{ConnectionState, Deadline, QueryEngine, MAX_TIMEOUT_MS};
pub use error::{DeviceError, DeviceResult, QueryError};
pub use generator::{Dialect, GeneratorSetup, SignalGenerator};
