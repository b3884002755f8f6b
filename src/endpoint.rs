//! Validated TCP endpoint of a SCPI instrument.

use crate::error::{DeviceError, DeviceResult};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Raw-socket SCPI port used by most LAN instruments.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// IPv4/IPv6 address plus a TCP port in `1..=65535`.
///
/// Validation happens entirely at construction; no socket is created here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addr: IpAddr,
    port: u16,
}

impl Endpoint {
    /// Parse and validate an endpoint.
    ///
    /// # Errors
    /// - `DeviceError::InvalidAddress` if `addr` is not a literal IPv4/IPv6 address
    /// - `DeviceError::InvalidPort` if `port` is 0 or above 65535
    pub fn new(addr: &str, port: u32) -> DeviceResult<Self> {
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| DeviceError::InvalidAddress(addr.to_string()))?;

        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(DeviceError::InvalidPort(port))?;

        Ok(Self { addr, port })
    }

    /// IP address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// TCP port, never 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address and port as a socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}
