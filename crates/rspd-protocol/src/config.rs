//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rspd_core::types::RegisterLayout;
use rspd_core::{Architecture, ProcessId};

use crate::error::SessionError;

/// Default TCP port (the port GDB users conventionally type after `target remote :`)
pub const DEFAULT_PORT: u16 = 1234;

/// Default maximum packet payload, advertised in `qSupported`
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4096;

/// Default capacity of the memory cache line
pub const DEFAULT_CACHE_LINE_SIZE: usize = 256;

/// Smallest packet size that still fits a full `G` packet (and so a `g`
/// reply) for every supported architecture.
#[must_use]
pub fn min_packet_size() -> usize
{
    [Architecture::X86_64, Architecture::Arm64]
        .into_iter()
        .map(|architecture| 1 + 2 * RegisterLayout::for_architecture(architecture).byte_len())
        .max()
        .unwrap_or(DEFAULT_MAX_PACKET_SIZE)
}

/// Settings shared by the server and every session it runs
///
/// ## Example
///
/// ```rust
/// use rspd_protocol::config::ServerConfig;
///
/// let config = ServerConfig {
///     port: 0,
///     ..ServerConfig::default()
/// };
/// assert_eq!(config.max_read_len(), (4096 - 4) / 2);
/// config.validate()?;
/// # Ok::<(), rspd_protocol::error::SessionError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig
{
    /// Interface to listen on
    pub bind: IpAddr,
    /// TCP port; 0 picks an ephemeral port
    pub port: u16,
    /// Largest packet payload accepted or sent
    pub max_packet_size: usize,
    /// Largest read that populates the memory cache
    pub cache_line_size: usize,
    /// Breakpoint table slots
    pub breakpoint_capacity: usize,
    /// Watchpoint table slots
    pub watchpoint_capacity: usize,
    /// How long to wait for a stop after an interrupt before forcing one
    pub interrupt_timeout: Duration,
    /// Target to attach to when a client connects
    pub attach_pid: Option<ProcessId>,
}

impl Default for ServerConfig
{
    fn default() -> Self
    {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            cache_line_size: DEFAULT_CACHE_LINE_SIZE,
            breakpoint_capacity: 64,
            watchpoint_capacity: 4,
            interrupt_timeout: Duration::from_secs(2),
            attach_pid: None,
        }
    }
}

impl ServerConfig
{
    /// Address the listener binds.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr
    {
        SocketAddr::new(self.bind, self.port)
    }

    /// Largest `m` length whose hex reply fits in one packet.
    #[must_use]
    pub fn max_read_len(&self) -> usize
    {
        self.max_packet_size.saturating_sub(4) / 2
    }

    /// Check the settings for values no session can work with.
    ///
    /// ## Errors
    ///
    /// - `Config`: the packet size is below [`min_packet_size`], or a table
    ///   has no slots
    pub fn validate(&self) -> Result<(), SessionError>
    {
        let minimum = min_packet_size();
        if self.max_packet_size < minimum {
            return Err(SessionError::Config(format!(
                "max packet size {} is below the minimum of {minimum}",
                self.max_packet_size
            )));
        }
        if self.breakpoint_capacity == 0 {
            return Err(SessionError::Config("breakpoint capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults()
    {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:1234");
        assert_eq!(config.max_read_len(), 2046);
        assert_eq!(config.breakpoint_capacity, 64);
        assert_eq!(config.watchpoint_capacity, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_packets()
    {
        let config = ServerConfig {
            max_packet_size: 16,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn test_minimum_packet_fits_register_stream()
    {
        // AArch64: 33 eight-byte registers and cpsr, as hex, plus the `G`.
        assert_eq!(min_packet_size(), 1 + 2 * (33 * 8 + 4));

        let too_small = ServerConfig {
            max_packet_size: 256,
            ..ServerConfig::default()
        };
        assert!(matches!(too_small.validate(), Err(SessionError::Config(_))));

        let short_by_one = ServerConfig {
            max_packet_size: min_packet_size() - 1,
            ..ServerConfig::default()
        };
        assert!(short_by_one.validate().is_err());

        let exact = ServerConfig {
            max_packet_size: min_packet_size(),
            ..ServerConfig::default()
        };
        assert!(exact.validate().is_ok());
    }
}
