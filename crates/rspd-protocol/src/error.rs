//! # Error Types
//!
//! Three layers of failure, each with its own enum:
//!
//! - [`TransportError`]: a packet could not be taken off the wire. Bad
//!   checksums and framing are recoverable (the client retransmits); a
//!   closed or broken socket is fatal.
//! - [`CommandError`]: a well-formed command could not be carried out. Every
//!   variant maps onto one `E<nn>` reply, except `Unsupported` which maps
//!   onto the empty reply.
//! - [`SessionError`]: what ends a session or the server abnormally.

use std::io;

use rspd_core::DebugError;
use thiserror::Error;

/// Failure to receive or send one packet.
#[derive(Error, Debug)]
pub enum TransportError
{
    /// Checksum digits did not match the payload. The packet was NAKed.
    #[error("Checksum mismatch: packet says {expected:02x}, payload sums to {computed:02x}")]
    ChecksumMismatch
    {
        /// Checksum sent by the client
        expected: u8,
        /// Checksum computed over the received payload
        computed: u8,
    },

    /// Framing was broken (for example non-hex checksum digits).
    #[error("Malformed packet: {0}")]
    Malformed(String),

    /// Payload exceeded the negotiated packet size. The packet was NAKed.
    #[error("Packet exceeds {limit} bytes")]
    PacketTooLarge
    {
        /// Largest accepted payload
        limit: usize,
    },

    /// The client closed the connection.
    #[error("Connection closed by client")]
    ConnectionClosed,

    /// The socket failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError
{
    /// Whether the connection is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool
    {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }
}

/// Failure to carry out a command, reported to the client as `E<nn>`.
#[derive(Error, Debug)]
pub enum CommandError
{
    /// Bad argument encoding or packet shape (`E01`)
    #[error("Malformed command: {0}")]
    Malformed(String),

    /// No target is attached (`E02`)
    #[error("No target attached")]
    NotAttached,

    /// The target is running (`E03`)
    #[error("Target is running")]
    Running,

    /// A breakpoint or watchpoint table is full (`E04`)
    #[error("Table full: {0}")]
    TableFull(String),

    /// Breakpoint or watchpoint already present (`E05`)
    #[error("Duplicate breakpoint or watchpoint at 0x{0:x}")]
    Duplicate(u64),

    /// No breakpoint or watchpoint to remove (`E06`)
    #[error("No breakpoint or watchpoint at 0x{0:x}")]
    NotFound(u64),

    /// The host knows no target with this id (`E07`)
    #[error("Unknown target id {0}")]
    UnknownTarget(u32),

    /// The session is already attached (`E08`)
    #[error("Already attached to a target")]
    AlreadyAttached,

    /// `m` asked for more bytes than a reply packet can carry (`E09`)
    #[error("Read of {requested} bytes exceeds limit of {limit}")]
    ReadTooLarge
    {
        requested: usize,
        limit: usize,
    },

    /// Live memory access failed (`E0e`)
    #[error("Memory access failed: {0}")]
    MemoryAccess(String),

    /// Any other host failure (`E10`)
    #[error("Host failure: {0}")]
    Host(String),

    /// The host lacks the facility; answered with the empty reply
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl CommandError
{
    /// Numeric error code, or `None` for the empty "unsupported" reply.
    #[must_use]
    pub fn code(&self) -> Option<u8>
    {
        let code = match self {
            Self::Malformed(_) => 0x01,
            Self::NotAttached => 0x02,
            Self::Running => 0x03,
            Self::TableFull(_) => 0x04,
            Self::Duplicate(_) => 0x05,
            Self::NotFound(_) => 0x06,
            Self::UnknownTarget(_) => 0x07,
            Self::AlreadyAttached => 0x08,
            Self::ReadTooLarge { .. } => 0x09,
            Self::MemoryAccess(_) => 0x0e,
            Self::Host(_) => 0x10,
            Self::Unsupported(_) => return None,
        };
        Some(code)
    }

    /// Reply payload for this error.
    ///
    /// ```rust
    /// use rspd_protocol::error::CommandError;
    ///
    /// assert_eq!(CommandError::MemoryAccess("unmapped".into()).reply(), "E0e");
    /// assert_eq!(CommandError::Unsupported("watchpoints").reply(), "");
    /// ```
    #[must_use]
    pub fn reply(&self) -> String
    {
        self.code().map(|code| format!("E{code:02x}")).unwrap_or_default()
    }
}

impl From<DebugError> for CommandError
{
    fn from(err: DebugError) -> Self
    {
        match err {
            DebugError::ProcessNotFound(pid) => Self::UnknownTarget(pid),
            DebugError::InvalidArgument(details) => Self::Malformed(details),
            DebugError::NotAttached => Self::NotAttached,
            DebugError::NotStopped => Self::Running,
            DebugError::NoBreakpoint(address) | DebugError::NoWatchpoint(address) => Self::NotFound(address),
            DebugError::DuplicateBreakpoint(address) | DebugError::DuplicateWatchpoint(address) => {
                Self::Duplicate(address)
            }
            DebugError::ResourceExhausted(details) => Self::TableFull(details),
            err @ DebugError::MemoryAccess { .. } => Self::MemoryAccess(err.to_string()),
            DebugError::Unsupported(what) => Self::Unsupported(what),
            err @ (DebugError::AttachFailed(_)
            | DebugError::SuspendFailed(_)
            | DebugError::ResumeFailed(_)
            | DebugError::RegisterAccess(_)
            | DebugError::Io(_)) => Self::Host(err.to_string()),
        }
    }
}

/// Failure that ends a session or stops the server.
#[derive(Error, Debug)]
pub enum SessionError
{
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to bind {address}: {source}")]
    Bind
    {
        address: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias for session-level results.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_codes_are_stable()
    {
        let cases = [
            (CommandError::Malformed(String::new()), "E01"),
            (CommandError::NotAttached, "E02"),
            (CommandError::Running, "E03"),
            (CommandError::TableFull(String::new()), "E04"),
            (CommandError::Duplicate(0), "E05"),
            (CommandError::NotFound(0), "E06"),
            (CommandError::UnknownTarget(1), "E07"),
            (CommandError::AlreadyAttached, "E08"),
            (
                CommandError::ReadTooLarge {
                    requested: 4096,
                    limit: 2046,
                },
                "E09",
            ),
            (CommandError::MemoryAccess(String::new()), "E0e"),
            (CommandError::Host(String::new()), "E10"),
        ];
        for (error, reply) in cases {
            assert_eq!(error.reply(), reply, "{error}");
        }
    }

    #[test]
    fn test_debug_error_mapping()
    {
        assert!(matches!(
            CommandError::from(DebugError::ProcessNotFound(42)),
            CommandError::UnknownTarget(42)
        ));
        assert!(matches!(CommandError::from(DebugError::NotStopped), CommandError::Running));
        assert!(matches!(
            CommandError::from(DebugError::DuplicateWatchpoint(0x7000)),
            CommandError::Duplicate(0x7000)
        ));
        assert_eq!(CommandError::from(DebugError::Unsupported("watchpoints")).reply(), "");
        assert_eq!(CommandError::from(DebugError::SuspendFailed("gone".into())).reply(), "E10");
    }

    #[test]
    fn test_fatal_transport_errors()
    {
        assert!(TransportError::ConnectionClosed.is_fatal());
        assert!(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal());
        assert!(!TransportError::ChecksumMismatch {
            expected: 0,
            computed: 1
        }
        .is_fatal());
        assert!(!TransportError::PacketTooLarge { limit: 4096 }.is_fatal());
    }
}
