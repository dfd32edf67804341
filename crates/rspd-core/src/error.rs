//! # Error Types
//!
//! Errors reported by the target host and by the breakpoint machinery.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages. The protocol layer maps each variant onto an
//! `E<nn>` reply, so variants stay coarse and stable.

use thiserror::Error;

/// Main error type for target operations
///
/// ## Error Categories
///
/// 1. **Process errors**: ProcessNotFound, AttachFailed, NotAttached
/// 2. **State errors**: NotStopped, SuspendFailed, ResumeFailed
/// 3. **Breakpoint errors**: NoBreakpoint, DuplicateBreakpoint, NoWatchpoint, DuplicateWatchpoint
/// 4. **Resource errors**: ResourceExhausted (table capacity)
/// 5. **Access errors**: MemoryAccess, RegisterAccess
/// 6. **Capability errors**: Unsupported (host lacks a delegated facility)
#[derive(Error, Debug)]
pub enum DebugError
{
    /// The host has no process with the given id
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// Invalid argument passed to a host operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failed to attach to a process
    ///
    /// For more specific errors, see:
    /// - `NotAttached`: no process is attached
    /// - `ProcessNotFound`: process doesn't exist
    #[error("Failed to attach to process: {0}")]
    AttachFailed(String),

    /// Operation requires an attached process
    #[error("Not attached to a process")]
    NotAttached,

    /// Operation requires the process to be stopped
    #[error("Process must be stopped for this operation")]
    NotStopped,

    /// No breakpoint of the requested kind at the specified address
    #[error("No breakpoint at address 0x{0:016x}")]
    NoBreakpoint(u64),

    /// A breakpoint is already active at the specified address
    #[error("Breakpoint already exists at 0x{0:016x}")]
    DuplicateBreakpoint(u64),

    /// No watchpoint matches the requested address, length and access kind
    #[error("No watchpoint at address 0x{0:016x}")]
    NoWatchpoint(u64),

    /// An identical watchpoint is already tracked
    #[error("Watchpoint already exists at 0x{0:016x}")]
    DuplicateWatchpoint(u64),

    /// A fixed-capacity table has no free slot
    ///
    /// Remove some existing breakpoints/watchpoints before adding new ones.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Failed to suspend the target process
    #[error("Failed to suspend process: {0}")]
    SuspendFailed(String),

    /// Failed to resume the target process
    #[error("Failed to resume process: {0}")]
    ResumeFailed(String),

    /// Reading or writing the foreign address space failed
    ///
    /// Typically the range is not mapped, or is not writable.
    #[error("Memory access failed at 0x{address:016x} ({len} bytes): {details}")]
    MemoryAccess
    {
        /// First address of the failed access
        address: u64,
        /// Length of the failed access in bytes
        len: usize,
        /// Additional error details
        details: String,
    },

    /// Reading or writing the foreign register context failed
    #[error("Register access failed: {0}")]
    RegisterAccess(String),

    /// The host does not provide the requested facility
    ///
    /// Hosts without debug registers report this for hardware breakpoints
    /// and watchpoints. The protocol layer answers with the empty
    /// "unsupported" reply instead of an error code.
    #[error("Unsupported by this host: {0}")]
    Unsupported(&'static str),

    /// I/O error from a host backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, DebugError>`
///
/// ```rust
/// use rspd_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DebugError>;
