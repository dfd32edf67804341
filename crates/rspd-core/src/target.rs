//! # Target Trait
//!
//! The host collaborator interface: everything the stub needs from the
//! process-management subsystem that actually supervises a debug target.
//!
//! The stub never touches a foreign process directly. Each host (a ptrace
//! backend, a Mach backend, an emulator, the in-memory simulator) implements
//! this trait with its own primitives:
//!
//! - locate a process by id and suspend it (`attach`)
//! - suspend / resume / single-step it
//! - read and write its whole register context atomically
//! - read and write its virtual address space
//! - deliver stop notifications on an asynchronous channel
//!
//! ## Design Philosophy
//!
//! The trait methods are designed to be:
//! - **Simple**: Each method does one thing
//! - **Synchronous**: Only stop delivery is asynchronous, through the channel
//!   returned by `attach`
//! - **Explicit**: Clear about what they do and when they can fail

use crate::breakpoints::WatchpointAccess;
use crate::error::{DebugError, Result};
use crate::events::TargetEventReceiver;
use crate::types::{Address, Architecture, ProcessId, Registers};

/// How a stopped target should be set running again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumeMode
{
    /// Run freely until something stops the target.
    Continue,
    /// Execute a single instruction, then stop with SIGTRAP.
    Step,
}

/// Host collaborator interface
///
/// ## Lifecycle
///
/// 1. `attach(pid)`: the target is suspended and a stop channel is returned
/// 2. Inspect/manipulate while stopped: `read_registers()`, `write_memory()`, ...
/// 3. `resume(mode)`: a `TargetEvent` arrives on the channel when it stops
/// 4. `detach()` or `kill()`
///
/// ## Thread Safety
///
/// A target is driven from a single session at a time. Implementations may
/// deliver events from another thread through the channel.
pub trait Target: Send
{
    /// Architecture of the attached (or attachable) process.
    fn architecture(&self) -> Architecture;

    /// Locate the process with `pid`, suspend it, and start delivering its
    /// stop notifications on the returned channel.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotFound`: no such process
    /// - `AttachFailed`: already attached, or the host refused
    fn attach(&mut self, pid: ProcessId) -> Result<TargetEventReceiver>;

    /// Let the process run unsupervised and release it.
    ///
    /// ## Errors
    ///
    /// - `NotAttached`: nothing to release
    fn detach(&mut self) -> Result<()>;

    /// Terminate the process and release it.
    ///
    /// ## Errors
    ///
    /// - `NotAttached`: nothing to terminate
    fn kill(&mut self) -> Result<()>;

    /// Stop the process synchronously. No event is delivered.
    ///
    /// Used on teardown paths where the stub cannot wait for the channel.
    ///
    /// ## Errors
    ///
    /// - `SuspendFailed`: the host could not stop the process
    fn suspend(&mut self) -> Result<()>;

    /// Ask a running process to stop. A `Stopped` event with SIGINT (or
    /// whatever signal the host delivers) follows on the channel.
    ///
    /// ## Errors
    ///
    /// - `SuspendFailed`: the request could not be delivered
    fn interrupt(&mut self) -> Result<()>;

    /// Set a stopped process running again.
    ///
    /// ## Errors
    ///
    /// - `NotStopped`: the process is already running
    /// - `ResumeFailed`: the host could not resume it
    fn resume(&mut self, mode: ResumeMode) -> Result<()>;

    /// Take one atomic snapshot of the register context.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `NotStopped`
    /// - `RegisterAccess`: the host could not read the context
    fn read_registers(&self) -> Result<Registers>;

    /// Replace the whole register context atomically.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `NotStopped`
    /// - `RegisterAccess`: wrong architecture or the host refused
    fn write_registers(&mut self, registers: &Registers) -> Result<()>;

    /// Read `len` bytes of the foreign address space.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: the range is not (fully) mapped
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Write `data` into the foreign address space, returning the number of
    /// bytes written.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: the range is not (fully) mapped or not writable
    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<usize>;

    /// Arm a hardware execution breakpoint using the host's debug registers.
    ///
    /// ## Errors
    ///
    /// - `Unsupported` (default): the host has no debug-register facility
    /// - `ResourceExhausted`: no free debug register
    fn arm_hardware_breakpoint(&mut self, _address: Address) -> Result<()>
    {
        Err(DebugError::Unsupported("hardware breakpoints"))
    }

    /// Disarm a hardware execution breakpoint.
    ///
    /// ## Errors
    ///
    /// - `Unsupported` (default)
    fn disarm_hardware_breakpoint(&mut self, _address: Address) -> Result<()>
    {
        Err(DebugError::Unsupported("hardware breakpoints"))
    }

    /// Arm a data watchpoint using the host's debug registers.
    ///
    /// ## Errors
    ///
    /// - `Unsupported` (default): the host has no debug-register facility
    fn arm_watchpoint(&mut self, _address: Address, _len: usize, _access: WatchpointAccess) -> Result<()>
    {
        Err(DebugError::Unsupported("watchpoints"))
    }

    /// Disarm a data watchpoint.
    ///
    /// ## Errors
    ///
    /// - `Unsupported` (default)
    fn disarm_watchpoint(&mut self, _address: Address, _len: usize, _access: WatchpointAccess) -> Result<()>
    {
        Err(DebugError::Unsupported("watchpoints"))
    }
}

/// Factory function to create the host backend for this platform
///
/// ## Platform Support
///
/// - No OS backend is built into this crate yet; callers that want a working
///   target use [`crate::platform::simulated::SimulatedTarget`].
///
/// ## Errors
///
/// Always returns `AttachFailed` naming the platform.
pub fn create_target() -> Result<Box<dyn Target>>
{
    Err(DebugError::AttachFailed(format!(
        "No host backend implemented for platform: {}",
        std::env::consts::OS
    )))
}
