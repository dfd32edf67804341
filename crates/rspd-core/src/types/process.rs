//! Process, thread, architecture, and signal types.

use std::fmt;

/// Process identifier of a debug target
///
/// The host decides what the number means (a PID on Unix hosts, a slot number
/// for the simulated host). The protocol layer reports it in hex in `qC` and
/// thread-info replies.
///
/// ## Example
///
/// ```rust
/// use rspd_core::types::ProcessId;
///
/// let pid = ProcessId::from(100);
/// assert_eq!(pid.raw(), 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// Get the raw numeric identifier.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier reported alongside stop events
///
/// Sessions debug a single thread of control, so this is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Get the raw `u64` representation of the thread identifier
    #[must_use]
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

/// CPU architecture of a debug target
///
/// The architecture selects the register layout used by `g`/`G` packets and
/// the trap opcode used for software breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    ///
    /// See: [ARM64 Architecture Reference Manual](https://developer.arm.com/documentation/ddi0487/latest)
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    ///
    /// See: [Intel 64 and IA-32 Architectures Software Developer's Manual](https://www.intel.com/content/www/us/en/developer/articles/technical/intel-sdm.html)
    X86_64,
}

impl Architecture
{
    /// Architecture of the machine the stub was built for.
    ///
    /// Falls back to x86-64 on other build targets, since that is the layout
    /// most clients expect by default.
    #[must_use]
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Architecture::X86_64
        }
    }

    /// Size in bytes of one instruction unit (used for single-step simulation
    /// and for the trap opcode width).
    #[must_use]
    pub const fn instruction_unit(self) -> usize
    {
        match self {
            Architecture::Arm64 => 4,
            Architecture::X86_64 => 1,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "aarch64"),
            Architecture::X86_64 => write!(f, "x86_64"),
        }
    }
}

/// Signal number as carried by stop replies (`S<nn>`, `X<nn>`)
///
/// Numbers follow the GDB remote protocol's signal numbering, which agrees
/// with Linux for the signals a stub reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(pub u8);

impl Signal
{
    /// Interrupt (client sent the break byte)
    pub const SIGINT: Signal = Signal(2);
    /// Trace/breakpoint trap (breakpoint hit, step complete, attach)
    pub const SIGTRAP: Signal = Signal(5);
    /// Killed
    pub const SIGKILL: Signal = Signal(9);
    /// Segmentation fault (execution left mapped memory)
    pub const SIGSEGV: Signal = Signal(11);

    /// Get the raw signal number.
    #[must_use]
    pub const fn number(self) -> u8
    {
        self.0
    }
}

impl fmt::Display for Signal
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match *self {
            Signal::SIGINT => write!(f, "SIGINT"),
            Signal::SIGTRAP => write!(f, "SIGTRAP"),
            Signal::SIGKILL => write!(f, "SIGKILL"),
            Signal::SIGSEGV => write!(f, "SIGSEGV"),
            Signal(other) => write!(f, "signal {other}"),
        }
    }
}
