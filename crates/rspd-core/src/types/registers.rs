//! CPU register layouts and register snapshots.
//!
//! A [`RegisterLayout`] fixes the canonical order and width of every register
//! for one architecture. That order is what `g`/`G` packets carry, so it
//! follows GDB's default target descriptions:
//!
//! - **x86-64**: `rax rbx rcx rdx rsi rdi rbp rsp r8..r15 rip` (8 bytes each),
//!   then `eflags cs ss ds es fs gs` (4 bytes each)
//! - **AArch64**: `x0..x30 sp pc` (8 bytes each), then `cpsr` (4 bytes)

use super::{Address, Architecture};
use crate::error::{DebugError, Result};

/// Name and width of one register in a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDesc
{
    /// Conventional lowercase name (`rip`, `x29`, ...)
    pub name: &'static str,
    /// Width in bytes (4 or 8)
    pub size: usize,
}

const fn reg(name: &'static str, size: usize) -> RegisterDesc
{
    RegisterDesc { name, size }
}

/// Canonical register order for one architecture.
#[derive(Debug, PartialEq, Eq)]
pub struct RegisterLayout
{
    /// Architecture this layout describes
    pub architecture: Architecture,
    /// Registers in wire order
    pub registers: &'static [RegisterDesc],
    pc: usize,
    sp: usize,
    fp: usize,
    status: usize,
}

static X86_64_REGISTERS: [RegisterDesc; 24] = [
    reg("rax", 8),
    reg("rbx", 8),
    reg("rcx", 8),
    reg("rdx", 8),
    reg("rsi", 8),
    reg("rdi", 8),
    reg("rbp", 8),
    reg("rsp", 8),
    reg("r8", 8),
    reg("r9", 8),
    reg("r10", 8),
    reg("r11", 8),
    reg("r12", 8),
    reg("r13", 8),
    reg("r14", 8),
    reg("r15", 8),
    reg("rip", 8),
    reg("eflags", 4),
    reg("cs", 4),
    reg("ss", 4),
    reg("ds", 4),
    reg("es", 4),
    reg("fs", 4),
    reg("gs", 4),
];

static ARM64_REGISTERS: [RegisterDesc; 34] = [
    reg("x0", 8),
    reg("x1", 8),
    reg("x2", 8),
    reg("x3", 8),
    reg("x4", 8),
    reg("x5", 8),
    reg("x6", 8),
    reg("x7", 8),
    reg("x8", 8),
    reg("x9", 8),
    reg("x10", 8),
    reg("x11", 8),
    reg("x12", 8),
    reg("x13", 8),
    reg("x14", 8),
    reg("x15", 8),
    reg("x16", 8),
    reg("x17", 8),
    reg("x18", 8),
    reg("x19", 8),
    reg("x20", 8),
    reg("x21", 8),
    reg("x22", 8),
    reg("x23", 8),
    reg("x24", 8),
    reg("x25", 8),
    reg("x26", 8),
    reg("x27", 8),
    reg("x28", 8),
    reg("x29", 8),
    reg("x30", 8),
    reg("sp", 8),
    reg("pc", 8),
    reg("cpsr", 4),
];

/// x86-64 layout (GDB `i386:x86-64` general registers).
pub static X86_64_LAYOUT: RegisterLayout = RegisterLayout {
    architecture: Architecture::X86_64,
    registers: &X86_64_REGISTERS,
    pc: 16,
    sp: 7,
    fp: 6,
    status: 17,
};

/// AArch64 layout (GDB `aarch64` core registers).
pub static ARM64_LAYOUT: RegisterLayout = RegisterLayout {
    architecture: Architecture::Arm64,
    registers: &ARM64_REGISTERS,
    pc: 32,
    sp: 31,
    fp: 29,
    status: 33,
};

impl RegisterLayout
{
    /// Layout used for the given architecture.
    #[must_use]
    pub fn for_architecture(architecture: Architecture) -> &'static RegisterLayout
    {
        match architecture {
            Architecture::X86_64 => &X86_64_LAYOUT,
            Architecture::Arm64 => &ARM64_LAYOUT,
        }
    }

    /// Number of registers in the layout.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.registers.len()
    }

    /// Always false; present for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.registers.is_empty()
    }

    /// Total size of one full register set in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize
    {
        self.registers.iter().map(|r| r.size).sum()
    }

    /// Position of a register in wire order, looked up by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize>
    {
        self.registers.iter().position(|r| r.name == name)
    }

    /// Resolve a [`RegisterId`] to its position in wire order.
    #[must_use]
    pub fn resolve(&self, id: RegisterId) -> Option<usize>
    {
        match id {
            RegisterId::Pc => Some(self.pc),
            RegisterId::Sp => Some(self.sp),
            RegisterId::Fp => Some(self.fp),
            RegisterId::Status => Some(self.status),
            RegisterId::Index(index) => (index < self.registers.len()).then_some(index),
        }
    }
}

/// Identifier for a register, either by role or by wire-order index
///
/// The role variants exist on every architecture:
///
/// - `Pc`: `rip` on x86-64, `pc` on AArch64
/// - `Sp`: `rsp` / `sp`
/// - `Fp`: `rbp` / `x29`
/// - `Status`: `eflags` / `cpsr`
///
/// ```rust
/// use rspd_core::types::{Architecture, RegisterId, RegisterLayout};
///
/// let layout = RegisterLayout::for_architecture(Architecture::X86_64);
/// assert_eq!(layout.resolve(RegisterId::Pc), layout.index_of("rip"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId
{
    /// Program counter
    Pc,
    /// Stack pointer
    Sp,
    /// Frame pointer
    Fp,
    /// Status/flags register
    Status,
    /// Register at a wire-order index (the number used by `p`/`P` packets)
    Index(usize),
}

/// One atomic snapshot of a target's register context
///
/// Values are stored in wire order and are always masked to the width of the
/// register they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers
{
    layout: &'static RegisterLayout,
    values: Vec<u64>,
}

impl Registers
{
    /// A register set for `architecture` with every register zero.
    #[must_use]
    pub fn zeroed(architecture: Architecture) -> Self
    {
        let layout = RegisterLayout::for_architecture(architecture);
        Self {
            layout,
            values: vec![0; layout.len()],
        }
    }

    /// The layout these values follow.
    #[must_use]
    pub fn layout(&self) -> &'static RegisterLayout
    {
        self.layout
    }

    /// Architecture of the snapshot.
    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.layout.architecture
    }

    /// All values in wire order.
    #[must_use]
    pub fn values(&self) -> &[u64]
    {
        &self.values
    }

    /// Read one register.
    #[must_use]
    pub fn get(&self, id: RegisterId) -> Option<u64>
    {
        self.layout.resolve(id).map(|index| self.values[index])
    }

    /// Write one register, truncating the value to the register's width.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: the index is outside the layout
    pub fn set(&mut self, id: RegisterId, value: u64) -> Result<()>
    {
        let index = self
            .layout
            .resolve(id)
            .ok_or_else(|| DebugError::InvalidArgument(format!("no register {id:?} on {}", self.architecture())))?;
        let size = self.layout.registers[index].size;
        self.values[index] = mask(value, size);
        Ok(())
    }

    /// Current program counter.
    #[must_use]
    pub fn pc(&self) -> Address
    {
        Address::from(self.values[self.layout.pc])
    }

    /// Set the program counter.
    pub fn set_pc(&mut self, address: Address)
    {
        self.values[self.layout.pc] = address.value();
    }
}

fn mask(value: u64, size: usize) -> u64
{
    if size >= 8 {
        value
    } else {
        value & ((1u64 << (size * 8)) - 1)
    }
}
