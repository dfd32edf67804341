//! # Software Breakpoint Patches
//!
//! A software breakpoint replaces the instruction bytes at an address with a
//! trap opcode. [`SoftwarePatch`] is the value that owns the bytes it
//! displaced; the trap stays in target memory exactly as long as the patch
//! reports itself as applied.
//!
//! ## Trap Opcodes
//!
//! - **x86-64**: `INT3` (1 byte: `0xCC`)
//! - **AArch64**: `BRK #0` (4 bytes: `0x00, 0x00, 0x20, 0xD4`)

use smallvec::SmallVec;

use crate::error::{DebugError, Result};
use crate::target::Target;
use crate::types::{Address, AddressRange, Architecture};

/// x86-64 `INT3`.
pub const X86_64_INT3_INSTRUCTION: [u8; 1] = [0xCC];

/// AArch64 `BRK #0`, little-endian.
pub const ARM64_BRK_INSTRUCTION: [u8; 4] = [0x00, 0x00, 0x20, 0xD4];

/// Trap opcode written for software breakpoints on `architecture`.
#[must_use]
pub fn trap_bytes(architecture: Architecture) -> &'static [u8]
{
    match architecture {
        Architecture::X86_64 => &X86_64_INT3_INSTRUCTION,
        Architecture::Arm64 => &ARM64_BRK_INSTRUCTION,
    }
}

/// A trap opcode written over target code, together with the bytes it hid
///
/// Dropping a patch that is still applied leaves the target's code corrupted,
/// so it is logged as an error. Owners must call [`SoftwarePatch::restore`]
/// (or [`SoftwarePatch::forget`] once the process is gone) first.
#[must_use = "an applied patch must be restored before it is dropped"]
#[derive(Debug)]
pub struct SoftwarePatch
{
    address: Address,
    original: SmallVec<[u8; 4]>,
    trap: &'static [u8],
    applied: bool,
}

impl SoftwarePatch
{
    /// Save the bytes at `address` and write the architecture's trap opcode
    /// over them.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: the bytes could not be read, or the trap could not be
    ///   written. A failed write is undone best-effort before returning.
    pub fn apply(target: &mut dyn Target, address: Address) -> Result<Self>
    {
        let trap = trap_bytes(target.architecture());

        let original = target.read_memory(address, trap.len())?;
        if original.len() != trap.len() {
            return Err(DebugError::MemoryAccess {
                address: address.value(),
                len: trap.len(),
                details: format!("short read of {} bytes while saving original code", original.len()),
            });
        }

        match target.write_memory(address, trap) {
            Ok(written) if written == trap.len() => {}
            outcome => {
                // Put back whatever part of the trap may have landed.
                if let Err(err) = target.write_memory(address, &original) {
                    tracing::error!(%address, error = %err, "failed to roll back partial trap write");
                }
                let details = match outcome {
                    Ok(written) => format!("short write of {written} bytes"),
                    Err(err) => err.to_string(),
                };
                return Err(DebugError::MemoryAccess {
                    address: address.value(),
                    len: trap.len(),
                    details,
                });
            }
        }

        tracing::trace!(%address, original = ?original, "trap written");
        Ok(Self {
            address,
            original: SmallVec::from_vec(original),
            trap,
            applied: true,
        })
    }

    /// Address of the first patched byte.
    #[must_use]
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// Bytes that the trap replaced.
    #[must_use]
    pub fn original(&self) -> &[u8]
    {
        &self.original
    }

    /// Bytes covered by the patch.
    #[must_use]
    pub fn range(&self) -> AddressRange
    {
        AddressRange::new(self.address, self.trap.len())
    }

    /// Whether the trap is currently in target memory.
    #[must_use]
    pub fn is_applied(&self) -> bool
    {
        self.applied
    }

    /// Write the saved bytes back. A no-op if the patch is not applied.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: the write failed; the patch stays applied
    pub fn restore(&mut self, target: &mut dyn Target) -> Result<()>
    {
        if !self.applied {
            return Ok(());
        }
        let written = target.write_memory(self.address, &self.original)?;
        if written != self.original.len() {
            return Err(DebugError::MemoryAccess {
                address: self.address.value(),
                len: self.original.len(),
                details: format!("short write of {written} bytes while restoring original code"),
            });
        }
        self.applied = false;
        Ok(())
    }

    /// Write the trap again after a [`SoftwarePatch::restore`].
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: the write failed; the patch stays lifted
    pub fn reapply(&mut self, target: &mut dyn Target) -> Result<()>
    {
        if self.applied {
            return Ok(());
        }
        let written = target.write_memory(self.address, self.trap)?;
        if written != self.trap.len() {
            return Err(DebugError::MemoryAccess {
                address: self.address.value(),
                len: self.trap.len(),
                details: format!("short write of {written} bytes while re-inserting trap"),
            });
        }
        self.applied = true;
        Ok(())
    }

    /// Mark the patch as no longer in memory without touching the target.
    /// Only correct once the process no longer exists.
    pub fn forget(&mut self)
    {
        self.applied = false;
    }

    /// Replace trap bytes inside `buf` (read from `start`) with the saved
    /// original bytes.
    pub fn shadow_read(&self, start: Address, buf: &mut [u8])
    {
        if !self.applied {
            return;
        }
        for (index, &byte) in self.original.iter().enumerate() {
            if let Some(offset) = offset_within(start, buf.len(), self.address + index as u64) {
                buf[offset] = byte;
            }
        }
    }

    /// Rewrite `data`, about to be written at `start`, so that an applied
    /// trap survives the write.
    pub fn mask_write(&self, start: Address, data: &mut [u8])
    {
        if !self.applied {
            return;
        }
        for (index, &byte) in self.trap.iter().enumerate() {
            if let Some(offset) = offset_within(start, data.len(), self.address + index as u64) {
                data[offset] = byte;
            }
        }
    }

    /// Record a completed client write of `data` at `start`: overlapping
    /// bytes become the saved original. Call only once the target write
    /// has fully succeeded.
    pub fn commit_write(&mut self, start: Address, data: &[u8])
    {
        for index in 0..self.original.len() {
            if let Some(offset) = offset_within(start, data.len(), self.address + index as u64) {
                self.original[index] = data[offset];
            }
        }
    }
}

impl Drop for SoftwarePatch
{
    fn drop(&mut self)
    {
        if self.applied {
            tracing::error!(address = %self.address, "software breakpoint dropped while its trap is still in target memory");
        }
    }
}

fn offset_within(start: Address, len: usize, address: Address) -> Option<usize>
{
    let offset = address.offset_from(start)?;
    usize::try_from(offset).ok().filter(|&offset| offset < len)
}
