//! # Register Bridge
//!
//! Translates between the target's register context and the hex streams of
//! `g`/`G`/`p`/`P` packets.
//!
//! Each register is encoded as a fixed-width, zero-padded hex string of its
//! bytes in target (little-endian) order, in the canonical layout order,
//! concatenated without separators. The context is read from the target once
//! and cached until the next resume.

use rspd_core::types::{Architecture, RegisterId, RegisterLayout, Registers};
use rspd_core::{Address, Target};

use crate::error::CommandError;

/// Hex for the low `size` bytes of `value`, little-endian.
///
/// ```rust
/// use rspd_protocol::registers::encode_value;
///
/// assert_eq!(encode_value(0x401000, 8), "0010400000000000");
/// assert_eq!(encode_value(0x246, 4), "46020000");
/// ```
#[must_use]
pub fn encode_value(value: u64, size: usize) -> String
{
    let bytes = value.to_le_bytes();
    hex::encode(&bytes[..size.min(bytes.len())])
}

/// Parse exactly `size` little-endian bytes of hex.
///
/// ## Errors
///
/// - `Malformed`: wrong length or non-hex characters
pub fn decode_value(text: &str, size: usize) -> Result<u64, CommandError>
{
    let bytes = hex::decode(text).map_err(|err| CommandError::Malformed(format!("register value {text:?}: {err}")))?;
    if bytes.len() != size || size > 8 {
        return Err(CommandError::Malformed(format!(
            "register value has {} bytes, expected {size}",
            bytes.len()
        )));
    }
    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
}

/// Encode a whole register set in layout order.
#[must_use]
pub fn encode_registers(registers: &Registers) -> String
{
    registers
        .layout()
        .registers
        .iter()
        .zip(registers.values())
        .map(|(desc, &value)| encode_value(value, desc.size))
        .collect()
}

/// Decode a whole `G` stream into a register set for `architecture`.
///
/// The stream must cover every register exactly; nothing is partially
/// applied.
///
/// ## Errors
///
/// - `Malformed`: short, long or non-hex stream
pub fn decode_registers(architecture: Architecture, text: &str) -> Result<Registers, CommandError>
{
    let layout = RegisterLayout::for_architecture(architecture);
    if text.len() != layout.byte_len() * 2 {
        return Err(CommandError::Malformed(format!(
            "register stream has {} hex digits, expected {}",
            text.len(),
            layout.byte_len() * 2
        )));
    }
    let mut registers = Registers::zeroed(architecture);
    let mut offset = 0;
    for (index, desc) in layout.registers.iter().enumerate() {
        let digits = text
            .get(offset..offset + desc.size * 2)
            .ok_or_else(|| CommandError::Malformed("register stream is not ASCII".to_string()))?;
        let value = decode_value(digits, desc.size)?;
        registers.set(RegisterId::Index(index), value)?;
        offset += desc.size * 2;
    }
    Ok(registers)
}

/// Lazily filled register snapshot
#[derive(Debug, Default)]
pub struct RegisterCache
{
    snapshot: Option<Registers>,
}

impl RegisterCache
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Whether a snapshot is held.
    #[must_use]
    pub fn is_valid(&self) -> bool
    {
        self.snapshot.is_some()
    }

    /// Drop the snapshot; the next read goes to the target.
    pub fn invalidate(&mut self)
    {
        self.snapshot = None;
    }

    /// Current snapshot, read from the target if needed.
    ///
    /// ## Errors
    ///
    /// Whatever the target reports for `read_registers`.
    pub fn snapshot(&mut self, target: &dyn Target) -> Result<&Registers, CommandError>
    {
        if self.snapshot.is_none() {
            let registers = target.read_registers()?;
            tracing::trace!(architecture = %registers.architecture(), "register snapshot taken");
            self.snapshot = Some(registers);
        }
        self.snapshot
            .as_ref()
            .ok_or_else(|| CommandError::Host("register snapshot unavailable".to_string()))
    }

    /// `g` reply.
    ///
    /// ## Errors
    ///
    /// Whatever the target reports for `read_registers`.
    pub fn read_hex(&mut self, target: &dyn Target) -> Result<String, CommandError>
    {
        self.snapshot(target).map(encode_registers)
    }

    /// Apply a `G` stream atomically.
    ///
    /// ## Errors
    ///
    /// - `Malformed`: the stream does not match the layout; nothing is written
    /// - host errors from `write_registers`; the cache is dropped
    pub fn write_hex(&mut self, target: &mut dyn Target, text: &str) -> Result<(), CommandError>
    {
        let registers = decode_registers(target.architecture(), text)?;
        self.flush(target, registers)
    }

    /// `p` reply for the register at wire index `index`.
    ///
    /// ## Errors
    ///
    /// - `Malformed`: no such register
    pub fn read_one(&mut self, target: &dyn Target, index: usize) -> Result<String, CommandError>
    {
        let registers = self.snapshot(target)?;
        let desc = registers
            .layout()
            .registers
            .get(index)
            .ok_or_else(|| CommandError::Malformed(format!("no register {index}")))?;
        let value = registers.get(RegisterId::Index(index)).unwrap_or_default();
        Ok(encode_value(value, desc.size))
    }

    /// Apply a `P` write. The whole set is written back in one go.
    ///
    /// ## Errors
    ///
    /// - `Malformed`: no such register or bad value
    pub fn write_one(&mut self, target: &mut dyn Target, index: usize, text: &str) -> Result<(), CommandError>
    {
        let mut registers = self.snapshot(target)?.clone();
        let size = registers
            .layout()
            .registers
            .get(index)
            .map(|desc| desc.size)
            .ok_or_else(|| CommandError::Malformed(format!("no register {index}")))?;
        registers.set(RegisterId::Index(index), decode_value(text, size)?)?;
        self.flush(target, registers)
    }

    /// Current program counter.
    ///
    /// ## Errors
    ///
    /// Whatever the target reports for `read_registers`.
    pub fn pc(&mut self, target: &dyn Target) -> Result<Address, CommandError>
    {
        self.snapshot(target).map(Registers::pc)
    }

    /// Move the program counter (used by `c addr` / `s addr`).
    ///
    /// ## Errors
    ///
    /// Whatever the target reports for the register round trip.
    pub fn set_pc(&mut self, target: &mut dyn Target, pc: Address) -> Result<(), CommandError>
    {
        let mut registers = self.snapshot(target)?.clone();
        registers.set_pc(pc);
        self.flush(target, registers)
    }

    fn flush(&mut self, target: &mut dyn Target, registers: Registers) -> Result<(), CommandError>
    {
        match target.write_registers(&registers) {
            Ok(()) => {
                self.snapshot = Some(registers);
                Ok(())
            }
            Err(err) => {
                self.invalidate();
                Err(err.into())
            }
        }
    }
}
