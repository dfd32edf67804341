//! Breakpoint and watchpoint bookkeeping.
//!
//! This module centralizes breakpoint lifecycle tracking. Both tables have a
//! fixed number of slots chosen when the session starts; inserting scans for
//! a free slot and refuses duplicates, so the active set never holds two
//! breakpoints at one address.
//!
//! Software breakpoints own a [`SoftwarePatch`] holding the displaced code.
//! Hardware breakpoints and watchpoints are bookkeeping only: arming them is
//! delegated to the host through the [`Target`] trait.

pub mod patch;
pub mod watchpoints;

use std::time::SystemTime;

pub use patch::{trap_bytes, SoftwarePatch};
pub use watchpoints::{WatchpointAccess, WatchpointId, WatchpointInfo, WatchpointTable};

use crate::error::{DebugError, Result};
use crate::target::Target;
use crate::types::Address;

/// Unique identifier for a breakpoint managed by a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Different kinds of execution breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind
{
    /// Software breakpoint implemented via trap instructions (BRK/INT3).
    Software,
    /// Hardware breakpoint configured via the host's debug registers.
    Hardware,
}

/// Public information about a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo
{
    /// Unique identifier for this breakpoint.
    pub id: BreakpointId,
    /// The memory address where the breakpoint is placed.
    pub address: Address,
    /// Software or hardware.
    pub kind: BreakpointKind,
    /// Size requested by the client (the `kind` field of `Z0`/`Z1`).
    pub size: usize,
    /// Whether the breakpoint is currently enabled and will trigger.
    pub enabled: bool,
    /// Number of times this breakpoint has been hit.
    pub hit_count: u64,
    /// Timestamp when the breakpoint was installed.
    pub created_at: SystemTime,
}

#[derive(Debug)]
struct Slot
{
    info: BreakpointInfo,
    patch: Option<SoftwarePatch>,
}

/// Fixed-capacity breakpoint table
///
/// ## Example
///
/// ```rust
/// use rspd_core::breakpoints::{BreakpointKind, BreakpointTable};
/// use rspd_core::platform::simulated::SimulatedTarget;
/// use rspd_core::types::{Address, Architecture, ProcessId};
/// use rspd_core::Target;
///
/// let mut target = SimulatedTarget::new(ProcessId::from(100), Architecture::X86_64)
///     .with_region(0x401000, vec![0x90; 16]);
/// let _events = target.attach(ProcessId::from(100))?;
///
/// let mut table = BreakpointTable::with_capacity(8);
/// table.insert(&mut target, BreakpointKind::Software, Address::from(0x401004), 1)?;
/// assert_eq!(target.peek_memory(Address::from(0x401004), 1), Some(vec![0xCC]));
///
/// table.remove(&mut target, BreakpointKind::Software, Address::from(0x401004))?;
/// assert_eq!(target.peek_memory(Address::from(0x401004), 1), Some(vec![0x90]));
/// # Ok::<(), rspd_core::error::DebugError>(())
/// ```
#[derive(Debug)]
pub struct BreakpointTable
{
    slots: Vec<Option<Slot>>,
    next_id: u64,
}

impl BreakpointTable
{
    /// Create a table with `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self
    {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_id: 0,
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize
    {
        self.slots.len()
    }

    /// Number of active breakpoints.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.slots.iter().flatten().count()
    }

    /// Whether no breakpoint is active.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Iterate over active breakpoints in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &BreakpointInfo>
    {
        self.slots.iter().flatten().map(|slot| &slot.info)
    }

    /// Active breakpoint at `address`, of any kind.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<&BreakpointInfo>
    {
        self.iter().find(|info| info.address == address)
    }

    /// Install a breakpoint.
    ///
    /// Existing state is untouched on every error path.
    ///
    /// ## Errors
    ///
    /// - `DuplicateBreakpoint`: a breakpoint is already active at `address`
    /// - `ResourceExhausted`: every slot is in use
    /// - `MemoryAccess`: the trap could not be written (software)
    /// - `Unsupported`: the host cannot arm hardware breakpoints
    pub fn insert(
        &mut self,
        target: &mut dyn Target,
        kind: BreakpointKind,
        address: Address,
        size: usize,
    ) -> Result<BreakpointId>
    {
        let mut free = None;
        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(slot) if slot.info.address == address => {
                    return Err(DebugError::DuplicateBreakpoint(address.value()));
                }
                None if free.is_none() => free = Some(index),
                _ => {}
            }
        }
        let index = free.ok_or_else(|| {
            DebugError::ResourceExhausted(format!("breakpoint table full ({} slots)", self.slots.len()))
        })?;

        let patch = match kind {
            BreakpointKind::Software => Some(SoftwarePatch::apply(target, address)?),
            BreakpointKind::Hardware => {
                target.arm_hardware_breakpoint(address)?;
                None
            }
        };

        self.next_id = self.next_id.wrapping_add(1);
        let id = BreakpointId::from_raw(self.next_id);
        self.slots[index] = Some(Slot {
            info: BreakpointInfo {
                id,
                address,
                kind,
                size,
                enabled: true,
                hit_count: 0,
                created_at: SystemTime::now(),
            },
            patch,
        });
        tracing::debug!(id = id.raw(), %address, ?kind, slot = index, "breakpoint inserted");
        Ok(id)
    }

    /// Remove the breakpoint of `kind` at `address`, restoring target code.
    ///
    /// If restoring fails the breakpoint stays in the table so the removal can
    /// be retried.
    ///
    /// ## Errors
    ///
    /// - `NoBreakpoint`: no active breakpoint matches (address, kind)
    /// - `MemoryAccess` / `Unsupported`: restoring or disarming failed
    pub fn remove(&mut self, target: &mut dyn Target, kind: BreakpointKind, address: Address) -> Result<BreakpointInfo>
    {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Some(slot) if slot.info.address == address && slot.info.kind == kind))
            .ok_or(DebugError::NoBreakpoint(address.value()))?;

        if let Some(slot) = self.slots[index].as_mut() {
            match slot.patch.as_mut() {
                Some(patch) => patch.restore(target)?,
                None => target.disarm_hardware_breakpoint(address)?,
            }
        }

        let slot = self.slots[index]
            .take()
            .ok_or(DebugError::NoBreakpoint(address.value()))?;
        tracing::debug!(id = slot.info.id.raw(), %address, hits = slot.info.hit_count, "breakpoint removed");
        Ok(slot.info)
    }

    /// Record that execution stopped at `pc`. The matching breakpoint's hit
    /// counter is incremented only if it is enabled.
    pub fn record_hit(&mut self, pc: Address) -> Option<BreakpointInfo>
    {
        let slot = self
            .slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.info.address == pc && slot.info.enabled)?;
        slot.info.hit_count = slot.info.hit_count.saturating_add(1);
        Some(slot.info.clone())
    }

    /// Whether a software trap is currently written at `address`.
    #[must_use]
    pub fn is_trap_applied_at(&self, address: Address) -> bool
    {
        self.patch_at(address).is_some_and(SoftwarePatch::is_applied)
    }

    /// Temporarily put the original code back at `address` (to step over a
    /// breakpoint). Returns `false` if no software breakpoint is there.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: restoring failed
    pub fn lift(&mut self, target: &mut dyn Target, address: Address) -> Result<bool>
    {
        match self.patch_at_mut(address) {
            Some(patch) => {
                patch.restore(target)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-insert a trap lifted with [`BreakpointTable::lift`]. A no-op if the
    /// breakpoint was removed meanwhile.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: writing the trap failed
    pub fn reapply(&mut self, target: &mut dyn Target, address: Address) -> Result<()>
    {
        match self.patch_at_mut(address) {
            Some(patch) => patch.reapply(target),
            None => Ok(()),
        }
    }

    /// Hide applied traps inside `buf`, which holds target memory read from
    /// `start`.
    pub fn shadow_read(&self, start: Address, buf: &mut [u8])
    {
        for patch in self.patches() {
            patch.shadow_read(start, buf);
        }
    }

    /// Keep applied traps in `data`, a client write about to reach the
    /// target at `start`. Saved originals are left alone until
    /// [`BreakpointTable::commit_write`].
    pub fn mask_write(&self, start: Address, data: &mut [u8])
    {
        for patch in self.patches() {
            patch.mask_write(start, data);
        }
    }

    /// Fold a client write of `data` at `start` that reached the target in
    /// full into the saved original bytes. `data` is the client's bytes,
    /// not the masked ones.
    pub fn commit_write(&mut self, start: Address, data: &[u8])
    {
        for slot in self.slots.iter_mut().flatten() {
            if let Some(patch) = slot.patch.as_mut() {
                patch.commit_write(start, data);
            }
        }
    }

    /// Restore every software breakpoint and disarm every hardware one,
    /// emptying the table. Every entry is attempted; failures are returned.
    pub fn restore_all(&mut self, target: &mut dyn Target) -> Vec<(Address, DebugError)>
    {
        let mut failures = Vec::new();
        for entry in &mut self.slots {
            let Some(mut slot) = entry.take() else {
                continue;
            };
            let address = slot.info.address;
            let outcome = match slot.patch.as_mut() {
                Some(patch) => {
                    let outcome = patch.restore(target);
                    // Dropping below must not report the patch again.
                    patch.forget();
                    outcome
                }
                None => match target.disarm_hardware_breakpoint(address) {
                    Err(DebugError::Unsupported(_)) => Ok(()),
                    other => other,
                },
            };
            if let Err(err) = outcome {
                failures.push((address, err));
            }
        }
        failures
    }

    /// Drop every entry without touching the target. Only correct once the
    /// process no longer exists.
    pub fn forget_all(&mut self)
    {
        for entry in &mut self.slots {
            if let Some(mut slot) = entry.take() {
                if let Some(patch) = slot.patch.as_mut() {
                    patch.forget();
                }
            }
        }
    }

    fn patches(&self) -> impl Iterator<Item = &SoftwarePatch>
    {
        self.slots.iter().flatten().filter_map(|slot| slot.patch.as_ref())
    }

    fn patch_at(&self, address: Address) -> Option<&SoftwarePatch>
    {
        self.patches().find(|patch| patch.address() == address)
    }

    fn patch_at_mut(&mut self, address: Address) -> Option<&mut SoftwarePatch>
    {
        self.slots
            .iter_mut()
            .flatten()
            .filter_map(|slot| slot.patch.as_mut())
            .find(|patch| patch.address() == address)
    }
}
