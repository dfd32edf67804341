//! Data watchpoint bookkeeping.
//!
//! Watchpoints are armed through the host's debug registers, so the table
//! only tracks what the client asked for and forwards arming to the
//! [`Target`]. A watchpoint is identified by (address, length, access).

use crate::error::{DebugError, Result};
use crate::target::Target;
use crate::types::{Address, AddressRange};

/// Unique identifier for a watchpoint managed by a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchpointId(u64);

impl WatchpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Access type monitored by a watchpoint (`Z2`/`Z3`/`Z4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchpointAccess
{
    /// Trigger when the monitored memory is read.
    Read,
    /// Trigger when the monitored memory is written.
    Write,
    /// Trigger on both reads and writes.
    Access,
}

/// Public information about a watchpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchpointInfo
{
    pub id: WatchpointId,
    pub address: Address,
    pub len: usize,
    pub access: WatchpointAccess,
    pub enabled: bool,
}

impl WatchpointInfo
{
    /// Bytes monitored by the watchpoint.
    #[must_use]
    pub fn range(&self) -> AddressRange
    {
        AddressRange::new(self.address, self.len)
    }

    fn matches(&self, address: Address, len: usize, access: WatchpointAccess) -> bool
    {
        self.address == address && self.len == len && self.access == access
    }
}

/// Fixed-capacity watchpoint table.
#[derive(Debug)]
pub struct WatchpointTable
{
    slots: Vec<Option<WatchpointInfo>>,
    next_id: u64,
}

impl WatchpointTable
{
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self
    {
        Self {
            slots: vec![None; capacity],
            next_id: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize
    {
        self.slots.len()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchpointInfo>
    {
        self.slots.iter().flatten()
    }

    /// Track and arm a watchpoint.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `len` is zero
    /// - `DuplicateWatchpoint`: the same (address, len, access) is tracked
    /// - `ResourceExhausted`: every slot is in use
    /// - `Unsupported`: the host cannot arm watchpoints
    pub fn insert(
        &mut self,
        target: &mut dyn Target,
        address: Address,
        len: usize,
        access: WatchpointAccess,
    ) -> Result<WatchpointId>
    {
        if len == 0 {
            return Err(DebugError::InvalidArgument("watchpoint length must be non-zero".to_string()));
        }
        if self.iter().any(|info| info.matches(address, len, access)) {
            return Err(DebugError::DuplicateWatchpoint(address.value()));
        }
        let index = self.slots.iter().position(Option::is_none).ok_or_else(|| {
            DebugError::ResourceExhausted(format!("watchpoint table full ({} slots)", self.slots.len()))
        })?;

        target.arm_watchpoint(address, len, access)?;

        self.next_id = self.next_id.wrapping_add(1);
        let id = WatchpointId::from_raw(self.next_id);
        self.slots[index] = Some(WatchpointInfo {
            id,
            address,
            len,
            access,
            enabled: true,
        });
        tracing::debug!(id = id.raw(), %address, len, ?access, "watchpoint inserted");
        Ok(id)
    }

    /// Disarm and forget a watchpoint.
    ///
    /// ## Errors
    ///
    /// - `NoWatchpoint`: nothing matches (address, len, access)
    /// - `Unsupported`: the host cannot disarm watchpoints
    pub fn remove(
        &mut self,
        target: &mut dyn Target,
        address: Address,
        len: usize,
        access: WatchpointAccess,
    ) -> Result<WatchpointInfo>
    {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|info| info.matches(address, len, access)))
            .ok_or(DebugError::NoWatchpoint(address.value()))?;

        target.disarm_watchpoint(address, len, access)?;

        let info = self.slots[index]
            .take()
            .ok_or(DebugError::NoWatchpoint(address.value()))?;
        tracing::debug!(id = info.id.raw(), %address, "watchpoint removed");
        Ok(info)
    }

    /// Disarm every watchpoint, emptying the table. Failures are returned.
    pub fn disarm_all(&mut self, target: &mut dyn Target) -> Vec<(Address, DebugError)>
    {
        let mut failures = Vec::new();
        for slot in &mut self.slots {
            if let Some(info) = slot.take() {
                match target.disarm_watchpoint(info.address, info.len, info.access) {
                    Ok(()) | Err(DebugError::Unsupported(_)) => {}
                    Err(err) => failures.push((info.address, err)),
                }
            }
        }
        failures
    }

    /// Drop every entry without touching the target.
    pub fn forget_all(&mut self)
    {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
