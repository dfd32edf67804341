//! # Simulated Host
//!
//! An in-memory process that implements [`Target`]. It backs the binary's
//! `--simulate` mode and every protocol-level test.
//!
//! ## Execution Model
//!
//! - Every instruction is one trap-width unit (1 byte on x86-64, 4 on AArch64).
//! - `resume(Step)` advances PC by one unit and reports `SIGTRAP`.
//! - `resume(Continue)` scans forward from PC through the containing region
//!   for a trap opcode or an armed hardware breakpoint and stops there with
//!   `SIGTRAP`, PC set to the trap address. If nothing is found the process
//!   keeps "running" until [`Target::interrupt`], which reports `SIGINT`.
//! - PC outside every mapped region stops with `SIGSEGV`.
//!
//! Hardware breakpoints are not checked at the first instruction of a
//! continue, matching the resume flag on real debug registers.
//!
//! Handles are cheap clones sharing one process, so a test can keep a handle
//! while the session owns another and observe live memory.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::breakpoints::{trap_bytes, WatchpointAccess};
use crate::error::{DebugError, Result};
use crate::events::{event_channel, TargetEvent, TargetEventReceiver, TargetEventSender};
use crate::target::{ResumeMode, Target};
use crate::types::{Address, AddressRange, Architecture, ProcessId, Registers, Signal, ThreadId};

/// Counters of host primitive calls, for observing caching behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedStats
{
    pub memory_reads: u64,
    pub memory_writes: u64,
    pub register_reads: u64,
    pub register_writes: u64,
    pub resumes: u64,
    pub steps: u64,
    pub detaches: u64,
    pub kills: u64,
}

#[derive(Debug)]
struct Region
{
    base: Address,
    bytes: Vec<u8>,
}

impl Region
{
    fn range(&self) -> AddressRange
    {
        AddressRange::new(self.base, self.bytes.len())
    }

    /// Byte offsets of `[address, address + len)` inside the region.
    fn span(&self, address: Address, len: usize) -> Option<std::ops::Range<usize>>
    {
        if !self.range().contains(&AddressRange::new(address, len)) {
            return None;
        }
        let start = usize::try_from(address.offset_from(self.base)?).ok()?;
        Some(start..start + len)
    }
}

#[derive(Debug)]
struct SimulatedProcess
{
    pid: ProcessId,
    architecture: Architecture,
    registers: Registers,
    regions: Vec<Region>,
    attached: bool,
    running: bool,
    gone: bool,
    events: Option<TargetEventSender>,
    debug_registers: usize,
    hardware_breakpoints: Vec<Address>,
    watchpoints: Vec<(Address, usize, WatchpointAccess)>,
    stats: SimulatedStats,
}

impl SimulatedProcess
{
    fn ensure_attached(&self) -> Result<()>
    {
        if self.attached {
            Ok(())
        } else {
            Err(DebugError::NotAttached)
        }
    }

    fn ensure_stopped(&self) -> Result<()>
    {
        self.ensure_attached()?;
        if self.running {
            Err(DebugError::NotStopped)
        } else {
            Ok(())
        }
    }

    fn region(&self, address: Address, len: usize) -> Option<(&Region, std::ops::Range<usize>)>
    {
        self.regions
            .iter()
            .find_map(|region| region.span(address, len).map(|span| (region, span)))
    }

    fn debug_registers_in_use(&self) -> usize
    {
        self.hardware_breakpoints.len() + self.watchpoints.len()
    }

    fn claim_debug_register(&self, what: &'static str) -> Result<()>
    {
        if self.debug_registers == 0 {
            return Err(DebugError::Unsupported(what));
        }
        if self.debug_registers_in_use() >= self.debug_registers {
            return Err(DebugError::ResourceExhausted(format!(
                "all {} debug registers in use",
                self.debug_registers
            )));
        }
        Ok(())
    }

    fn publish(&mut self, event: TargetEvent)
    {
        tracing::trace!(event = %event.describe(), "simulated target event");
        if let Some(sender) = &self.events {
            if sender.send(event).is_err() {
                tracing::trace!("event receiver dropped");
            }
        }
    }

    fn stop(&mut self, signal: Signal, pc: Address)
    {
        self.running = false;
        self.registers.set_pc(pc);
        self.publish(TargetEvent::Stopped {
            signal,
            pc,
            thread: Some(ThreadId(u64::from(self.pid.raw()))),
        });
    }

    /// Find where a continue from `pc` stops, if anywhere.
    fn scan_for_trap(&self, pc: Address) -> Option<Address>
    {
        let trap = trap_bytes(self.architecture);
        let unit = self.architecture.instruction_unit();
        let (region, span) = self.region(pc, trap.len())?;
        let mut offset = span.start;
        while offset + trap.len() <= region.bytes.len() {
            let address = region.base + offset as u64;
            if region.bytes[offset..offset + trap.len()] == *trap {
                return Some(address);
            }
            if address != pc && self.hardware_breakpoints.contains(&address) {
                return Some(address);
            }
            offset += unit;
        }
        None
    }

    fn finish(&mut self, event: TargetEvent)
    {
        self.publish(event);
        self.events = None;
        self.attached = false;
        self.running = false;
        self.gone = true;
    }
}

/// In-memory debug target
///
/// ## Example
///
/// ```rust
/// use rspd_core::platform::simulated::SimulatedTarget;
/// use rspd_core::types::{Address, Architecture, ProcessId};
/// use rspd_core::{ResumeMode, Target};
///
/// let mut target = SimulatedTarget::new(ProcessId::from(7), Architecture::X86_64)
///     .with_region(0x1000, vec![0x90, 0x90, 0xCC, 0x90])
///     .with_pc(0x1000);
/// let mut events = target.attach(ProcessId::from(7))?;
///
/// target.resume(ResumeMode::Continue)?;
/// let stop = events.try_recv().expect("stop event");
/// assert!(matches!(stop, rspd_core::events::TargetEvent::Stopped { pc, .. } if pc == Address::from(0x1002)));
/// # Ok::<(), rspd_core::error::DebugError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedTarget
{
    inner: Arc<Mutex<SimulatedProcess>>,
}

impl SimulatedTarget
{
    /// Create a process with no mapped memory and zeroed registers.
    #[must_use]
    pub fn new(pid: ProcessId, architecture: Architecture) -> Self
    {
        Self {
            inner: Arc::new(Mutex::new(SimulatedProcess {
                pid,
                architecture,
                registers: Registers::zeroed(architecture),
                regions: Vec::new(),
                attached: false,
                running: false,
                gone: false,
                events: None,
                debug_registers: 0,
                hardware_breakpoints: Vec::new(),
                watchpoints: Vec::new(),
                stats: SimulatedStats::default(),
            })),
        }
    }

    /// The process used by `rspd serve --simulate`: pid 100, x86-64, a page
    /// of `NOP`s at `0x401000` (PC at its start) and 256 data bytes at
    /// `0x7000`.
    #[must_use]
    pub fn demo() -> Self
    {
        let data = (0..=255u8).collect();
        Self::new(ProcessId::from(100), Architecture::X86_64)
            .with_region(0x40_1000, vec![0x90; 0x1000])
            .with_region(0x7000, data)
            .with_pc(0x40_1000)
            .with_debug_registers(4)
    }

    /// Map `bytes` at `base`.
    #[must_use]
    pub fn with_region(self, base: u64, bytes: Vec<u8>) -> Self
    {
        self.lock().regions.push(Region {
            base: Address::from(base),
            bytes,
        });
        self
    }

    /// Set the initial program counter.
    #[must_use]
    pub fn with_pc(self, pc: u64) -> Self
    {
        self.lock().registers.set_pc(Address::from(pc));
        self
    }

    /// Give the process `count` debug registers, shared by hardware
    /// breakpoints and watchpoints. Zero (the default) makes both
    /// unsupported.
    #[must_use]
    pub fn with_debug_registers(self, count: usize) -> Self
    {
        self.lock().debug_registers = count;
        self
    }

    /// Copy of live memory, ignoring attachment state.
    #[must_use]
    pub fn peek_memory(&self, address: Address, len: usize) -> Option<Vec<u8>>
    {
        let process = self.lock();
        process
            .region(address, len)
            .map(|(region, span)| region.bytes[span].to_vec())
    }

    /// Copy of the live register context.
    #[must_use]
    pub fn peek_registers(&self) -> Registers
    {
        self.lock().registers.clone()
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn stats(&self) -> SimulatedStats
    {
        self.lock().stats
    }

    #[must_use]
    pub fn is_attached(&self) -> bool
    {
        self.lock().attached
    }

    #[must_use]
    pub fn is_running(&self) -> bool
    {
        self.lock().running
    }

    /// Addresses with an armed hardware breakpoint.
    #[must_use]
    pub fn hardware_breakpoints(&self) -> Vec<Address>
    {
        self.lock().hardware_breakpoints.clone()
    }

    /// Number of armed watchpoints.
    #[must_use]
    pub fn armed_watchpoints(&self) -> usize
    {
        self.lock().watchpoints.len()
    }

    /// Make the process exit with `code`, as if it returned from `main`.
    pub fn exit(&self, code: i32)
    {
        self.lock().finish(TargetEvent::Exited { code });
    }

    /// Make the process die from `signal`.
    pub fn terminate(&self, signal: Signal)
    {
        self.lock().finish(TargetEvent::Terminated { signal });
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedProcess>
    {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Target for SimulatedTarget
{
    fn architecture(&self) -> Architecture
    {
        self.lock().architecture
    }

    fn attach(&mut self, pid: ProcessId) -> Result<TargetEventReceiver>
    {
        let mut process = self.lock();
        if process.pid != pid || process.gone {
            return Err(DebugError::ProcessNotFound(pid.raw()));
        }
        if process.attached {
            return Err(DebugError::AttachFailed(format!("process {pid} is already being debugged")));
        }
        let (sender, receiver) = event_channel();
        process.events = Some(sender);
        process.attached = true;
        process.running = false;
        tracing::debug!(%pid, architecture = %process.architecture, "simulated process attached");
        Ok(receiver)
    }

    fn detach(&mut self) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.attached = false;
        process.events = None;
        // Unsupervised from here on.
        process.running = true;
        process.stats.detaches += 1;
        Ok(())
    }

    fn kill(&mut self) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.stats.kills += 1;
        process.events = None;
        process.attached = false;
        process.running = false;
        process.gone = true;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.running = false;
        Ok(())
    }

    fn interrupt(&mut self) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        if process.running {
            let pc = process.registers.pc();
            process.stop(Signal::SIGINT, pc);
        }
        Ok(())
    }

    fn resume(&mut self, mode: ResumeMode) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_stopped()?;
        process.stats.resumes += 1;
        process.running = true;

        let pc = process.registers.pc();
        let unit = process.architecture.instruction_unit();
        if process.region(pc, unit).is_none() {
            process.stop(Signal::SIGSEGV, pc);
            return Ok(());
        }

        match mode {
            ResumeMode::Step => {
                process.stats.steps += 1;
                process.stop(Signal::SIGTRAP, pc + unit as u64);
            }
            ResumeMode::Continue => {
                if let Some(address) = process.scan_for_trap(pc) {
                    process.stop(Signal::SIGTRAP, address);
                }
            }
        }
        Ok(())
    }

    fn read_registers(&self) -> Result<Registers>
    {
        let mut process = self.lock();
        process.ensure_stopped()?;
        process.stats.register_reads += 1;
        Ok(process.registers.clone())
    }

    fn write_registers(&mut self, registers: &Registers) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_stopped()?;
        if registers.architecture() != process.architecture {
            return Err(DebugError::RegisterAccess(format!(
                "{} register set written to {} process",
                registers.architecture(),
                process.architecture
            )));
        }
        process.stats.register_writes += 1;
        process.registers = registers.clone();
        Ok(())
    }

    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.stats.memory_reads += 1;
        if len == 0 {
            return Ok(Vec::new());
        }
        process
            .region(address, len)
            .map(|(region, span)| region.bytes[span].to_vec())
            .ok_or_else(|| DebugError::MemoryAccess {
                address: address.value(),
                len,
                details: "range not mapped".to_string(),
            })
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<usize>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.stats.memory_writes += 1;
        if data.is_empty() {
            return Ok(0);
        }
        let region = process
            .regions
            .iter_mut()
            .find(|region| region.span(address, data.len()).is_some())
            .ok_or_else(|| DebugError::MemoryAccess {
                address: address.value(),
                len: data.len(),
                details: "range not mapped".to_string(),
            })?;
        if let Some(span) = region.span(address, data.len()) {
            region.bytes[span].copy_from_slice(data);
        }
        Ok(data.len())
    }

    fn arm_hardware_breakpoint(&mut self, address: Address) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.claim_debug_register("hardware breakpoints")?;
        process.hardware_breakpoints.push(address);
        Ok(())
    }

    fn disarm_hardware_breakpoint(&mut self, address: Address) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        if process.debug_registers == 0 {
            return Err(DebugError::Unsupported("hardware breakpoints"));
        }
        let index = process
            .hardware_breakpoints
            .iter()
            .position(|&armed| armed == address)
            .ok_or(DebugError::NoBreakpoint(address.value()))?;
        process.hardware_breakpoints.swap_remove(index);
        Ok(())
    }

    fn arm_watchpoint(&mut self, address: Address, len: usize, access: WatchpointAccess) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        process.claim_debug_register("watchpoints")?;
        process.watchpoints.push((address, len, access));
        Ok(())
    }

    fn disarm_watchpoint(&mut self, address: Address, len: usize, access: WatchpointAccess) -> Result<()>
    {
        let mut process = self.lock();
        process.ensure_attached()?;
        if process.debug_registers == 0 {
            return Err(DebugError::Unsupported("watchpoints"));
        }
        let index = process
            .watchpoints
            .iter()
            .position(|armed| *armed == (address, len, access))
            .ok_or(DebugError::NoWatchpoint(address.value()))?;
        process.watchpoints.swap_remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn attached(target: &mut SimulatedTarget) -> TargetEventReceiver
    {
        target.attach(ProcessId::from(100)).expect("attach")
    }

    #[test]
    fn test_attach_unknown_pid()
    {
        let mut target = SimulatedTarget::demo();
        let result = target.attach(ProcessId::from(42));
        assert!(matches!(result, Err(DebugError::ProcessNotFound(42))));
    }

    #[test]
    fn test_attach_twice_fails()
    {
        let mut target = SimulatedTarget::demo();
        let _events = attached(&mut target);
        assert!(matches!(target.attach(ProcessId::from(100)), Err(DebugError::AttachFailed(_))));
    }

    #[test]
    fn test_step_advances_one_unit()
    {
        let mut target = SimulatedTarget::demo();
        let mut events = attached(&mut target);
        target.resume(ResumeMode::Step).expect("step");
        let event = events.try_recv().expect("event");
        assert_eq!(
            event,
            TargetEvent::Stopped {
                signal: Signal::SIGTRAP,
                pc: Address::from(0x40_1001),
                thread: Some(ThreadId(100)),
            }
        );
        assert_eq!(target.peek_registers().pc(), Address::from(0x40_1001));
    }

    #[test]
    fn test_continue_runs_until_interrupt()
    {
        let mut target = SimulatedTarget::demo();
        let mut events = attached(&mut target);
        target.resume(ResumeMode::Continue).expect("continue");
        assert!(target.is_running());
        assert!(events.try_recv().is_err());

        target.interrupt().expect("interrupt");
        let event = events.try_recv().expect("event");
        assert!(matches!(event, TargetEvent::Stopped { signal: Signal::SIGINT, .. }));
        assert!(!target.is_running());
    }

    #[test]
    fn test_continue_stops_at_trap()
    {
        let mut target = SimulatedTarget::demo();
        let mut events = attached(&mut target);
        target.write_memory(Address::from(0x40_1010), &[0xCC]).expect("write");
        target.resume(ResumeMode::Continue).expect("continue");
        let event = events.try_recv().expect("event");
        assert!(matches!(event, TargetEvent::Stopped { signal: Signal::SIGTRAP, pc, .. } if pc == Address::from(0x40_1010)));
    }

    #[test]
    fn test_continue_stops_at_hardware_breakpoint()
    {
        let mut target = SimulatedTarget::demo();
        let mut events = attached(&mut target);
        target.arm_hardware_breakpoint(Address::from(0x40_1020)).expect("arm");
        target.resume(ResumeMode::Continue).expect("continue");
        let event = events.try_recv().expect("event");
        assert!(matches!(event, TargetEvent::Stopped { pc, .. } if pc == Address::from(0x40_1020)));
    }

    #[test]
    fn test_unmapped_pc_faults()
    {
        let mut target = SimulatedTarget::new(ProcessId::from(100), Architecture::Arm64).with_pc(0xdead_0000);
        let mut events = attached(&mut target);
        target.resume(ResumeMode::Step).expect("step");
        let event = events.try_recv().expect("event");
        assert!(matches!(event, TargetEvent::Stopped { signal: Signal::SIGSEGV, .. }));
    }

    #[test]
    fn test_registers_require_stopped()
    {
        let mut target = SimulatedTarget::demo();
        assert!(matches!(target.read_registers(), Err(DebugError::NotAttached)));
        let _events = attached(&mut target);
        target.resume(ResumeMode::Continue).expect("continue");
        assert!(matches!(target.read_registers(), Err(DebugError::NotStopped)));
    }

    #[test]
    fn test_memory_outside_regions()
    {
        let mut target = SimulatedTarget::demo();
        let _events = attached(&mut target);
        assert!(matches!(
            target.read_memory(Address::from(0x70f8), 0x10),
            Err(DebugError::MemoryAccess { .. })
        ));
        assert!(target.write_memory(Address::from(0x10), &[1]).is_err());
    }

    #[test]
    fn test_debug_registers_unsupported_by_default()
    {
        let mut target = SimulatedTarget::new(ProcessId::from(100), Architecture::X86_64);
        let _events = attached(&mut target);
        assert!(matches!(
            target.arm_hardware_breakpoint(Address::from(0x1000)),
            Err(DebugError::Unsupported(_))
        ));
        assert!(matches!(
            target.arm_watchpoint(Address::from(0x1000), 4, WatchpointAccess::Write),
            Err(DebugError::Unsupported(_))
        ));
    }

    #[test]
    fn test_exit_closes_channel()
    {
        let mut target = SimulatedTarget::demo();
        let mut events = attached(&mut target);
        target.exit(3);
        assert_eq!(events.try_recv().expect("event"), TargetEvent::Exited { code: 3 });
        assert!(events.try_recv().is_err());
        assert!(!target.is_attached());
    }
}
