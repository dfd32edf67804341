//! # Target Control
//!
//! The attach/resume/stop state machine of one session:
//!
//! ```text
//! Detached --attach--> Stopped --resume--> Running --stop event--> Stopped
//!     ^                   |                   |
//!     +--detach/kill------+----exit/kill------+
//! ```
//!
//! Registers, memory and breakpoints are only touched while `Stopped`.
//! Every path out of an attachment (detach, kill, a dropped session)
//! restores the original code under software breakpoints first; if the
//! process exited, the patches are forgotten instead.

use rspd_core::breakpoints::{trap_bytes, BreakpointKind, BreakpointTable, WatchpointAccess, WatchpointTable};
use rspd_core::events::{TargetEvent, TargetEventReceiver};
use rspd_core::types::{Address, AddressRange, Architecture, ProcessId, Signal};
use rspd_core::{ResumeMode, Target};

use crate::config::ServerConfig;
use crate::error::CommandError;
use crate::memory::{CacheStats, MemoryCache};
use crate::registers::RegisterCache;

/// Lifecycle state of the session's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState
{
    Detached,
    Stopped,
    Running,
}

/// A `c` or `s` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeRequest
{
    pub mode: ResumeMode,
    /// Resume address, if the packet carried one
    pub address: Option<Address>,
}

/// What the target is doing on behalf of an in-flight resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan
{
    /// Resumed directly; the next stop is reported.
    Run,
    /// Stepping off the software breakpoint at `address` with its trap
    /// lifted; `then` says what the client asked for.
    StepOver
    {
        address: Address,
        then: ResumeMode,
    },
}

/// How teardown releases the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release
{
    Detach,
    Kill,
}

/// Execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats
{
    pub resumes: u64,
    pub steps: u64,
    pub stops: u64,
    pub interrupts: u64,
    pub breakpoint_hits: u64,
}

/// Stop reply for `signal` (`S<nn>`).
#[must_use]
pub fn stop_reply(signal: Signal) -> String
{
    format!("S{:02x}", signal.number())
}

/// Target Control for one session
///
/// Borrows the host for the lifetime of the session. Dropping it while a
/// target is attached restores all breakpoints and detaches.
pub struct TargetControl<'t>
{
    target: &'t mut dyn Target,
    state: TargetState,
    pid: Option<ProcessId>,
    events: Option<TargetEventReceiver>,
    registers: RegisterCache,
    memory: MemoryCache,
    breakpoints: BreakpointTable,
    watchpoints: WatchpointTable,
    last_signal: Signal,
    /// Breakpoint the last stop was attributed to; resuming from it steps
    /// over the trap.
    trapped_at: Option<Address>,
    max_read_len: usize,
    max_packet_size: usize,
    stats: ControlStats,
}

impl<'t> TargetControl<'t>
{
    pub fn new(target: &'t mut dyn Target, config: &ServerConfig) -> Self
    {
        Self {
            target,
            state: TargetState::Detached,
            pid: None,
            events: None,
            registers: RegisterCache::new(),
            memory: MemoryCache::new(config.cache_line_size),
            breakpoints: BreakpointTable::with_capacity(config.breakpoint_capacity),
            watchpoints: WatchpointTable::with_capacity(config.watchpoint_capacity),
            last_signal: Signal::SIGTRAP,
            trapped_at: None,
            max_read_len: config.max_read_len(),
            max_packet_size: config.max_packet_size,
            stats: ControlStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TargetState
    {
        self.state
    }

    #[must_use]
    pub fn is_attached(&self) -> bool
    {
        self.state != TargetState::Detached
    }

    /// Attached process, if any.
    #[must_use]
    pub fn pid(&self) -> Option<ProcessId>
    {
        self.pid
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.target.architecture()
    }

    #[must_use]
    pub fn max_packet_size(&self) -> usize
    {
        self.max_packet_size
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointTable
    {
        &self.breakpoints
    }

    #[must_use]
    pub fn watchpoints(&self) -> &WatchpointTable
    {
        &self.watchpoints
    }

    #[must_use]
    pub fn stats(&self) -> ControlStats
    {
        self.stats
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats
    {
        self.memory.stats()
    }

    /// Attach to `pid` and report the initial stop (`S05`).
    ///
    /// ## Errors
    ///
    /// - `AlreadyAttached`: the session already has a target
    /// - `UnknownTarget`: the host has no such process
    pub fn attach(&mut self, pid: ProcessId) -> Result<String, CommandError>
    {
        if self.is_attached() {
            return Err(CommandError::AlreadyAttached);
        }
        let events = self.target.attach(pid)?;
        self.events = Some(events);
        self.pid = Some(pid);
        self.state = TargetState::Stopped;
        self.last_signal = Signal::SIGTRAP;
        self.trapped_at = None;
        self.invalidate_caches();
        tracing::info!(%pid, architecture = %self.target.architecture(), "attached");
        Ok(stop_reply(self.last_signal))
    }

    /// Fail unless a target is attached and stopped.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running`
    pub fn ensure_stopped(&self) -> Result<(), CommandError>
    {
        match self.state {
            TargetState::Stopped => Ok(()),
            TargetState::Detached => Err(CommandError::NotAttached),
            TargetState::Running => Err(CommandError::Running),
        }
    }

    /// `?` reply.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running`
    pub fn halt_reason(&self) -> Result<String, CommandError>
    {
        self.ensure_stopped()?;
        Ok(stop_reply(self.last_signal))
    }

    /// `g` reply.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running`, or host register failures
    pub fn read_registers(&mut self) -> Result<String, CommandError>
    {
        self.ensure_stopped()?;
        self.registers.read_hex(&*self.target)
    }

    /// Apply a `G` stream.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running` / `Malformed`, or host register failures
    pub fn write_registers(&mut self, text: &str) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        self.registers.write_hex(&mut *self.target, text)
    }

    /// `p` reply.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running` / `Malformed`
    pub fn read_register(&mut self, index: usize) -> Result<String, CommandError>
    {
        self.ensure_stopped()?;
        self.registers.read_one(&*self.target, index)
    }

    /// Apply a `P` write.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running` / `Malformed`
    pub fn write_register(&mut self, index: usize, text: &str) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        self.registers.write_one(&mut *self.target, index, text)
    }

    /// Read memory as the program sees it (software traps hidden).
    ///
    /// ## Errors
    ///
    /// - `ReadTooLarge`: the hex reply would not fit in one packet
    /// - `MemoryAccess`: the range is not readable
    pub fn read_memory(&mut self, address: Address, len: usize) -> Result<Vec<u8>, CommandError>
    {
        self.ensure_stopped()?;
        if len > self.max_read_len {
            return Err(CommandError::ReadTooLarge {
                requested: len,
                limit: self.max_read_len,
            });
        }
        let mut bytes = self.memory.read(&*self.target, address, len)?;
        self.breakpoints.shadow_read(address, &mut bytes);
        Ok(bytes)
    }

    /// Write memory; bytes under software traps go to the saved originals
    /// once the write has fully landed.
    ///
    /// ## Errors
    ///
    /// - `MemoryAccess`: the range is not writable, or the write was short
    pub fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        let mut masked = data.to_vec();
        self.breakpoints.mask_write(address, &mut masked);
        let written = self.memory.write(&mut *self.target, address, &masked)?;
        if written != masked.len() {
            return Err(CommandError::MemoryAccess(format!(
                "short write of {written} of {} bytes at {address}",
                masked.len()
            )));
        }
        self.breakpoints.commit_write(address, data);
        Ok(())
    }

    /// Set a software (`Z0`) or hardware (`Z1`) breakpoint.
    ///
    /// ## Errors
    ///
    /// - `Duplicate` / `TableFull` / `MemoryAccess` / `Unsupported`
    pub fn insert_breakpoint(&mut self, kind: BreakpointKind, address: Address, size: usize) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        let id = self.breakpoints.insert(&mut *self.target, kind, address, size)?;
        let range = self.trap_range(address);
        self.memory.invalidate_range(&range);
        tracing::info!(id = id.raw(), %address, ?kind, "breakpoint set");
        Ok(())
    }

    /// Remove a breakpoint set by [`TargetControl::insert_breakpoint`].
    ///
    /// ## Errors
    ///
    /// - `NotFound`: nothing of that kind at `address`
    pub fn remove_breakpoint(&mut self, kind: BreakpointKind, address: Address) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        let info = self.breakpoints.remove(&mut *self.target, kind, address)?;
        let range = self.trap_range(address);
        self.memory.invalidate_range(&range);
        tracing::info!(id = info.id.raw(), %address, hits = info.hit_count, "breakpoint removed");
        Ok(())
    }

    /// Set a watchpoint (`Z2`..`Z4`).
    ///
    /// ## Errors
    ///
    /// - `Duplicate` / `TableFull` / `Malformed` / `Unsupported`
    pub fn insert_watchpoint(&mut self, address: Address, len: usize, access: WatchpointAccess) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        self.watchpoints.insert(&mut *self.target, address, len, access)?;
        Ok(())
    }

    /// Remove a watchpoint (`z2`..`z4`).
    ///
    /// ## Errors
    ///
    /// - `NotFound` / `Unsupported`
    pub fn remove_watchpoint(&mut self, address: Address, len: usize, access: WatchpointAccess) -> Result<(), CommandError>
    {
        self.ensure_stopped()?;
        self.watchpoints.remove(&mut *self.target, address, len, access)?;
        Ok(())
    }

    /// Set the target running for a `c`/`s` request.
    ///
    /// If the target last stopped on the software breakpoint at PC, the trap
    /// is lifted and the target single-steps first;
    /// [`TargetControl::on_event`] re-inserts it. A trap at PC that was not
    /// just hit (for example one set right after attaching) fires at once.
    ///
    /// ## Errors
    ///
    /// - `NotAttached` / `Running`, or host failures; the target stays stopped
    pub fn start_resume(&mut self, request: ResumeRequest) -> Result<ResumePlan, CommandError>
    {
        self.ensure_stopped()?;
        self.drain_stale_events()?;
        if let Some(address) = request.address {
            self.registers.set_pc(&mut *self.target, address)?;
        }
        let pc = self.registers.pc(&*self.target)?;
        self.invalidate_caches();

        let plan = if self.trapped_at == Some(pc) && self.breakpoints.lift(&mut *self.target, pc)? {
            tracing::debug!(%pc, "stepping over breakpoint");
            if let Err(err) = self.target.resume(ResumeMode::Step) {
                self.breakpoints.reapply(&mut *self.target, pc)?;
                return Err(err.into());
            }
            ResumePlan::StepOver {
                address: pc,
                then: request.mode,
            }
        } else {
            self.target.resume(request.mode)?;
            ResumePlan::Run
        };

        self.state = TargetState::Running;
        self.trapped_at = None;
        match request.mode {
            ResumeMode::Continue => self.stats.resumes += 1,
            ResumeMode::Step => self.stats.steps += 1,
        }
        tracing::debug!(mode = ?request.mode, %pc, "target resumed");
        Ok(plan)
    }

    /// Wait for the next event from the host. `None` means the channel is
    /// closed (or there is none).
    pub async fn next_event(&mut self) -> Option<TargetEvent>
    {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Handle one stop notification for the in-flight resume.
    ///
    /// Returns the reply to send, or `None` when the stop was internal (the
    /// end of a step-over before a continue) and the target runs again.
    ///
    /// ## Errors
    ///
    /// Host failures while re-inserting a lifted trap or resuming after a
    /// step-over. The target is left stopped.
    pub fn on_event(&mut self, plan: &mut ResumePlan, event: TargetEvent) -> Result<Option<String>, CommandError>
    {
        match event {
            TargetEvent::Stopped { signal, pc, .. } => {
                self.state = TargetState::Stopped;
                self.invalidate_caches();
                if let ResumePlan::StepOver { address, then } = *plan {
                    *plan = ResumePlan::Run;
                    self.breakpoints.reapply(&mut *self.target, address)?;
                    if then == ResumeMode::Continue && signal == Signal::SIGTRAP {
                        self.target.resume(ResumeMode::Continue)?;
                        self.state = TargetState::Running;
                        return Ok(None);
                    }
                }
                Ok(Some(self.report_stop(signal, pc)))
            }
            TargetEvent::Exited { code } => {
                tracing::info!(code, "target exited");
                self.forget_target();
                Ok(Some(format!("W{:02x}", code.to_le_bytes()[0])))
            }
            TargetEvent::Terminated { signal } => {
                tracing::info!(%signal, "target terminated");
                self.forget_target();
                Ok(Some(format!("X{:02x}", signal.number())))
            }
        }
    }

    /// The host dropped the event channel: treat the target as killed.
    pub fn on_channel_closed(&mut self) -> String
    {
        tracing::warn!("target event channel closed");
        self.forget_target();
        format!("X{:02x}", Signal::SIGKILL.number())
    }

    /// Ask the running target to stop.
    ///
    /// ## Errors
    ///
    /// - host failures delivering the request
    pub fn interrupt(&mut self) -> Result<(), CommandError>
    {
        if self.state != TargetState::Running {
            return Ok(());
        }
        self.stats.interrupts += 1;
        self.target.interrupt()?;
        Ok(())
    }

    /// Stop the target without waiting for the host's event and report it
    /// as interrupted.
    pub fn force_stop(&mut self, plan: &mut ResumePlan) -> String
    {
        if let Err(err) = self.target.suspend() {
            tracing::error!(error = %err, "failed to suspend target");
        }
        self.state = TargetState::Stopped;
        self.invalidate_caches();
        if let ResumePlan::StepOver { address, .. } = *plan {
            if let Err(err) = self.breakpoints.reapply(&mut *self.target, address) {
                tracing::error!(error = %err, %address, "failed to re-insert breakpoint");
            }
        }
        *plan = ResumePlan::Run;
        self.last_signal = Signal::SIGINT;
        self.trapped_at = None;
        self.stats.stops += 1;
        stop_reply(Signal::SIGINT)
    }

    /// Restore breakpoints and let the target run unsupervised.
    ///
    /// ## Errors
    ///
    /// - host failures from `detach`
    pub fn detach(&mut self) -> Result<(), CommandError>
    {
        self.teardown(Release::Detach)
    }

    /// Restore breakpoints and terminate the target.
    ///
    /// ## Errors
    ///
    /// - host failures from `kill`
    pub fn kill(&mut self) -> Result<(), CommandError>
    {
        self.teardown(Release::Kill)
    }

    fn teardown(&mut self, release: Release) -> Result<(), CommandError>
    {
        if !self.is_attached() {
            return Ok(());
        }
        if self.state == TargetState::Running {
            if let Err(err) = self.target.suspend() {
                tracing::error!(error = %err, "failed to suspend target before teardown");
            }
        }
        for (address, err) in self.breakpoints.restore_all(&mut *self.target) {
            tracing::error!(%address, error = %err, "failed to restore original code");
        }
        for (address, err) in self.watchpoints.disarm_all(&mut *self.target) {
            tracing::error!(%address, error = %err, "failed to disarm watchpoint");
        }

        let outcome = match release {
            Release::Detach => self.target.detach(),
            Release::Kill => self.target.kill(),
        };
        tracing::info!(pid = ?self.pid, ?release, "target released");
        self.events = None;
        self.pid = None;
        self.state = TargetState::Detached;
        self.invalidate_caches();
        outcome.map_err(Into::into)
    }

    fn report_stop(&mut self, signal: Signal, pc: Address) -> String
    {
        self.last_signal = signal;
        self.trapped_at = None;
        self.stats.stops += 1;
        if signal == Signal::SIGTRAP {
            if let Some(info) = self.breakpoints.record_hit(pc) {
                self.trapped_at = Some(pc);
                self.stats.breakpoint_hits += 1;
                tracing::info!(id = info.id.raw(), %pc, hits = info.hit_count, "breakpoint hit");
            }
        }
        tracing::debug!(%signal, %pc, "target stopped");
        stop_reply(signal)
    }

    fn drain_stale_events(&mut self) -> Result<(), CommandError>
    {
        let Some(events) = self.events.as_mut() else {
            return Ok(());
        };
        while let Ok(event) = events.try_recv() {
            tracing::debug!(event = %event.describe(), "discarding stale event");
            if event.is_terminal() {
                self.forget_target();
                return Err(CommandError::NotAttached);
            }
        }
        Ok(())
    }

    /// The process is gone: nothing can be restored or released.
    fn forget_target(&mut self)
    {
        self.breakpoints.forget_all();
        self.watchpoints.forget_all();
        self.events = None;
        self.pid = None;
        self.state = TargetState::Detached;
        self.trapped_at = None;
        self.invalidate_caches();
    }

    fn invalidate_caches(&mut self)
    {
        self.registers.invalidate();
        self.memory.invalidate();
    }

    fn trap_range(&self, address: Address) -> AddressRange
    {
        AddressRange::new(address, trap_bytes(self.target.architecture()).len())
    }
}

impl Drop for TargetControl<'_>
{
    fn drop(&mut self)
    {
        if self.is_attached() {
            tracing::warn!(pid = ?self.pid, "session ended while attached; detaching");
            if let Err(err) = self.teardown(Release::Detach) {
                tracing::error!(error = %err, "detach during teardown failed");
            }
        }
    }
}
