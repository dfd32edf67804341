//! Common module for library exports

pub use crate::breakpoints::{BreakpointKind, BreakpointTable, WatchpointAccess, WatchpointTable};
pub use crate::error::{DebugError, Result};
pub use crate::events::{TargetEvent, TargetEventReceiver};
pub use crate::platform::simulated::SimulatedTarget;
pub use crate::target::{ResumeMode, Target};
pub use crate::types::{Address, AddressRange, Architecture, ProcessId, RegisterId, Registers, Signal, ThreadId};
