//! # rspd-core
//!
//! Target-side debugging primitives for the rspd remote debugging stub.
//!
//! This crate provides everything below the wire protocol:
//! - Strongly typed addresses, process ids, signals and register sets
//! - The [`Target`] trait that a host backend implements
//! - Stop notifications delivered over an async channel
//! - Breakpoint and watchpoint tables with reversible code patches
//! - An in-memory simulated host
//!
//! ## Platform Support
//!
//! - **Simulated**: always available ([`platform::simulated`])
//! - **Linux**: Will use `ptrace` (future)
//! - **macOS**: Will use Mach task ports (future)

pub mod breakpoints;
pub mod error;
pub mod events;
pub mod platform;
pub mod prelude;
pub mod target;
pub mod types;

// Re-export commonly used types
pub use error::{DebugError, Result};
pub use target::{create_target, ResumeMode, Target};
pub use types::{Address, Architecture, ProcessId, Registers, Signal};
