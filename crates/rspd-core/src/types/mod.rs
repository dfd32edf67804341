//! # Types
//!
//! Host-agnostic types used throughout the stub.
//!
//! These types let the protocol layer talk about "process ids", "addresses"
//! and "register sets" without knowing which host backend supplies them.

pub mod address;
pub mod process;
pub mod registers;

// Re-export all public types
pub use address::{Address, AddressRange};
pub use process::{Architecture, ProcessId, Signal, ThreadId};
pub use registers::{RegisterDesc, RegisterId, RegisterLayout, Registers};
