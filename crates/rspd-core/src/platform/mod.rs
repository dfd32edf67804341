//! # Host Implementations
//!
//! Implementations of the [`Target`](crate::target::Target) trait.
//!
//! - **simulated**: an in-memory process used by tests and `--simulate`
//! - **linux**: would use `ptrace` (future)
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - **macOS**: would use Mach task ports (future)

pub mod simulated;
