//! # rspd Utilities
//!
//! Logging setup shared by the rspd binary and its tests, built on
//! `tracing-subscriber`.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
