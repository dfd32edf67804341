//! # rspd-protocol
//!
//! GDB Remote Serial Protocol server for the rspd debugging stub.
//!
//! Layers, bottom up:
//! - [`packet`]: `$payload#cc` framing, acks and break bytes over any async stream
//! - [`registers`] / [`memory`]: hex bridges with per-stop caches
//! - [`control`]: the attach/resume/stop state machine over a [`rspd_core::Target`]
//! - [`dispatcher`]: packet payload to command handler to reply
//! - [`session`] / [`server`]: one client connection, and the TCP listener
//!
//! ## Example
//!
//! ```rust,no_run
//! use rspd_core::platform::simulated::SimulatedTarget;
//! use rspd_protocol::config::ServerConfig;
//! use rspd_protocol::server::Server;
//!
//! # async fn run() -> rspd_protocol::error::Result<()> {
//! let mut target = SimulatedTarget::demo();
//! let server = Server::bind(ServerConfig::default()).await?;
//! server.serve(&mut target).await
//! # }
//! ```

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod packet;
pub mod registers;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::{CommandError, SessionError, TransportError};
pub use server::Server;
pub use session::{Session, SessionStats};
