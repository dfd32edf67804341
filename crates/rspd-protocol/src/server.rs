//! # Server
//!
//! TCP listener that serves one GDB client at a time against a single host
//! target. Sessions run back to back: a new client is accepted only after
//! the previous session has released the target.

use std::net::SocketAddr;

use rspd_core::Target;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{Result, SessionError};
use crate::session::{Session, SessionStats};

/// Bound listener plus the configuration every session uses
pub struct Server
{
    listener: TcpListener,
    config: ServerConfig,
}

impl Server
{
    /// Validate `config` and bind its socket address.
    ///
    /// ## Errors
    ///
    /// - `Config`: the configuration is inconsistent
    /// - `Bind`: the address is unavailable
    pub async fn bind(config: ServerConfig) -> Result<Self>
    {
        config.validate()?;
        let address = config.socket_addr();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| SessionError::Bind { address, source })?;
        tracing::info!(address = %listener.local_addr()?, "listening for gdb");
        Ok(Self { listener, config })
    }

    /// Address actually bound (resolves port 0).
    ///
    /// ## Errors
    ///
    /// - `Io`: the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr>
    {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig
    {
        &self.config
    }

    /// Accept one client and serve it to completion.
    ///
    /// ## Errors
    ///
    /// - `Io`: accept failed
    /// - `Transport`: the session's socket failed
    pub async fn serve_one(&self, target: &mut dyn Target) -> Result<SessionStats>
    {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::warn!(error = %err, "failed to disable Nagle");
        }
        tracing::info!(%peer, "client connected");

        let mut session = Session::new(stream, target, &self.config);
        if let Some(pid) = self.config.attach_pid {
            if let Err(err) = session.attach(pid) {
                tracing::warn!(%pid, error = %err, "initial attach failed; waiting for vAttach");
            }
        }
        session.run().await
    }

    /// Serve clients one after another, forever.
    ///
    /// A session that ends in error is logged and the next client accepted.
    ///
    /// ## Errors
    ///
    /// - `Io`: the listener itself failed
    pub async fn serve(&self, target: &mut dyn Target) -> Result<()>
    {
        loop {
            match self.serve_one(target).await {
                Ok(stats) => tracing::info!(
                    packets = stats.packets_received,
                    resumes = stats.control.resumes,
                    hits = stats.control.breakpoint_hits,
                    "session complete"
                ),
                Err(SessionError::Transport(err)) => tracing::warn!(error = %err, "session aborted"),
                Err(err) => return Err(err),
            }
        }
    }
}
