//! # Session
//!
//! One client connection driving one [`TargetControl`]: receive a packet,
//! dispatch it, send the reply, until the client detaches, kills, or goes
//! away.
//!
//! While the target runs (after `c`/`s`) the session waits on three things
//! at once with `tokio::select!`:
//!
//! 1. the target's stop-event channel
//! 2. the next byte from the client; only a break (`0x03`) acts
//! 3. the interrupt deadline, armed by a break
//!
//! If no stop arrives within the interrupt timeout the target is suspended
//! directly and reported as interrupted.

use std::future;
use std::time::Duration;

use rspd_core::{ProcessId, Target};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep_until, Instant};

use crate::config::ServerConfig;
use crate::control::{ControlStats, ResumeRequest, TargetControl};
use crate::dispatcher::{dispatch, Action};
use crate::error::{CommandError, Result, SessionError, TransportError};
use crate::memory::CacheStats;
use crate::packet::{Connection, Incoming, INTERRUPT_BYTE};

/// Counters collected over one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats
{
    pub packets_received: u64,
    pub checksum_failures: u64,
    pub framing_errors: u64,
    pub commands_dispatched: u64,
    pub control: ControlStats,
    pub cache: CacheStats,
}

/// One client session
pub struct Session<'t, S>
{
    connection: Connection<S>,
    control: TargetControl<'t>,
    interrupt_timeout: Duration,
    stats: SessionStats,
}

impl<'t, S> Session<'t, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, target: &'t mut dyn Target, config: &ServerConfig) -> Self
    {
        Self {
            connection: Connection::new(stream, config.max_packet_size),
            control: TargetControl::new(target, config),
            interrupt_timeout: config.interrupt_timeout,
            stats: SessionStats::default(),
        }
    }

    /// Attach before the first packet (the `attach_pid` setting).
    ///
    /// ## Errors
    ///
    /// - `UnknownTarget` / `AlreadyAttached`
    pub fn attach(&mut self, pid: ProcessId) -> std::result::Result<(), CommandError>
    {
        self.control.attach(pid).map(|_| ())
    }

    /// Target Control of this session.
    #[must_use]
    pub fn control(&self) -> &TargetControl<'t>
    {
        &self.control
    }

    /// Serve packets until the session ends.
    ///
    /// Returns the session's counters. On every exit path the target is
    /// released with its original code restored.
    ///
    /// ## Errors
    ///
    /// - `Transport`: the socket failed; a client hanging up, even while
    ///   the target runs, is a normal end
    #[tracing::instrument(name = "session", skip_all)]
    pub async fn run(mut self) -> Result<SessionStats>
    {
        let outcome = match self.serve().await {
            Err(SessionError::Transport(TransportError::ConnectionClosed)) => {
                tracing::info!("client disconnected");
                Ok(())
            }
            outcome => outcome,
        };
        if let Err(err) = self.control.detach() {
            tracing::error!(error = %err, "failed to release target");
        }
        let stats = self.stats();
        tracing::info!(?stats, "session ended");
        outcome.map(|()| stats)
    }

    async fn serve(&mut self) -> Result<()>
    {
        loop {
            let incoming = match self.connection.receive().await {
                Ok(incoming) => incoming,
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    if matches!(err, TransportError::ChecksumMismatch { .. }) {
                        self.stats.checksum_failures += 1;
                    } else {
                        self.stats.framing_errors += 1;
                    }
                    tracing::warn!(error = %err, "dropped packet");
                    continue;
                }
            };

            let payload = match incoming {
                Incoming::Packet(payload) => payload,
                Incoming::Interrupt => {
                    tracing::debug!("break while target stopped; ignored");
                    continue;
                }
            };
            self.stats.packets_received += 1;
            tracing::debug!(%payload, "packet");

            self.stats.commands_dispatched += 1;
            match dispatch(&mut self.control, &payload) {
                Action::Reply(reply) => self.connection.send(&reply).await?,
                Action::StartNoAck => {
                    self.connection.send("OK").await?;
                    self.connection.enable_no_ack();
                    tracing::debug!("no-ack mode enabled");
                }
                Action::Resume(request) => {
                    let reply = self.execute(request).await?;
                    self.connection.send(&reply).await?;
                }
                Action::Close { reply } => {
                    if let Some(reply) = reply {
                        self.connection.send(&reply).await?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Run the target until it stops and produce the stop reply.
    async fn execute(&mut self, request: ResumeRequest) -> Result<String>
    {
        let mut plan = match self.control.start_resume(request) {
            Ok(plan) => plan,
            Err(err) => return Ok(err.reply()),
        };

        let mut deadline: Option<Instant> = None;
        if self.connection.take_pending_interrupt() {
            deadline = Some(self.request_interrupt());
        }

        loop {
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                event = self.control.next_event() => {
                    let outcome = match event {
                        Some(event) => self.control.on_event(&mut plan, event),
                        None => Ok(Some(self.control.on_channel_closed())),
                    };
                    match outcome {
                        Ok(Some(reply)) => return Ok(reply),
                        Ok(None) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "failed to handle stop");
                            return Ok(err.reply());
                        }
                    }
                }
                byte = self.connection.next_byte() => {
                    match byte {
                        Ok(INTERRUPT_BYTE) if deadline.is_none() => {
                            deadline = Some(self.request_interrupt());
                        }
                        Ok(byte) => tracing::trace!(byte, "discarding byte while running"),
                        Err(err) => {
                            tracing::warn!(error = %err, "client lost while target running");
                            self.control.force_stop(&mut plan);
                            return Err(err.into());
                        }
                    }
                }
                () = timer => {
                    tracing::warn!(timeout = ?self.interrupt_timeout, "no stop after interrupt; suspending target");
                    return Ok(self.control.force_stop(&mut plan));
                }
            }
        }
    }

    /// Ask the target to stop; returns the deadline for its stop event.
    fn request_interrupt(&mut self) -> Instant
    {
        tracing::debug!("interrupt requested");
        if let Err(err) = self.control.interrupt() {
            tracing::warn!(error = %err, "interrupt request failed");
            // Expire at once so the target is suspended directly.
            return Instant::now();
        }
        Instant::now() + self.interrupt_timeout
    }

    fn stats(&self) -> SessionStats
    {
        SessionStats {
            control: self.control.stats(),
            cache: self.control.cache_stats(),
            ..self.stats
        }
    }
}
