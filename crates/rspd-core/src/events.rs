//! Target stop notifications.
//!
//! Hosts publish an event whenever an attached target leaves the running
//! state. The protocol session waits on the receiving end while the target
//! runs, alongside the client socket, so the channel is a `tokio` channel
//! whose `recv()` can take part in `tokio::select!`.

use tokio::sync::mpsc;

use crate::types::{Address, Signal, ThreadId};

/// Event emitted by a target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent
{
    /// Target stopped execution and can be inspected again.
    Stopped
    {
        /// Signal responsible for the stop.
        signal: Signal,
        /// Program counter at the stop. For software breakpoints this is the
        /// breakpoint address, not the address after the trap instruction.
        pc: Address,
        /// Thread responsible for the stop (if known).
        thread: Option<ThreadId>,
    },
    /// Target exited normally.
    Exited
    {
        /// Exit status (low 8 bits are reported to the client).
        code: i32,
    },
    /// Target was terminated by a signal.
    Terminated
    {
        /// Terminating signal.
        signal: Signal,
    },
}

impl TargetEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::Stopped { signal, pc, thread } => {
                let mut description = format!("Stopped by {signal} at {pc}");
                if let Some(thread_id) = thread {
                    description.push_str(&format!(" (thread {})", thread_id.raw()));
                }
                description
            }
            Self::Exited { code } => format!("Process exited with code: {code}"),
            Self::Terminated { signal } => format!("Process terminated by {signal}"),
        }
    }

    /// Whether the target is gone after this event.
    #[must_use]
    pub fn is_terminal(&self) -> bool
    {
        !matches!(self, Self::Stopped { .. })
    }
}

/// Sender side of the target event channel (held by the host).
pub type TargetEventSender = mpsc::UnboundedSender<TargetEvent>;
/// Receiver side of the target event channel (held by the session).
pub type TargetEventReceiver = mpsc::UnboundedReceiver<TargetEvent>;

/// Create a new target event channel.
#[must_use]
pub fn event_channel() -> (TargetEventSender, TargetEventReceiver)
{
    mpsc::unbounded_channel()
}
