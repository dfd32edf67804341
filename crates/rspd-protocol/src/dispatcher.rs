//! # Packet Dispatcher
//!
//! Routes a verified packet payload to the component that serves it, keyed
//! on the leading command character. The routing table is built once, on
//! first use. Unknown commands get the empty reply and change nothing.
//!
//! ## Commands
//!
//! | Packet | Meaning |
//! |--------|---------|
//! | `?` | halt reason |
//! | `g` / `G` | read / write all registers |
//! | `p` / `P` | read / write one register |
//! | `m` / `M` | read / write memory |
//! | `Z` / `z` | set / remove breakpoint or watchpoint |
//! | `c` / `s` | continue / single-step (optional resume address) |
//! | `D` / `k` | detach / kill |
//! | `q` / `Q` | queries and settings |
//! | `H` | select thread (single thread, always `OK`) |
//! | `v` | `vAttach` |

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rspd_core::breakpoints::{BreakpointKind, WatchpointAccess};
use rspd_core::{Address, ProcessId, ResumeMode};

use crate::control::{ResumeRequest, TargetControl};
use crate::error::CommandError;

/// What the session should do with a dispatched packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action
{
    /// Send this reply.
    Reply(String),
    /// Resume the target; the reply is the next stop.
    Resume(ResumeRequest),
    /// Reply `OK`, then stop exchanging acknowledgements.
    StartNoAck,
    /// End the session after sending `reply`, if any.
    Close
    {
        reply: Option<String>,
    },
}

type Handler = fn(&mut TargetControl<'_>, &str) -> Result<Action, CommandError>;

static HANDLERS: Lazy<HashMap<u8, Handler>> = Lazy::new(|| {
    let mut handlers: HashMap<u8, Handler> = HashMap::new();
    handlers.insert(b'?', halt_reason);
    handlers.insert(b'g', read_registers);
    handlers.insert(b'G', write_registers);
    handlers.insert(b'p', read_register);
    handlers.insert(b'P', write_register);
    handlers.insert(b'm', read_memory);
    handlers.insert(b'M', write_memory);
    handlers.insert(b'Z', insert_point);
    handlers.insert(b'z', remove_point);
    handlers.insert(b'c', resume_continue);
    handlers.insert(b's', resume_step);
    handlers.insert(b'D', detach);
    handlers.insert(b'k', kill);
    handlers.insert(b'q', query);
    handlers.insert(b'Q', set);
    handlers.insert(b'H', select_thread);
    handlers.insert(b'v', verbose);
    handlers
});

/// Route one packet payload.
///
/// Command errors become `E<nn>` replies (or the empty reply for
/// unsupported host facilities); this never fails.
pub fn dispatch(control: &mut TargetControl<'_>, payload: &str) -> Action
{
    let Some(handler) = payload.bytes().next().and_then(|tag| HANDLERS.get(&tag)) else {
        tracing::debug!(%payload, "unsupported packet");
        return Action::Reply(String::new());
    };
    // Every key is ASCII, so byte 1 is a char boundary.
    match handler(control, &payload[1..]) {
        Ok(action) => action,
        Err(err) => {
            tracing::warn!(%payload, error = %err, "command failed");
            Action::Reply(err.reply())
        }
    }
}

fn ok() -> Result<Action, CommandError>
{
    Ok(Action::Reply("OK".to_string()))
}

fn parse_hex(text: &str) -> Result<u64, CommandError>
{
    if text.is_empty() || !text.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(CommandError::Malformed(format!("expected hex number, got {text:?}")));
    }
    u64::from_str_radix(text, 16).map_err(|err| CommandError::Malformed(format!("{text:?}: {err}")))
}

fn parse_hex_usize(text: &str) -> Result<usize, CommandError>
{
    let value = parse_hex(text)?;
    usize::try_from(value).map_err(|_| CommandError::Malformed(format!("{text:?} is too large")))
}

/// `addr,length`
fn parse_range(text: &str) -> Result<(Address, usize), CommandError>
{
    let (address, len) = text
        .split_once(',')
        .ok_or_else(|| CommandError::Malformed(format!("expected addr,length, got {text:?}")))?;
    Ok((Address::from(parse_hex(address)?), parse_hex_usize(len)?))
}

fn halt_reason(control: &mut TargetControl<'_>, _args: &str) -> Result<Action, CommandError>
{
    control.halt_reason().map(Action::Reply)
}

fn read_registers(control: &mut TargetControl<'_>, _args: &str) -> Result<Action, CommandError>
{
    control.read_registers().map(Action::Reply)
}

fn write_registers(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    control.write_registers(args)?;
    ok()
}

fn read_register(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    let index = parse_hex_usize(args)?;
    control.read_register(index).map(Action::Reply)
}

fn write_register(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    let (index, value) = args
        .split_once('=')
        .ok_or_else(|| CommandError::Malformed(format!("expected n=value, got {args:?}")))?;
    control.write_register(parse_hex_usize(index)?, value)?;
    ok()
}

fn read_memory(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    let (address, len) = parse_range(args)?;
    // An empty reply would read as "unsupported".
    if len == 0 {
        return Err(CommandError::Malformed("zero-length memory read".to_string()));
    }
    let bytes = control.read_memory(address, len)?;
    Ok(Action::Reply(hex::encode(bytes)))
}

fn write_memory(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    let (range, data) = args
        .split_once(':')
        .ok_or_else(|| CommandError::Malformed(format!("expected addr,length:data, got {args:?}")))?;
    let (address, len) = parse_range(range)?;
    let data = hex::decode(data).map_err(|err| CommandError::Malformed(format!("memory data: {err}")))?;
    if data.len() != len {
        return Err(CommandError::Malformed(format!(
            "declared {len} bytes but data holds {}",
            data.len()
        )));
    }
    control.write_memory(address, &data)?;
    ok()
}

/// Breakpoint or watchpoint selected by the `type` digit of `Z`/`z`.
enum Point
{
    Breakpoint(BreakpointKind),
    Watchpoint(WatchpointAccess),
}

/// `type,addr,kind[;cond...]`
fn parse_point(args: &str) -> Result<(Point, Address, usize), CommandError>
{
    let args = args.split_once(';').map_or(args, |(head, _)| head);
    let mut fields = args.split(',');
    let (Some(kind), Some(address), Some(size), None) = (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(CommandError::Malformed(format!("expected type,addr,kind, got {args:?}")));
    };
    let point = match kind {
        "0" => Point::Breakpoint(BreakpointKind::Software),
        "1" => Point::Breakpoint(BreakpointKind::Hardware),
        "2" => Point::Watchpoint(WatchpointAccess::Write),
        "3" => Point::Watchpoint(WatchpointAccess::Read),
        "4" => Point::Watchpoint(WatchpointAccess::Access),
        _ => return Err(CommandError::Unsupported("breakpoint type")),
    };
    Ok((point, Address::from(parse_hex(address)?), parse_hex_usize(size)?))
}

fn insert_point(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    match parse_point(args)? {
        (Point::Breakpoint(kind), address, size) => control.insert_breakpoint(kind, address, size)?,
        (Point::Watchpoint(access), address, len) => control.insert_watchpoint(address, len, access)?,
    }
    ok()
}

fn remove_point(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    match parse_point(args)? {
        (Point::Breakpoint(kind), address, _) => control.remove_breakpoint(kind, address)?,
        (Point::Watchpoint(access), address, len) => control.remove_watchpoint(address, len, access)?,
    }
    ok()
}

fn resume_request(control: &TargetControl<'_>, mode: ResumeMode, args: &str) -> Result<Action, CommandError>
{
    control.ensure_stopped()?;
    let address = if args.is_empty() {
        None
    } else {
        Some(Address::from(parse_hex(args)?))
    };
    Ok(Action::Resume(ResumeRequest { mode, address }))
}

fn resume_continue(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    resume_request(control, ResumeMode::Continue, args)
}

fn resume_step(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    resume_request(control, ResumeMode::Step, args)
}

fn detach(control: &mut TargetControl<'_>, _args: &str) -> Result<Action, CommandError>
{
    let reply = match control.detach() {
        Ok(()) => "OK".to_string(),
        Err(err) => err.reply(),
    };
    Ok(Action::Close { reply: Some(reply) })
}

fn kill(control: &mut TargetControl<'_>, _args: &str) -> Result<Action, CommandError>
{
    if let Err(err) = control.kill() {
        tracing::error!(error = %err, "kill failed");
    }
    Ok(Action::Close { reply: None })
}

fn query(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    let name = args.split_once(':').map_or(args, |(name, _)| name);
    let reply = match name {
        "Supported" => format!(
            "PacketSize={:x};swbreak+;hwbreak+;QStartNoAckMode+",
            control.max_packet_size()
        ),
        "Attached" => String::from(if control.is_attached() { "1" } else { "0" }),
        "C" => {
            let pid = control.pid().ok_or(CommandError::NotAttached)?;
            format!("QC{:x}", pid.raw())
        }
        "fThreadInfo" => match control.pid() {
            Some(pid) => format!("m{:x}", pid.raw()),
            None => "l".to_string(),
        },
        "sThreadInfo" => "l".to_string(),
        _ => String::new(),
    };
    Ok(Action::Reply(reply))
}

fn set(_control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    match args {
        "StartNoAckMode" => Ok(Action::StartNoAck),
        _ => Ok(Action::Reply(String::new())),
    }
}

fn select_thread(_control: &mut TargetControl<'_>, _args: &str) -> Result<Action, CommandError>
{
    ok()
}

fn verbose(control: &mut TargetControl<'_>, args: &str) -> Result<Action, CommandError>
{
    match args.split_once(';') {
        Some(("Attach", pid)) => {
            let pid = u32::try_from(parse_hex(pid)?)
                .map_err(|_| CommandError::Malformed(format!("process id {pid:?} out of range")))?;
            control.attach(ProcessId::from(pid)).map(Action::Reply)
        }
        _ => Ok(Action::Reply(String::new())),
    }
}

#[cfg(test)]
mod tests
{
    use rspd_core::platform::simulated::SimulatedTarget;

    use super::*;
    use crate::config::ServerConfig;

    fn reply(control: &mut TargetControl<'_>, payload: &str) -> String
    {
        match dispatch(control, payload) {
            Action::Reply(reply) => reply,
            other => panic!("expected reply to {payload:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_hex_rejects_sign_and_empty()
    {
        assert!(parse_hex("+10").is_err());
        assert!(parse_hex("").is_err());
        assert_eq!(parse_hex("7fff").expect("hex"), 0x7fff);
    }

    #[test]
    fn test_parse_point_ignores_conditions()
    {
        let (point, address, size) = parse_point("0,401000,1;X2,abcd").expect("point");
        assert!(matches!(point, Point::Breakpoint(BreakpointKind::Software)));
        assert_eq!(address, Address::from(0x40_1000));
        assert_eq!(size, 1);
        assert!(matches!(parse_point("9,0,1"), Err(CommandError::Unsupported(_))));
        assert!(matches!(parse_point("0,401000"), Err(CommandError::Malformed(_))));
    }

    #[test]
    fn test_detached_commands()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        assert_eq!(reply(&mut control, "?"), "E02");
        assert_eq!(reply(&mut control, "g"), "E02");
        assert_eq!(reply(&mut control, "m7000,10"), "E02");
        assert_eq!(reply(&mut control, "c"), "E02");
        assert_eq!(reply(&mut control, "qAttached"), "0");
        assert_eq!(reply(&mut control, "qfThreadInfo"), "l");
        assert_eq!(reply(&mut control, "qC"), "E02");
    }

    #[test]
    fn test_supported_and_thread_queries()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        assert_eq!(
            reply(&mut control, "qSupported:multiprocess+;swbreak+"),
            "PacketSize=1000;swbreak+;hwbreak+;QStartNoAckMode+"
        );
        assert_eq!(reply(&mut control, "vAttach;64"), "S05");
        assert_eq!(reply(&mut control, "qAttached"), "1");
        assert_eq!(reply(&mut control, "qC"), "QC64");
        assert_eq!(reply(&mut control, "qfThreadInfo"), "m64");
        assert_eq!(reply(&mut control, "qsThreadInfo"), "l");
        assert_eq!(reply(&mut control, "Hg0"), "OK");
        assert_eq!(reply(&mut control, "vAttach;64"), "E08");
    }

    #[test]
    fn test_attach_unknown_target()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        assert_eq!(reply(&mut control, "vAttach;2a"), "E07");
        assert!(!control.is_attached());
    }

    #[test]
    fn test_unsupported_leaves_state_alone()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        control.attach(ProcessId::from(100)).expect("attach");
        for payload in ["", "X7000,0:", "vCont?", "qXfer:features:read:target.xml:0,fff", "QNonStop:1", "!"] {
            assert_eq!(reply(&mut control, payload), "", "{payload:?}");
        }
        assert_eq!(reply(&mut control, "?"), "S05");
        assert!(control.breakpoints().is_empty());
    }

    #[test]
    fn test_memory_write_length_must_match()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        control.attach(ProcessId::from(100)).expect("attach");
        assert_eq!(reply(&mut control, "M7000,4:aabb"), "E01");
        assert_eq!(reply(&mut control, "M7000,2:zzzz"), "E01");
        assert_eq!(reply(&mut control, "M7000,2:aabb"), "OK");
        assert_eq!(reply(&mut control, "m7000,3"), "aabb02");
    }

    #[test]
    fn test_read_limit()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        control.attach(ProcessId::from(100)).expect("attach");
        assert_eq!(reply(&mut control, "m401000,7fe").len(), 0x7fe * 2);
        assert_eq!(reply(&mut control, "m401000,7ff"), "E09");
        assert_eq!(reply(&mut control, "mdead0000,4"), "E0e");
    }

    #[test]
    fn test_zero_length_read_is_malformed()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        control.attach(ProcessId::from(100)).expect("attach");
        assert_eq!(reply(&mut control, "m7000,0"), "E01");
        assert_eq!(reply(&mut control, "M7000,0:"), "OK");
    }

    #[test]
    fn test_resume_and_close_actions()
    {
        let mut target = SimulatedTarget::demo();
        let mut control = TargetControl::new(&mut target, &ServerConfig::default());
        control.attach(ProcessId::from(100)).expect("attach");
        assert_eq!(
            dispatch(&mut control, "c401010"),
            Action::Resume(ResumeRequest {
                mode: ResumeMode::Continue,
                address: Some(Address::from(0x40_1010)),
            })
        );
        assert_eq!(
            dispatch(&mut control, "s"),
            Action::Resume(ResumeRequest {
                mode: ResumeMode::Step,
                address: None,
            })
        );
        assert_eq!(dispatch(&mut control, "QStartNoAckMode"), Action::StartNoAck);
        assert_eq!(
            dispatch(&mut control, "D"),
            Action::Close {
                reply: Some("OK".to_string())
            }
        );
        assert!(!control.is_attached());
    }
}
