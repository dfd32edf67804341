//! Tests for breakpoint and watchpoint tables against the simulated host

use rspd_core::breakpoints::{BreakpointKind, BreakpointTable, WatchpointAccess, WatchpointTable};
use rspd_core::error::DebugError;
use rspd_core::events::TargetEventReceiver;
use rspd_core::platform::simulated::SimulatedTarget;
use rspd_core::types::{Address, Architecture, ProcessId};
use rspd_core::Target;

const CODE: u64 = 0x40_1000;

fn attached(target: &mut SimulatedTarget) -> TargetEventReceiver
{
    target.attach(ProcessId::from(100)).expect("attach")
}

fn code_target() -> SimulatedTarget
{
    let code = (0..64u8).collect();
    SimulatedTarget::new(ProcessId::from(100), Architecture::X86_64)
        .with_region(CODE, code)
        .with_pc(CODE)
}

#[test]
fn test_insert_then_remove_restores_bytes()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let address = Address::from(CODE + 5);
    let before = target.peek_memory(address, 1);

    let mut table = BreakpointTable::with_capacity(4);
    table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");
    assert_eq!(target.peek_memory(address, 1), Some(vec![0xCC]));
    assert!(table.is_trap_applied_at(address));

    let info = table
        .remove(&mut target, BreakpointKind::Software, address)
        .expect("remove");
    assert_eq!(info.address, address);
    assert_eq!(target.peek_memory(address, 1), before);
    assert!(table.is_empty());
}

#[test]
fn test_arm64_trap_is_four_bytes()
{
    let mut target = SimulatedTarget::new(ProcessId::from(100), Architecture::Arm64).with_region(0x1000, vec![0x1f; 16]);
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    table
        .insert(&mut target, BreakpointKind::Software, Address::from(0x1004), 4)
        .expect("insert");
    assert_eq!(target.peek_memory(Address::from(0x1004), 4), Some(vec![0x00, 0x00, 0x20, 0xD4]));
    assert_eq!(target.peek_memory(Address::from(0x1000), 4), Some(vec![0x1f; 4]));

    table
        .remove(&mut target, BreakpointKind::Software, Address::from(0x1004))
        .expect("remove");
    assert_eq!(target.peek_memory(Address::from(0x1004), 4), Some(vec![0x1f; 4]));
}

#[test]
fn test_duplicate_rejected_and_table_unchanged()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let address = Address::from(CODE + 8);
    let mut table = BreakpointTable::with_capacity(4);
    let id = table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");

    let result = table.insert(&mut target, BreakpointKind::Software, address, 1);
    assert!(matches!(result, Err(DebugError::DuplicateBreakpoint(0x40_1008))));
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(address).map(|info| info.id), Some(id));

    // Removing once must give the original byte back, not the trap.
    table
        .remove(&mut target, BreakpointKind::Software, address)
        .expect("remove");
    assert_eq!(target.peek_memory(address, 1), Some(vec![8]));
}

#[test]
fn test_table_full()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(2);
    for offset in 0..2 {
        table
            .insert(&mut target, BreakpointKind::Software, Address::from(CODE + offset), 1)
            .expect("insert");
    }
    let result = table.insert(&mut target, BreakpointKind::Software, Address::from(CODE + 10), 1);
    assert!(matches!(result, Err(DebugError::ResourceExhausted(_))));
    assert_eq!(target.peek_memory(Address::from(CODE + 10), 1), Some(vec![10]));

    // A freed slot is reused.
    table
        .remove(&mut target, BreakpointKind::Software, Address::from(CODE))
        .expect("remove");
    table
        .insert(&mut target, BreakpointKind::Software, Address::from(CODE + 10), 1)
        .expect("insert into freed slot");
    assert_eq!(table.restore_all(&mut target).len(), 0);
}

#[test]
fn test_remove_requires_matching_kind()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let address = Address::from(CODE + 1);
    table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");
    let result = table.remove(&mut target, BreakpointKind::Hardware, address);
    assert!(matches!(result, Err(DebugError::NoBreakpoint(_))));
    assert_eq!(table.len(), 1);
    table.forget_all();
}

#[test]
fn test_insert_unmapped_fails_cleanly()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let result = table.insert(&mut target, BreakpointKind::Software, Address::from(0xdead_0000), 1);
    assert!(matches!(result, Err(DebugError::MemoryAccess { .. })));
    assert!(table.is_empty());
}

#[test]
fn test_hardware_breakpoint_unsupported()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let result = table.insert(&mut target, BreakpointKind::Hardware, Address::from(CODE), 1);
    assert!(matches!(result, Err(DebugError::Unsupported(_))));
    assert!(table.is_empty());
}

#[test]
fn test_hardware_breakpoint_armed_on_host()
{
    let mut target = code_target().with_debug_registers(2);
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    table
        .insert(&mut target, BreakpointKind::Hardware, Address::from(CODE + 3), 1)
        .expect("insert");
    assert_eq!(target.hardware_breakpoints(), vec![Address::from(CODE + 3)]);
    assert_eq!(target.peek_memory(Address::from(CODE + 3), 1), Some(vec![3]));

    table
        .remove(&mut target, BreakpointKind::Hardware, Address::from(CODE + 3))
        .expect("remove");
    assert!(target.hardware_breakpoints().is_empty());
}

#[test]
fn test_record_hit_counts_enabled_breakpoint()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let address = Address::from(CODE + 2);
    table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");
    assert_eq!(table.record_hit(address).map(|info| info.hit_count), Some(1));
    assert_eq!(table.record_hit(address).map(|info| info.hit_count), Some(2));
    assert!(table.record_hit(Address::from(CODE + 3)).is_none());
    table.restore_all(&mut target);
}

#[test]
fn test_shadowed_read_and_masked_write()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let address = Address::from(CODE + 4);
    table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");

    let mut buf = target.read_memory(Address::from(CODE), 8).expect("read");
    assert_eq!(buf[4], 0xCC);
    table.shadow_read(Address::from(CODE), &mut buf);
    assert_eq!(buf, vec![0, 1, 2, 3, 4, 5, 6, 7]);

    let data = vec![0xAA; 8];
    let mut masked = data.clone();
    table.mask_write(Address::from(CODE), &mut masked);
    assert_eq!(masked[4], 0xCC);
    target.write_memory(Address::from(CODE), &masked).expect("write");
    table.commit_write(Address::from(CODE), &data);

    table
        .remove(&mut target, BreakpointKind::Software, address)
        .expect("remove");
    assert_eq!(target.peek_memory(Address::from(CODE), 8), Some(vec![0xAA; 8]));
}

#[test]
fn test_masked_write_without_commit_keeps_saved_bytes()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let address = Address::from(CODE + 4);
    table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");

    // The write never reached the target, so nothing is committed.
    let mut masked = vec![0xAA; 8];
    table.mask_write(Address::from(CODE), &mut masked);
    assert_eq!(masked[4], 0xCC);

    table
        .remove(&mut target, BreakpointKind::Software, address)
        .expect("remove");
    assert_eq!(target.peek_memory(address, 1), Some(vec![4]));
}

#[test]
fn test_lift_and_reapply()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let mut table = BreakpointTable::with_capacity(4);
    let address = Address::from(CODE);
    table
        .insert(&mut target, BreakpointKind::Software, address, 1)
        .expect("insert");

    assert!(table.lift(&mut target, address).expect("lift"));
    assert_eq!(target.peek_memory(address, 1), Some(vec![0]));
    assert!(!table.is_trap_applied_at(address));
    table.reapply(&mut target, address).expect("reapply");
    assert_eq!(target.peek_memory(address, 1), Some(vec![0xCC]));

    assert!(!table.lift(&mut target, Address::from(CODE + 1)).expect("lift"));
    table.restore_all(&mut target);
}

#[test]
fn test_restore_all_leaves_original_code()
{
    let mut target = code_target();
    let _events = attached(&mut target);
    let original = target.peek_memory(Address::from(CODE), 64);
    let mut table = BreakpointTable::with_capacity(8);
    for offset in [0, 7, 13, 63] {
        table
            .insert(&mut target, BreakpointKind::Software, Address::from(CODE + offset), 1)
            .expect("insert");
    }
    assert!(table.restore_all(&mut target).is_empty());
    assert!(table.is_empty());
    assert_eq!(target.peek_memory(Address::from(CODE), 64), original);
}

#[test]
fn test_watchpoint_bookkeeping()
{
    let mut target = code_target().with_debug_registers(2);
    let _events = attached(&mut target);
    let mut table = WatchpointTable::with_capacity(4);
    let address = Address::from(0x7000);

    table
        .insert(&mut target, address, 4, WatchpointAccess::Write)
        .expect("insert");
    // Same address with another access kind is a distinct watchpoint.
    table
        .insert(&mut target, address, 4, WatchpointAccess::Read)
        .expect("insert read");
    assert!(matches!(
        table.insert(&mut target, address, 4, WatchpointAccess::Write),
        Err(DebugError::DuplicateWatchpoint(0x7000))
    ));
    assert_eq!(target.armed_watchpoints(), 2);

    assert!(matches!(
        table.remove(&mut target, address, 4, WatchpointAccess::Access),
        Err(DebugError::NoWatchpoint(_))
    ));
    table
        .remove(&mut target, address, 4, WatchpointAccess::Write)
        .expect("remove");
    assert_eq!(table.len(), 1);
    assert!(table.disarm_all(&mut target).is_empty());
    assert_eq!(target.armed_watchpoints(), 0);
}

#[test]
fn test_watchpoint_rejects_zero_length()
{
    let mut target = code_target().with_debug_registers(2);
    let _events = attached(&mut target);
    let mut table = WatchpointTable::with_capacity(4);
    assert!(matches!(
        table.insert(&mut target, Address::from(0x7000), 0, WatchpointAccess::Access),
        Err(DebugError::InvalidArgument(_))
    ));
}
