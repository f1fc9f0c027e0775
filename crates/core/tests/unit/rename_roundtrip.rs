//! Rename round-trip laws: rename-then-retire and rename-then-flush must
//! both restore the map table, reference counts and free lists exactly.

use pretty_assertions::assert_eq;

use rvperf_core::config::RenameConfig;
use rvperf_core::common::types::RegFile;
use rvperf_core::core::decoder::{InstFactory, OperandElement, OperandType};
use rvperf_core::core::flush::{FlushCause, FlushingCriteria};
use rvperf_core::core::inst::{InstPtr, InstStatus, OperandField};
use rvperf_core::core::rename::Rename;
use rvperf_core::core::scoreboard::ScoreboardSet;
use rvperf_core::sim::event::Sched;

fn make_add(uid: u64) -> InstPtr {
    let factory = InstFactory::new();
    let srcs = [
        OperandElement {
            field_id: OperandField::Rs1,
            operand_type: OperandType::Long,
            field_value: 1,
        },
        OperandElement {
            field_id: OperandField::Rs2,
            operand_type: OperandType::Long,
            field_value: 2,
        },
    ];
    let dests = [OperandElement {
        field_id: OperandField::Rd,
        operand_type: OperandType::Long,
        field_value: 3,
    }];
    let mut inst = factory.make_inst_direct("add", &srcs, &dests, None);
    inst.unique_id = uid;
    inst.set_status(InstStatus::Decoded);
    inst.into_ptr()
}

struct Snapshot {
    mappings: Vec<u32>,
    ref_counts: Vec<u32>,
    freelist_size: usize,
}

fn snapshot(rename: &Rename) -> Snapshot {
    let rf = RegFile::Integer;
    Snapshot {
        mappings: (1..32).map(|a| rename.mapping(rf, a)).collect(),
        ref_counts: (0..64).map(|p| rename.ref_count(rf, p)).collect(),
        freelist_size: rename.freelist_size(rf),
    }
}

fn assert_snapshot_eq(a: &Snapshot, b: &Snapshot) {
    assert_eq!(a.mappings, b.mappings);
    assert_eq!(a.ref_counts, b.ref_counts);
    assert_eq!(a.freelist_size, b.freelist_size);
}

fn rename_one(rename: &mut Rename, inst: &InstPtr) {
    let mut sched = Sched::new();
    let mut scoreboards = ScoreboardSet::new();
    rename.credits_dispatch_queue(4, &mut sched);
    rename.decoded_instructions(vec![inst.clone()], &mut sched);
    rename.rename_instructions(&mut scoreboards, &mut sched);
    assert_eq!(inst.borrow().status(), InstStatus::Renamed);
}

#[test]
fn test_rename_then_retire_restores_state() {
    let mut rename = Rename::new(&RenameConfig::default());
    let before = snapshot(&rename);

    let inst = make_add(1);
    rename_one(&mut rename, &inst);
    // The destination took a fresh register off the free list.
    assert_eq!(rename.freelist_size(RegFile::Integer), before.freelist_size - 1);

    inst.borrow_mut().set_status(InstStatus::Retired);
    let mut sched = Sched::new();
    rename.get_ack_from_rob(&vec![inst], &mut sched);

    let after = snapshot(&rename);
    // Retire reclaims the *previous* mapping of x3; the new mapping stays
    // live, so counts and free list size return to their reset shape.
    assert_eq!(after.freelist_size, before.freelist_size);
    assert_eq!(
        after.ref_counts.iter().sum::<u32>(),
        before.ref_counts.iter().sum::<u32>()
    );
    assert_eq!(rename.inflight_len(), 0);
}

#[test]
fn test_rename_then_flush_restores_state_exactly() {
    let mut rename = Rename::new(&RenameConfig::default());
    let before = snapshot(&rename);

    let inst = make_add(1);
    rename_one(&mut rename, &inst);

    let criteria = FlushingCriteria::new(FlushCause::Trap, inst.clone());
    let mut sched = Sched::new();
    rename.handle_flush(&criteria, &mut sched);

    // The flush path restores the previous mapping, so the state matches
    // the pre-rename snapshot exactly.
    let after = snapshot(&rename);
    assert_snapshot_eq(&before, &after);
    assert_eq!(rename.inflight_len(), 0);
    assert!(inst.borrow().is_flushed);
}

#[test]
fn test_flush_and_retire_paths_agree() {
    // Rename two instructions; retire the first, flush the second. The
    // reachable state (map, counts, free list) must equal renaming and
    // retiring only the first.
    let build = || {
        let mut rename = Rename::new(&RenameConfig::default());
        let a = make_add(1);
        let b = make_add(2);
        rename_one(&mut rename, &a);
        rename_one(&mut rename, &b);
        (rename, a, b)
    };

    let (mut flushed_path, a1, b1) = build();
    a1.borrow_mut().set_status(InstStatus::Retired);
    let mut sched = Sched::new();
    flushed_path.get_ack_from_rob(&vec![a1.clone()], &mut sched);
    let criteria = FlushingCriteria::new(FlushCause::Trap, b1.clone());
    flushed_path.handle_flush(&criteria, &mut sched);

    let mut retire_only = Rename::new(&RenameConfig::default());
    let a2 = make_add(1);
    rename_one(&mut retire_only, &a2);
    a2.borrow_mut().set_status(InstStatus::Retired);
    retire_only.get_ack_from_rob(&vec![a2], &mut sched);

    assert_snapshot_eq(&snapshot(&flushed_path), &snapshot(&retire_only));
}

#[test]
fn test_flush_stops_at_uncovered_instruction() {
    let mut rename = Rename::new(&RenameConfig::default());
    let a = make_add(1);
    let b = make_add(2);
    rename_one(&mut rename, &a);
    rename_one(&mut rename, &b);

    // Exclusive criterion on uid 1 covers only uid 2.
    let criteria = FlushingCriteria::new(FlushCause::Misprediction, a.clone());
    let mut sched = Sched::new();
    rename.handle_flush(&criteria, &mut sched);

    assert_eq!(rename.inflight_len(), 1);
    assert!(!a.borrow().is_flushed);
    assert!(b.borrow().is_flushed);
}
