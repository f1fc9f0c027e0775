//! Free-list and reference-count conservation across full runs.

use pretty_assertions::assert_eq;

use crate::common::{adds_trace, build_sim, quick_config, run_to_completion};
use rvperf_core::common::types::RegFile;

fn assert_rename_state_restored(sim: &rvperf_core::Simulator, num_renames: u32) {
    for rf in RegFile::ALL {
        // Free list back to (renames - architectural registers).
        assert_eq!(
            sim.rename.freelist_size(rf),
            (num_renames - 32) as usize,
            "freelist size restored for {rf}"
        );

        // With nothing in flight, total live claims equal the number of
        // mapped architectural registers. (Move elimination may leave two
        // architectural registers sharing one physical register, so the
        // per-register count is 1 almost everywhere but not strictly.)
        let live: u32 = (0..num_renames).map(|p| sim.rename.ref_count(rf, p)).sum();
        let expected_live = if rf == RegFile::Integer { 31 } else { 32 };
        assert_eq!(live, expected_live, "live mappings for {rf}");

        // The map table points at registers with a live claim.
        let first_arch = if rf == RegFile::Integer { 1 } else { 0 };
        for arch in first_arch..32 {
            let phys = sim.rename.mapping(rf, arch);
            assert!(sim.rename.ref_count(rf, phys) >= 1);
        }
    }
    assert_eq!(sim.rename.inflight_len(), 0);
    assert!(sim.rename.freelists_are_duplicate_free());
}

/// A 10,000-instruction trace drains with free lists and reference counts
/// back at their reset values.
#[test]
fn test_freelist_conservation_long_trace() {
    let trace = adds_trace(10_000);
    let mut sim = build_sim(&trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 10_000);
    assert_rename_state_restored(&sim, 64);
}

/// Conservation also holds under partial rename.
#[test]
fn test_conservation_with_partial_rename() {
    let mut config = quick_config();
    config.rename.partial_rename = true;
    let trace = adds_trace(500);
    let mut sim = build_sim(&trace, config);
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 500);
    assert_rename_state_restored(&sim, 64);
}

/// Conservation holds with move elimination reusing source registers.
#[test]
fn test_conservation_with_move_elimination() {
    let mut config = quick_config();
    config.rename.move_elimination = true;
    let trace = r#"[
        {"mnemonic": "add", "rd": 5, "rs1": 1, "rs2": 2},
        {"mnemonic": "mv", "rd": 6, "rs1": 5},
        {"mnemonic": "add", "rd": 7, "rs1": 6, "rs2": 5},
        {"mnemonic": "mv", "rd": 8, "rs1": 7}
    ]"#;
    let mut sim = build_sim(trace, config);
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 4);
    assert_eq!(sim.rename.stats.move_eliminations, 2);
    assert_rename_state_restored(&sim, 64);
}

/// The in-flight rename queue stays a prefix of unique-id order while the
/// machine runs (checked post-hoc via retire order monotonicity).
#[test]
fn test_retire_order_monotonic() {
    let trace = adds_trace(200);
    let mut sim = build_sim(&trace, quick_config());
    run_to_completion(&mut sim);
    // All retired; ids were assigned monotonically by the trace source and
    // the ROB retires in order, so the rename queue drained as a prefix.
    assert_eq!(sim.rob.stats.num_retired, 200);
    assert_eq!(sim.rename.inflight_ids(), Vec::<u64>::new());
}
