//! Flushes through the whole machine: mispredictions at execute and
//! post-sync flushes at retirement.

use pretty_assertions::assert_eq;

use crate::common::{build_sim, quick_config, run_to_completion};
use rvperf_core::common::types::RegFile;

/// A taken branch with no prediction raises a misprediction flush; the
/// machine refetches the younger instructions and still retires all of
/// the trace, with rename state restored.
#[test]
fn test_mispredict_flush_recovers() {
    let trace = r#"[
        {"mnemonic": "add", "rd": 1, "rs1": 2, "rs2": 3},
        {"mnemonic": "beq", "rs1": 1, "rs2": 2, "taken": 1, "vaddr": "0x100"},
        {"mnemonic": "add", "rd": 4, "rs1": 1, "rs2": 1},
        {"mnemonic": "add", "rd": 5, "rs1": 4, "rs2": 4}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert!(sim.br.stats.mispredicts >= 1);
    assert!(sim.flush_manager.num_forwarded >= 1);
    assert_eq!(sim.rob.stats.num_retired, 4);
    assert_eq!(sim.rename.inflight_len(), 0);
    assert_eq!(sim.rename.freelist_size(RegFile::Integer), 32);
}

/// A retiring system instruction instigates a post-sync flush; everything
/// younger refetches and the run still drains.
#[test]
fn test_post_sync_flush_at_retire() {
    let trace = r#"[
        {"mnemonic": "add", "rd": 1, "rs1": 2, "rs2": 3},
        {"mnemonic": "fence"},
        {"mnemonic": "add", "rd": 4, "rs1": 1, "rs2": 1},
        {"mnemonic": "add", "rd": 5, "rs1": 4, "rs2": 4}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert!(sim.rob.stats.num_flushes >= 1);
    assert_eq!(sim.rob.stats.num_retired, 4);
    assert_eq!(sim.rename.inflight_len(), 0);
    assert_eq!(sim.rename.freelist_size(RegFile::Integer), 32);
    assert!(sim.rename.freelists_are_duplicate_free());
}

/// Flushing with loads and stores in flight leaves the LSU drained and
/// the free lists whole.
#[test]
fn test_flush_with_memory_in_flight() {
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 5, "vaddr": "0x1000"},
        {"mnemonic": "beq", "rs1": 5, "rs2": 0, "taken": 1, "vaddr": "0x200"},
        {"mnemonic": "lw", "rs1": 0, "rd": 6, "vaddr": "0x2000"},
        {"mnemonic": "sw", "rs1": 0, "rs2": 6, "vaddr": "0x2008"}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 4);
    assert!(sim.lsu.is_drained());
    assert_eq!(sim.lsu.replay_buffer_len(), 0);
    assert_eq!(sim.lsu.ready_queue_len(), 0);
    assert_eq!(sim.rename.freelist_size(RegFile::Integer), 32);
}

/// The retire limit stops the run early and cleanly.
#[test]
fn test_retire_limit_stops_run() {
    let mut config = quick_config();
    config.rob.num_insts_to_retire = 2;
    let trace = r#"[
        {"mnemonic": "add", "rd": 1, "rs1": 2, "rs2": 3},
        {"mnemonic": "add", "rd": 2, "rs1": 1, "rs2": 3},
        {"mnemonic": "add", "rd": 3, "rs1": 2, "rs2": 1},
        {"mnemonic": "add", "rd": 4, "rs1": 3, "rs2": 2}
    ]"#;
    let mut sim = build_sim(trace, config);
    run_to_completion(&mut sim);

    assert!(sim.rob.stopped_simulation);
    assert_eq!(sim.rob.stats.num_retired, 2);
}
