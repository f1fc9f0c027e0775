//! Whole-machine runs over mixed traces.

use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::{adds_trace, build_sim, quick_config, run_to_completion};

/// A mixed trace of ALU, memory and branch work retires completely.
#[test]
fn test_mixed_trace_drains() {
    let trace = r#"[
        {"mnemonic": "addi", "rd": 1, "rs1": 0, "imm": 64},
        {"mnemonic": "lw", "rs1": 1, "rd": 2, "vaddr": "0x1000"},
        {"mnemonic": "add", "rd": 3, "rs1": 2, "rs2": 1},
        {"mnemonic": "sw", "rs1": 1, "rs2": 3, "vaddr": "0x1008"},
        {"mnemonic": "beq", "rs1": 3, "rs2": 0, "taken": 0},
        {"mnemonic": "lw", "rs1": 1, "rd": 4, "vaddr": "0x1010"},
        {"mnemonic": "add", "rd": 5, "rs1": 4, "rs2": 3}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 7);
    assert!(sim.lsu.is_drained());
    assert!(sim.rob.is_empty());
    let stats = sim.stats();
    assert!(stats.ipc > 0.0);
    assert_eq!(stats.uops_retired, 7);
}

/// Dependent loads wait for their producers through the scoreboard.
#[test]
fn test_load_use_dependency() {
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 2, "vaddr": "0x1000"},
        {"mnemonic": "add", "rd": 3, "rs1": 2, "rs2": 2},
        {"mnemonic": "lw", "rs1": 3, "rd": 4, "vaddr": "0x1040"}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);
    assert_eq!(sim.rob.stats.num_retired, 3);
}

/// Store-to-load ordering with speculative load execution enabled: the
/// younger load still completes after the store resolves.
#[test]
fn test_speculative_load_exec_mode() {
    let mut config = quick_config();
    config.lsu.allow_speculative_load_exec = true;
    let trace = r#"[
        {"mnemonic": "sw", "rs1": 0, "rs2": 1, "vaddr": "0x1000"},
        {"mnemonic": "lw", "rs1": 0, "rd": 2, "vaddr": "0x1000"},
        {"mnemonic": "add", "rd": 3, "rs1": 2, "rs2": 2}
    ]"#;
    let mut sim = build_sim(trace, config);
    run_to_completion(&mut sim);
    assert_eq!(sim.rob.stats.num_retired, 3);
    assert_eq!(sim.lsu.replay_buffer_len(), 0);
}

/// TLB misses replay and complete once the reload lands; the dependent
/// second load to the same page then hits the filled TLB.
#[test]
fn test_tlb_miss_replay() {
    let mut config = quick_config();
    config.mmu.tlb_always_hit = false;
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 2, "vaddr": "0x5000"},
        {"mnemonic": "lw", "rs1": 2, "rd": 3, "vaddr": "0x5008"}
    ]"#;
    let mut sim = build_sim(trace, config);
    run_to_completion(&mut sim);
    assert_eq!(sim.rob.stats.num_retired, 2);
    assert!(sim.mmu.stats.tlb_misses >= 1);
    assert!(sim.mmu.stats.tlb_hits >= 1);
    assert!(sim.mmu.stats.tlb_reloads >= 1);
}

/// Different machine widths all drain the same trace.
#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
fn test_machine_widths(#[case] width: u32) {
    let mut config = quick_config();
    config.fetch.num_to_fetch = width;
    config.decode.num_to_decode = width;
    config.rename.num_to_rename = width;
    config.rob.num_to_retire = width;
    let trace = adds_trace(100);
    let mut sim = build_sim(&trace, config);
    run_to_completion(&mut sim);
    assert_eq!(sim.rob.stats.num_retired, 100);
}

/// The prefetcher observes DCache traffic and emits line-aligned
/// prefetches without disturbing correctness.
#[test]
fn test_prefetcher_in_system() {
    let mut config = quick_config();
    config.prefetcher.enable_prefetcher = true;
    config.prefetcher.num_to_prefetch = 2;
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 2, "vaddr": "0x1000"},
        {"mnemonic": "lw", "rs1": 0, "rd": 3, "vaddr": "0x2000"}
    ]"#;
    let mut sim = build_sim(trace, config);
    run_to_completion(&mut sim);
    assert_eq!(sim.rob.stats.num_retired, 2);
    assert!(sim.prefetcher.stats.accesses_observed >= 1);
}

/// Traces load from disk the same as from strings.
#[test]
fn test_trace_from_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", adds_trace(20)).unwrap();

    let generator =
        rvperf_core::core::inst_gen::JsonInstGenerator::from_file(file.path()).unwrap();
    let mut sim =
        rvperf_core::Simulator::new(&quick_config(), Box::new(generator)).unwrap();
    run_to_completion(&mut sim);
    assert_eq!(sim.rob.stats.num_retired, 20);
}

/// Statistics collection reflects the run.
#[test]
fn test_stats_collection() {
    let trace = adds_trace(50);
    let mut sim = build_sim(&trace, quick_config());
    run_to_completion(&mut sim);
    let stats = sim.stats();
    assert_eq!(stats.uops_retired, 50);
    assert_eq!(stats.insts_retired, 50);
    assert!(stats.cycles > 0);
    assert_eq!(stats.insts_renamed, 50);
    assert!((stats.ipc - 50.0 / stats.cycles as f64).abs() < 1e-9);
}
