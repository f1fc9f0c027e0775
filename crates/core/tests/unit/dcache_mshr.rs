//! DCache MSHR coalescing.

use pretty_assertions::assert_eq;

use crate::common::{build_sim, quick_config, run_to_completion};

/// Two loads to the same block while the first miss is in flight produce
/// exactly one L2 request; both complete on the single refill.
#[test]
fn test_mshr_coalesces_same_block_misses() {
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 5, "vaddr": "0x1000"},
        {"mnemonic": "lw", "rs1": 0, "rd": 6, "vaddr": "0x1008"}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.dcache.stats.l2_requests, 1);
    assert_eq!(sim.l2cache.stats.num_reqs_from_dcache, 1);
    assert_eq!(sim.rob.stats.num_retired, 2);
    assert_eq!(sim.dcache.mshr_len(), 0);
    assert!(sim.lsu.is_drained());
}

/// Loads to different blocks each take their own linefill.
#[test]
fn test_different_blocks_do_not_coalesce() {
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 5, "vaddr": "0x1000"},
        {"mnemonic": "lw", "rs1": 0, "rd": 6, "vaddr": "0x2000"}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.dcache.stats.l2_requests, 2);
    assert_eq!(sim.rob.stats.num_retired, 2);
    assert_eq!(sim.dcache.mshr_len(), 0);
}

/// A second access to a filled line hits without a new L2 request. The
/// third load depends on the first through the add, so it reaches the
/// cache only after the fill.
#[test]
fn test_fill_then_hit() {
    let trace = r#"[
        {"mnemonic": "lw", "rs1": 0, "rd": 5, "vaddr": "0x1000"},
        {"mnemonic": "add", "rd": 7, "rs1": 5, "rs2": 5},
        {"mnemonic": "lw", "rs1": 7, "rd": 6, "vaddr": "0x1010"}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 3);
    assert!(sim.dcache.stats.hits >= 1);
    assert_eq!(sim.dcache.stats.l2_requests, 1);
}

/// Stores merge into the line-fill buffer: the store retires and the
/// entry's fill still lands in the cache.
#[test]
fn test_store_miss_merges_into_mshr() {
    let trace = r#"[
        {"mnemonic": "sw", "rs1": 0, "rs2": 3, "vaddr": "0x3000"}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.rob.stats.num_retired, 1);
    assert_eq!(sim.dcache.mshr_len(), 0);
    assert!(sim.lsu.is_drained());
    assert_eq!(sim.lsu.stats.stores_retired, 1);
}
