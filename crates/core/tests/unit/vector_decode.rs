//! Vector configuration and uop expansion through the whole machine.

use pretty_assertions::assert_eq;

use crate::common::{build_sim, quick_config, run_to_completion};

/// `vsetivli SEW=8, LMUL=4, VL=64` then `vadd.vv`: decode reflects the
/// config, the generator emits 4 uops, and the ROB retires 2 instructions
/// as 5 uops.
#[test]
fn test_vset_then_vadd_expands() {
    // vtype 0x2: sew bits [5:3] = 0 (sew 8), lmul bits [2:0] = 2 (lmul 4).
    let trace = r#"[
        {"mnemonic": "vsetivli", "rd": 1, "vtype": "0x2", "vl": 64, "vta": 1},
        {"mnemonic": "vadd.vv", "vs1": 8, "vs2": 16, "vd": 24}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    let cfg = sim.decode.vector_config();
    assert_eq!(cfg.lmul, 4);
    assert_eq!(cfg.vl, 64);
    assert_eq!(cfg.sew, 8);
    assert_eq!(cfg.vlmax(), 64);

    assert_eq!(sim.decode.uop_gen.stats.uops_generated, 4);
    assert_eq!(sim.rob.stats.num_retired, 5);
    assert_eq!(sim.rob.stats.num_insts_retired, 2);
}

/// LMUL=1 vector instructions pass through unexpanded.
#[test]
fn test_lmul1_no_expansion() {
    // vtype 0x18: sew bits = 3 (sew 64), lmul bits = 0 (lmul 1).
    let trace = r#"[
        {"mnemonic": "vsetvli", "rd": 1, "vtype": "0x18", "vl": 2, "vta": 0},
        {"mnemonic": "vadd.vv", "vs1": 2, "vs2": 4, "vd": 6}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.decode.uop_gen.stats.uops_generated, 0);
    assert_eq!(sim.rob.stats.num_retired, 2);
    assert_eq!(sim.rob.stats.num_insts_retired, 2);
}

/// An illegal VL (over VLMAX) fails the run loudly.
#[test]
fn test_illegal_vl_fails() {
    // lmul 1, sew 8 -> vlmax 16; vl 64 is illegal for the vadd.
    let trace = r#"[
        {"mnemonic": "vsetvli", "rd": 1, "vtype": "0x0", "vl": 64, "vta": 0},
        {"mnemonic": "vadd.vv", "vs1": 2, "vs2": 4, "vd": 6}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    assert!(sim.run().is_err());
}

/// Widening ops double the destination group.
#[test]
fn test_widening_doubles_uops() {
    // lmul 2, sew 8 -> vtype 0x1; vlmax 32.
    let trace = r#"[
        {"mnemonic": "vsetvli", "rd": 1, "vtype": "0x1", "vl": 32, "vta": 0},
        {"mnemonic": "vwadd.vv", "vs1": 8, "vs2": 12, "vd": 16}
    ]"#;
    let mut sim = build_sim(trace, quick_config());
    run_to_completion(&mut sim);

    assert_eq!(sim.decode.uop_gen.stats.uops_generated, 4);
    assert_eq!(sim.rob.stats.num_retired, 5);
}
