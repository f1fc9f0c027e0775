//! BPU + FTQ prediction flow.

use pretty_assertions::assert_eq;

use crate::common::{build_sim, quick_config};
use rvperf_core::core::fetch::bpu::PredictionRequest;
use rvperf_core::sim::event::SimEvent;

/// A single trained prediction flows first-tier → FTQ → Fetch with no
/// second-tier reply, and the FTQ credit returns to the BPU.
#[test]
fn test_single_prediction_no_mismatch() {
    let mut sim = build_sim("[]", quick_config());
    // Drain startup traffic (initial credit grants).
    sim.run_for(200).unwrap();
    assert_eq!(sim.bpu.ftq_credit_count(), 5);

    // Train the first tier: branch at 0x1000 strongly taken to 0x2000.
    let pht_index = (0x1000u64 >> 2) as usize;
    sim.bpu.base.pht.saturate(pht_index, true);
    assert!(sim.bpu.base.btb.update(0x1000, 0x2000));

    sim.inject(
        SimEvent::BpuPredictionReq(PredictionRequest { pc: 0x1000 }),
        0,
    );
    sim.run_for(500).unwrap();

    let pred = sim
        .fetch
        .prediction_for(0x1000)
        .expect("fetch received the prediction output");
    assert!(pred.taken);
    assert_eq!(pred.target, 0x2000);

    assert_eq!(sim.bpu.stats.first_tier_outputs, 1);
    // A cold TAGE has no matching component and stays silent.
    assert_eq!(sim.bpu.stats.second_tier_outputs, 0);
    assert_eq!(sim.ftq.stats.forwarded, 1);
    assert_eq!(sim.ftq.stats.mismatches, 0);
    // The forwarded entry refunded the BPU's prediction credit.
    assert_eq!(sim.bpu.ftq_credit_count(), 5);
}

/// An untrained PC predicts not-taken with a fall-through target.
#[test]
fn test_cold_prediction_is_not_taken() {
    let mut sim = build_sim("[]", quick_config());
    sim.run_for(200).unwrap();

    sim.inject(
        SimEvent::BpuPredictionReq(PredictionRequest { pc: 0x4000 }),
        0,
    );
    sim.run_for(500).unwrap();

    let pred = sim.fetch.prediction_for(0x4000).expect("prediction arrived");
    assert!(!pred.taken);
    assert_eq!(pred.target, 0x4004);
}

/// Request credits to Fetch are refunded as the BPU drains its buffer.
#[test]
fn test_request_credit_refund() {
    let mut sim = build_sim("[]", quick_config());
    sim.run_for(200).unwrap();

    for pc in [0x1000u64, 0x2000, 0x3000] {
        sim.inject(SimEvent::BpuPredictionReq(PredictionRequest { pc }), 0);
    }
    sim.run_for(1000).unwrap();
    assert_eq!(sim.bpu.stats.pred_requests, 3);
    assert_eq!(sim.bpu.stats.first_tier_outputs, 3);
    assert_eq!(sim.ftq.stats.forwarded, 3);
}
