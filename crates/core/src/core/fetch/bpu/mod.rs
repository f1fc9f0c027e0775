//! Branch prediction unit.
//!
//! Two-tier organisation: the base predictor (PHT + BTB + RAS) answers a
//! prediction request in one cycle and pushes a `PredictionOutput` into
//! the FTQ; the TAGE tier produces a second prediction for the same PC
//! `tage_latency` cycles later — but only when a tagged component actually
//! matches, so a cold TAGE stays silent and the first tier stands.
//! Ground-truth outcomes arrive from the ROB at retirement and train both
//! tiers plus the GHR.

/// First-tier predictor (PHT + BTB + RAS).
pub mod base;
/// Second-tier tagged-geometric predictor.
pub mod tage;

use std::collections::VecDeque;

use tracing::debug;

use crate::config::BpuConfig;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

use base::BasePredictor;
use tage::Tage;

/// A prediction request from Fetch.
#[derive(Clone, Copy, Debug)]
pub struct PredictionRequest {
    /// PC of the branch to predict.
    pub pc: u64,
}

/// A prediction output traveling through the FTQ to Fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PredictionOutput {
    /// PC of the predicted branch.
    pub pc: u64,
    /// Predicted direction.
    pub taken: bool,
    /// Predicted target PC.
    pub target: u64,
}

/// Ground-truth update from retirement.
#[derive(Clone, Copy, Debug)]
pub struct UpdateInput {
    /// Branch PC.
    pub pc: u64,
    /// Resolved direction.
    pub taken: bool,
    /// Resolved target.
    pub target: u64,
}

/// BPU statistics.
#[derive(Debug, Default)]
pub struct BpuStats {
    /// Prediction requests received.
    pub pred_requests: u64,
    /// First-tier outputs produced.
    pub first_tier_outputs: u64,
    /// Second-tier outputs produced.
    pub second_tier_outputs: u64,
    /// Ground-truth updates applied.
    pub updates: u64,
    /// Requests dropped by an FTQ redirect.
    pub redirect_drops: u64,
}

/// Number of prediction requests the BPU buffers (credits granted to Fetch).
pub const REQUEST_BUFFER_SIZE: u32 = 8;

/// The branch prediction unit.
pub struct Bpu {
    /// First tier.
    pub base: BasePredictor,
    /// Second tier.
    pub tage: Tage,
    ghr: u64,
    ghr_mask: u64,
    tage_latency: u64,

    request_buffer: VecDeque<PredictionRequest>,
    ftq_credits: Credits,

    /// Counters.
    pub stats: BpuStats,
}

impl Bpu {
    /// Builds the BPU from configuration.
    pub fn new(config: &BpuConfig) -> Self {
        Self {
            base: BasePredictor::new(
                config.pht_size,
                config.ctr_bits,
                config.btb_size,
                config.ras_size,
                config.ras_enable_overwrite,
                config.ghr_hash_bits,
            ),
            tage: Tage::new(
                config.tage.tage_bim_table_size,
                config.tage.tage_bim_ctr_bits,
                config.tage.tage_tagged_table_num,
                config.tage.tage_table_size,
                config.tage.tage_ctr_bits,
                config.tage.tage_useful_bits,
                config.tage.tage_min_hist_len,
                config.tage.tage_hist_alpha,
                config.tage.tage_reset_useful_interval,
            ),
            ghr: 0,
            ghr_mask: if config.ghr_size >= 64 {
                u64::MAX
            } else {
                (1u64 << config.ghr_size) - 1
            },
            tage_latency: config.tage.tage_latency,
            request_buffer: VecDeque::new(),
            ftq_credits: Credits::new(),
            stats: BpuStats::default(),
        }
    }

    /// Startup: grant request credits to Fetch.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::BpuReqCredits(REQUEST_BUFFER_SIZE),
            0,
            Phase::Update,
        );
    }

    /// A prediction request arrived from Fetch.
    pub fn receive_prediction_request(&mut self, req: PredictionRequest, sched: &mut Sched) {
        self.stats.pred_requests += 1;
        self.request_buffer.push_back(req);
        let _ = sched.schedule_unique(SimEvent::BpuMakePrediction, 0, Phase::Tick);
    }

    /// Prediction credits refunded by the FTQ.
    pub fn receive_ftq_credits(&mut self, credits: u32, sched: &mut Sched) {
        self.ftq_credits.add(credits);
        if !self.request_buffer.is_empty() {
            let _ = sched.schedule_unique(SimEvent::BpuMakePrediction, 0, Phase::Tick);
        }
    }

    /// The FTQ redirected prediction; stale buffered requests are dropped.
    pub fn handle_redirect(&mut self, pc: u64) {
        let before = self.request_buffer.len();
        self.request_buffer.retain(|req| req.pc == pc);
        self.stats.redirect_drops += (before - self.request_buffer.len()) as u64;
    }

    /// Drains the request buffer under FTQ credits, producing first-tier
    /// outputs now and second-tier outputs `tage_latency` cycles later.
    pub fn make_prediction(&mut self, sched: &mut Sched) {
        while !self.request_buffer.is_empty() && self.ftq_credits.has_any() {
            let req = self.request_buffer.pop_front().expect("checked non-empty");
            self.ftq_credits.consume(1);

            let (taken, target) = self.base.predict(req.pc, self.ghr);
            let first = PredictionOutput {
                pc: req.pc,
                taken,
                target,
            };
            debug!(pc = req.pc, taken, target, "first-tier prediction");
            self.stats.first_tier_outputs += 1;
            let _ = sched.schedule(SimEvent::FtqFirstPrediction(first), 1, Phase::Update);

            // The second tier only speaks up when a tagged component matched.
            if let Some(tage_taken) = self.tage.predict(req.pc, self.ghr) {
                let second = PredictionOutput {
                    pc: req.pc,
                    taken: tage_taken,
                    target,
                };
                self.stats.second_tier_outputs += 1;
                let _ = sched.schedule(
                    SimEvent::FtqSecondPrediction(second),
                    1 + self.tage_latency,
                    Phase::Update,
                );
            }

            // Request slot freed.
            let _ = sched.schedule(SimEvent::BpuReqCredits(1), 0, Phase::Update);
        }
    }

    /// Ground-truth outcome from retirement; trains both tiers and the GHR.
    pub fn handle_update(&mut self, update: UpdateInput) {
        self.stats.updates += 1;
        self.base
            .update(update.pc, self.ghr, update.taken, update.target);
        self.tage.update(update.pc, self.ghr, update.taken);
        self.ghr = ((self.ghr << 1) | u64::from(update.taken)) & self.ghr_mask;
    }

    /// FTQ credits currently held (test visibility).
    pub fn ftq_credit_count(&self) -> u32 {
        self.ftq_credits.available()
    }
}
