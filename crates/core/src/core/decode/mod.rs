//! Decode: group-level decode and vector configuration handling.
//!
//! Decode forwards instruction groups from Fetch to Rename under credits.
//! `vset*` instructions update the live vector configuration and stall
//! decode (`waiting_on_vset`) until they clear rename, so younger vector
//! instructions expand under the correct configuration. Vector
//! instructions pass through the uop generator.

/// Vector uop generation.
pub mod vector_uop;

use std::collections::VecDeque;

use tracing::debug;

use crate::common::error::SimError;
use crate::config::DecodeConfig;
use crate::core::flush::FlushingCriteria;
use crate::core::inst::{InstClass, InstGroup, InstPtr, InstStatus, VectorConfig};
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

use vector_uop::VectorUopGenerator;

/// Decode statistics.
#[derive(Debug, Default)]
pub struct DecodeStats {
    /// Instructions decoded (pre-expansion).
    pub insts_decoded: u64,
    /// vset* instructions handled.
    pub vsets: u64,
    /// Cycles stalled waiting on a vset.
    pub vset_stalls: u64,
}

/// The decode unit.
pub struct Decode {
    fetch_queue: VecDeque<InstPtr>,
    fetch_queue_size: u32,
    num_to_decode: u32,
    credits_rename: Credits,

    waiting_on_vset: bool,
    vector_config: VectorConfig,
    /// The uop generator.
    pub uop_gen: VectorUopGenerator,

    /// Counters.
    pub stats: DecodeStats,
}

impl Decode {
    /// Builds Decode from configuration.
    pub fn new(config: &DecodeConfig) -> Self {
        Self {
            fetch_queue: VecDeque::new(),
            fetch_queue_size: config.fetch_queue_size,
            num_to_decode: config.num_to_decode,
            credits_rename: Credits::new(),
            waiting_on_vset: false,
            vector_config: VectorConfig::default(),
            uop_gen: VectorUopGenerator::new(),
            stats: DecodeStats::default(),
        }
    }

    /// Startup: grant queue credits to Fetch.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::DecodeCredits(self.fetch_queue_size),
            0,
            Phase::Update,
        );
    }

    /// The live vector configuration (test visibility).
    pub fn vector_config(&self) -> &VectorConfig {
        &self.vector_config
    }

    /// An instruction group arrived from Fetch.
    pub fn receive_insts(&mut self, group: InstGroup, sched: &mut Sched) {
        assert!(
            self.fetch_queue.len() + group.len() <= self.fetch_queue_size as usize,
            "decode queue overflow"
        );
        for inst in group {
            self.fetch_queue.push_back(inst);
        }
        let _ = sched.schedule_unique(SimEvent::DecodeRun, 0, Phase::Tick);
    }

    /// Rename refunded uop-queue credits.
    pub fn receive_rename_credits(&mut self, credits: u32, sched: &mut Sched) {
        self.credits_rename.add(credits);
        if !self.fetch_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::DecodeRun, 0, Phase::Tick);
        }
    }

    /// A vset cleared rename; decode may resume.
    pub fn handle_vset_cleared(&mut self, _inst: &InstPtr, sched: &mut Sched) {
        self.waiting_on_vset = false;
        if !self.fetch_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::DecodeRun, 0, Phase::Tick);
        }
    }

    /// Decodes up to `num_to_decode` instructions under rename credits.
    pub fn decode_run(&mut self, sched: &mut Sched) -> Result<(), SimError> {
        if self.waiting_on_vset {
            self.stats.vset_stalls += 1;
            return Ok(());
        }

        let mut out: InstGroup = Vec::new();
        let mut decoded = 0;
        while decoded < self.num_to_decode && !self.fetch_queue.is_empty() {
            let front = self.fetch_queue.front().expect("checked non-empty").clone();
            let class = front.borrow().class;

            match class {
                InstClass::Vset => {
                    if !self.credits_rename.has_any() {
                        break;
                    }
                    let inst = self.fetch_queue.pop_front().expect("front exists");
                    self.vector_config = inst.borrow().vector_config;
                    self.waiting_on_vset = true;
                    self.stats.vsets += 1;
                    debug!(
                        vl = self.vector_config.vl,
                        sew = self.vector_config.sew,
                        lmul = self.vector_config.lmul,
                        "vset updates vector config"
                    );
                    inst.borrow_mut().set_status(InstStatus::Decoded);
                    self.credits_rename.consume(1);
                    self.stats.insts_decoded += 1;
                    out.push(inst);
                    decoded += 1;
                    // Younger instructions wait until the vset clears rename.
                    break;
                }
                InstClass::Vector(_) => {
                    let uops = self.uop_gen.expand(&front, &self.vector_config)?;
                    if self.credits_rename.available() < uops.len() as u32 {
                        break;
                    }
                    let _ = self.fetch_queue.pop_front();
                    self.credits_rename.consume(uops.len() as u32);
                    self.stats.insts_decoded += 1;
                    decoded += 1;
                    for uop in uops {
                        uop.borrow_mut().set_status(InstStatus::Decoded);
                        out.push(uop);
                    }
                }
                _ => {
                    if !self.credits_rename.has_any() {
                        break;
                    }
                    let inst = self.fetch_queue.pop_front().expect("front exists");
                    inst.borrow_mut().set_status(InstStatus::Decoded);
                    self.credits_rename.consume(1);
                    self.stats.insts_decoded += 1;
                    out.push(inst);
                    decoded += 1;
                }
            }
        }

        if !out.is_empty() {
            let refund = decoded;
            let _ = sched.schedule(SimEvent::RenameInsts(out), 1, Phase::Update);
            let _ = sched.schedule(SimEvent::DecodeCredits(refund), 0, Phase::Update);
        }
        Ok(())
    }

    /// Pipeline flush: drop the queue and refund Fetch credits. Groups
    /// already on the wire to Rename deliver before the flush arrives
    /// there and are cleaned up by Rename's own flush.
    pub fn handle_flush(&mut self, criteria: &FlushingCriteria, sched: &mut Sched) {
        let _ = criteria;
        let dropped = self.fetch_queue.len() as u32;
        for inst in &self.fetch_queue {
            inst.borrow_mut().is_flushed = true;
        }
        self.fetch_queue.clear();
        self.waiting_on_vset = false;
        if dropped > 0 {
            let _ = sched.schedule(SimEvent::DecodeCredits(dropped), 0, Phase::Update);
        }
    }

    /// Queue occupancy (test visibility).
    pub fn queue_len(&self) -> usize {
        self.fetch_queue.len()
    }
}
