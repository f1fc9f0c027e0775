//! Fetch: trace-driven instruction production.
//!
//! Fetch pulls decoded instructions from the trace source into an internal
//! buffer, groups the ones co-resident in an ICache block (a change of
//! flow never shares a group), requests the block from the ICache, and —
//! once the ICache answers HIT — releases instructions to Decode under
//! credits, at most one taken branch per group. A flush rewinds the trace
//! source to the named instruction.

/// Branch prediction unit.
pub mod bpu;
/// Fetch target queue.
pub mod ftq;
/// Instruction cache.
pub mod icache;

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::common::error::SimError;
use crate::config::FetchConfig;
use crate::core::fetch::bpu::{PredictionOutput, PredictionRequest};
use crate::core::flush::FlushingCriteria;
use crate::core::inst::{InstGroup, InstPtr, InstStatus};
use crate::core::inst_gen::InstGenerator;
use crate::core::memory_access::{CacheState, MemoryAccessInfo, MemoryAccessInfoPtr};
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

/// Prediction slots granted to the FTQ.
pub const PREDICTION_BUFFER_SIZE: u32 = 8;

/// Fetch statistics.
#[derive(Debug, Default)]
pub struct FetchStats {
    /// Instructions read from the trace.
    pub insts_fetched: u64,
    /// Instruction groups sent to the ICache.
    pub blocks_requested: u64,
    /// Instructions released to Decode.
    pub insts_sent: u64,
    /// Flushes handled.
    pub flushes: u64,
    /// Predictions consumed from the FTQ stream.
    pub predictions_used: u64,
}

/// The fetch unit.
pub struct Fetch {
    generator: Box<dyn InstGenerator>,
    ibuf: VecDeque<InstPtr>,
    ibuf_capacity: usize,
    fetch_buffer: VecDeque<InstPtr>,
    fetch_buffer_capacity: usize,
    fetch_buffer_occupancy: usize,
    num_to_fetch: u32,
    icache_block_shift: u32,

    credits_icache: Credits,
    credits_decode: Credits,
    bpu_req_credits: Credits,

    predictions: HashMap<u64, PredictionOutput>,
    speculative_path: bool,

    /// Counters.
    pub stats: FetchStats,
}

impl Fetch {
    /// Builds Fetch around a trace source.
    pub fn new(config: &FetchConfig, generator: Box<dyn InstGenerator>) -> Self {
        Self {
            generator,
            ibuf: VecDeque::new(),
            ibuf_capacity: (config.block_width / 2).max(2) as usize,
            fetch_buffer: VecDeque::new(),
            fetch_buffer_capacity: config.fetch_buffer_size as usize,
            fetch_buffer_occupancy: 0,
            num_to_fetch: config.num_to_fetch,
            icache_block_shift: config.block_width.trailing_zeros(),
            credits_icache: Credits::new(),
            credits_decode: Credits::new(),
            bpu_req_credits: Credits::new(),
            predictions: HashMap::new(),
            speculative_path: false,
            stats: FetchStats::default(),
        }
    }

    /// Startup: grant prediction slots to the FTQ and begin fetching.
    pub fn initialize(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::FtqFetchCredits(PREDICTION_BUFFER_SIZE),
            0,
            Phase::Update,
        );
        let _ = sched.schedule_unique(SimEvent::FetchInsts, 1, Phase::Tick);
    }

    fn same_block(&self, a: &InstPtr, b: &InstPtr) -> bool {
        (a.borrow().pc >> self.icache_block_shift) == (b.borrow().pc >> self.icache_block_shift)
    }

    /// Reads from the trace and issues one block request to the ICache.
    pub fn fetch_instruction(&mut self, sched: &mut Sched) -> Result<(), SimError> {
        // Prefill the ibuf, keeping enough to group block-wise.
        while self.ibuf.len() < self.ibuf_capacity {
            match self.generator.next_inst()? {
                Some(inst) => {
                    self.stats.insts_fetched += 1;
                    self.ibuf.push_back(inst);
                }
                None => break,
            }
        }

        if !self.credits_icache.has_any()
            || self.ibuf.is_empty()
            || self.fetch_buffer_occupancy >= self.fetch_buffer_capacity
        {
            return Ok(());
        }

        // Gather instructions going to the same cache block. A taken branch
        // ends a group; a change of flow starts a fresh one.
        let mut block_end = 1;
        while block_end < self.ibuf.len() {
            let prev = &self.ibuf[block_end - 1];
            let next = &self.ibuf[block_end];
            if !self.same_block(prev, next)
                || prev.borrow().is_taken_branch()
                || next.borrow().is_cof
            {
                break;
            }
            block_end += 1;
        }

        let mem = MemoryAccessInfo::for_addr(self.ibuf[0].borrow().pc);
        let mut group: InstGroup = Vec::with_capacity(block_end);
        let mut branch_pc = None;
        for _ in 0..block_end {
            let inst = self.ibuf.pop_front().expect("block_end bounded by ibuf");
            if branch_pc.is_none() && inst.borrow().is_branch() {
                branch_pc = Some(inst.borrow().pc);
            }
            group.push(inst.clone());
            self.fetch_buffer.push_back(inst);
        }
        self.fetch_buffer
            .back()
            .expect("group is never empty")
            .borrow_mut()
            .is_last_in_fetch_block = true;
        mem.borrow_mut().fetch_group = Some(group);

        // One prediction request per group containing a branch.
        if let Some(pc) = branch_pc {
            if self.bpu_req_credits.try_consume_one() {
                let _ = sched.schedule(
                    SimEvent::BpuPredictionReq(PredictionRequest { pc }),
                    1,
                    Phase::Update,
                );
            }
        }

        debug!(
            pc = mem.borrow().paddr,
            insts = block_end,
            "fetch block request"
        );
        self.credits_icache.consume(1);
        self.stats.blocks_requested += 1;
        self.fetch_buffer_occupancy += 1;
        let _ = sched.schedule(SimEvent::IcacheFetchReq(mem), 1, Phase::Update);

        if !self.ibuf.is_empty()
            && self.credits_icache.has_any()
            && self.fetch_buffer_occupancy < self.fetch_buffer_capacity
        {
            let _ = sched.schedule_unique(SimEvent::FetchInsts, 1, Phase::Tick);
        }
        Ok(())
    }

    /// Releases FETCHED instructions to Decode under credits.
    pub fn send_instructions(&mut self, sched: &mut Sched) {
        let upper = (self.credits_decode.available().min(self.num_to_fetch) as usize)
            .min(self.fetch_buffer.len());
        if upper == 0 {
            return;
        }

        let mut to_send: InstGroup = Vec::new();
        for _ in 0..upper {
            let Some(entry) = self.fetch_buffer.front() else {
                break;
            };
            // Still waiting on ICache data.
            if entry.borrow().status() != InstStatus::Fetched {
                break;
            }
            // A change of flow never joins an existing group.
            if entry.borrow().is_cof && !to_send.is_empty() {
                break;
            }

            let entry = self.fetch_buffer.pop_front().expect("front checked");
            let is_taken = entry.borrow().is_taken_branch();
            {
                let mut inst = entry.borrow_mut();
                inst.is_speculative = self.speculative_path;
                if inst.is_last_in_fetch_block {
                    self.fetch_buffer_occupancy =
                        self.fetch_buffer_occupancy.saturating_sub(1);
                }
                if inst.is_branch() {
                    if let Some(pred) = self.predictions.remove(&inst.pc) {
                        inst.predicted_taken = Some(pred.taken);
                        self.stats.predictions_used += 1;
                        let _ =
                            sched.schedule(SimEvent::FtqFetchCredits(1), 0, Phase::Update);
                    }
                }
            }
            to_send.push(entry);

            // Only one taken branch per group.
            if is_taken {
                break;
            }
        }

        if !to_send.is_empty() {
            self.credits_decode.consume(to_send.len() as u32);
            self.stats.insts_sent += to_send.len() as u64;
            let _ = sched.schedule(SimEvent::DecodeInsts(to_send), 1, Phase::Update);
        }

        if !self.fetch_buffer.is_empty() && self.credits_decode.has_any() {
            let _ = sched.schedule_unique(SimEvent::FetchSend, 1, Phase::Tick);
        }
        let _ = sched.schedule_unique(SimEvent::FetchInsts, 1, Phase::Tick);
    }

    /// ICache answered a block request.
    pub fn receive_cache_response(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let state = mem.borrow().cache_state;
        let group = mem.borrow().fetch_group.clone();
        let Some(group) = group else {
            panic!("ICache response without a fetch group");
        };
        if state == CacheState::Hit {
            for inst in &group {
                let mut inst = inst.borrow_mut();
                if !inst.is_flushed {
                    inst.set_status(InstStatus::Fetched);
                }
            }
            let _ = sched.schedule_unique(SimEvent::FetchSend, 0, Phase::Tick);
        } else {
            debug!("fetch block missed IL1; awaiting replay");
        }
    }

    /// ICache refunded request slots.
    pub fn receive_cache_credit(&mut self, credits: u32, sched: &mut Sched) {
        self.credits_icache.add(credits);
        let _ = sched.schedule_unique(SimEvent::FetchInsts, 0, Phase::Tick);
    }

    /// Decode refunded queue slots.
    pub fn receive_decode_credits(&mut self, credits: u32, sched: &mut Sched) {
        self.credits_decode.add(credits);
        let _ = sched.schedule_unique(SimEvent::FetchSend, 0, Phase::Tick);
    }

    /// BPU refunded request slots.
    pub fn receive_bpu_credits(&mut self, credits: u32) {
        self.bpu_req_credits.add(credits);
    }

    /// A prediction arrived from the FTQ.
    pub fn receive_prediction(&mut self, pred: PredictionOutput) {
        let _ = self.predictions.insert(pred.pc, pred);
    }

    /// The buffered prediction for a PC (test visibility).
    pub fn prediction_for(&self, pc: u64) -> Option<&PredictionOutput> {
        self.predictions.get(&pc)
    }

    /// Flush: rewind the trace source and drop all buffered instructions.
    pub fn handle_flush(&mut self, criteria: &FlushingCriteria, sched: &mut Sched) {
        self.stats.flushes += 1;
        debug!(%criteria, "fetch flush");

        // Rewind the trace: inclusive flushes replay the named instruction,
        // exclusive ones skip to the next. Block requests and groups
        // already on a wire deliver normally; their instructions carry the
        // flushed mark and downstream flush handlers drop them.
        self.generator
            .reset(criteria.inst(), !criteria.is_inclusive());

        for inst in self.ibuf.iter().chain(self.fetch_buffer.iter()) {
            inst.borrow_mut().is_flushed = true;
        }
        self.ibuf.clear();
        self.fetch_buffer.clear();
        self.fetch_buffer_occupancy = 0;

        let stale = self.predictions.len() as u32;
        if stale > 0 {
            self.predictions.clear();
            let _ = sched.schedule(SimEvent::FtqFetchCredits(stale), 0, Phase::Update);
        }

        // There may be no external trigger to restart fetch; bootstrap it.
        let _ = sched.schedule_unique(SimEvent::FetchInsts, 1, Phase::Tick);
    }

    /// True once the trace is exhausted and all buffers drained.
    pub fn is_drained(&self) -> bool {
        self.generator.is_done() && self.ibuf.is_empty() && self.fetch_buffer.is_empty()
    }

    /// Debug dump used by the lockup report.
    pub fn dump_debug_content(&self, output: &mut String) {
        output.push_str("Fetch Buffer Contents\n");
        for entry in &self.fetch_buffer {
            output.push_str(&format!("\t{}\n", entry.borrow()));
        }
    }
}
