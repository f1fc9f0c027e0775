//! The top-level simulator: unit construction, wiring, run control.
//!
//! `Simulator` owns every unit plus the scheduler, and its dispatch loop
//! is the machine's topology: each wire variant is delivered to the
//! consuming unit's handler. The run ends when the trace is exhausted and
//! the machine drains, when the retire limit stops the scheduler, or —
//! fatally — when the ROB watchdog detects a lockup.

use crate::common::error::SimError;
use crate::config::Config;
use crate::core::biu::Biu;
use crate::core::dcache::Dcache;
use crate::core::decode::Decode;
use crate::core::dispatch::Dispatch;
use crate::core::execute::ExecPipe;
use crate::core::fetch::bpu::Bpu;
use crate::core::fetch::ftq::Ftq;
use crate::core::fetch::icache::Icache;
use crate::core::fetch::Fetch;
use crate::core::flush::FlushManager;
use crate::core::inst::TargetUnit;
use crate::core::inst_gen::InstGenerator;
use crate::core::l2cache::L2Cache;
use crate::core::lsu::Lsu;
use crate::core::mmu::Mmu;
use crate::core::prefetcher::Prefetcher;
use crate::core::rename::Rename;
use crate::core::rob::Rob;
use crate::core::scoreboard::ScoreboardSet;
use crate::sim::event::{L2Unit, Sched, SimEvent};
use crate::sim::scheduler::{Cycle, Phase};
use crate::stats::SimStats;

/// The whole machine.
pub struct Simulator {
    /// The event scheduler.
    pub sched: Sched,
    /// Shared physical-register scoreboards.
    pub scoreboards: ScoreboardSet,

    pub fetch: Fetch,
    pub icache: Icache,
    pub bpu: Bpu,
    pub ftq: Ftq,
    pub decode: Decode,
    pub rename: Rename,
    pub dispatch: Dispatch,
    pub alu: ExecPipe,
    pub fpu: ExecPipe,
    pub br: ExecPipe,
    pub lsu: Lsu,
    pub mmu: Mmu,
    pub dcache: Dcache,
    pub l2cache: L2Cache,
    pub biu: Biu,
    pub rob: Rob,
    pub flush_manager: FlushManager,
    pub prefetcher: Prefetcher,
}

impl Simulator {
    /// Builds the machine from a configuration and a trace source, and
    /// fires every unit's startup (initial credit grants, first fetch).
    pub fn new(config: &Config, generator: Box<dyn InstGenerator>) -> Result<Self, SimError> {
        config.validate()?;

        let mut sim = Self {
            sched: Sched::new(),
            scoreboards: ScoreboardSet::new(),
            fetch: Fetch::new(&config.fetch, generator),
            icache: Icache::new(&config.icache),
            bpu: Bpu::new(&config.bpu),
            ftq: Ftq::new(&config.ftq),
            decode: Decode::new(&config.decode),
            rename: Rename::new(&config.rename),
            dispatch: Dispatch::new(&config.dispatch),
            alu: ExecPipe::new(
                TargetUnit::Alu,
                config.dispatch.alu_queue_size,
                config.dispatch.alu_latency,
            ),
            fpu: ExecPipe::new(
                TargetUnit::Fpu,
                config.dispatch.fpu_queue_size,
                config.dispatch.fpu_latency,
            ),
            br: ExecPipe::new(
                TargetUnit::Br,
                config.dispatch.br_queue_size,
                config.dispatch.br_latency,
            ),
            lsu: Lsu::new(&config.lsu),
            mmu: Mmu::new(&config.mmu),
            dcache: Dcache::new(&config.dcache, &config.prefetcher),
            l2cache: L2Cache::new(&config.l2cache),
            biu: Biu::new(&config.biu)?,
            rob: Rob::new(&config.rob),
            flush_manager: FlushManager::new(),
            prefetcher: Prefetcher::new(&config.prefetcher),
        };

        let sched = &mut sim.sched;
        sim.icache.send_initial_credits(sched);
        sim.bpu.send_initial_credits(sched);
        sim.ftq.send_initial_credits(sched);
        sim.decode.send_initial_credits(sched);
        sim.rename.send_initial_credits(sched);
        sim.dispatch.send_initial_credits(sched);
        sim.alu.send_initial_credits(sched);
        sim.fpu.send_initial_credits(sched);
        sim.br.send_initial_credits(sched);
        sim.lsu.send_initial_credits(sched);
        sim.l2cache.send_initial_credits(sched);
        sim.rob.send_initial_credits(sched);
        sim.prefetcher.send_initial_credits(sched);
        sim.fetch.initialize(sched);

        Ok(sim)
    }

    /// Runs until completion, the retire limit, or a fatal lockup.
    pub fn run(&mut self) -> Result<(), SimError> {
        while let Some((_, event)) = self.sched.pop() {
            self.step(event)?;
        }

        if self.rob.stopped_simulation {
            return Ok(());
        }
        // The event queue drained: the trace must be done and the machine
        // empty, otherwise something wedged without tripping the watchdog.
        if !self.rob.is_empty() || !self.lsu.is_drained() || !self.fetch.is_drained() {
            return Err(SimError::Lockup {
                cycles: self.rob.cycles_since_retirement(self.sched.now()),
                dump: self.debug_dump(),
            });
        }
        Ok(())
    }

    /// Injects an event (test harness hook).
    pub fn inject(&mut self, event: SimEvent, delay: Cycle) {
        let _ = self.sched.schedule(event, delay, Phase::Update);
    }

    /// Runs at most `max_events` pending events (test harness hook).
    pub fn run_for(&mut self, max_events: usize) -> Result<(), SimError> {
        for _ in 0..max_events {
            let Some((_, event)) = self.sched.pop() else {
                break;
            };
            self.step(event)?;
        }
        Ok(())
    }

    /// Aggregated statistics.
    pub fn stats(&self) -> SimStats {
        SimStats::collect(self)
    }

    fn debug_dump(&self) -> String {
        let mut dump = String::new();
        self.lsu.dump_debug_content(&mut dump);
        self.rob.dump_debug_content(&mut dump);
        self.rename.dump_debug_content(&mut dump);
        self.fetch.dump_debug_content(&mut dump);
        dump
    }

    /// Delivers one event to its consuming unit. This match *is* the
    /// machine's port binding.
    fn step(&mut self, event: SimEvent) -> Result<(), SimError> {
        let Self {
            sched,
            scoreboards,
            fetch,
            icache,
            bpu,
            ftq,
            decode,
            rename,
            dispatch,
            alu,
            fpu,
            br,
            lsu,
            mmu,
            dcache,
            l2cache,
            biu,
            rob,
            flush_manager,
            prefetcher,
        } = self;

        match event {
            // ---- fetch / icache ----
            SimEvent::IcacheFetchReq(mem) => icache.get_request_from_fetch(mem, sched),
            SimEvent::IcacheFetchResp(mem) => fetch.receive_cache_response(&mem, sched),
            SimEvent::IcacheFetchCredits(n) => fetch.receive_cache_credit(n, sched),
            SimEvent::IcacheArbitrate => icache.arbitrate(sched),
            SimEvent::IcacheMakeL2Request => icache.make_l2_request(sched),
            SimEvent::IcacheRespond(mem) => icache.respond(mem, sched),
            SimEvent::IcacheReplay(mem) => icache.replay(mem, sched),
            SimEvent::FetchInsts => fetch.fetch_instruction(sched)?,
            SimEvent::FetchSend => fetch.send_instructions(sched),

            // ---- decode / rename / dispatch ----
            SimEvent::DecodeInsts(group) => decode.receive_insts(group, sched),
            SimEvent::DecodeCredits(n) => fetch.receive_decode_credits(n, sched),
            SimEvent::DecodeRun => decode.decode_run(sched)?,
            SimEvent::RenameInsts(group) => rename.decoded_instructions(group, sched),
            SimEvent::RenameCredits(n) => decode.receive_rename_credits(n, sched),
            SimEvent::VsetCleared(inst) => decode.handle_vset_cleared(&inst, sched),
            SimEvent::RenameSchedule => rename.schedule_renaming(sched),
            SimEvent::RenameRun => rename.rename_instructions(scoreboards, sched),
            SimEvent::DispatchInsts(group) => dispatch.receive_insts(group, sched),
            SimEvent::DispatchCredits(n) => rename.credits_dispatch_queue(n, sched),
            SimEvent::DispatchRun => dispatch.dispatch_run(scoreboards, sched),

            // ---- execution ----
            SimEvent::ExecInst(unit, inst) => match unit {
                TargetUnit::Alu => alu.receive_inst(inst, sched),
                TargetUnit::Fpu => fpu.receive_inst(inst, sched),
                TargetUnit::Br => br.receive_inst(inst, sched),
                _ => unreachable!("exec wire for a non-exec unit"),
            },
            SimEvent::ExecComplete(unit, inst) => match unit {
                TargetUnit::Alu => alu.complete(&inst, scoreboards, sched),
                TargetUnit::Fpu => fpu.complete(&inst, scoreboards, sched),
                TargetUnit::Br => br.complete(&inst, scoreboards, sched),
                _ => unreachable!("exec wire for a non-exec unit"),
            },
            SimEvent::ExecCredits(unit, n) => dispatch.receive_unit_credits(unit, n, sched),

            // ---- lsu ----
            SimEvent::LsuInst(inst) => lsu.get_insts_from_dispatch(inst, scoreboards, sched),
            SimEvent::LsuCredits(n) => {
                dispatch.receive_unit_credits(TargetUnit::Lsu, n, sched);
            }
            SimEvent::LsuOperandCheck(inst) => {
                lsu.handle_operand_issue_check(&inst, scoreboards, sched);
            }
            SimEvent::LsuIssue => lsu.issue_inst(sched),
            SimEvent::LsuPipelineTick => lsu.pipeline_tick(scoreboards, sched),
            SimEvent::LsuReplayReady(info) => lsu.replay_ready(&info, sched),
            SimEvent::LsuAppendReady(info) => lsu.append_ready(&info, sched),

            // ---- mmu ----
            SimEvent::MmuLookupReq(mem) => mmu.handle_lookup_req(&mem, sched),
            SimEvent::MmuLookupAck(mem) => lsu.get_ack_from_mmu(&mem, scoreboards, sched),
            SimEvent::MmuReadyReq(mem) => lsu.handle_mmu_ready_req(&mem, scoreboards, sched),
            SimEvent::MmuReloadDone(mem) => mmu.reload_done(&mem, sched),

            // ---- dcache ----
            SimEvent::DcacheLookupReq(mem) => dcache.receive_mem_req_from_lsu(mem, sched),
            SimEvent::DcacheLookupAck(mem) => lsu.get_ack_from_cache(&mem, sched),
            SimEvent::DcacheReadyReq(mem) => lsu.handle_cache_ready_req(&mem, sched),
            SimEvent::DcachePipelineTick => dcache.pipeline_tick(sched),
            SimEvent::DcacheMshrRequest => dcache.mshr_request(sched),
            SimEvent::DcacheFreePipeline => dcache.free_pipeline(),

            // ---- l2 / biu ----
            SimEvent::L2Request { src, mem } => l2cache.get_req(src, mem, sched),
            SimEvent::L2RespIcache(mem) => icache.get_resp_from_l2(mem, sched),
            SimEvent::L2RespDcache(mem) => dcache.receive_resp_from_l2(mem, sched),
            SimEvent::L2CreditsIcache(n) => icache.get_credits_from_l2(n, sched),
            // The DCache paces itself with its one-outstanding-miss flag;
            // channel credits are informational on this edge.
            SimEvent::L2CreditsDcache(_) => {}
            SimEvent::L2CreateReq => l2cache.create_req(sched),
            SimEvent::L2IssueReq => l2cache.issue_req(sched),
            SimEvent::L2PipelineTick => l2cache.pipeline_tick(sched),
            SimEvent::BiuReq(mem) => biu.receive_req(mem, sched),
            SimEvent::BiuResp(mem) => l2cache.get_resp_from_biu(mem, sched),
            SimEvent::BiuCredits(n) => l2cache.get_ack_from_biu(n, sched),
            SimEvent::BiuHandleReq => biu.handle_req(sched),
            SimEvent::BiuTargetAck => biu.target_ack(sched),

            // ---- rob ----
            SimEvent::RobInsts(group) => rob.rob_appended(group, sched),
            SimEvent::RobCredits(n) => dispatch.receive_rob_credits(n, sched),
            SimEvent::RobRetire => rob.retire_instructions(sched),
            SimEvent::RobRetireAckRename(group) => rename.get_ack_from_rob(&group, sched),
            SimEvent::RobRetireAckLsu(inst) => lsu.get_ack_from_rob(&inst, sched),
            SimEvent::RobForwardProgress => {
                if rob.check_forward_progress(sched) {
                    let cycles = rob.cycles_since_retirement(sched.now());
                    let mut dump = String::new();
                    lsu.dump_debug_content(&mut dump);
                    rob.dump_debug_content(&mut dump);
                    rename.dump_debug_content(&mut dump);
                    fetch.dump_debug_content(&mut dump);
                    return Err(SimError::Lockup { cycles, dump });
                }
            }

            // ---- bpu / ftq ----
            SimEvent::BpuPredictionReq(req) => bpu.receive_prediction_request(req, sched),
            SimEvent::BpuReqCredits(n) => fetch.receive_bpu_credits(n),
            SimEvent::BpuMakePrediction => bpu.make_prediction(sched),
            SimEvent::FtqFirstPrediction(pred) => ftq.get_first_prediction(pred, sched),
            SimEvent::FtqSecondPrediction(pred) => ftq.get_second_prediction(pred, sched),
            SimEvent::FtqCreditsToBpu(n) => bpu.receive_ftq_credits(n, sched),
            SimEvent::FetchPrediction(pred) => fetch.receive_prediction(pred),
            SimEvent::FtqFetchCredits(n) => ftq.get_fetch_credits(n, sched),
            SimEvent::FtqBranchCommit(pc) => ftq.branch_commit(pc),
            SimEvent::BpuRedirect(pc) => bpu.handle_redirect(pc),
            SimEvent::BpuUpdate(update) => bpu.handle_update(update),

            // ---- prefetcher ----
            SimEvent::PrefetcherObserve(mem) => prefetcher.process_incoming_req(mem, sched),
            SimEvent::PrefetcherIngressCredits(n) => dcache.receive_prefetcher_credits(n),
            SimEvent::PrefetchEmit(mem) => l2cache.get_req(L2Unit::Dcache, mem, sched),
            SimEvent::PrefetcherQueueCredits(n) => prefetcher.receive_queue_credits(n, sched),
            SimEvent::PrefetcherGenerate => prefetcher.generate_prefetch(sched),
            SimEvent::PrefetcherHandleIncoming => prefetcher.handle_incoming(sched),

            // ---- flush ----
            SimEvent::FlushRequest(criteria) => {
                if flush_manager.receive_flush(criteria) {
                    let _ = sched.schedule_unique(SimEvent::FlushFanout, 1, Phase::Flush);
                }
            }
            SimEvent::FlushFanout => {
                let criteria = flush_manager.take_pending();
                let wire = if criteria.is_lower_pipe_flush() {
                    SimEvent::FlushLower(criteria)
                } else {
                    SimEvent::FlushUpper(criteria)
                };
                let _ = sched.schedule(wire, 0, Phase::Flush);
            }
            SimEvent::FlushUpper(criteria) => {
                rob.handle_flush(&criteria, sched);
                lsu.handle_flush(&criteria, scoreboards, sched);
                dispatch.handle_flush(&criteria, sched);
                rename.handle_flush(&criteria, sched);
                decode.handle_flush(&criteria, sched);
                fetch.handle_flush(&criteria, sched);
                ftq.handle_flush(sched);
                prefetcher.handle_flush(sched);
            }
            SimEvent::FlushLower(criteria) => {
                fetch.handle_flush(&criteria, sched);
                ftq.handle_flush(sched);
            }
        }
        Ok(())
    }
}
