//! Load/store unit.
//!
//! Structures: a bounded issue queue, a bounded replay buffer (speculative
//! mode), and a ready queue ordered by issue priority then age. The
//! parameterised pipeline runs address-calc → mmu-lookup → cache-lookup →
//! cache-read → complete, with stage lengths from configuration.
//!
//! Readiness protocol: address operands first (scoreboard callback),
//! then — for stores — the data register, then — for loads with
//! speculative execution disabled — all older stores must have resolved
//! their physical addresses. Stores complete at the cache-lookup stage and
//! only access the cache after retirement; the retirement ack re-readies
//! them at CACHE_PENDING priority.

/// Issue bookkeeping types.
pub mod ldst_info;

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::common::types::RegFile;
use crate::config::LsuConfig;
use crate::core::flush::FlushingCriteria;
use crate::core::inst::{InstPtr, InstStatus};
use crate::core::memory_access::{MemoryAccessInfo, MemoryAccessInfoPtr};
use crate::core::scoreboard::ScoreboardSet;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::pipeline::Pipeline;
use crate::sim::scheduler::Phase;

use ldst_info::{IssuePriority, IssueState, LoadStoreInstInfo, LoadStoreInstInfoPtr};

/// LSU statistics.
#[derive(Debug, Default)]
pub struct LsuStats {
    /// Instructions received from Dispatch.
    pub insts_dispatched: u64,
    /// Issue events won in arbitration.
    pub insts_issued: u64,
    /// Instructions fully completed.
    pub insts_completed: u64,
    /// Store retirement acks.
    pub stores_retired: u64,
    /// Replays scheduled.
    pub replays: u64,
    /// Flushes handled.
    pub flushes: u64,
    /// Speculative loads aborted by a store address match.
    pub loads_aborted: u64,
}

/// The load/store unit.
pub struct Lsu {
    ldst_inst_queue: VecDeque<LoadStoreInstInfoPtr>,
    ldst_inst_queue_size: u32,
    replay_buffer: VecDeque<LoadStoreInstInfoPtr>,
    replay_buffer_size: u32,
    replay_issue_delay: u64,
    /// Sorted by (priority, unique id, uop id); index 0 wins arbitration.
    ready_queue: Vec<LoadStoreInstInfoPtr>,
    allow_speculative_load_exec: bool,

    pipeline: Pipeline<LoadStoreInstInfoPtr>,
    mmu_lookup_stage: usize,
    cache_lookup_stage: usize,
    cache_read_stage: usize,
    complete_stage: usize,

    /// Counters.
    pub stats: LsuStats,
}

impl Lsu {
    /// Builds the LSU from configuration.
    pub fn new(config: &LsuConfig) -> Self {
        let address_calculation_stage = 0;
        let mmu_lookup_stage =
            address_calculation_stage + config.mmu_lookup_stage_length as usize;
        let cache_lookup_stage = mmu_lookup_stage + config.cache_lookup_stage_length as usize;
        // Data comes back the cycle after the lookup.
        let cache_read_stage = cache_lookup_stage + 1;
        let complete_stage = cache_read_stage + config.cache_read_stage_length as usize;

        Self {
            ldst_inst_queue: VecDeque::new(),
            ldst_inst_queue_size: config.ldst_inst_queue_size,
            replay_buffer: VecDeque::new(),
            replay_buffer_size: config.replay_buffer_size,
            replay_issue_delay: config.replay_issue_delay,
            ready_queue: Vec::new(),
            allow_speculative_load_exec: config.allow_speculative_load_exec,
            pipeline: Pipeline::new(complete_stage + 1),
            mmu_lookup_stage,
            cache_lookup_stage,
            cache_read_stage,
            complete_stage,
            stats: LsuStats::default(),
        }
    }

    /// Startup: grant issue-queue credits to Dispatch.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::LsuCredits(self.ldst_inst_queue_size),
            0,
            Phase::Update,
        );
    }

    // ---- dispatch arrival and operand readiness ----

    /// A load/store arrived from Dispatch.
    pub fn get_insts_from_dispatch(
        &mut self,
        inst: InstPtr,
        scoreboards: &mut ScoreboardSet,
        sched: &mut Sched,
    ) {
        debug!(inst = %inst.borrow(), "new instruction added to the ldst queue");
        self.allocate_inst_to_issue_queue(&inst);
        self.handle_operand_issue_check(&inst, scoreboards, sched);
        self.stats.insts_dispatched += 1;
    }

    fn allocate_inst_to_issue_queue(&mut self, inst: &InstPtr) {
        assert!(
            (self.ldst_inst_queue.len() as u32) < self.ldst_inst_queue_size,
            "appending the LSU issue queue would overflow it"
        );
        let mem = MemoryAccessInfo::for_inst(inst);
        let info = LoadStoreInstInfo::new(mem);
        info.borrow_mut().in_issue_queue = true;
        self.ldst_inst_queue.push_back(info);
    }

    /// Scoreboard wake / initial readiness check.
    pub fn handle_operand_issue_check(
        &mut self,
        inst: &InstPtr,
        scoreboards: &mut ScoreboardSet,
        sched: &mut Sched,
    ) {
        if inst.borrow().is_flushed {
            return;
        }
        if inst.borrow().status() == InstStatus::Scheduled {
            debug!(inst = %inst.borrow(), "instruction was previously ready");
            return;
        }

        let mut all_ready = true;
        if !self.inst_operand_ready(inst, scoreboards) {
            all_ready = false;
            let src_bits = inst.borrow().src_reg_mask(RegFile::Integer);
            let uid = inst.borrow().unique_id;
            scoreboards.get_mut(RegFile::Integer).register_ready_callback(
                src_bits,
                uid,
                SimEvent::LsuOperandCheck(inst.clone()),
                sched,
            );
        } else if inst.borrow().is_store() {
            // Wait for the address operand before checking the data operand
            // so only one callback is ever live.
            let data = inst.borrow().rename_data.data_reg().cloned();
            if let Some(data) = data {
                if !data.is_x0 {
                    let rf = data.op_info.reg_file;
                    let data_bits = inst.borrow().data_reg_mask(rf);
                    if !scoreboards.get(rf).is_set(&data_bits) {
                        all_ready = false;
                        let uid = inst.borrow().unique_id;
                        scoreboards.get_mut(rf).register_ready_callback(
                            data_bits,
                            uid,
                            SimEvent::LsuOperandCheck(inst.clone()),
                            sched,
                        );
                    }
                }
            }
        } else if !self.allow_speculative_load_exec {
            // A load is ready once its address and all older store
            // addresses are known.
            all_ready = self.all_older_stores_issued(inst);
        }

        if all_ready {
            self.update_issue_priority_after_new_dispatch(inst);
            let info = self
                .info_for_inst(inst)
                .expect("readiness check for an instruction outside the issue queue");
            self.append_to_ready_queue(&info);
            if self.is_ready_to_issue() {
                let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
            }
        }
    }

    /// Store retirement ack from the ROB.
    pub fn get_ack_from_rob(&mut self, inst: &InstPtr, sched: &mut Sched) {
        assert!(
            inst.borrow().status() == InstStatus::Retired,
            "ROB ack for a store that has not retired"
        );
        self.stats.stores_retired += 1;
        self.update_issue_priority_after_store_inst_retire(inst, sched);
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    // ---- issue ----

    /// Arbitrates and issues the highest-priority ready access.
    pub fn issue_inst(&mut self, sched: &mut Sched) {
        if !self.is_ready_to_issue() || !self.pipeline.can_append() {
            return;
        }
        let win = self.ready_queue.remove(0);
        win.borrow_mut().in_ready_queue = false;
        debug!(info = %win.borrow(), "arbitrated");
        self.stats.insts_issued += 1;

        // The replay buffer holds the issued access until it completes or
        // is replayed.
        if self.allow_speculative_load_exec {
            self.append_to_replay_queue(&win);
        }

        win.borrow_mut().state = IssueState::Issued;
        win.borrow_mut().priority = IssuePriority::Lowest;
        self.pipeline.append(win);
        let _ = sched.schedule_unique(SimEvent::LsuPipelineTick, 1, Phase::Tick);

        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 1, Phase::Tick);
        }
    }

    // ---- pipeline ----

    /// Advances the load/store pipe one cycle and runs the stage handlers.
    pub fn pipeline_tick(&mut self, scoreboards: &mut ScoreboardSet, sched: &mut Sched) {
        self.pipeline.shift();
        self.handle_address_calculation(sched);
        self.handle_mmu_lookup_req(scoreboards, sched);
        self.handle_cache_lookup_req(sched);
        self.handle_cache_read(sched);
        self.complete_inst(scoreboards, sched);
        if self.pipeline.active() {
            let _ = sched.schedule_unique(SimEvent::LsuPipelineTick, 1, Phase::Tick);
        }
    }

    fn handle_address_calculation(&mut self, sched: &mut Sched) {
        if self.pipeline.get(0).is_none() {
            return;
        }
        // Address generation is assumed done here; issue bandwidth frees up.
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn handle_mmu_lookup_req(&mut self, scoreboards: &mut ScoreboardSet, sched: &mut Sched) {
        let Some(info) = self.pipeline.get(self.mmu_lookup_stage).cloned() else {
            return;
        };
        let mem = info.borrow().mem.clone();
        if mem.borrow().is_mmu_hit() {
            debug!(info = %info.borrow(), "MMU lookup skipped (TLB already hit)");
            return;
        }

        // A store resolving its address may unblock younger loads that
        // were waiting on older-store addresses.
        if !self.allow_speculative_load_exec && info.borrow().inst().borrow().is_store() {
            self.ready_dependent_loads(scoreboards, sched);
        }

        let _ = sched.schedule(SimEvent::MmuLookupReq(mem), 1, Phase::Update);
    }

    /// MMU lookup ack: translation state was updated in place.
    pub fn get_ack_from_mmu(
        &mut self,
        mem: &MemoryAccessInfoPtr,
        scoreboards: &mut ScoreboardSet,
        sched: &mut Sched,
    ) {
        let hit = mem.borrow().phys_addr_ready;
        debug!(mem = %mem.borrow(), hit, "MMU ack");
        let is_store = mem
            .borrow()
            .inst
            .as_ref()
            .is_some_and(|inst| inst.borrow().is_store());
        if is_store && hit {
            if self.allow_speculative_load_exec {
                self.abort_younger_loads(mem, sched);
            } else {
                // Loads gated on older-store addresses may be waiting on
                // exactly this translation.
                self.ready_dependent_loads(scoreboards, sched);
            }
        }
    }

    /// MMU reload done: re-ready TLB-miss-pending accesses.
    pub fn handle_mmu_ready_req(
        &mut self,
        mem: &MemoryAccessInfoPtr,
        scoreboards: &mut ScoreboardSet,
        sched: &mut Sched,
    ) {
        debug!(mem = %mem.borrow(), "MMU rehandling event");
        let inst = mem.borrow().inst.clone().expect("LSU access without inst");

        self.update_issue_priority_after_tlb_reload(mem, sched);

        let resolved_store = inst.borrow().is_store();
        if resolved_store && !self.allow_speculative_load_exec {
            self.ready_dependent_loads(scoreboards, sched);
        }

        if inst.borrow().is_flushed {
            if self.is_ready_to_issue() {
                let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
            }
            return;
        }
        self.remove_inst_from_replay_queue_by_inst(&inst);
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn handle_cache_lookup_req(&mut self, sched: &mut Sched) {
        let Some(info) = self.pipeline.get(self.cache_lookup_stage).cloned() else {
            return;
        };
        let mem = info.borrow().mem.clone();
        let phys_ready = mem.borrow().phys_addr_ready;

        // No MMU hit from the previous stage: drop and replay.
        if !phys_ready {
            debug!(info = %info.borrow(), "cache lookup skipped (phys addr not ready)");
            if self.allow_speculative_load_exec {
                self.update_inst_replay_ready(&info, sched);
            }
            if !info.borrow().in_ready_queue {
                self.append_to_ready_queue(&info);
                if self.is_ready_to_issue() {
                    let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
                }
            }
            let _ = self.pipeline.invalidate(self.cache_lookup_stage);
            return;
        }

        let inst = info.borrow().inst();
        let status = inst.borrow().status();

        // A store past translation is good to retire; it revisits the
        // cache only after the ROB ack.
        if inst.borrow().is_store() && status == InstStatus::Scheduled {
            debug!(inst = %inst.borrow(), "store marked as completed");
            crate::core::complete_inst(&inst, sched);
            info.borrow_mut().state = IssueState::Ready;
            let _ = self.pipeline.invalidate(self.cache_lookup_stage);
            if self.allow_speculative_load_exec {
                self.update_inst_replay_ready(&info, sched);
            }
            return;
        }

        // Speculative loads stand down while older stores are in the queue.
        if !inst.borrow().is_store()
            && self.allow_speculative_load_exec
            && self.older_stores_exist(&inst)
        {
            debug!(inst = %inst.borrow(), "dropping speculative load");
            info.borrow_mut().state = IssueState::Ready;
            let _ = self.pipeline.invalidate(self.cache_lookup_stage);
            self.update_inst_replay_ready(&info, sched);
            return;
        }

        // Already hit, or a store that has not retired yet: no cache access.
        if mem.borrow().is_cache_hit() {
            return;
        }
        if inst.borrow().is_store() && inst.borrow().status() != InstStatus::Retired {
            debug!(inst = %inst.borrow(), "cache lookup skipped (store not retired)");
            return;
        }
        let _ = sched.schedule(SimEvent::DcacheLookupReq(mem), 1, Phase::Update);
    }

    /// DCache lookup ack.
    pub fn get_ack_from_cache(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let Some(info) = self.info_for_mem(mem) else {
            return;
        };
        // A miss needs no rescheduling here; the ready-request path or a
        // replay will bring the access back.
        if !mem.borrow().is_cache_hit() {
            return;
        }
        if info.borrow().state != IssueState::Issued {
            info.borrow_mut().state = IssueState::Ready;
        }
        info.borrow_mut().priority = IssuePriority::CacheReload;
        if !info.borrow().in_ready_queue {
            let _ = sched.schedule(SimEvent::LsuAppendReady(info), 0, Phase::Tick);
        }
    }

    /// DCache serviced an outstanding miss: re-ready the access.
    pub fn handle_cache_ready_req(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let inst = mem.borrow().inst.clone().expect("LSU access without inst");
        if inst.borrow().is_flushed {
            debug!("fill for a flushed cache miss received");
            if self.is_ready_to_issue() {
                let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
            }
            return;
        }

        debug!(mem = %mem.borrow(), "cache ready");
        if let Some(info) = self.info_for_mem(mem) {
            if info.borrow().state != IssueState::Issued {
                info.borrow_mut().state = IssueState::Ready;
            }
            info.borrow_mut().priority = IssuePriority::CacheReload;
            let _ = sched.schedule(SimEvent::LsuAppendReady(info), 0, Phase::Tick);
        }
        self.remove_inst_from_replay_queue_by_inst(&inst);
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn handle_cache_read(&mut self, sched: &mut Sched) {
        let Some(info) = self.pipeline.get(self.cache_read_stage).cloned() else {
            return;
        };
        let mem = info.borrow().mem.clone();

        if !mem.borrow().is_cache_hit() {
            debug!(mem = %mem.borrow(), "cannot complete, cache miss");
            if self.allow_speculative_load_exec {
                self.update_inst_replay_ready(&info, sched);
            }
            if !info.borrow().in_ready_queue {
                self.append_to_ready_queue(&info);
                info.borrow_mut().state = IssueState::Ready;
                if self.is_ready_to_issue() {
                    let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
                }
            }
            let _ = self.pipeline.invalidate(self.cache_read_stage);
            return;
        }

        if mem.borrow().data_ready {
            return;
        }
        mem.borrow_mut().data_ready = true;
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn complete_inst(&mut self, scoreboards: &mut ScoreboardSet, sched: &mut Sched) {
        let Some(info) = self.pipeline.get(self.complete_stage).cloned() else {
            return;
        };
        let mem = info.borrow().mem.clone();
        if !mem.borrow().data_ready {
            debug!(mem = %mem.borrow(), "cannot complete, data is missing");
            return;
        }

        let inst = info.borrow().inst();
        let is_store = inst.borrow().is_store();

        if !is_store {
            assert!(
                mem.borrow().is_cache_hit(),
                "load completing while the cache is still a miss: {}",
                mem.borrow()
            );
            if self.is_ready_to_issue() {
                let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
            }
            // Re-entering an already-completed load is a no-op.
            if inst.borrow().status() >= InstStatus::Completed {
                debug!(inst = %inst.borrow(), "load was previously completed or retired");
                if self.allow_speculative_load_exec {
                    self.remove_inst_from_replay_queue(&info);
                }
                return;
            }

            for rf in RegFile::ALL {
                let mask = inst.borrow().dest_reg_mask(rf);
                if !mask.is_empty() {
                    scoreboards.get_mut(rf).set_ready(&mask, sched);
                }
            }
            crate::core::complete_inst(&inst, sched);
            self.pop_issue_queue(&info);
            if self.allow_speculative_load_exec {
                self.remove_inst_from_replay_queue(&info);
            }
            self.stats.insts_completed += 1;
            let _ = sched.schedule(SimEvent::LsuCredits(1), 0, Phase::Update);
            debug!(inst = %inst.borrow(), "complete load");
            return;
        }

        // Stores: before retirement this visit just parks the access.
        if inst.borrow().status() != InstStatus::Retired {
            assert!(
                mem.borrow().is_mmu_hit(),
                "store completing while the TLB is still a miss"
            );
            if self.is_ready_to_issue() {
                let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
            }
        } else {
            assert!(
                mem.borrow().is_cache_hit(),
                "retired store finishing while the cache is still a miss"
            );
            if self.is_ready_to_issue() {
                let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
            }
            if !info.borrow().in_issue_queue {
                debug!(info = %info.borrow(), "store was already finished");
                if self.allow_speculative_load_exec {
                    self.remove_inst_from_replay_queue(&info);
                }
                return;
            }
            self.pop_issue_queue(&info);
            if self.allow_speculative_load_exec {
                self.remove_inst_from_replay_queue(&info);
            }
            self.stats.insts_completed += 1;
            let _ = sched.schedule(SimEvent::LsuCredits(1), 0, Phase::Update);
            debug!(inst = %inst.borrow(), "store operation is done");
        }
    }

    // ---- replay machinery ----

    /// Replay delay expired: the access may re-enter the ready queue.
    pub fn replay_ready(&mut self, info: &LoadStoreInstInfoPtr, sched: &mut Sched) {
        debug!(info = %info.borrow(), "replay inst ready");
        if info.borrow().state == IssueState::NotReady {
            info.borrow_mut().state = IssueState::Ready;
        }
        let phys_ready = info.borrow().mem.borrow().phys_addr_ready;
        info.borrow_mut().priority = if phys_ready {
            IssuePriority::CachePending
        } else {
            IssuePriority::MmuPending
        };
        let _ = sched.schedule(SimEvent::LsuAppendReady(info.clone()), 0, Phase::Tick);
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn update_inst_replay_ready(&mut self, info: &LoadStoreInstInfoPtr, sched: &mut Sched) {
        debug!(info = %info.borrow(), delay = self.replay_issue_delay, "scheduled replay");
        info.borrow_mut().state = IssueState::NotReady;
        let _ = sched.schedule(
            SimEvent::LsuReplayReady(info.clone()),
            self.replay_issue_delay,
            Phase::Tick,
        );
        self.remove_inst_from_replay_queue(info);
        self.stats.replays += 1;
    }

    /// Ready-queue append event.
    pub fn append_ready(&mut self, info: &LoadStoreInstInfoPtr, sched: &mut Sched) {
        if !info.borrow().in_issue_queue {
            // Flushed or already finished between scheduling and firing.
            return;
        }
        if !info.borrow().in_ready_queue && !info.borrow().in_replay_buffer {
            self.append_to_ready_queue(info);
        }
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    // ---- queue plumbing ----

    fn info_for_inst(&self, inst: &InstPtr) -> Option<LoadStoreInstInfoPtr> {
        self.ldst_inst_queue
            .iter()
            .find(|info| Rc::ptr_eq(&info.borrow().inst(), inst))
            .cloned()
    }

    fn info_for_mem(&self, mem: &MemoryAccessInfoPtr) -> Option<LoadStoreInstInfoPtr> {
        self.ldst_inst_queue
            .iter()
            .find(|info| Rc::ptr_eq(&info.borrow().mem, mem))
            .cloned()
    }

    fn append_to_ready_queue(&mut self, info: &LoadStoreInstInfoPtr) {
        assert!(
            info.borrow().in_issue_queue,
            "ready-queue append for an instruction outside the issue queue"
        );
        assert!(
            !self.ready_queue.iter().any(|other| Rc::ptr_eq(other, info)),
            "instruction already in the ready queue: {}",
            info.borrow()
        );
        info.borrow_mut().state = IssueState::Ready;
        info.borrow_mut().in_ready_queue = true;
        let key = info.borrow().arb_key();
        let pos = self
            .ready_queue
            .partition_point(|other| other.borrow().arb_key() <= key);
        self.ready_queue.insert(pos, info.clone());
    }

    fn append_to_replay_queue(&mut self, info: &LoadStoreInstInfoPtr) {
        assert!(
            (self.replay_buffer.len() as u32) < self.replay_buffer_size,
            "appending the replay buffer would overflow it"
        );
        assert!(
            !info.borrow().in_replay_buffer,
            "duplicate push into the replay queue: {}",
            info.borrow()
        );
        info.borrow_mut().in_replay_buffer = true;
        self.replay_buffer.push_back(info.clone());
    }

    fn remove_inst_from_replay_queue(&mut self, info: &LoadStoreInstInfoPtr) {
        if info.borrow().in_replay_buffer {
            self.replay_buffer.retain(|other| !Rc::ptr_eq(other, info));
            info.borrow_mut().in_replay_buffer = false;
        }
    }

    fn remove_inst_from_replay_queue_by_inst(&mut self, inst: &InstPtr) {
        if let Some(info) = self.info_for_inst(inst) {
            self.remove_inst_from_replay_queue(&info);
        }
    }

    fn pop_issue_queue(&mut self, info: &LoadStoreInstInfoPtr) {
        debug!(info = %info.borrow(), "removing inst from issue queue");
        self.ldst_inst_queue.retain(|other| !Rc::ptr_eq(other, info));
        self.ready_queue.retain(|other| !Rc::ptr_eq(other, info));
        info.borrow_mut().in_issue_queue = false;
        info.borrow_mut().in_ready_queue = false;
    }

    // ---- predicates ----

    fn inst_operand_ready(&self, inst: &InstPtr, scoreboards: &ScoreboardSet) -> bool {
        let mask = inst.borrow().src_reg_mask(RegFile::Integer);
        scoreboards.get(RegFile::Integer).is_set(&mask)
    }

    fn all_older_stores_issued(&self, inst: &InstPtr) -> bool {
        let uid = inst.borrow().unique_id;
        for info in &self.ldst_inst_queue {
            let other = info.borrow().inst();
            if Rc::ptr_eq(&other, inst) {
                continue;
            }
            let other_ref = other.borrow();
            if other_ref.is_store()
                && other_ref.unique_id < uid
                && !info.borrow().mem.borrow().phys_addr_ready
            {
                return false;
            }
        }
        true
    }

    fn older_stores_exist(&self, inst: &InstPtr) -> bool {
        let uid = inst.borrow().unique_id;
        self.ldst_inst_queue.iter().any(|info| {
            let other = info.borrow().inst();
            let other_ref = other.borrow();
            other_ref.is_store() && other_ref.unique_id < uid
        })
    }

    fn is_ready_to_issue(&self) -> bool {
        if self.allow_speculative_load_exec
            && self.replay_buffer.len() as u32 >= self.replay_buffer_size
        {
            debug!("replay buffer is full");
            return false;
        }
        !self.ready_queue.is_empty()
    }

    // ---- priority updates ----

    fn update_issue_priority_after_new_dispatch(&mut self, inst: &InstPtr) {
        let info = self
            .info_for_inst(inst)
            .expect("priority update for an instruction not yet in the issue queue");
        info.borrow_mut().state = IssueState::Ready;
        info.borrow_mut().priority = IssuePriority::NewDisp;
        inst.borrow_mut().set_status(InstStatus::Scheduled);
    }

    fn update_issue_priority_after_tlb_reload(
        &mut self,
        mem: &MemoryAccessInfoPtr,
        sched: &mut Sched,
    ) {
        let mut found = false;
        for info in self.ldst_inst_queue.clone() {
            let info_mem = info.borrow().mem.clone();
            if !Rc::ptr_eq(&info_mem, mem)
                && info_mem.borrow().mmu_state == crate::core::memory_access::MmuState::Miss
            {
                // Re-activate other TLB-miss-pending accesses; speculative
                // misses wake through their replay events instead.
                if !self.allow_speculative_load_exec
                    && info.borrow().state != IssueState::Issued
                {
                    info.borrow_mut().state = IssueState::Ready;
                }
                info.borrow_mut().priority = IssuePriority::MmuPending;
            }
            if Rc::ptr_eq(&info_mem, mem) {
                // The outstanding miss re-issues ahead of the pending ones.
                if info.borrow().state != IssueState::Issued {
                    info.borrow_mut().state = IssueState::Ready;
                }
                info.borrow_mut().priority = IssuePriority::MmuReload;
                let _ = sched.schedule(SimEvent::LsuAppendReady(info.clone()), 0, Phase::Tick);
                found = true;
            }
        }
        let flushed = mem
            .borrow()
            .inst
            .as_ref()
            .is_some_and(|inst| inst.borrow().is_flushed);
        assert!(
            found || flushed,
            "TLB reload for an instruction not in the issue queue"
        );
    }

    fn update_issue_priority_after_store_inst_retire(
        &mut self,
        inst: &InstPtr,
        sched: &mut Sched,
    ) {
        let info = self
            .info_for_inst(inst)
            .expect("store retire ack for an instruction not in the issue queue");
        if info.borrow().state != IssueState::Issued {
            info.borrow_mut().state = IssueState::Ready;
        }
        info.borrow_mut().priority = IssuePriority::CachePending;
        let _ = sched.schedule(SimEvent::LsuAppendReady(info), 0, Phase::Tick);
    }

    // ---- speculative-load aborts ----

    fn ready_dependent_loads(&mut self, scoreboards: &mut ScoreboardSet, sched: &mut Sched) {
        let mut found = false;
        for info in self.ldst_inst_queue.clone() {
            let inst = info.borrow().inst();
            if inst.borrow().is_store() {
                continue;
            }
            // Only loads whose register operands are ready and which are
            // still waiting to be scheduled.
            if inst.borrow().status() == InstStatus::Dispatched
                && self.inst_operand_ready(&inst, scoreboards)
            {
                debug!(inst = %inst.borrow(), "readying dependent load");
                self.update_issue_priority_after_new_dispatch(&inst);
                if !info.borrow().in_ready_queue {
                    self.append_to_ready_queue(&info);
                }
                found = true;
            }
        }
        if found && self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn abort_younger_loads(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let store_inst = mem.borrow().inst.clone().expect("store access without inst");
        let store_vaddr = store_inst.borrow().target_vaddr;

        // Oldest load in the replay buffer matching the store's address.
        let mut min_inst_age = u64::MAX;
        for info in &self.replay_buffer {
            let inst = info.borrow().inst();
            if Rc::ptr_eq(&inst, &store_inst) || inst.borrow().is_store() {
                continue;
            }
            let i = inst.borrow();
            if i.target_vaddr == store_vaddr && i.unique_id < min_inst_age {
                min_inst_age = i.unique_id;
            }
        }
        if min_inst_age == u64::MAX {
            return;
        }
        debug!(min_inst_age, "aborting younger speculative loads");

        for info in self.replay_buffer.clone() {
            let inst = info.borrow().inst();
            if inst.borrow().is_store() {
                continue;
            }
            if info.borrow().unique_id() >= min_inst_age {
                info.borrow_mut().state = IssueState::Ready;
                if !info.borrow().in_ready_queue {
                    self.append_to_ready_queue(&info);
                }
                self.drop_inst_from_pipeline(&info);
                self.remove_inst_from_replay_queue(&info);
                self.stats.loads_aborted += 1;
            }
        }
        if self.is_ready_to_issue() {
            let _ = sched.schedule_unique(SimEvent::LsuIssue, 0, Phase::Tick);
        }
    }

    fn drop_inst_from_pipeline(&mut self, info: &LoadStoreInstInfoPtr) {
        self.pipeline.flush_if(|other| Rc::ptr_eq(other, info));
    }

    // ---- flush ----

    /// Removes everything covered by the criterion from all structures and
    /// cancels matching replay/append events.
    pub fn handle_flush(
        &mut self,
        criteria: &FlushingCriteria,
        scoreboards: &mut ScoreboardSet,
        sched: &mut Sched,
    ) {
        debug!(%criteria, "LSU flush");
        self.stats.flushes += 1;

        self.pipeline
            .flush_if(|info| criteria.included_in_flush(&info.borrow().inst()));

        let mut credits_to_send = 0;
        let covered: Vec<LoadStoreInstInfoPtr> = self
            .ldst_inst_queue
            .iter()
            .filter(|info| criteria.included_in_flush(&info.borrow().inst()))
            .cloned()
            .collect();
        for info in covered {
            let inst = info.borrow().inst();
            inst.borrow_mut().is_flushed = true;
            let uid = inst.borrow().unique_id;
            for rf in [RegFile::Integer, RegFile::Float] {
                scoreboards.get_mut(rf).clear_callbacks(uid);
            }
            self.ldst_inst_queue.retain(|other| !Rc::ptr_eq(other, &info));
            info.borrow_mut().in_issue_queue = false;
            credits_to_send += 1;
        }

        self.replay_buffer.retain(|info| {
            let keep = !criteria.included_in_flush(&info.borrow().inst());
            if !keep {
                info.borrow_mut().in_replay_buffer = false;
            }
            keep
        });
        self.ready_queue.retain(|info| {
            let keep = !criteria.included_in_flush(&info.borrow().inst());
            if !keep {
                info.borrow_mut().in_ready_queue = false;
            }
            keep
        });

        // Cancel replay wake-ups for flushed entries.
        let crit = criteria.clone();
        sched.cancel_if(move |ev| match ev {
            SimEvent::LsuAppendReady(info) | SimEvent::LsuReplayReady(info) => {
                crit.included_in_flush(&info.borrow().inst())
            }
            SimEvent::LsuOperandCheck(inst) => crit.included_in_flush(inst),
            _ => false,
        });

        if credits_to_send > 0 {
            let _ = sched.schedule(SimEvent::LsuCredits(credits_to_send), 0, Phase::Update);
        }
        if !self.is_ready_to_issue() {
            sched.cancel_unique(&SimEvent::LsuIssue);
        }
    }

    // ---- introspection ----

    /// Issue queue occupancy.
    pub fn issue_queue_len(&self) -> usize {
        self.ldst_inst_queue.len()
    }

    /// Replay buffer occupancy.
    pub fn replay_buffer_len(&self) -> usize {
        self.replay_buffer.len()
    }

    /// Ready queue occupancy.
    pub fn ready_queue_len(&self) -> usize {
        self.ready_queue.len()
    }

    /// True when nothing is in flight.
    pub fn is_drained(&self) -> bool {
        self.ldst_inst_queue.is_empty()
    }

    /// Debug dump used by the lockup report.
    pub fn dump_debug_content(&self, output: &mut String) {
        output.push_str("LSU Contents\n");
        for entry in &self.ldst_inst_queue {
            output.push_str(&format!("\t{}\n", entry.borrow()));
        }
    }
}
