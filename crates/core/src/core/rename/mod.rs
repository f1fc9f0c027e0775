//! Rename: architectural-to-physical register mapping.
//!
//! State per register file: the map table (architectural → live physical),
//! a FIFO free list, and a reference-count table whose entries carry the
//! producing instruction's id, a weak back-pointer to it, and a
//! produced-by-load flag. At reset, physical registers 0..31 back the
//! initial architectural mappings (integer x0 is hardwired and never
//! allocated); everything above sits on the free list.
//!
//! Retirement reclaims previous destination mappings; a flush walks the
//! in-flight queue newest-to-oldest restoring the map table, reference
//! counts and free lists — the two paths must leave identical state.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::types::{RegFile, RegisterBitMask, NUM_ARCH_REGS, NUM_REG_FILES};
use crate::config::RenameConfig;
use crate::core::flush::FlushingCriteria;
use crate::core::inst::{
    DataReg, InstGroup, InstPtr, InstStatus, InstWeakPtr, OperandField, RenamedReg,
};
use crate::core::scoreboard::ScoreboardSet;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

/// Why rename is stalled this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StallReason {
    NoDecodeInsts = 0,
    NoDispatchCredits,
    NoIntegerRenames,
    NoFloatRenames,
    NoVectorRenames,
    NotStalled,
}

const NUM_STALL_REASONS: usize = 6;

/// One reference-count table entry.
pub struct RefEntry {
    /// Live-mapping claims on this physical register.
    pub cnt: u32,
    /// Unique id of the producing instruction.
    pub producer_id: u64,
    /// Weak back-pointer to the producer (expires at retirement).
    pub producer: InstWeakPtr,
    /// The producer was a load (drives the LSU replay policy).
    pub producer_is_load: bool,
}

impl Default for RefEntry {
    fn default() -> Self {
        Self {
            cnt: 0,
            producer_id: 0,
            producer: InstWeakPtr::new(),
            producer_is_load: false,
        }
    }
}

struct RegfileComponent {
    reference_counter: Vec<RefEntry>,
    freelist: VecDeque<u32>,
}

/// Rename statistics.
#[derive(Debug)]
pub struct RenameStats {
    /// Cycles spent in each stall reason.
    pub stall_counts: [u64; NUM_STALL_REASONS],
    /// Histogram of rename widths (index = instructions renamed).
    pub rename_histogram: Vec<u64>,
    /// Move eliminations performed.
    pub move_eliminations: u64,
    /// Instructions renamed.
    pub insts_renamed: u64,
}

/// The rename unit.
pub struct Rename {
    num_to_rename: u32,
    partial_rename: bool,
    enable_move_elimination: bool,

    map_table: [[u32; NUM_ARCH_REGS as usize]; NUM_REG_FILES],
    components: [RegfileComponent; NUM_REG_FILES],

    uop_queue: VecDeque<InstPtr>,
    uop_queue_depth: u32,
    /// Renamed instructions awaiting retirement, program order.
    inst_queue: VecDeque<InstPtr>,

    credits_dispatch: Credits,
    /// Cumulative destination register demand of the uop queue head (or the
    /// whole queue when full-group rename is required).
    regcount: [u32; NUM_REG_FILES],
    current_stall: StallReason,

    /// Counters.
    pub stats: RenameStats,
}

impl Rename {
    /// Builds Rename from configuration, reserving the initial mappings.
    pub fn new(config: &RenameConfig) -> Self {
        let renames = [
            config.num_integer_renames,
            config.num_float_renames,
            config.num_vector_renames,
        ];

        let mut map_table = [[0u32; NUM_ARCH_REGS as usize]; NUM_REG_FILES];
        let mut components: Vec<RegfileComponent> = Vec::with_capacity(NUM_REG_FILES);
        for rf in RegFile::ALL {
            let idx = rf.index();
            // Integer x0 is hardwired to zero: no physical register is ever
            // assigned to it, so its slot keeps the (unused) mapping 0.
            let first_arch = if rf == RegFile::Integer { 1 } else { 0 };
            let mut reserved = first_arch;
            for arch in first_arch..NUM_ARCH_REGS {
                map_table[idx][arch as usize] = reserved;
                reserved += 1;
            }

            let mut reference_counter = Vec::with_capacity(renames[idx] as usize);
            if rf == RegFile::Integer {
                reference_counter.push(RefEntry::default());
            }
            while (reference_counter.len() as u32) < reserved {
                reference_counter.push(RefEntry {
                    cnt: 1,
                    ..RefEntry::default()
                });
            }
            let mut freelist = VecDeque::new();
            for phys in reserved..renames[idx] {
                freelist.push_back(phys);
                reference_counter.push(RefEntry::default());
            }
            components.push(RegfileComponent {
                reference_counter,
                freelist,
            });
        }
        let components: [RegfileComponent; NUM_REG_FILES] = components
            .try_into()
            .unwrap_or_else(|_| unreachable!("exactly three register files"));

        Self {
            num_to_rename: config.num_to_rename,
            partial_rename: config.partial_rename,
            enable_move_elimination: config.move_elimination,
            map_table,
            components,
            uop_queue: VecDeque::new(),
            uop_queue_depth: config.rename_queue_depth,
            inst_queue: VecDeque::new(),
            credits_dispatch: Credits::new(),
            regcount: [0; NUM_REG_FILES],
            current_stall: StallReason::NoDecodeInsts,
            stats: RenameStats {
                stall_counts: [0; NUM_STALL_REASONS],
                rename_histogram: vec![0; config.num_to_rename as usize + 1],
                move_eliminations: 0,
                insts_renamed: 0,
            },
        }
    }

    /// Startup: grant uop-queue credits to Decode.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::RenameCredits(self.uop_queue_depth),
            0,
            Phase::Update,
        );
    }

    fn set_stall(&mut self, reason: StallReason) {
        self.current_stall = reason;
        self.stats.stall_counts[reason as usize] += 1;
    }

    /// Current stall reason (test visibility).
    pub fn current_stall(&self) -> StallReason {
        self.current_stall
    }

    /// Dispatch refunded queue credits.
    pub fn credits_dispatch_queue(&mut self, credits: u32, sched: &mut Sched) {
        self.credits_dispatch.add(credits);
        if !self.uop_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::RenameSchedule, 0, Phase::Tick);
        } else {
            self.set_stall(StallReason::NoDecodeInsts);
        }
        debug!(total = self.credits_dispatch.available(), "credits from dispatch");
    }

    /// A decoded group arrived.
    pub fn decoded_instructions(&mut self, group: InstGroup, sched: &mut Sched) {
        assert!(
            self.uop_queue.len() + group.len() <= self.uop_queue_depth as usize,
            "rename uop queue overflow"
        );
        for inst in group {
            self.uop_queue.push_back(inst);
        }
        self.update_regcount();
        let _ = sched.schedule_unique(SimEvent::RenameSchedule, 0, Phase::Tick);
    }

    fn update_regcount(&mut self) {
        self.regcount = [0; NUM_REG_FILES];
        for inst in &self.uop_queue {
            for dest in &inst.borrow().dests {
                if !dest.is_x0 {
                    self.regcount[dest.reg_file.index()] += 1;
                }
            }
            if self.partial_rename {
                // Only the head instruction's demand matters.
                break;
            }
        }
    }

    fn enough_renames(&self) -> (bool, StallReason) {
        const STALL_MAP: [StallReason; NUM_REG_FILES] = [
            StallReason::NoIntegerRenames,
            StallReason::NoFloatRenames,
            StallReason::NoVectorRenames,
        ];
        for rf in RegFile::ALL {
            let idx = rf.index();
            if self.regcount[idx] as usize > self.components[idx].freelist.len() {
                return (false, STALL_MAP[idx]);
            }
        }
        (true, StallReason::NotStalled)
    }

    /// Evaluates stall conditions and schedules a rename session.
    pub fn schedule_renaming(&mut self, sched: &mut Sched) {
        self.set_stall(StallReason::NotStalled);

        let queue_size = self.uop_queue.len() as u32;
        if queue_size == 0 {
            self.set_stall(StallReason::NoDecodeInsts);
            return;
        }

        let have_credits = if self.partial_rename {
            self.credits_dispatch.has_any()
        } else {
            // Full-group rename needs dispatch bandwidth for the whole group.
            self.credits_dispatch.available() >= queue_size
        };

        if have_credits {
            let (enough, stalled_rf) = self.enough_renames();
            if enough {
                let _ = sched.schedule_unique(SimEvent::RenameRun, 0, Phase::Tick);
            } else {
                self.set_stall(stalled_rf);
            }
        } else {
            self.set_stall(StallReason::NoDispatchCredits);
        }
    }

    /// Renames up to `num_to_rename` instructions and forwards them.
    pub fn rename_instructions(&mut self, scoreboards: &mut ScoreboardSet, sched: &mut Sched) {
        let mut num_to_rename = (self.uop_queue.len() as u32)
            .min(self.num_to_rename)
            .min(self.credits_dispatch.available());
        assert!(
            num_to_rename > 0,
            "rename session scheduled without credits or instructions"
        );

        let mut group: InstGroup = Vec::new();
        while num_to_rename != 0 {
            if self.partial_rename {
                let (enough, stalled_rf) = self.enough_renames();
                if !enough {
                    self.set_stall(stalled_rf);
                    break;
                }
            }

            let inst = self.uop_queue.pop_front().expect("bounded by queue size");
            debug!(inst = %inst.borrow(), "renaming");
            self.rename_sources(&inst);
            self.rename_dests(&inst, scoreboards);
            inst.borrow_mut().set_status(InstStatus::Renamed);

            if inst.borrow().class == crate::core::inst::InstClass::Vset {
                let _ = sched.schedule(SimEvent::VsetCleared(inst.clone()), 1, Phase::Update);
            }

            group.push(inst.clone());
            self.inst_queue.push_back(inst);
            self.stats.insts_renamed += 1;

            if self.partial_rename && !self.uop_queue.is_empty() {
                self.update_regcount();
            }
            num_to_rename -= 1;
        }

        if !self.partial_rename {
            assert!(
                num_to_rename == 0,
                "full-group rename left instructions behind"
            );
        }

        if !group.is_empty() {
            let num_renamed = group.len() as u32;
            let _ = sched.schedule(SimEvent::DispatchInsts(group), 1, Phase::Update);
            self.credits_dispatch.consume(num_renamed);
            let _ = sched.schedule(SimEvent::RenameCredits(num_renamed), 0, Phase::Update);
            self.stats.rename_histogram[num_renamed as usize] += 1;
        }

        if self.credits_dispatch.has_any() && !self.uop_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::RenameSchedule, 1, Phase::Tick);
        } else if !self.credits_dispatch.has_any() {
            self.set_stall(StallReason::NoDispatchCredits);
        } else {
            self.set_stall(StallReason::NoDecodeInsts);
        }

        self.update_regcount();
    }

    fn rename_sources(&mut self, inst: &InstPtr) {
        let mut i = inst.borrow_mut();
        let srcs = i.srcs.clone();
        let is_load_store = i.is_load_store();
        for src in srcs {
            let rf = src.reg_file;
            let arch = src.field_value;
            let is_rs2 = src.field_id == OperandField::Rs2;
            let is_rs3 = src.field_id == OperandField::Rs3;

            if src.is_x0 {
                // x0 as a store-data operand still lands in the data-reg
                // slot so the LSU can consult the scoreboard (always ready).
                if is_rs2 {
                    i.rename_data.set_data_reg(DataReg {
                        phys: arch,
                        op_info: src,
                        is_x0: true,
                    });
                }
                continue;
            }

            let prf = self.map_table[rf.index()][arch as usize];

            if is_load_store
                && self.components[rf.index()].reference_counter[prf as usize].producer_is_load
            {
                i.load_producer = true;
                debug!(uid = i.unique_id, "load/store has a load producer");
            }

            // The store's data operand is tracked apart from the address
            // sources.
            if (is_rs2 || is_rs3) && is_load_store {
                i.rename_data.set_data_reg(DataReg {
                    phys: prf,
                    op_info: src,
                    is_x0: false,
                });
                continue;
            }

            debug!(%rf, arch, prf, "source rename");
            i.rename_data.add_source(RenamedReg {
                phys: prf,
                op_info: src,
                prev_dest: None,
            });
        }
    }

    fn rename_dests(&mut self, inst: &InstPtr, scoreboards: &mut ScoreboardSet) {
        let dests = inst.borrow().dests.clone();
        for dest in dests {
            if dest.is_x0 {
                continue;
            }
            let rf = dest.reg_file;
            let idx = rf.index();
            let arch = dest.field_value;

            assert!(
                !self.components[idx].freelist.is_empty(),
                "freelist should never be empty at this point"
            );

            let mut update_scoreboard = true;
            let mut prf = None;

            if self.enable_move_elimination && inst.borrow().is_move {
                let i = inst.borrow();
                let src_list = i.rename_data.sources(rf);
                // FP shorthand moves (fsgnj rd, rs, rs) carry two sources
                // that must name the same register.
                if src_list.len() > 1 {
                    assert!(
                        src_list[0].phys == src_list[1].phys,
                        "move with two inequivalent sources: {}",
                        i.mnemonic
                    );
                }
                // Cross-register-file moves leave this file's source list
                // empty and cannot be eliminated.
                if let Some(src) = src_list.first() {
                    prf = Some(src.phys);
                    update_scoreboard = false;
                }
            }
            let move_eliminated = prf.is_some();
            if move_eliminated {
                inst.borrow_mut().retire_at_rename = true;
                self.stats.move_eliminations += 1;
                debug!(arch, prf = prf.unwrap_or(0), "move elimination");
            }

            let prf = match prf {
                Some(p) => p,
                None => self.components[idx]
                    .freelist
                    .pop_front()
                    .expect("freelist checked non-empty"),
            };

            let prev_dest = self.map_table[idx][arch as usize];
            self.map_table[idx][arch as usize] = prf;

            // The destination claims the physical register; when the count
            // drops to zero it is no longer the live mapping for any
            // architectural register and goes back on the free list.
            {
                let entry = &mut self.components[idx].reference_counter[prf as usize];
                entry.cnt += 1;
                entry.producer_id = inst.borrow().unique_id;
                entry.producer = std::rc::Rc::downgrade(inst);
                entry.producer_is_load = inst.borrow().is_load();
            }

            inst.borrow_mut().rename_data.add_dest(RenamedReg {
                phys: prf,
                op_info: dest,
                prev_dest: Some(prev_dest),
            });

            if update_scoreboard {
                let mut mask = RegisterBitMask::default();
                mask.set(prf);
                scoreboards.get_mut(rf).clear_bits(&mask);
            }
        }
    }

    /// Retirement ack from the ROB: reclaim previous destination mappings.
    pub fn get_ack_from_rob(&mut self, group: &InstGroup, sched: &mut Sched) {
        for inst in group {
            assert!(
                inst.borrow().status() == InstStatus::Retired,
                "ROB ack for an instruction that has not retired: {}",
                inst.borrow()
            );
            debug!(inst = %inst.borrow(), "reclaiming at retire");

            for rf in RegFile::ALL {
                let dests: Vec<RenamedReg> =
                    inst.borrow().rename_data.dests(rf).to_vec();
                for dest in dests {
                    self.reclaim(inst, &dest);
                }
            }

            assert!(
                !self.inst_queue.is_empty(),
                "ROB and rename inst queue out of sync"
            );
            let oldest = self.inst_queue.front().expect("checked non-empty");
            assert!(
                oldest.borrow().unique_id == inst.borrow().unique_id
                    && oldest.borrow().uop_id == inst.borrow().uop_id,
                "ROB and rename inst queue out of sync"
            );
            let _ = self.inst_queue.pop_front();
        }

        debug_assert!(self.freelists_are_duplicate_free());

        if self.credits_dispatch.has_any() && !self.uop_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::RenameSchedule, 0, Phase::Tick);
        }
    }

    fn reclaim(&mut self, inst: &InstPtr, dest: &RenamedReg) {
        if dest.op_info.is_x0 {
            return;
        }
        let prev_dest = dest
            .prev_dest
            .expect("renamed destination without a previous mapping");
        let idx = dest.op_info.reg_file.index();
        let entry = &mut self.components[idx].reference_counter[prev_dest as usize];
        assert!(
            entry.cnt != 0,
            "reclaim found a zero reference count for {}",
            inst.borrow()
        );
        entry.cnt -= 1;
        // The architectural register has a newer mapping; once nothing
        // references the previous physical register it is free.
        if entry.cnt == 0 {
            self.components[idx].freelist.push_back(prev_dest);
        }
    }

    /// Flush: walk the in-flight queue newest-to-oldest, restoring the map
    /// table, reference counts and free lists for covered instructions.
    pub fn handle_flush(&mut self, criteria: &FlushingCriteria, sched: &mut Sched) {
        debug!(%criteria, "rename flush");

        while let Some(newest) = self.inst_queue.back() {
            if !criteria.included_in_flush(newest) {
                break;
            }
            let inst = self.inst_queue.pop_back().expect("back exists");
            debug!(inst = %inst.borrow(), "restoring rename state");
            inst.borrow_mut().is_flushed = true;

            for rf in RegFile::ALL {
                let idx = rf.index();
                let dests: Vec<RenamedReg> =
                    inst.borrow().rename_data.dests(rf).to_vec();
                for dest in dests {
                    if dest.op_info.is_x0 {
                        continue;
                    }
                    let prev = dest
                        .prev_dest
                        .expect("renamed destination without a previous mapping");
                    self.map_table[idx][dest.op_info.field_value as usize] = prev;

                    let entry =
                        &mut self.components[idx].reference_counter[dest.phys as usize];
                    assert!(
                        entry.cnt != 0,
                        "flush reclaim found a zero reference count for {}",
                        inst.borrow()
                    );
                    entry.cnt -= 1;
                    if entry.cnt == 0 {
                        self.components[idx].freelist.push_back(dest.phys);
                    }
                }
                inst.borrow_mut().rename_data.clear(rf);
            }
        }

        self.set_stall(StallReason::NoDecodeInsts);
        if !self.uop_queue.is_empty() {
            let dropped = self.uop_queue.len() as u32;
            for inst in &self.uop_queue {
                inst.borrow_mut().is_flushed = true;
            }
            self.uop_queue.clear();
            let _ = sched.schedule(SimEvent::RenameCredits(dropped), 0, Phase::Update);
        }
        self.update_regcount();
    }

    /// Free-list duplicate check (debug builds).
    pub fn freelists_are_duplicate_free(&self) -> bool {
        for component in &self.components {
            let mut seen: Vec<u32> = component.freelist.iter().copied().collect();
            seen.sort_unstable();
            if seen.windows(2).any(|w| w[0] == w[1]) {
                return false;
            }
        }
        true
    }

    // ---- introspection for tests and debug dumps ----

    /// The live physical register for an architectural register.
    pub fn mapping(&self, rf: RegFile, arch: u32) -> u32 {
        self.map_table[rf.index()][arch as usize]
    }

    /// Reference count of a physical register.
    pub fn ref_count(&self, rf: RegFile, phys: u32) -> u32 {
        self.components[rf.index()].reference_counter[phys as usize].cnt
    }

    /// The reference-count entry of a physical register.
    pub fn ref_entry(&self, rf: RegFile, phys: u32) -> &RefEntry {
        &self.components[rf.index()].reference_counter[phys as usize]
    }

    /// Current free-list size.
    pub fn freelist_size(&self, rf: RegFile) -> usize {
        self.components[rf.index()].freelist.len()
    }

    /// In-flight (renamed, unretired) instruction count.
    pub fn inflight_len(&self) -> usize {
        self.inst_queue.len()
    }

    /// In-flight instruction ids, oldest first (test visibility).
    pub fn inflight_ids(&self) -> Vec<u64> {
        self.inst_queue
            .iter()
            .map(|inst| inst.borrow().unique_id)
            .collect()
    }

    /// Debug dump used by the lockup report.
    pub fn dump_debug_content(&self, output: &mut String) {
        output.push_str("Rename Contents\n");
        output.push_str(&format!(
            "\tcurrent stall: {:?}\n\tdisp credits: {}\n\tUop Queue\n",
            self.current_stall,
            self.credits_dispatch.available()
        ));
        for inst in &self.uop_queue {
            output.push_str(&format!("\t\t{}\n", inst.borrow()));
        }
        output.push_str("\toutstanding insts (waiting for retire)\n");
        for inst in &self.inst_queue {
            output.push_str(&format!("\t\t{}\n", inst.borrow()));
        }
    }
}
