//! Reorder buffer: in-order retirement.
//!
//! Instructions arrive in dispatch order and retire from the head, up to
//! `num_to_retire` per cycle, each requiring COMPLETED status and no
//! speculative mark. Retired groups fan out to Rename (reference-count
//! reclaim) and — for stores — to the LSU. Retiring a system instruction
//! raises a POST_SYNC flush with the fetch stream redirected past it. A
//! forward-progress watchdog turns prolonged silence into a fatal lockup.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::RobConfig;
use crate::core::fetch::bpu::UpdateInput;
use crate::core::flush::{FlushCause, FlushingCriteria};
use crate::core::inst::{InstClass, InstGroup, InstPtr, InstStatus};
use crate::sim::event::{Sched, SimEvent};
use crate::sim::scheduler::{Cycle, Phase};

/// ROB statistics.
#[derive(Debug, Default)]
pub struct RobStats {
    /// Total uops retired.
    pub num_retired: u64,
    /// Total program instructions retired (last uop of each).
    pub num_insts_retired: u64,
    /// Flushes instigated by retirement.
    pub num_flushes: u64,
}

/// The reorder buffer unit.
pub struct Rob {
    reorder_buffer: VecDeque<InstPtr>,
    depth: u32,
    num_to_retire: u32,
    num_insts_to_retire: u64,
    retire_heartbeat: u64,
    retire_timeout_interval: u64,

    last_retirement: Cycle,
    period_retired: u64,
    period_start_cycle: Cycle,
    /// Set when the retire limit stopped the run.
    pub stopped_simulation: bool,

    /// Counters.
    pub stats: RobStats,
}

impl Rob {
    /// Builds the ROB from configuration.
    pub fn new(config: &RobConfig) -> Self {
        Self {
            reorder_buffer: VecDeque::new(),
            depth: config.retire_queue_depth,
            num_to_retire: config.num_to_retire,
            num_insts_to_retire: config.num_insts_to_retire,
            retire_heartbeat: config.retire_heartbeat,
            retire_timeout_interval: config.retire_timeout_interval,
            last_retirement: 0,
            period_retired: 0,
            period_start_cycle: 0,
            stopped_simulation: false,
            stats: RobStats::default(),
        }
    }

    /// Startup: grant slots to Dispatch and arm the watchdog.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(SimEvent::RobCredits(self.depth), 0, Phase::Update);
        let _ = sched.schedule_non_continuing(
            SimEvent::RobForwardProgress,
            self.retire_timeout_interval,
            Phase::PostTick,
        );
    }

    /// A dispatched group arrived.
    pub fn rob_appended(&mut self, group: InstGroup, sched: &mut Sched) {
        for inst in group {
            debug!(inst = %inst.borrow(), "retire appended");
            assert!(
                (self.reorder_buffer.len() as u32) < self.depth,
                "reorder buffer overflows"
            );
            self.reorder_buffer.push_back(inst);
        }
        let _ = sched.schedule_unique(SimEvent::RobRetire, 1, Phase::Tick);
    }

    /// Retires up to `num_to_retire` completed instructions from the head.
    pub fn retire_instructions(&mut self, sched: &mut Sched) {
        let num_to_retire =
            (self.reorder_buffer.len() as u32).min(self.num_to_retire);
        debug!(num_to_retire, "retire event");

        let mut retired_this_cycle = 0;
        let mut ack_group: InstGroup = Vec::new();
        for _ in 0..num_to_retire {
            let head = self.reorder_buffer.front().expect("bounded by len").clone();
            assert!(
                !head.borrow().is_speculative,
                "a speculative instruction is being retired: {}",
                head.borrow()
            );
            if head.borrow().status() != InstStatus::Completed {
                break;
            }

            head.borrow_mut().set_status(InstStatus::Retired);
            let _ = self.reorder_buffer.pop_front();
            retired_this_cycle += 1;
            self.stats.num_retired += 1;
            self.period_retired += 1;
            if head.borrow().is_last_uop {
                self.stats.num_insts_retired += 1;
            }
            debug!(inst = %head.borrow(), "retiring");

            if head.borrow().is_store() {
                let _ = sched.schedule(SimEvent::RobRetireAckLsu(head.clone()), 1, Phase::Update);
            }
            if head.borrow().is_branch() {
                let (pc, taken, target) = {
                    let i = head.borrow();
                    (i.pc, i.is_taken, i.target_vaddr)
                };
                let _ = sched.schedule(
                    SimEvent::BpuUpdate(UpdateInput { pc, taken, target }),
                    1,
                    Phase::Update,
                );
                let _ = sched.schedule(SimEvent::FtqBranchCommit(pc), 1, Phase::Update);
            }
            ack_group.push(head.clone());

            if self.retire_heartbeat > 0 && self.stats.num_retired % self.retire_heartbeat == 0 {
                let now = sched.now().max(1);
                let period_cycles = (now - self.period_start_cycle).max(1);
                println!(
                    "rvperf: Retired {} instructions in {} cycles.  Period IPC: {:.3} overall IPC: {:.3}",
                    self.stats.num_retired,
                    now,
                    self.period_retired as f64 / period_cycles as f64,
                    self.stats.num_retired as f64 / now as f64,
                );
                self.period_retired = 0;
                self.period_start_cycle = now;
            }

            // -i style retire limit.
            if self.num_insts_to_retire != 0
                && self.stats.num_retired >= self.num_insts_to_retire
            {
                self.stopped_simulation = true;
                sched.stop_running();
                break;
            }

            // System instructions force a post-retirement resynchronisation.
            if head.borrow().class == InstClass::System {
                debug!(inst = %head.borrow(), "instigating flush");
                self.stats.num_flushes += 1;
                let criteria = FlushingCriteria::new(FlushCause::PostSync, head.clone());
                let _ = sched.schedule(SimEvent::FlushRequest(criteria), 0, Phase::Tick);
                break;
            }
        }

        if !ack_group.is_empty() {
            let _ = sched.schedule(SimEvent::RobRetireAckRename(ack_group), 1, Phase::Update);
        }

        if let Some(oldest) = self.reorder_buffer.front() {
            if oldest.borrow().status() == InstStatus::Completed {
                let _ = sched.schedule_unique(SimEvent::RobRetire, 1, Phase::Tick);
            } else if !oldest.borrow().marked_oldest {
                // Arm the wake-up: whoever completes this instruction will
                // schedule the retire event.
                debug!(inst = %oldest.borrow(), "set oldest");
                oldest.borrow_mut().marked_oldest = true;
            }
        }

        if retired_this_cycle != 0 {
            let _ = sched.schedule(SimEvent::RobCredits(retired_this_cycle), 0, Phase::Update);
            self.last_retirement = sched.now();
        }
    }

    /// Flush: drop covered instructions and refund Dispatch slots.
    pub fn handle_flush(&mut self, criteria: &FlushingCriteria, sched: &mut Sched) {
        let before = self.reorder_buffer.len();
        self.reorder_buffer.retain(|inst| {
            let covered = criteria.included_in_flush(inst);
            if covered {
                inst.borrow_mut().is_flushed = true;
            }
            !covered
        });
        let dropped = (before - self.reorder_buffer.len()) as u32;
        if dropped > 0 {
            let _ = sched.schedule(SimEvent::RobCredits(dropped), 0, Phase::Update);
        }
    }

    /// Watchdog: true when the pipe has locked up. Re-arms itself.
    pub fn check_forward_progress(&mut self, sched: &mut Sched) -> bool {
        if !self.reorder_buffer.is_empty()
            && sched.now() - self.last_retirement >= self.retire_timeout_interval
        {
            return true;
        }
        let _ = sched.schedule_non_continuing(
            SimEvent::RobForwardProgress,
            self.retire_timeout_interval,
            Phase::PostTick,
        );
        false
    }

    /// Cycles since the last retirement.
    pub fn cycles_since_retirement(&self, now: Cycle) -> u64 {
        now - self.last_retirement
    }

    /// Occupancy.
    pub fn len(&self) -> usize {
        self.reorder_buffer.len()
    }

    /// True when drained.
    pub fn is_empty(&self) -> bool {
        self.reorder_buffer.is_empty()
    }

    /// Debug dump used by the lockup report.
    pub fn dump_debug_content(&self, output: &mut String) {
        output.push_str("ROB Contents\n");
        for entry in &self.reorder_buffer {
            output.push_str(&format!("\t{}\n", entry.borrow()));
        }
    }
}
