//! Dispatch: credit-bounded routing to execution units.
//!
//! One dispatcher per execution unit carries that unit's credit count and
//! a per-cycle bandwidth of one instruction; the bandwidth resets at the
//! start of every dispatch cycle. Instructions route strictly in order —
//! running out of credits on the target unit stalls dispatch without
//! reordering. Dispatched instructions also claim a ROB slot and are
//! appended to the ROB as a group.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::common::types::RegFile;
use crate::config::DispatchConfig;
use crate::core::flush::FlushingCriteria;
use crate::core::inst::{InstGroup, InstPtr, InstStatus, TargetUnit};
use crate::core::scoreboard::ScoreboardSet;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

/// Connects Dispatch to one execution unit: credits plus a one-instruction
/// per-cycle bandwidth.
pub struct Dispatcher {
    unit: TargetUnit,
    credits: Credits,
    num_can_dispatch: u32,
}

impl Dispatcher {
    fn new(unit: TargetUnit) -> Self {
        Self {
            unit,
            credits: Credits::new(),
            num_can_dispatch: 1,
        }
    }

    /// Enough unit credits and remaining bandwidth this cycle?
    pub fn can_accept(&self) -> bool {
        self.credits.has_any() && self.num_can_dispatch != 0
    }

    /// Accepts one instruction, consuming a credit and the bandwidth.
    fn accept_inst(&mut self, inst: &InstPtr, sched: &mut Sched) {
        assert!(self.can_accept(), "dispatcher {} cannot accept", self.unit);
        debug!(unit = %self.unit, inst = %inst.borrow(), "dispatching");
        self.credits.consume(1);
        self.num_can_dispatch -= 1;
        let event = match self.unit {
            TargetUnit::Lsu => SimEvent::LsuInst(inst.clone()),
            unit => SimEvent::ExecInst(unit, inst.clone()),
        };
        let _ = sched.schedule(event, 1, Phase::Update);
    }

    /// Resets the per-cycle bandwidth.
    fn reset(&mut self) {
        self.num_can_dispatch = 1;
    }
}

/// Dispatch statistics.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Instructions dispatched.
    pub insts_dispatched: u64,
    /// Stall cycles per target unit.
    pub unit_stalls: HashMap<TargetUnit, u64>,
    /// Stall cycles for want of ROB credits.
    pub rob_stalls: u64,
}

/// The dispatch unit.
pub struct Dispatch {
    queue: VecDeque<InstPtr>,
    queue_depth: u32,
    dispatchers: Vec<Dispatcher>,
    rob_credits: Credits,
    /// Counters.
    pub stats: DispatchStats,
}

impl Dispatch {
    /// Builds Dispatch and its per-unit dispatchers.
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            queue_depth: config.dispatch_queue_depth,
            dispatchers: vec![
                Dispatcher::new(TargetUnit::Alu),
                Dispatcher::new(TargetUnit::Fpu),
                Dispatcher::new(TargetUnit::Br),
                Dispatcher::new(TargetUnit::Lsu),
            ],
            rob_credits: Credits::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Startup: grant queue credits to Rename.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(SimEvent::DispatchCredits(self.queue_depth), 0, Phase::Update);
    }

    /// A renamed group arrived.
    pub fn receive_insts(&mut self, group: InstGroup, sched: &mut Sched) {
        assert!(
            self.queue.len() + group.len() <= self.queue_depth as usize,
            "dispatch queue overflow"
        );
        for inst in group {
            self.queue.push_back(inst);
        }
        let _ = sched.schedule_unique(SimEvent::DispatchRun, 0, Phase::Tick);
    }

    /// An execution unit (or the LSU) refunded credits.
    pub fn receive_unit_credits(&mut self, unit: TargetUnit, credits: u32, sched: &mut Sched) {
        if let Some(d) = self.dispatchers.iter_mut().find(|d| d.unit == unit) {
            d.credits.add(credits);
        }
        if !self.queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::DispatchRun, 0, Phase::Tick);
        }
    }

    /// The ROB refunded slots.
    pub fn receive_rob_credits(&mut self, credits: u32, sched: &mut Sched) {
        self.rob_credits.add(credits);
        if !self.queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::DispatchRun, 0, Phase::Tick);
        }
    }

    /// Routes queued instructions in order until a credit runs out.
    pub fn dispatch_run(&mut self, scoreboards: &mut ScoreboardSet, sched: &mut Sched) {
        for d in &mut self.dispatchers {
            d.reset();
        }

        let mut to_rob: InstGroup = Vec::new();
        let mut dispatched_any = false;
        while let Some(front) = self.queue.front() {
            if !self.rob_credits.has_any() {
                self.stats.rob_stalls += 1;
                break;
            }
            let unit = front.borrow().target_unit();

            if unit == TargetUnit::Rob {
                // Completes right here; the ROB slot short-circuits it.
                let inst = self.queue.pop_front().expect("front exists");
                self.rob_credits.consume(1);
                inst.borrow_mut().set_status(InstStatus::Dispatched);
                // Its destinations are produced "immediately" — except for
                // eliminated moves, whose readiness tracks their source.
                if !inst.borrow().retire_at_rename {
                    for rf in RegFile::ALL {
                        let mask = inst.borrow().dest_reg_mask(rf);
                        if !mask.is_empty() {
                            scoreboards.get_mut(rf).set_ready(&mask, sched);
                        }
                    }
                }
                crate::core::complete_inst(&inst, sched);
                to_rob.push(inst);
                self.stats.insts_dispatched += 1;
                dispatched_any = true;
                continue;
            }

            let dispatcher = self
                .dispatchers
                .iter_mut()
                .find(|d| d.unit == unit)
                .expect("every target unit has a dispatcher");
            if !dispatcher.can_accept() {
                *self.stats.unit_stalls.entry(unit).or_insert(0) += 1;
                break;
            }

            let inst = self.queue.pop_front().expect("front exists");
            self.rob_credits.consume(1);
            inst.borrow_mut().set_status(InstStatus::Dispatched);
            dispatcher.accept_inst(&inst, sched);
            to_rob.push(inst);
            self.stats.insts_dispatched += 1;
            dispatched_any = true;
        }

        if !to_rob.is_empty() {
            let refund = to_rob.len() as u32;
            let _ = sched.schedule(SimEvent::RobInsts(to_rob), 1, Phase::Update);
            let _ = sched.schedule(SimEvent::DispatchCredits(refund), 0, Phase::Update);
        }
        if dispatched_any && !self.queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::DispatchRun, 1, Phase::Tick);
        }
    }

    /// Flush: drop covered instructions and refund Rename credits.
    ///
    /// Groups already on a wire deliver on the Update phase before the
    /// flush arrives and are removed by the receiving unit, keeping every
    /// edge's credit accounting intact.
    pub fn handle_flush(&mut self, criteria: &FlushingCriteria, sched: &mut Sched) {
        let before = self.queue.len();
        self.queue.retain(|inst| {
            let covered = criteria.included_in_flush(inst);
            if covered {
                inst.borrow_mut().is_flushed = true;
            }
            !covered
        });
        let dropped = (before - self.queue.len()) as u32;
        if dropped > 0 {
            let _ = sched.schedule(SimEvent::DispatchCredits(dropped), 0, Phase::Update);
        }
    }

    /// Queue occupancy (test visibility).
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inst::{Inst, InstClass};
    use crate::sim::event::Sched;

    fn inst(uid: u64, class: InstClass) -> InstPtr {
        let mut i = Inst::new("test", class);
        i.unique_id = uid;
        i.set_status(InstStatus::Renamed);
        i.into_ptr()
    }

    fn ready_dispatch(sched: &mut Sched) -> Dispatch {
        let mut dispatch = Dispatch::new(&DispatchConfig::default());
        dispatch.receive_rob_credits(8, sched);
        dispatch.receive_unit_credits(TargetUnit::Alu, 4, sched);
        dispatch.receive_unit_credits(TargetUnit::Lsu, 4, sched);
        dispatch
    }

    fn drain(sched: &mut Sched) -> (u32, u32, u32) {
        let (mut exec, mut lsu, mut rob) = (0, 0, 0);
        while let Some((_, ev)) = sched.pop() {
            match ev {
                SimEvent::ExecInst(..) => exec += 1,
                SimEvent::LsuInst(_) => lsu += 1,
                SimEvent::RobInsts(group) => rob += group.len() as u32,
                _ => {}
            }
        }
        (exec, lsu, rob)
    }

    #[test]
    fn test_routes_by_target_unit() {
        let mut sched = Sched::new();
        let mut dispatch = ready_dispatch(&mut sched);
        dispatch.receive_insts(
            vec![inst(1, InstClass::Alu), inst(2, InstClass::Load)],
            &mut sched,
        );
        dispatch.dispatch_run(&mut ScoreboardSet::new(), &mut sched);
        let (exec, lsu, rob) = drain(&mut sched);
        assert_eq!(exec, 1);
        assert_eq!(lsu, 1);
        assert_eq!(rob, 2);
    }

    #[test]
    fn test_bandwidth_is_one_per_unit_per_cycle() {
        let mut sched = Sched::new();
        let mut dispatch = ready_dispatch(&mut sched);
        dispatch.receive_insts(
            vec![inst(1, InstClass::Alu), inst(2, InstClass::Alu)],
            &mut sched,
        );
        dispatch.dispatch_run(&mut ScoreboardSet::new(), &mut sched);
        // The second ALU op waits for the next cycle's bandwidth.
        assert_eq!(dispatch.queue_len(), 1);
        dispatch.dispatch_run(&mut ScoreboardSet::new(), &mut sched);
        assert_eq!(dispatch.queue_len(), 0);
    }

    #[test]
    fn test_out_of_unit_credits_stalls_in_order() {
        let mut sched = Sched::new();
        let mut dispatch = Dispatch::new(&DispatchConfig::default());
        dispatch.receive_rob_credits(8, &mut sched);
        // No LSU credits: the load blocks the younger ALU op too.
        dispatch.receive_unit_credits(TargetUnit::Alu, 4, &mut sched);
        dispatch.receive_insts(
            vec![inst(1, InstClass::Load), inst(2, InstClass::Alu)],
            &mut sched,
        );
        dispatch.dispatch_run(&mut ScoreboardSet::new(), &mut sched);
        assert_eq!(dispatch.queue_len(), 2);
        assert_eq!(*dispatch.stats.unit_stalls.get(&TargetUnit::Lsu).unwrap(), 1);

        dispatch.receive_unit_credits(TargetUnit::Lsu, 1, &mut sched);
        dispatch.dispatch_run(&mut ScoreboardSet::new(), &mut sched);
        assert_eq!(dispatch.queue_len(), 0);
    }

    #[test]
    fn test_rob_target_completes_at_dispatch() {
        let mut sched = Sched::new();
        let mut dispatch = ready_dispatch(&mut sched);
        let fence = inst(1, InstClass::System);
        dispatch.receive_insts(vec![fence.clone()], &mut sched);
        dispatch.dispatch_run(&mut ScoreboardSet::new(), &mut sched);
        assert_eq!(fence.borrow().status(), InstStatus::Completed);
        let (exec, lsu, rob) = drain(&mut sched);
        assert_eq!((exec, lsu, rob), (0, 0, 1));
    }

    #[test]
    fn test_flush_drops_and_refunds() {
        let mut sched = Sched::new();
        let mut dispatch = Dispatch::new(&DispatchConfig::default());
        let a = inst(1, InstClass::Alu);
        dispatch.receive_insts(vec![a.clone(), inst(2, InstClass::Alu)], &mut sched);
        while sched.pop().is_some() {}

        let criteria = crate::core::flush::FlushingCriteria::new(
            crate::core::flush::FlushCause::Misprediction,
            a,
        );
        dispatch.handle_flush(&criteria, &mut sched);
        assert_eq!(dispatch.queue_len(), 1);
        let mut refunded = 0;
        while let Some((_, ev)) = sched.pop() {
            if let SimEvent::DispatchCredits(n) = ev {
                refunded += n;
            }
        }
        assert_eq!(refunded, 1);
    }
}
