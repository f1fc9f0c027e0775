//! Execution pipes for ALU, FPU and branch instructions.
//!
//! Each pipe is a fixed-latency issue queue: an instruction arrives from
//! Dispatch, completes `latency` cycles later, sets its destination
//! scoreboard bits ready and refunds the dispatch credit. The branch pipe
//! additionally resolves the predicted direction against the trace's
//! ground truth and raises a MISPREDICTION flush on disagreement.

use tracing::debug;

use crate::common::types::RegFile;
use crate::core::flush::{FlushCause, FlushingCriteria};
use crate::core::inst::{InstPtr, InstStatus, TargetUnit};
use crate::core::scoreboard::ScoreboardSet;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::scheduler::Phase;

/// Per-pipe statistics.
#[derive(Debug, Default)]
pub struct ExecStats {
    /// Instructions executed.
    pub insts_executed: u64,
    /// Branches resolved (branch pipe only).
    pub branches_resolved: u64,
    /// Mispredictions raised (branch pipe only).
    pub mispredicts: u64,
}

/// A fixed-latency execution pipe.
pub struct ExecPipe {
    unit: TargetUnit,
    latency: u64,
    queue_size: u32,
    occupancy: u32,
    /// Counters.
    pub stats: ExecStats,
}

impl ExecPipe {
    /// Builds a pipe for one target unit.
    pub fn new(unit: TargetUnit, queue_size: u32, latency: u64) -> Self {
        assert!(
            matches!(unit, TargetUnit::Alu | TargetUnit::Fpu | TargetUnit::Br),
            "execution pipes serve ALU/FPU/BR only"
        );
        Self {
            unit,
            latency,
            queue_size,
            occupancy: 0,
            stats: ExecStats::default(),
        }
    }

    /// Startup: grant issue-queue credits to Dispatch.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::ExecCredits(self.unit, self.queue_size),
            0,
            Phase::Update,
        );
    }

    /// An instruction arrived from Dispatch.
    pub fn receive_inst(&mut self, inst: InstPtr, sched: &mut Sched) {
        assert!(
            self.occupancy < self.queue_size,
            "{} pipe overflow",
            self.unit
        );
        self.occupancy += 1;
        if !inst.borrow().is_flushed {
            inst.borrow_mut().set_status(InstStatus::Scheduled);
        }
        let _ = sched.schedule(
            SimEvent::ExecComplete(self.unit, inst),
            self.latency,
            Phase::Tick,
        );
    }

    /// Latency elapsed: complete the instruction.
    pub fn complete(
        &mut self,
        inst: &InstPtr,
        scoreboards: &mut ScoreboardSet,
        sched: &mut Sched,
    ) {
        self.occupancy = self.occupancy.saturating_sub(1);
        let _ = sched.schedule(SimEvent::ExecCredits(self.unit, 1), 0, Phase::Update);

        if inst.borrow().is_flushed {
            return;
        }

        for rf in RegFile::ALL {
            let mask = inst.borrow().dest_reg_mask(rf);
            if !mask.is_empty() {
                scoreboards.get_mut(rf).set_ready(&mask, sched);
            }
        }

        self.stats.insts_executed += 1;
        if self.unit == TargetUnit::Br {
            self.resolve_branch(inst, sched);
        }
        crate::core::complete_inst(inst, sched);
    }

    fn resolve_branch(&mut self, inst: &InstPtr, sched: &mut Sched) {
        let (predicted, actual) = {
            let i = inst.borrow();
            (i.predicted_taken.unwrap_or(false), i.is_taken)
        };
        self.stats.branches_resolved += 1;
        if predicted != actual {
            self.stats.mispredicts += 1;
            debug!(inst = %inst.borrow(), predicted, actual, "branch mispredicted");
            let criteria = FlushingCriteria::new(FlushCause::Misprediction, inst.clone());
            let _ = sched.schedule(SimEvent::FlushRequest(criteria), 0, Phase::Tick);
        }
    }

    /// Occupancy (test visibility).
    pub fn occupancy(&self) -> u32 {
        self.occupancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::RegisterBitMask;
    use crate::core::inst::{Inst, InstClass, OpInfo, OperandField, RenamedReg};

    fn alu_inst(uid: u64, dest_phys: u32) -> InstPtr {
        let mut i = Inst::new("add", InstClass::Alu);
        i.unique_id = uid;
        i.set_status(InstStatus::Dispatched);
        i.rename_data.add_dest(RenamedReg {
            phys: dest_phys,
            op_info: OpInfo {
                reg_file: RegFile::Integer,
                field_id: OperandField::Rd,
                field_value: 5,
                is_x0: false,
            },
            prev_dest: Some(5),
        });
        i.into_ptr()
    }

    #[test]
    fn test_completion_sets_dest_ready_and_refunds() {
        let mut pipe = ExecPipe::new(TargetUnit::Alu, 4, 2);
        let mut sched = Sched::new();
        let mut scoreboards = ScoreboardSet::new();
        let mut busy = RegisterBitMask::default();
        busy.set(40);
        scoreboards.get_mut(RegFile::Integer).clear_bits(&busy);

        let inst = alu_inst(1, 40);
        pipe.receive_inst(inst.clone(), &mut sched);
        assert_eq!(pipe.occupancy(), 1);

        pipe.complete(&inst, &mut scoreboards, &mut sched);
        assert_eq!(inst.borrow().status(), InstStatus::Completed);
        assert!(scoreboards.get(RegFile::Integer).is_set(&busy));
        assert_eq!(pipe.occupancy(), 0);

        let mut refunded = 0;
        while let Some((_, ev)) = sched.pop() {
            if let SimEvent::ExecCredits(TargetUnit::Alu, n) = ev {
                refunded += n;
            }
        }
        assert_eq!(refunded, 1);
    }

    #[test]
    fn test_branch_mispredict_raises_flush() {
        let mut pipe = ExecPipe::new(TargetUnit::Br, 4, 1);
        let mut sched = Sched::new();
        let mut scoreboards = ScoreboardSet::new();

        let mut i = Inst::new("beq", InstClass::Branch);
        i.unique_id = 3;
        i.set_status(InstStatus::Dispatched);
        i.is_taken = true;
        i.predicted_taken = Some(false);
        let inst = i.into_ptr();

        pipe.receive_inst(inst.clone(), &mut sched);
        pipe.complete(&inst, &mut scoreboards, &mut sched);
        assert_eq!(pipe.stats.mispredicts, 1);

        let mut saw_flush = false;
        while let Some((_, ev)) = sched.pop() {
            if let SimEvent::FlushRequest(criteria) = ev {
                assert_eq!(criteria.cause(), FlushCause::Misprediction);
                assert!(!criteria.is_inclusive());
                saw_flush = true;
            }
        }
        assert!(saw_flush);
    }

    #[test]
    fn test_correct_prediction_is_quiet() {
        let mut pipe = ExecPipe::new(TargetUnit::Br, 4, 1);
        let mut sched = Sched::new();
        let mut scoreboards = ScoreboardSet::new();

        let mut i = Inst::new("beq", InstClass::Branch);
        i.set_status(InstStatus::Dispatched);
        i.is_taken = true;
        i.predicted_taken = Some(true);
        let inst = i.into_ptr();

        pipe.receive_inst(inst.clone(), &mut sched);
        pipe.complete(&inst, &mut scoreboards, &mut sched);
        assert_eq!(pipe.stats.mispredicts, 0);
        assert_eq!(pipe.stats.branches_resolved, 1);
    }

    #[test]
    fn test_flushed_inst_refunds_without_completing() {
        let mut pipe = ExecPipe::new(TargetUnit::Alu, 4, 1);
        let mut sched = Sched::new();
        let mut scoreboards = ScoreboardSet::new();

        let inst = alu_inst(1, 41);
        pipe.receive_inst(inst.clone(), &mut sched);
        inst.borrow_mut().is_flushed = true;
        pipe.complete(&inst, &mut scoreboards, &mut sched);

        assert_ne!(inst.borrow().status(), InstStatus::Completed);
        let mut refunded = 0;
        while let Some((_, ev)) = sched.pop() {
            if let SimEvent::ExecCredits(_, n) = ev {
                refunded += n;
            }
        }
        assert_eq!(refunded, 1);
        assert_eq!(pipe.stats.insts_executed, 0);
    }
}
