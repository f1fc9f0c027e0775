//! Physical-register scoreboards.
//!
//! One scoreboard per register file tracks which physical registers hold
//! ready values. Rename clears a destination's bit at allocation; whoever
//! completes the producing instruction sets it ready again. Consumers
//! register ready-callbacks: a wake event fired through the scheduler once
//! every bit of the requested mask is set.

use crate::common::types::{RegFile, RegisterBitMask, NUM_ARCH_REGS, NUM_REG_FILES};
use crate::sim::event::{Sched, SimEvent};
use crate::sim::scheduler::Phase;

struct ReadyCallback {
    mask: RegisterBitMask,
    uid: u64,
    event: SimEvent,
}

/// Readiness view over one physical register file.
pub struct Scoreboard {
    ready: RegisterBitMask,
    callbacks: Vec<ReadyCallback>,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Scoreboard {
    /// Creates a scoreboard with the initial architectural mappings ready.
    pub fn new() -> Self {
        let mut ready = RegisterBitMask::default();
        for reg in 0..NUM_ARCH_REGS {
            ready.set(reg);
        }
        Self {
            ready,
            callbacks: Vec::new(),
        }
    }

    /// True when every register in `mask` is ready.
    pub fn is_set(&self, mask: &RegisterBitMask) -> bool {
        self.ready.is_superset_of(mask)
    }

    /// Marks registers ready without waking anyone (reset-time setup).
    pub fn set(&mut self, mask: &RegisterBitMask) {
        self.ready = self.ready.union(mask);
    }

    /// Clears registers (a new producer now owns them).
    pub fn clear_bits(&mut self, mask: &RegisterBitMask) {
        for reg in 0..crate::common::types::MAX_PHYS_REGS {
            if mask.contains(reg) {
                self.ready.clear(reg);
            }
        }
    }

    /// Marks registers ready and wakes every callback whose mask is now
    /// fully satisfied.
    pub fn set_ready(&mut self, mask: &RegisterBitMask, sched: &mut Sched) {
        self.ready = self.ready.union(mask);

        let mut fired = Vec::new();
        let ready = self.ready;
        self.callbacks.retain(|cb| {
            if ready.is_superset_of(&cb.mask) {
                fired.push(cb.event.clone());
                false
            } else {
                true
            }
        });
        for event in fired {
            let _ = sched.schedule(event, 0, Phase::Tick);
        }
    }

    /// Registers a wake event for when `mask` becomes fully ready.
    /// Fires immediately if it already is.
    pub fn register_ready_callback(
        &mut self,
        mask: RegisterBitMask,
        uid: u64,
        event: SimEvent,
        sched: &mut Sched,
    ) {
        if self.ready.is_superset_of(&mask) {
            let _ = sched.schedule(event, 0, Phase::Tick);
            return;
        }
        self.callbacks.push(ReadyCallback { mask, uid, event });
    }

    /// Drops every callback registered by the given instruction (flush).
    pub fn clear_callbacks(&mut self, uid: u64) {
        self.callbacks.retain(|cb| cb.uid != uid);
    }

    /// Number of live callbacks (test visibility).
    pub fn num_callbacks(&self) -> usize {
        self.callbacks.len()
    }
}

/// The per-register-file scoreboards shared by Rename and the LSU.
pub struct ScoreboardSet {
    boards: [Scoreboard; NUM_REG_FILES],
}

impl Default for ScoreboardSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreboardSet {
    /// Creates all scoreboards in their reset state.
    pub fn new() -> Self {
        Self {
            boards: [Scoreboard::new(), Scoreboard::new(), Scoreboard::new()],
        }
    }

    /// The scoreboard for one register file.
    pub fn get(&self, rf: RegFile) -> &Scoreboard {
        &self.boards[rf.index()]
    }

    /// Mutable access to one register file's scoreboard.
    pub fn get_mut(&mut self, rf: RegFile) -> &mut Scoreboard {
        &mut self.boards[rf.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inst::{Inst, InstClass};

    fn mask_of(regs: &[u32]) -> RegisterBitMask {
        let mut m = RegisterBitMask::default();
        for &r in regs {
            m.set(r);
        }
        m
    }

    fn wake_event() -> SimEvent {
        SimEvent::LsuOperandCheck(Inst::new("lw", InstClass::Load).into_ptr())
    }

    #[test]
    fn test_initial_arch_regs_ready() {
        let sb = Scoreboard::new();
        assert!(sb.is_set(&mask_of(&[0, 15, 31])));
        assert!(!sb.is_set(&mask_of(&[40])));
    }

    #[test]
    fn test_clear_then_ready_fires_callback() {
        let mut sb = Scoreboard::new();
        let mut sched = Sched::new();
        sb.clear_bits(&mask_of(&[5]));
        sb.register_ready_callback(mask_of(&[5]), 1, wake_event(), &mut sched);
        assert_eq!(sb.num_callbacks(), 1);
        assert!(sched.pop().is_none());

        sb.set_ready(&mask_of(&[5]), &mut sched);
        assert_eq!(sb.num_callbacks(), 0);
        assert!(sched.pop().is_some());
    }

    #[test]
    fn test_callback_waits_for_full_mask() {
        let mut sb = Scoreboard::new();
        let mut sched = Sched::new();
        sb.clear_bits(&mask_of(&[40, 41]));
        sb.register_ready_callback(mask_of(&[40, 41]), 1, wake_event(), &mut sched);

        sb.set_ready(&mask_of(&[40]), &mut sched);
        assert_eq!(sb.num_callbacks(), 1);
        sb.set_ready(&mask_of(&[41]), &mut sched);
        assert_eq!(sb.num_callbacks(), 0);
    }

    #[test]
    fn test_already_ready_fires_immediately() {
        let mut sb = Scoreboard::new();
        let mut sched = Sched::new();
        sb.register_ready_callback(mask_of(&[3]), 1, wake_event(), &mut sched);
        assert_eq!(sb.num_callbacks(), 0);
        assert!(sched.pop().is_some());
    }

    #[test]
    fn test_clear_callbacks_by_uid() {
        let mut sb = Scoreboard::new();
        let mut sched = Sched::new();
        sb.clear_bits(&mask_of(&[50]));
        sb.register_ready_callback(mask_of(&[50]), 7, wake_event(), &mut sched);
        sb.register_ready_callback(mask_of(&[50]), 8, wake_event(), &mut sched);
        sb.clear_callbacks(7);
        assert_eq!(sb.num_callbacks(), 1);
    }
}
