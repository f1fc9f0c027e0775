//! Centralised flush arbitration and fan-out.
//!
//! Units publish flush requests carrying a `FlushingCriteria`. Within a
//! cycle the manager keeps only the oldest-affected criterion, then fans it
//! out on the *next* cycle's Flush phase — to the lower pipeline for
//! misfetches, to the upper pipeline for everything else. Subscribers do
//! their own removal using `FlushingCriteria::included_in_flush`.

use std::fmt;

use crate::core::inst::InstPtr;

/// Why a flush was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushCause {
    /// Trap; includes the named instruction.
    Trap,
    /// Wrong predicted direction; excludes the named instruction.
    Misprediction,
    /// Wrong predicted target; excludes the named instruction.
    TargetMisprediction,
    /// Front-end fetched down the wrong path; includes the instruction.
    Misfetch,
    /// Post-retirement synchronisation (system instructions); excludes it.
    PostSync,
}

impl FlushCause {
    /// Whether the named instruction itself is flushed.
    pub fn is_inclusive(self) -> bool {
        match self {
            FlushCause::Trap | FlushCause::Misfetch => true,
            FlushCause::Misprediction
            | FlushCause::TargetMisprediction
            | FlushCause::PostSync => false,
        }
    }
}

impl fmt::Display for FlushCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlushCause::Trap => "TRAP",
            FlushCause::Misprediction => "MISPREDICTION",
            FlushCause::TargetMisprediction => "TARGET_MISPREDICTION",
            FlushCause::Misfetch => "MISFETCH",
            FlushCause::PostSync => "POST_SYNC",
        };
        write!(f, "{s}")
    }
}

/// Selects which in-flight instructions a flush discards.
#[derive(Clone)]
pub struct FlushingCriteria {
    cause: FlushCause,
    is_inclusive: bool,
    inst: InstPtr,
}

impl FlushingCriteria {
    /// Builds a criterion; inclusivity follows the cause.
    pub fn new(cause: FlushCause, inst: InstPtr) -> Self {
        Self {
            cause,
            is_inclusive: cause.is_inclusive(),
            inst,
        }
    }

    /// The flush cause.
    pub fn cause(&self) -> FlushCause {
        self.cause
    }

    /// The named instruction.
    pub fn inst(&self) -> &InstPtr {
        &self.inst
    }

    /// True if the named instruction itself is flushed.
    pub fn is_inclusive(&self) -> bool {
        self.is_inclusive
    }

    /// Misfetches flush only the lower (fetch-side) pipeline.
    pub fn is_lower_pipe_flush(&self) -> bool {
        self.cause == FlushCause::Misfetch
    }

    /// True if `other` is discarded by this flush.
    pub fn included_in_flush(&self, other: &InstPtr) -> bool {
        let own = self.inst.borrow().unique_id;
        let theirs = other.borrow().unique_id;
        if self.is_inclusive {
            own <= theirs
        } else {
            own < theirs
        }
    }
}

impl fmt::Display for FlushingCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uid:{}{}",
            self.cause,
            self.inst.borrow().unique_id,
            if self.is_inclusive { " (inclusive)" } else { "" }
        )
    }
}

/// Flush manager state: holds the oldest pending criterion per cycle.
#[derive(Default)]
pub struct FlushManager {
    pending: Option<FlushingCriteria>,
    /// Total flush requests received.
    pub num_requests: u64,
    /// Total flushes forwarded.
    pub num_forwarded: u64,
}

impl FlushManager {
    /// Creates an idle manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a flush request, keeping only the oldest-affected one.
    /// Returns true if a fan-out event should be scheduled.
    pub fn receive_flush(&mut self, criteria: FlushingCriteria) -> bool {
        self.num_requests += 1;
        if let Some(pending) = &self.pending {
            // An already-pending flush that covers the new request's
            // instruction wins; otherwise the newcomer is older.
            if pending.included_in_flush(criteria.inst()) {
                return false;
            }
        }
        let arm = self.pending.is_none();
        self.pending = Some(criteria);
        arm
    }

    /// Takes the arbitrated criterion for fan-out.
    pub fn take_pending(&mut self) -> FlushingCriteria {
        self.num_forwarded += 1;
        self.pending.take().expect("no flush to forward onwards")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inst::{Inst, InstClass};

    fn inst_with_uid(uid: u64) -> InstPtr {
        let mut inst = Inst::new("add", InstClass::Alu);
        inst.unique_id = uid;
        inst.into_ptr()
    }

    #[test]
    fn test_inclusivity_per_cause() {
        assert!(FlushCause::Trap.is_inclusive());
        assert!(FlushCause::Misfetch.is_inclusive());
        assert!(!FlushCause::Misprediction.is_inclusive());
        assert!(!FlushCause::TargetMisprediction.is_inclusive());
        assert!(!FlushCause::PostSync.is_inclusive());
    }

    #[test]
    fn test_included_in_flush_boundaries() {
        let trap = FlushingCriteria::new(FlushCause::Trap, inst_with_uid(10));
        assert!(trap.included_in_flush(&inst_with_uid(10)));
        assert!(trap.included_in_flush(&inst_with_uid(11)));
        assert!(!trap.included_in_flush(&inst_with_uid(9)));

        let mispred = FlushingCriteria::new(FlushCause::Misprediction, inst_with_uid(10));
        assert!(!mispred.included_in_flush(&inst_with_uid(10)));
        assert!(mispred.included_in_flush(&inst_with_uid(11)));
    }

    #[test]
    fn test_oldest_affected_wins() {
        let mut mgr = FlushManager::new();
        assert!(mgr.receive_flush(FlushingCriteria::new(
            FlushCause::Misprediction,
            inst_with_uid(20)
        )));
        // Younger request is covered by the pending one and is dropped.
        assert!(!mgr.receive_flush(FlushingCriteria::new(
            FlushCause::Misprediction,
            inst_with_uid(30)
        )));
        // Older request replaces it.
        assert!(!mgr.receive_flush(FlushingCriteria::new(
            FlushCause::Trap,
            inst_with_uid(5)
        )));
        let winner = mgr.take_pending();
        assert_eq!(winner.inst().borrow().unique_id, 5);
        assert_eq!(winner.cause(), FlushCause::Trap);
    }
}
