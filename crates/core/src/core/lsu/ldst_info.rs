//! Issue bookkeeping wrapped around a memory-access record.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::core::inst::{InstPtr, InstStatus};
use crate::core::memory_access::MemoryAccessInfoPtr;

/// Shared handle to LSU issue bookkeeping.
pub type LoadStoreInstInfoPtr = Rc<RefCell<LoadStoreInstInfo>>;

/// Issue priority; lower ranks win arbitration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssuePriority {
    Highest = 0,
    /// Cache fill arrived; waiting for cache re-access.
    CacheReload,
    /// Waiting for another outstanding cache miss to finish.
    CachePending,
    /// TLB fill arrived; waiting for MMU re-access.
    MmuReload,
    /// Waiting for another outstanding TLB miss to finish.
    MmuPending,
    /// Newly dispatched, waiting for first issue.
    NewDisp,
    Lowest,
}

/// Issue state of an LSU queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueState {
    /// Eligible for issue arbitration.
    Ready,
    /// In flight somewhere inside the load/store pipe.
    Issued,
    /// Waiting on operands, a replay delay, or a fill.
    NotReady,
}

/// Per-load/store issue info: priority, state and queue membership.
pub struct LoadStoreInstInfo {
    /// The wrapped memory-access record.
    pub mem: MemoryAccessInfoPtr,
    /// Arbitration rank.
    pub priority: IssuePriority,
    /// Issue state.
    pub state: IssueState,
    /// Currently linked into the ready queue.
    pub in_ready_queue: bool,
    /// Currently linked into the issue queue.
    pub in_issue_queue: bool,
    /// Currently linked into the replay buffer.
    pub in_replay_buffer: bool,
}

impl LoadStoreInstInfo {
    /// Wraps a memory-access record with default (not-ready, lowest) state.
    pub fn new(mem: MemoryAccessInfoPtr) -> LoadStoreInstInfoPtr {
        Rc::new(RefCell::new(Self {
            mem,
            priority: IssuePriority::Lowest,
            state: IssueState::NotReady,
            in_ready_queue: false,
            in_issue_queue: false,
            in_replay_buffer: false,
        }))
    }

    /// The owning instruction.
    pub fn inst(&self) -> InstPtr {
        self.mem
            .borrow()
            .inst
            .clone()
            .expect("load/store info without an instruction")
    }

    /// Unique id of the owning instruction.
    pub fn unique_id(&self) -> u64 {
        self.mem.borrow().inst_unique_id()
    }

    /// Uop id of the owning instruction.
    pub fn uop_id(&self) -> u32 {
        self.inst().borrow().uop_id
    }

    /// True when eligible for arbitration.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == IssueState::Ready
    }

    /// True once the owning instruction retired.
    pub fn is_retired(&self) -> bool {
        self.inst().borrow().status() == InstStatus::Retired
    }

    /// Strict age-and-priority key: lower compares first in arbitration.
    pub fn arb_key(&self) -> (u32, u64, u32) {
        (self.priority as u32, self.unique_id(), self.uop_id())
    }
}

impl fmt::Display for LoadStoreInstInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uid:{} {:?}/{:?}{}{}{}",
            self.unique_id(),
            self.priority,
            self.state,
            if self.in_issue_queue { " iq" } else { "" },
            if self.in_replay_buffer { " rb" } else { "" },
            if self.in_ready_queue { " rq" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inst::{Inst, InstClass};
    use crate::core::memory_access::MemoryAccessInfo;

    fn make_info(uid: u64, prio: IssuePriority) -> LoadStoreInstInfoPtr {
        let mut inst = Inst::new("lw", InstClass::Load);
        inst.unique_id = uid;
        let inst = inst.into_ptr();
        let info = LoadStoreInstInfo::new(MemoryAccessInfo::for_inst(&inst));
        info.borrow_mut().priority = prio;
        info
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(IssuePriority::Highest < IssuePriority::CacheReload);
        assert!(IssuePriority::CacheReload < IssuePriority::CachePending);
        assert!(IssuePriority::MmuReload < IssuePriority::MmuPending);
        assert!(IssuePriority::NewDisp < IssuePriority::Lowest);
    }

    #[test]
    fn test_arb_key_orders_by_priority_then_age() {
        let a = make_info(10, IssuePriority::CacheReload);
        let b = make_info(5, IssuePriority::NewDisp);
        // Higher-urgency (lower rank) wins even though it is younger.
        assert!(a.borrow().arb_key() < b.borrow().arb_key());

        let c = make_info(3, IssuePriority::NewDisp);
        // Same rank: older (smaller uid) wins.
        assert!(c.borrow().arb_key() < b.borrow().arb_key());
    }
}
