//! The pipeline microarchitecture.
//!
//! Units are plain structs with event handlers; all cross-unit traffic is
//! routed by the simulator through the scheduler (see `sim`). Leaves
//! first: the instruction and memory-access records, then the shared cache
//! model and scoreboards, then the units from fetch down to the BIU.

/// Bus interface unit and mapped devices.
pub mod biu;
/// Shared set-associative cache tag model.
pub mod cache_model;
/// Data cache with MSHRs.
pub mod dcache;
/// Decode and vector uop generation.
pub mod decode;
/// Decoder facade.
pub mod decoder;
/// Dispatch and per-unit dispatchers.
pub mod dispatch;
/// ALU/FPU/branch execution pipes.
pub mod execute;
/// Fetch, ICache, BPU and FTQ.
pub mod fetch;
/// Flush causes, criteria and the flush manager.
pub mod flush;
/// The in-flight instruction record.
pub mod inst;
/// Trace sources.
pub mod inst_gen;
/// The L2 cache.
pub mod l2cache;
/// The load/store unit.
pub mod lsu;
/// Memory-access records.
pub mod memory_access;
/// MMU and TLB.
pub mod mmu;
/// Hardware prefetcher.
pub mod prefetcher;
/// Rename.
pub mod rename;
/// Reorder buffer.
pub mod rob;
/// Physical-register scoreboards.
pub mod scoreboard;

use crate::core::inst::{InstPtr, InstStatus};
use crate::sim::event::{Sched, SimEvent};
use crate::sim::scheduler::Phase;

/// Marks an instruction COMPLETED and, when the ROB has armed it as the
/// oldest un-completed instruction, wakes the retire event.
pub fn complete_inst(inst: &InstPtr, sched: &mut Sched) {
    inst.borrow_mut().set_status(InstStatus::Completed);
    if inst.borrow().marked_oldest {
        let _ = sched.schedule_unique(SimEvent::RobRetire, 0, Phase::Tick);
    }
}
