//! MMU with a fully-associative TLB model.
//!
//! Lookups answer after `mmu_latency`; a TLB miss starts a reload that
//! finishes after `tlb_reload_latency`, installs the translation and sends
//! a ready-request back to the LSU so the access re-issues at MMU_RELOAD
//! priority. Translation itself is identity — the core tracks timing, not
//! page tables.

use tracing::debug;

use crate::config::MmuConfig;
use crate::core::cache_model::CacheModel;
use crate::core::memory_access::{MemoryAccessInfoPtr, MmuState};
use crate::sim::event::{Sched, SimEvent};
use crate::sim::scheduler::Phase;

/// MMU statistics.
#[derive(Debug, Default)]
pub struct MmuStats {
    /// TLB hits.
    pub tlb_hits: u64,
    /// TLB misses.
    pub tlb_misses: u64,
    /// Reloads completed.
    pub tlb_reloads: u64,
}

/// The MMU unit.
pub struct Mmu {
    tlb: CacheModel,
    always_hit: bool,
    mmu_latency: u64,
    tlb_reload_latency: u64,
    /// Counters.
    pub stats: MmuStats,
}

impl Mmu {
    /// Builds the MMU from configuration.
    pub fn new(config: &MmuConfig) -> Self {
        Self {
            tlb: CacheModel::fully_associative(config.tlb_entries, config.page_shift),
            always_hit: config.tlb_always_hit,
            mmu_latency: config.mmu_latency,
            tlb_reload_latency: config.tlb_reload_latency,
            stats: MmuStats::default(),
        }
    }

    /// A translation request from the LSU.
    pub fn handle_lookup_req(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let vaddr = mem.borrow().vaddr;
        let hit = self.always_hit || self.tlb.peek(vaddr);

        if hit {
            self.tlb.touch_mru(vaddr);
            self.stats.tlb_hits += 1;
            debug!(vaddr, "TLB hit");
            let mut m = mem.borrow_mut();
            m.mmu_state = MmuState::Hit;
            m.paddr = vaddr;
            m.phys_addr_ready = true;
        } else {
            self.stats.tlb_misses += 1;
            debug!(vaddr, "TLB miss");
            mem.borrow_mut().mmu_state = MmuState::Miss;
            let _ = sched.schedule(
                SimEvent::MmuReloadDone(mem.clone()),
                self.tlb_reload_latency,
                Phase::Tick,
            );
        }

        let _ = sched.schedule(
            SimEvent::MmuLookupAck(mem.clone()),
            self.mmu_latency,
            Phase::Update,
        );
    }

    /// A TLB reload finished: install the translation and wake the LSU.
    pub fn reload_done(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let vaddr = mem.borrow().vaddr;
        self.tlb.allocate_with_mru_update(vaddr);
        self.stats.tlb_reloads += 1;
        debug!(vaddr, "TLB reload complete");
        {
            let mut m = mem.borrow_mut();
            m.mmu_state = MmuState::Hit;
            m.paddr = vaddr;
            m.phys_addr_ready = true;
        }
        let _ = sched.schedule(SimEvent::MmuReadyReq(mem.clone()), 1, Phase::Update);
    }
}
