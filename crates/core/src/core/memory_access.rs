//! Memory-access records shared between the LSU and the cache hierarchy.
//!
//! One `MemoryAccessInfo` exists per memory operation attempt — an LSU
//! load/store, an ICache fetch-block request, or a prefetch. It is shared
//! by whichever units currently process it and freed when the last holder
//! drops its handle.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::core::inst::{InstGroup, InstPtr};

/// Shared handle to a memory-access record.
pub type MemoryAccessInfoPtr = Rc<RefCell<MemoryAccessInfo>>;

/// MMU translation progress for this access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MmuState {
    /// No translation attempted yet.
    #[default]
    NoAccess,
    /// TLB missed; a reload is outstanding.
    Miss,
    /// Translation complete.
    Hit,
}

/// Cache progress for this access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CacheState {
    /// No lookup attempted yet.
    #[default]
    NoAccess,
    /// Missed; waiting on a fill.
    Miss,
    /// Data present.
    Hit,
    /// NACKed by the cache while a refill held the pipeline; retry.
    Reload,
}

/// A single memory operation attempt.
pub struct MemoryAccessInfo {
    /// Owning instruction; prefetches carry none.
    pub inst: Option<InstPtr>,
    /// Virtual address of the access.
    pub vaddr: u64,
    /// Physical address, valid once `phys_addr_ready`.
    pub paddr: u64,
    /// Translation completed.
    pub phys_addr_ready: bool,
    /// MMU progress.
    pub mmu_state: MmuState,
    /// Cache progress.
    pub cache_state: CacheState,
    /// Data has arrived for this access.
    pub data_ready: bool,
    /// This access is a line refill returning from the next level.
    pub is_refill: bool,
    /// Generated by a prefetch engine.
    pub is_prefetch: bool,
    /// Instructions fetched by this ICache transaction.
    pub fetch_group: Option<InstGroup>,
    /// Block address of the MSHR entry this access coalesced into.
    pub mshr_block: Option<u64>,
}

impl MemoryAccessInfo {
    /// Creates a record for an instruction's memory operation.
    pub fn for_inst(inst: &InstPtr) -> MemoryAccessInfoPtr {
        let vaddr = inst.borrow().target_vaddr;
        Rc::new(RefCell::new(Self {
            inst: Some(inst.clone()),
            vaddr,
            paddr: 0,
            phys_addr_ready: false,
            mmu_state: MmuState::NoAccess,
            cache_state: CacheState::NoAccess,
            data_ready: false,
            is_refill: false,
            is_prefetch: false,
            fetch_group: None,
            mshr_block: None,
        }))
    }

    /// Creates a bare record for a physical address (fetch blocks, copies
    /// forwarded to outer caches, prefetches).
    pub fn for_addr(addr: u64) -> MemoryAccessInfoPtr {
        Rc::new(RefCell::new(Self {
            inst: None,
            vaddr: addr,
            paddr: addr,
            phys_addr_ready: true,
            mmu_state: MmuState::Hit,
            cache_state: CacheState::NoAccess,
            data_ready: false,
            is_refill: false,
            is_prefetch: false,
            fetch_group: None,
            mshr_block: None,
        }))
    }

    /// Unique id of the owning instruction, or 0 for detached accesses.
    pub fn inst_unique_id(&self) -> u64 {
        self.inst.as_ref().map_or(0, |i| i.borrow().unique_id)
    }

    /// True once the cache reported HIT for this access.
    #[inline]
    pub fn is_cache_hit(&self) -> bool {
        self.cache_state == CacheState::Hit
    }

    /// True once translation finished.
    #[inline]
    pub fn is_mmu_hit(&self) -> bool {
        self.mmu_state == MmuState::Hit
    }
}

impl fmt::Display for MemoryAccessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uid:{} vaddr:{:#x} mmu:{:?} cache:{:?}{}",
            self.inst_unique_id(),
            self.vaddr,
            self.mmu_state,
            self.cache_state,
            if self.is_refill { " refill" } else { "" }
        )
    }
}
