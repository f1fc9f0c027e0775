//! Data cache with MSHR-based miss handling.
//!
//! Three pipeline stages: LOOKUP → DATA_READ → DEALLOCATE. Misses allocate
//! (or coalesce into) an MSHR entry; stores merge into the entry's
//! line-fill buffer and always ack HIT; loads wait behind the entry and
//! ack MISS. Refills from L2 pass through LOOKUP, reload the line at
//! DATA_READ, and wake the coalesced loads at DEALLOCATE.
//!
//! Arbitration between refills and new LSU requests is a single slot:
//! when a refill claims the pipeline, LSU requests are NACKed back with
//! RELOAD state for the LSU to retry.

/// MSHR file.
pub mod mshr;

use tracing::debug;

use crate::config::{DcacheConfig, PrefetcherConfig};
use crate::core::cache_model::CacheModel;
use crate::core::memory_access::{CacheState, MemoryAccessInfoPtr};
use crate::sim::event::{L2Unit, Sched, SimEvent};
use crate::sim::pipeline::Pipeline;
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

use mshr::MshrFile;

const STAGE_LOOKUP: usize = 0;
const STAGE_DATA_READ: usize = 1;
const STAGE_DEALLOCATE: usize = 2;

/// DCache statistics.
#[derive(Debug, Default)]
pub struct DcacheStats {
    /// Demand hits.
    pub hits: u64,
    /// Demand misses.
    pub misses: u64,
    /// MSHR allocations.
    pub mshr_allocs: u64,
    /// Misses answered without an MSHR (file full).
    pub mshr_full_misses: u64,
    /// LSU requests NACKed during a refill.
    pub refill_nacks: u64,
    /// Refills received from L2.
    pub refills: u64,
    /// Linefill requests sent to L2.
    pub l2_requests: u64,
    /// Prefetch hints dropped for lack of ingress credits.
    pub prefetch_hints_dropped: u64,
}

/// The data cache unit.
pub struct Dcache {
    cache: CacheModel,
    always_hit: bool,
    mshr_file: MshrFile,

    pipeline: Pipeline<MemoryAccessInfoPtr>,
    l2cache_busy: bool,
    cache_refill_selected: bool,

    prefetcher_enabled: bool,
    prefetch_ingress_credits: Credits,

    /// Counters.
    pub stats: DcacheStats,
}

impl Dcache {
    /// Builds the DCache from configuration.
    pub fn new(config: &DcacheConfig, prefetcher: &PrefetcherConfig) -> Self {
        Self {
            cache: CacheModel::with_policy(
                config.l1_size_kb,
                config.l1_line_size,
                config.l1_associativity,
                config.l1_replacement_policy,
            ),
            always_hit: config.l1_always_hit,
            mshr_file: MshrFile::new(config.mshr_entries, config.load_miss_queue_size),
            pipeline: Pipeline::new(3),
            l2cache_busy: false,
            cache_refill_selected: true,
            prefetcher_enabled: prefetcher.enable_prefetcher,
            prefetch_ingress_credits: Credits::new(),
            stats: DcacheStats::default(),
        }
    }

    fn block_addr(&self, mem: &MemoryAccessInfoPtr) -> u64 {
        self.cache.block_addr(mem.borrow().paddr)
    }

    // ---- request intake ----

    /// A memory access from the LSU.
    pub fn receive_mem_req_from_lsu(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        debug!(mem = %mem.borrow(), "memory access request from LSU");
        if !self.cache_refill_selected || !self.pipeline.can_append() {
            // A refill owns the pipeline this cycle; NACK for a retry.
            self.stats.refill_nacks += 1;
            mem.borrow_mut().cache_state = CacheState::Reload;
            let _ = sched.schedule(SimEvent::DcacheLookupAck(mem), 1, Phase::Update);
            return;
        }
        self.pipeline.append(mem);
        let _ = sched.schedule_unique(SimEvent::DcachePipelineTick, 1, Phase::Tick);
        let _ = sched.schedule_unique(SimEvent::DcacheMshrRequest, 1, Phase::Tick);
    }

    /// A refill response from L2.
    pub fn receive_resp_from_l2(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        debug!(mem = %mem.borrow(), "received cache refill");
        let is_prefetch = mem.borrow().is_prefetch;
        if !is_prefetch {
            self.l2cache_busy = false;
        }
        if !self.pipeline.can_append() {
            // The append slot is taken this cycle; retry the refill.
            let _ = sched.schedule(SimEvent::L2RespDcache(mem), 1, Phase::Tick);
            return;
        }
        mem.borrow_mut().is_refill = true;
        self.stats.refills += 1;
        if is_prefetch {
            let _ = sched.schedule(SimEvent::PrefetcherQueueCredits(1), 0, Phase::Update);
        }
        self.pipeline.append(mem);
        self.cache_refill_selected = false;
        let _ = sched.schedule_unique(SimEvent::DcachePipelineTick, 1, Phase::Tick);
        let _ = sched.schedule_unique(SimEvent::DcacheFreePipeline, 1, Phase::Tick);
        let _ = sched.schedule_unique(SimEvent::DcacheMshrRequest, 1, Phase::Tick);
    }

    /// Prefetcher ingress credits.
    pub fn receive_prefetcher_credits(&mut self, credits: u32) {
        self.prefetch_ingress_credits.add(credits);
    }

    /// Frees the refill arbitration slot.
    pub fn free_pipeline(&mut self) {
        self.cache_refill_selected = true;
    }

    // ---- pipeline ----

    /// Advances the cache pipeline one cycle. Stage handlers run from the
    /// back so an older refill deallocates before a younger one reloads.
    pub fn pipeline_tick(&mut self, sched: &mut Sched) {
        self.pipeline.shift();
        self.handle_deallocate(sched);
        self.handle_data_read(sched);
        self.handle_lookup(sched);
        if self.pipeline.active() {
            let _ = sched.schedule_unique(SimEvent::DcachePipelineTick, 1, Phase::Tick);
        }
    }

    fn lookup(&mut self, paddr: u64) -> bool {
        let hit = self.always_hit || self.cache.peek(paddr);
        if hit {
            self.cache.touch_mru(paddr);
            self.stats.hits += 1;
            debug!(paddr, "DL1 hit");
        } else {
            self.stats.misses += 1;
            debug!(paddr, "DL1 miss");
        }
        hit
    }

    fn handle_lookup(&mut self, sched: &mut Sched) {
        let Some(mem) = self.pipeline.get(STAGE_LOOKUP).cloned() else {
            return;
        };
        // Refills do nothing in the lookup stage.
        if mem.borrow().is_refill {
            return;
        }

        if self.prefetcher_enabled {
            if self.prefetch_ingress_credits.try_consume_one() {
                let _ = sched.schedule(SimEvent::PrefetcherObserve(mem.clone()), 1, Phase::Update);
            } else {
                self.stats.prefetch_hints_dropped += 1;
            }
        }

        let paddr = mem.borrow().paddr;
        if self.lookup(paddr) {
            mem.borrow_mut().cache_state = CacheState::Hit;
            let _ = sched.schedule(SimEvent::DcacheLookupAck(mem), 1, Phase::Update);
            return;
        }

        let block = self.cache.block_addr(paddr);
        if !self.mshr_file.contains(block) && self.mshr_file.is_full() {
            // No MSHR available: answer MISS and let the LSU replay.
            self.stats.mshr_full_misses += 1;
            mem.borrow_mut().cache_state = CacheState::Miss;
            let _ = sched.schedule(SimEvent::DcacheLookupAck(mem), 1, Phase::Update);
            return;
        }
        if !self.mshr_file.contains(block) {
            debug!(block, "creating new MSHR entry");
            let _ = self.mshr_file.allocate(block);
            self.stats.mshr_allocs += 1;
        }
        self.reply_lsu(&mem, block, sched);
    }

    fn reply_lsu(&mut self, mem: &MemoryAccessInfoPtr, block: u64, sched: &mut Sched) {
        let is_store = mem
            .borrow()
            .inst
            .as_ref()
            .is_some_and(|inst| inst.borrow().is_store());
        let entry = self.mshr_file.get(block).expect("entry allocated above");

        // Stores merge into the line-fill buffer and are done.
        if is_store {
            debug!(block, "write to line fill buffer (ST)");
            entry.modified = true;
            mem.borrow_mut().cache_state = CacheState::Hit;
            mem.borrow_mut().mshr_block = Some(block);
            let _ = sched.schedule(SimEvent::DcacheLookupAck(mem.clone()), 1, Phase::Update);
            return;
        }

        if entry.data_arrived {
            debug!(block, "hit on line fill buffer (LD)");
            mem.borrow_mut().cache_state = CacheState::Hit;
            let _ = sched.schedule(SimEvent::DcacheLookupAck(mem.clone()), 1, Phase::Update);
            return;
        }

        // The load waits behind the fill.
        debug!(block, "load miss queued behind MSHR");
        mem.borrow_mut().mshr_block = Some(block);
        let queued = entry.enqueue_load(mem);
        mem.borrow_mut().cache_state = CacheState::Miss;
        if !queued {
            debug!(block, "MSHR load queue full; miss will replay");
        }
        let _ = sched.schedule(SimEvent::DcacheLookupAck(mem.clone()), 1, Phase::Update);
    }

    fn handle_data_read(&mut self, sched: &mut Sched) {
        let Some(mem) = self.pipeline.get(STAGE_DATA_READ).cloned() else {
            return;
        };
        if mem.borrow().is_refill {
            let paddr = mem.borrow().paddr;
            self.cache.allocate_with_mru_update(paddr);
            let block = self.cache.block_addr(paddr);
            if let Some(entry) = self.mshr_file.get(block) {
                entry.data_arrived = true;
            }
            debug!(paddr, "DCache reload complete");
            return;
        }

        if mem.borrow().is_cache_hit() {
            mem.borrow_mut().data_ready = true;
            let _ = sched.schedule(SimEvent::DcacheLookupAck(mem), 1, Phase::Update);
            return;
        }

        // A miss heads to L2, one outstanding request at a time.
        let block = self.block_addr(&mem);
        self.try_send_l2_request(block, &mem, sched);
        let _ = sched.schedule(SimEvent::DcacheLookupAck(mem), 1, Phase::Update);
    }

    fn try_send_l2_request(&mut self, block: u64, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let sendable = match self.mshr_file.get(block) {
            Some(entry) => !entry.l2_request_sent && !entry.data_arrived,
            // MISS-without-MSHR: the LSU replays; no linefill is owed.
            None => false,
        };
        if !sendable {
            return;
        }
        if self.l2cache_busy {
            let _ = sched.schedule_unique(SimEvent::DcacheMshrRequest, 1, Phase::Tick);
            return;
        }
        self.l2cache_busy = true;
        self.stats.l2_requests += 1;
        if let Some(entry) = self.mshr_file.get(block) {
            entry.l2_request_sent = true;
        }
        debug!(block, "DCache linefill request to L2");
        let _ = sched.schedule(
            SimEvent::L2Request {
                src: L2Unit::Dcache,
                mem: mem.clone(),
            },
            1,
            Phase::Update,
        );
    }

    fn handle_deallocate(&mut self, sched: &mut Sched) {
        let Some(mem) = self.pipeline.get(STAGE_DEALLOCATE).cloned() else {
            return;
        };
        if !mem.borrow().is_refill {
            debug!(mem = %mem.borrow(), "deallocating pipeline");
            return;
        }
        let block = self.block_addr(&mem);
        if let Some(mut entry) = self.mshr_file.deallocate(block) {
            debug!(block, waiting = entry.num_waiting_loads(), "removing MSHR entry");
            assert!(
                self.cache.peek(entry.block_addr),
                "MSHR deallocate while the line is absent after reload"
            );
            for load in entry.drain_loads() {
                load.borrow_mut().cache_state = CacheState::Hit;
                load.borrow_mut().mshr_block = None;
                let _ = sched.schedule(SimEvent::DcacheReadyReq(load), 1, Phase::Update);
            }
        }
    }

    /// Walks the MSHR file for entries still owing an L2 request.
    pub fn mshr_request(&mut self, sched: &mut Sched) {
        if self.l2cache_busy {
            return;
        }
        let mut to_send: Option<u64> = None;
        for entry in self.mshr_file.iter_mut() {
            if entry.valid && !entry.data_arrived && !entry.l2_request_sent {
                to_send = Some(entry.block_addr);
                break;
            }
        }
        if let Some(block) = to_send {
            let mem = crate::core::memory_access::MemoryAccessInfo::for_addr(block);
            mem.borrow_mut().mshr_block = Some(block);
            self.l2cache_busy = true;
            self.stats.l2_requests += 1;
            if let Some(entry) = self.mshr_file.get(block) {
                entry.l2_request_sent = true;
            }
            debug!(block, "sending MSHR request while not busy");
            let _ = sched.schedule(
                SimEvent::L2Request {
                    src: L2Unit::Dcache,
                    mem,
                },
                1,
                Phase::Update,
            );
        }
    }

    /// MSHR occupancy (test visibility).
    pub fn mshr_len(&self) -> usize {
        self.mshr_file.len()
    }
}
