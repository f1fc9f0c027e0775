//! Non-blocking instruction cache.
//!
//! Fetch requests arrive block-granular. Misses to a block with an
//! outstanding miss coalesce in the pending-miss buffer and never generate
//! a second L2 request. Each cycle a single arbiter serves, in priority
//! order: refill (allocate the line, move coalesced pending misses to the
//! replay buffer), replay, then demand lookups. Credit flow runs both
//! upstream (to Fetch, one per request slot) and downstream (from L2).

use std::collections::VecDeque;

use tracing::debug;

use crate::config::IcacheConfig;
use crate::core::cache_model::CacheModel;
use crate::core::memory_access::{CacheState, MemoryAccessInfo, MemoryAccessInfoPtr};
use crate::sim::event::{L2Unit, Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

/// ICache statistics.
#[derive(Debug, Default)]
pub struct IcacheStats {
    /// Demand lookups that hit.
    pub hits: u64,
    /// Demand lookups that missed.
    pub misses: u64,
    /// Misses coalesced onto an outstanding block.
    pub coalesced_misses: u64,
    /// Linefill requests issued to L2.
    pub l2_requests: u64,
    /// Refills received.
    pub refills: u64,
}

/// The instruction cache unit.
pub struct Icache {
    cache: CacheModel,
    always_hit: bool,
    cache_latency: u64,
    fetch_queue_size: u32,

    fetch_req_queue: VecDeque<MemoryAccessInfoPtr>,
    miss_queue: VecDeque<MemoryAccessInfoPtr>,
    pending_miss_buffer: VecDeque<MemoryAccessInfoPtr>,
    replay_buffer: VecDeque<MemoryAccessInfoPtr>,
    l2cache_resp_queue: VecDeque<MemoryAccessInfoPtr>,
    l2_credits: Credits,

    /// Counters.
    pub stats: IcacheStats,
}

impl Icache {
    /// Builds the ICache from configuration.
    pub fn new(config: &IcacheConfig) -> Self {
        Self {
            cache: CacheModel::with_policy(
                config.l1_size_kb,
                config.l1_line_size,
                config.l1_associativity,
                config.l1_replacement_policy,
            ),
            always_hit: config.l1_always_hit,
            cache_latency: config.cache_latency,
            fetch_queue_size: config.fetch_queue_size,
            fetch_req_queue: VecDeque::new(),
            miss_queue: VecDeque::new(),
            pending_miss_buffer: VecDeque::new(),
            replay_buffer: VecDeque::new(),
            l2cache_resp_queue: VecDeque::new(),
            l2_credits: Credits::new(),
            stats: IcacheStats::default(),
        }
    }

    /// Startup: grant request credits to Fetch.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::IcacheFetchCredits(self.fetch_queue_size),
            0,
            Phase::Update,
        );
    }

    fn lookup(&mut self, mem: &MemoryAccessInfoPtr) -> bool {
        let paddr = mem.borrow().paddr;
        let hit = self.always_hit || self.cache.peek(paddr);
        if hit {
            self.cache.touch_mru(paddr);
            self.stats.hits += 1;
            debug!(paddr, "IL1 hit");
        } else {
            self.stats.misses += 1;
            debug!(paddr, "IL1 miss");
        }
        hit
    }

    /// A block fetch request from Fetch.
    pub fn get_request_from_fetch(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        self.fetch_req_queue.push_back(mem);
        let _ = sched.schedule_unique(SimEvent::IcacheArbitrate, 0, Phase::Tick);
    }

    /// A refill response from L2.
    pub fn get_resp_from_l2(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        if mem.borrow().cache_state == CacheState::Hit {
            self.l2cache_resp_queue.push_back(mem);
            let _ = sched.schedule_unique(SimEvent::IcacheArbitrate, 0, Phase::Tick);
        }
    }

    /// Credits refunded by L2.
    pub fn get_credits_from_l2(&mut self, credits: u32, sched: &mut Sched) {
        self.l2_credits.add(credits);
        if !self.miss_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::IcacheMakeL2Request, 0, Phase::Tick);
        }
    }

    /// Per-cycle arbitration: refill, then replay, then demand.
    pub fn arbitrate(&mut self, sched: &mut Sched) {
        if let Some(resp) = self.l2cache_resp_queue.pop_front() {
            self.reload(&resp);
        }

        // Replays run in parallel with a fill and beat demand lookups.
        if let Some(mem) = self.replay_buffer.pop_front() {
            debug!("replaying filled fetch miss");
            let _ = sched.schedule(SimEvent::IcacheReplay(mem), self.cache_latency, Phase::Tick);
        } else if let Some(mem) = self.fetch_req_queue.pop_front() {
            let hit = self.lookup(&mem);
            mem.borrow_mut().cache_state = if hit { CacheState::Hit } else { CacheState::Miss };
            if !hit {
                self.add_to_miss_queue(&mem, sched);
            }
            let _ = sched.schedule(SimEvent::IcacheRespond(mem), self.cache_latency, Phase::Tick);
        }

        if !self.l2cache_resp_queue.is_empty()
            || !self.replay_buffer.is_empty()
            || !self.fetch_req_queue.is_empty()
        {
            let _ = sched.schedule_unique(SimEvent::IcacheArbitrate, 1, Phase::Tick);
        }
    }

    fn reload(&mut self, resp: &MemoryAccessInfoPtr) {
        let reload_addr = resp.borrow().paddr;
        let reload_block = self.cache.block_addr(reload_addr);
        self.cache.allocate_with_mru_update(reload_addr);
        self.stats.refills += 1;

        // Move coalesced pending misses for this block into the replay buffer.
        let mut idx = 0;
        while idx < self.pending_miss_buffer.len() {
            let block = self
                .cache
                .block_addr(self.pending_miss_buffer[idx].borrow().paddr);
            if block == reload_block {
                let mem = self
                    .pending_miss_buffer
                    .remove(idx)
                    .expect("index checked in bounds");
                self.replay_buffer.push_back(mem);
            } else {
                idx += 1;
            }
        }
    }

    fn add_to_miss_queue(&mut self, mem: &MemoryAccessInfoPtr, sched: &mut Sched) {
        let missed_block = self.cache.block_addr(mem.borrow().paddr);
        let outstanding = self
            .pending_miss_buffer
            .iter()
            .any(|other| self.cache.block_addr(other.borrow().paddr) == missed_block);
        if outstanding {
            self.stats.coalesced_misses += 1;
        } else {
            self.miss_queue.push_back(mem.clone());
            let _ = sched.schedule_unique(SimEvent::IcacheMakeL2Request, 0, Phase::Tick);
        }
        assert!(
            self.pending_miss_buffer.len() < self.fetch_queue_size as usize,
            "ICache pending miss buffer overflow"
        );
        self.pending_miss_buffer.push_back(mem.clone());
    }

    /// The demand response path (fired `cache_latency` cycles after lookup).
    pub fn respond(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        let hit = mem.borrow().cache_state == CacheState::Hit;
        let _ = sched.schedule(SimEvent::IcacheFetchResp(mem), 1, Phase::Update);
        if hit {
            let _ = sched.schedule(SimEvent::IcacheFetchCredits(1), 0, Phase::Update);
        }
    }

    /// The replay response path: the line has been filled, answer HIT.
    pub fn replay(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        mem.borrow_mut().cache_state = CacheState::Hit;
        let _ = sched.schedule(SimEvent::IcacheFetchResp(mem), 1, Phase::Update);
        let _ = sched.schedule(SimEvent::IcacheFetchCredits(1), 0, Phase::Update);
    }

    /// Issues queued misses to L2 under credits. A fresh access copy goes
    /// out so L2-side mutation never touches the fetch transaction.
    pub fn make_l2_request(&mut self, sched: &mut Sched) {
        while self.l2_credits.has_any() && !self.miss_queue.is_empty() {
            let miss = self.miss_queue.pop_front().expect("checked non-empty");
            let copy = MemoryAccessInfo::for_addr(miss.borrow().paddr);
            self.l2_credits.consume(1);
            self.stats.l2_requests += 1;
            debug!(paddr = miss.borrow().paddr, "IL1 linefill request");
            let _ = sched.schedule(
                SimEvent::L2Request {
                    src: L2Unit::Icache,
                    mem: copy,
                },
                1,
                Phase::Update,
            );
        }
    }

    /// Outstanding pending-miss count (test visibility).
    pub fn pending_misses(&self) -> usize {
        self.pending_miss_buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icache() -> (Icache, Sched) {
        let mut sched = Sched::new();
        let mut icache = Icache::new(&IcacheConfig::default());
        icache.get_credits_from_l2(8, &mut sched);
        (icache, sched)
    }

    fn fetch_req(addr: u64) -> MemoryAccessInfoPtr {
        MemoryAccessInfo::for_addr(addr)
    }

    /// Drains the scheduler, running ICache-internal events and returning
    /// (responses to Fetch, linefill requests to L2).
    fn drain(icache: &mut Icache, sched: &mut Sched) -> (Vec<MemoryAccessInfoPtr>, u32) {
        let mut resps = Vec::new();
        let mut l2_reqs = 0;
        while let Some((_, ev)) = sched.pop() {
            match ev {
                SimEvent::IcacheArbitrate => icache.arbitrate(sched),
                SimEvent::IcacheMakeL2Request => icache.make_l2_request(sched),
                SimEvent::IcacheRespond(mem) => icache.respond(mem, sched),
                SimEvent::IcacheReplay(mem) => icache.replay(mem, sched),
                SimEvent::IcacheFetchResp(mem) => resps.push(mem),
                SimEvent::L2Request { src, .. } => {
                    assert_eq!(src, L2Unit::Icache);
                    l2_reqs += 1;
                }
                _ => {}
            }
        }
        (resps, l2_reqs)
    }

    #[test]
    fn test_cold_miss_goes_to_l2() {
        let (mut icache, mut sched) = icache();
        icache.get_request_from_fetch(fetch_req(0x1000), &mut sched);
        let (resps, l2_reqs) = drain(&mut icache, &mut sched);

        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].borrow().cache_state, CacheState::Miss);
        assert_eq!(l2_reqs, 1);
        assert_eq!(icache.pending_misses(), 1);
    }

    #[test]
    fn test_same_block_misses_coalesce() {
        let (mut icache, mut sched) = icache();
        icache.get_request_from_fetch(fetch_req(0x1000), &mut sched);
        icache.get_request_from_fetch(fetch_req(0x1020), &mut sched);
        let (_, l2_reqs) = drain(&mut icache, &mut sched);

        assert_eq!(l2_reqs, 1);
        assert_eq!(icache.stats.coalesced_misses, 1);
        assert_eq!(icache.pending_misses(), 2);
    }

    #[test]
    fn test_refill_replays_pending_misses() {
        let (mut icache, mut sched) = icache();
        icache.get_request_from_fetch(fetch_req(0x1000), &mut sched);
        icache.get_request_from_fetch(fetch_req(0x1020), &mut sched);
        let _ = drain(&mut icache, &mut sched);

        // Fill response for the block.
        let fill = fetch_req(0x1000);
        fill.borrow_mut().cache_state = CacheState::Hit;
        icache.get_resp_from_l2(fill, &mut sched);
        let (resps, _) = drain(&mut icache, &mut sched);

        // Both coalesced misses come back as hits.
        assert_eq!(resps.len(), 2);
        assert!(resps.iter().all(|m| m.borrow().cache_state == CacheState::Hit));
        assert_eq!(icache.pending_misses(), 0);
        assert_eq!(icache.stats.refills, 1);
    }

    #[test]
    fn test_filled_line_hits() {
        let (mut icache, mut sched) = icache();
        icache.get_request_from_fetch(fetch_req(0x1000), &mut sched);
        let _ = drain(&mut icache, &mut sched);
        let fill = fetch_req(0x1000);
        fill.borrow_mut().cache_state = CacheState::Hit;
        icache.get_resp_from_l2(fill, &mut sched);
        let _ = drain(&mut icache, &mut sched);

        icache.get_request_from_fetch(fetch_req(0x1008), &mut sched);
        let (resps, l2_reqs) = drain(&mut icache, &mut sched);
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].borrow().cache_state, CacheState::Hit);
        assert_eq!(l2_reqs, 0);
        assert_eq!(icache.stats.hits, 1);
    }
}
