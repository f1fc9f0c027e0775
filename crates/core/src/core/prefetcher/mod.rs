//! Credit-flowed prefetcher with pluggable engines.
//!
//! Demand accesses arrive on a bounded ingress queue (credits granted to
//! the producer); generated prefetches leave toward the L2 path one per
//! cycle while downstream credits hold out. A flush clears both queues and
//! refunds the producer's credits.

/// Engine implementations.
pub mod engine;

use std::collections::VecDeque;

use tracing::debug;

use crate::config::{PrefetcherConfig, PrefetcherType};
use crate::core::memory_access::MemoryAccessInfoPtr;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

use engine::{NextLineEngine, PrefetchEngine, StrideEngine};

/// Prefetcher statistics.
#[derive(Debug, Default)]
pub struct PrefetcherStats {
    /// Demand accesses observed.
    pub accesses_observed: u64,
    /// Prefetches emitted downstream.
    pub prefetches_emitted: u64,
    /// Flushes handled.
    pub flushes: u64,
}

/// The prefetcher unit.
pub struct Prefetcher {
    enabled: bool,
    engine: Box<dyn PrefetchEngine>,
    req_queue: VecDeque<MemoryAccessInfoPtr>,
    req_queue_size: u32,
    credits: Credits,
    /// Counters.
    pub stats: PrefetcherStats,
}

impl Prefetcher {
    /// Builds the prefetcher with the configured engine.
    pub fn new(config: &PrefetcherConfig) -> Self {
        let engine: Box<dyn PrefetchEngine> = match config.prefetcher_type {
            PrefetcherType::NextLine => Box::new(NextLineEngine::new(
                config.num_to_prefetch,
                config.cacheline_size,
            )),
            PrefetcherType::Stride => Box::new(StrideEngine::new(
                config.num_to_prefetch,
                config.cacheline_size,
                config.stride_table_size,
                config.stride_confidence_threshold,
            )),
        };
        let mut credits = Credits::new();
        credits.add(config.req_queue_size);
        Self {
            enabled: config.enable_prefetcher,
            engine,
            req_queue: VecDeque::new(),
            req_queue_size: config.req_queue_size,
            credits,
            stats: PrefetcherStats::default(),
        }
    }

    /// Startup: grant ingress credits to the producer.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        if self.enabled {
            let _ = sched.schedule(
                SimEvent::PrefetcherIngressCredits(self.req_queue_size),
                0,
                Phase::Update,
            );
        }
    }

    /// A demand access from the producer.
    pub fn process_incoming_req(&mut self, mem: MemoryAccessInfoPtr, sched: &mut Sched) {
        assert!(
            (self.req_queue.len() as u32) < self.req_queue_size,
            "prefetcher ingress queue overflows"
        );
        self.req_queue.push_back(mem);
        let _ = sched.schedule_unique(SimEvent::PrefetcherHandleIncoming, 0, Phase::Tick);
    }

    /// Services one ingress entry per cycle.
    pub fn handle_incoming(&mut self, sched: &mut Sched) {
        let Some(access) = self.req_queue.pop_front() else {
            return;
        };
        let _ = sched.schedule(SimEvent::PrefetcherIngressCredits(1), 0, Phase::Update);

        if self.enabled {
            self.stats.accesses_observed += 1;
            if self.engine.handle_memory_access(&access) && self.credits.has_any() {
                let _ = sched.schedule_unique(SimEvent::PrefetcherGenerate, 0, Phase::Tick);
            }
        }
        if !self.req_queue.is_empty() {
            let _ = sched.schedule_unique(SimEvent::PrefetcherHandleIncoming, 1, Phase::Tick);
        }
    }

    /// Downstream credits refunded.
    pub fn receive_queue_credits(&mut self, credits: u32, sched: &mut Sched) {
        self.credits.add(credits);
        if self.enabled && self.engine.is_prefetch_ready() {
            let _ = sched.schedule_unique(SimEvent::PrefetcherGenerate, 0, Phase::Tick);
        }
    }

    /// Emits one prefetch under credits.
    pub fn generate_prefetch(&mut self, sched: &mut Sched) {
        if !self.enabled {
            return;
        }
        if self.engine.is_prefetch_ready() && self.credits.has_any() {
            let access = self.engine.prefetch_memory_access();
            self.engine.pop_prefetch_memory_access();
            self.credits.consume(1);
            self.stats.prefetches_emitted += 1;
            debug!(paddr = access.borrow().paddr, "emitting prefetch");
            let _ = sched.schedule(SimEvent::PrefetchEmit(access), 1, Phase::Update);

            if self.engine.is_prefetch_ready() && self.credits.has_any() {
                let _ = sched.schedule_unique(SimEvent::PrefetcherGenerate, 1, Phase::Tick);
            }
        }
    }

    /// Flush: clear both queues and refund the producer.
    pub fn handle_flush(&mut self, sched: &mut Sched) {
        self.stats.flushes += 1;
        if self.enabled && !self.req_queue.is_empty() {
            let _ = sched.schedule(
                SimEvent::PrefetcherIngressCredits(self.req_queue.len() as u32),
                0,
                Phase::Update,
            );
        }
        self.req_queue.clear();
        while self.engine.is_prefetch_ready() {
            self.engine.pop_prefetch_memory_access();
        }
        sched.cancel_unique(&SimEvent::PrefetcherGenerate);
        sched.cancel_unique(&SimEvent::PrefetcherHandleIncoming);
    }

    /// True while a prefetch is waiting (test visibility).
    pub fn is_prefetch_ready(&self) -> bool {
        self.engine.is_prefetch_ready()
    }

    /// Downstream credits currently held (test visibility).
    pub fn credit_count(&self) -> u32 {
        self.credits.available()
    }
}
