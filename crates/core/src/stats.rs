//! Simulation statistics aggregation and reporting.
//!
//! Each unit owns its counters; this module gathers them into one report
//! with sections:
//! 1. **Summary:** cycles, retired instructions/uops, IPC.
//! 2. **Rename:** stall taxonomy, width histogram, move eliminations.
//! 3. **Branch:** predictor traffic, mismatches, mispredictions.
//! 4. **Memory:** cache hit/miss counts across the hierarchy.
//! 5. **Flush:** flush counts by origin.

use crate::sim::simulator::Simulator;

/// Aggregated simulation statistics.
#[derive(Debug, Default, Clone)]
pub struct SimStats {
    /// Total simulated cycles.
    pub cycles: u64,
    /// Uops retired.
    pub uops_retired: u64,
    /// Program instructions retired.
    pub insts_retired: u64,
    /// Retired-per-cycle, the headline number.
    pub ipc: f64,

    /// Instructions renamed.
    pub insts_renamed: u64,
    /// Move eliminations.
    pub move_eliminations: u64,
    /// Rename width histogram.
    pub rename_histogram: Vec<u64>,
    /// Rename stall cycles by reason (see `rename::StallReason` order).
    pub rename_stalls: [u64; 6],

    /// BPU prediction requests.
    pub bpu_requests: u64,
    /// Two-tier mismatches amended in the FTQ.
    pub ftq_mismatches: u64,
    /// Branch mispredictions raised at execute.
    pub mispredicts: u64,

    /// ICache hits/misses.
    pub icache_hits: u64,
    pub icache_misses: u64,
    /// DCache hits/misses.
    pub dcache_hits: u64,
    pub dcache_misses: u64,
    /// L2 hits/misses.
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// TLB hits/misses.
    pub tlb_hits: u64,
    pub tlb_misses: u64,

    /// LSU replays.
    pub lsu_replays: u64,
    /// Prefetches emitted.
    pub prefetches_emitted: u64,
    /// Flushes forwarded by the manager.
    pub flushes: u64,
}

/// Valid report section names for `print_sections`.
pub const STATS_SECTIONS: &[&str] = &["summary", "rename", "branch", "memory", "flush"];

impl SimStats {
    /// Gathers counters from every unit.
    pub fn collect(sim: &Simulator) -> Self {
        let cycles = sim.sched.now().max(1);
        Self {
            cycles: sim.sched.now(),
            uops_retired: sim.rob.stats.num_retired,
            insts_retired: sim.rob.stats.num_insts_retired,
            ipc: sim.rob.stats.num_retired as f64 / cycles as f64,
            insts_renamed: sim.rename.stats.insts_renamed,
            move_eliminations: sim.rename.stats.move_eliminations,
            rename_histogram: sim.rename.stats.rename_histogram.clone(),
            rename_stalls: sim.rename.stats.stall_counts,
            bpu_requests: sim.bpu.stats.pred_requests,
            ftq_mismatches: sim.ftq.stats.mismatches,
            mispredicts: sim.br.stats.mispredicts,
            icache_hits: sim.icache.stats.hits,
            icache_misses: sim.icache.stats.misses,
            dcache_hits: sim.dcache.stats.hits,
            dcache_misses: sim.dcache.stats.misses,
            l2_hits: sim.l2cache.stats.hits,
            l2_misses: sim.l2cache.stats.misses,
            tlb_hits: sim.mmu.stats.tlb_hits,
            tlb_misses: sim.mmu.stats.tlb_misses,
            lsu_replays: sim.lsu.stats.replays,
            prefetches_emitted: sim.prefetcher.stats.prefetches_emitted,
            flushes: sim.flush_manager.num_forwarded,
        }
    }

    /// Prints the requested sections; an empty slice prints everything.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);

        if want("summary") {
            println!("\n==========================================================");
            println!("RISC-V PERFORMANCE MODEL STATISTICS");
            println!("==========================================================");
            println!("sim_cycles               {}", self.cycles);
            println!("total_number_retired     {}", self.uops_retired);
            println!("sim_insts                {}", self.insts_retired);
            println!("sim_ipc                  {:.4}", self.ipc);
            println!("----------------------------------------------------------");
        }
        if want("rename") {
            const STALL_NAMES: [&str; 6] = [
                "NO_DECODE_INSTS",
                "NO_DISPATCH_CREDITS",
                "NO_INTEGER_RENAMES",
                "NO_FLOAT_RENAMES",
                "NO_VECTOR_RENAMES",
                "NOT_STALLED",
            ];
            println!("RENAME");
            println!("  insts_renamed          {}", self.insts_renamed);
            println!("  move_eliminations      {}", self.move_eliminations);
            for (i, count) in self.rename_histogram.iter().enumerate() {
                println!("  rename_width[{i}]        {count}");
            }
            for (name, count) in STALL_NAMES.iter().zip(self.rename_stalls.iter()) {
                println!("  stall.{:<20} {}", name, count);
            }
            println!("----------------------------------------------------------");
        }
        if want("branch") {
            println!("BRANCH PREDICTION");
            println!("  bpu.requests           {}", self.bpu_requests);
            println!("  ftq.mismatches         {}", self.ftq_mismatches);
            println!("  bp.mispredicts         {}", self.mispredicts);
            println!("----------------------------------------------------------");
        }
        if want("memory") {
            let print_cache = |name: &str, hits: u64, misses: u64| {
                let total = hits + misses;
                let miss_rate = if total > 0 {
                    misses as f64 / total as f64 * 100.0
                } else {
                    0.0
                };
                println!(
                    "  {:<6} accesses: {:<10} | hits: {:<10} | miss_rate: {:.2}%",
                    name, total, hits, miss_rate
                );
            };
            println!("MEMORY HIERARCHY");
            print_cache("IL1", self.icache_hits, self.icache_misses);
            print_cache("DL1", self.dcache_hits, self.dcache_misses);
            print_cache("L2", self.l2_hits, self.l2_misses);
            print_cache("TLB", self.tlb_hits, self.tlb_misses);
            println!("  lsu.replays            {}", self.lsu_replays);
            println!("  prefetches_emitted     {}", self.prefetches_emitted);
            println!("----------------------------------------------------------");
        }
        if want("flush") {
            println!("FLUSHES");
            println!("  flushes_forwarded      {}", self.flushes);
        }
        println!("==========================================================");
    }

    /// Prints everything.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}
