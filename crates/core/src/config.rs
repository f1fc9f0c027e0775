//! Configuration system for the performance simulator.
//!
//! This module defines all configuration structures used to parameterize
//! the simulated machine. It provides:
//! 1. **Defaults:** baseline machine constants (queue depths, cache geometry,
//!    predictor sizes).
//! 2. **Structures:** hierarchical config for every pipeline unit.
//! 3. **Validation:** fatal build-time checks (zero MSHR entries, zero stage
//!    lengths, malformed or overlapping mapped devices).
//!
//! Configuration is supplied as JSON (`Config` derives `Deserialize`) or via
//! `Config::default()`.

use serde::Deserialize;

use crate::common::error::SimError;
use crate::common::types::MAX_PHYS_REGS;
use crate::core::cache_model::ReplacementPolicy;

/// Default configuration constants.
mod defaults {
    /// Instructions fetched per cycle.
    pub const NUM_TO_FETCH: u32 = 4;
    /// Fetch buffer capacity, in cache blocks.
    pub const FETCH_BUFFER_SIZE: u32 = 8;
    /// ICache block width in bytes; fetch groups never span a block.
    pub const BLOCK_WIDTH: u32 = 32;

    /// Decode input queue depth (credits granted to Fetch).
    pub const FETCH_QUEUE_SIZE: u32 = 10;
    /// Instructions decoded per cycle.
    pub const NUM_TO_DECODE: u32 = 4;

    /// Instructions renamed per cycle.
    pub const NUM_TO_RENAME: u32 = 4;
    /// Rename input (uop) queue depth.
    pub const RENAME_QUEUE_DEPTH: u32 = 10;
    /// Physical registers per register file.
    pub const NUM_RENAMES: u32 = 64;

    /// Dispatch input queue depth.
    pub const DISPATCH_QUEUE_DEPTH: u32 = 10;
    /// Execution-unit issue queue size (credits granted to Dispatch).
    pub const EXEC_QUEUE_SIZE: u32 = 8;
    /// ALU execute latency.
    pub const ALU_LATENCY: u64 = 1;
    /// FPU execute latency.
    pub const FPU_LATENCY: u64 = 3;
    /// Branch resolve latency.
    pub const BR_LATENCY: u64 = 1;

    /// LSU issue queue size.
    pub const LDST_INST_QUEUE_SIZE: u32 = 8;
    /// LSU replay buffer size.
    pub const REPLAY_BUFFER_SIZE: u32 = 8;
    /// Delay before a replayed access becomes ready again.
    pub const REPLAY_ISSUE_DELAY: u64 = 3;
    /// MMU lookup stage length in the LSU pipe.
    pub const MMU_LOOKUP_STAGE_LENGTH: u32 = 1;
    /// Cache lookup stage length in the LSU pipe.
    pub const CACHE_LOOKUP_STAGE_LENGTH: u32 = 1;
    /// Cache read stage length in the LSU pipe.
    pub const CACHE_READ_STAGE_LENGTH: u32 = 1;

    /// MMU hit latency.
    pub const MMU_LATENCY: u64 = 1;
    /// TLB reload latency after a miss.
    pub const TLB_RELOAD_LATENCY: u64 = 20;
    /// TLB entry count.
    pub const TLB_ENTRIES: u32 = 32;
    /// Page size shift (4 KiB pages).
    pub const PAGE_SHIFT: u32 = 12;

    /// L1 line size in bytes.
    pub const L1_LINE_SIZE: u32 = 64;
    /// L1 size in KiB.
    pub const L1_SIZE_KB: u32 = 32;
    /// L1 associativity.
    pub const L1_ASSOCIATIVITY: u32 = 8;
    /// L1 hit latency.
    pub const CACHE_LATENCY: u64 = 1;
    /// DCache MSHR file size.
    pub const MSHR_ENTRIES: u32 = 8;
    /// Coalesced loads buffered per MSHR entry.
    pub const LOAD_MISS_QUEUE_SIZE: u32 = 8;

    /// L2 line size in bytes.
    pub const L2_LINE_SIZE: u32 = 64;
    /// L2 size in KiB.
    pub const L2_SIZE_KB: u32 = 512;
    /// L2 associativity.
    pub const L2_ASSOCIATIVITY: u32 = 16;
    /// Credits the L2 holds toward the BIU.
    pub const L2CACHE_BIU_CREDITS: u32 = 4;
    /// L2 response latency in cycles.
    pub const L2CACHE_LATENCY: u64 = 10;
    /// L2 input queue sizes (per channel).
    pub const L2_REQ_QUEUE_SIZE: u32 = 8;
    /// L2 DCache-channel queue size; also carries prefetch traffic.
    pub const L2_DCACHE_REQ_QUEUE_SIZE: u32 = 16;
    /// L2 pipeline request queue size.
    pub const PIPELINE_REQ_QUEUE_SIZE: u32 = 16;
    /// L2 miss pending buffer size.
    pub const MISS_PENDING_BUFFER_SIZE: u32 = 8;

    /// BIU request queue size (credits granted to L2).
    pub const BIU_REQ_QUEUE_SIZE: u32 = 4;
    /// BIU/memory round-trip latency.
    pub const BIU_LATENCY: u64 = 40;

    /// Instructions retired per cycle.
    pub const NUM_TO_RETIRE: u32 = 4;
    /// ROB depth.
    pub const RETIRE_QUEUE_DEPTH: u32 = 30;
    /// Retire heartbeat interval (console progress line).
    pub const RETIRE_HEARTBEAT: u64 = 1_000_000;
    /// Forward-progress watchdog interval in cycles.
    pub const RETIRE_TIMEOUT_INTERVAL: u64 = 10_000;

    /// Branch history bits kept in the GHR.
    pub const GHR_SIZE: u32 = 64;
    /// GHR bits hashed with the PC to index the PHT.
    pub const GHR_HASH_BITS: u32 = 4;
    /// PHT entry count.
    pub const PHT_SIZE: u32 = 1024;
    /// PHT counter width in bits.
    pub const CTR_BITS: u32 = 2;
    /// BTB capacity.
    pub const BTB_SIZE: u32 = 512;
    /// RAS depth.
    pub const RAS_SIZE: u32 = 16;

    /// TAGE bimodal table size.
    pub const TAGE_BIM_TABLE_SIZE: u32 = 1024;
    /// TAGE bimodal counter bits.
    pub const TAGE_BIM_CTR_BITS: u32 = 2;
    /// Number of TAGE tagged components.
    pub const TAGE_TAGGED_TABLE_NUM: u32 = 6;
    /// Entries per tagged component.
    pub const TAGE_TABLE_SIZE: u32 = 1024;
    /// Tagged component counter bits.
    pub const TAGE_CTR_BITS: u32 = 3;
    /// Tagged component useful bits.
    pub const TAGE_USEFUL_BITS: u32 = 2;
    /// Shortest tagged history length.
    pub const TAGE_MIN_HIST_LEN: u32 = 4;
    /// Geometric ratio between successive history lengths.
    pub const TAGE_HIST_ALPHA: u32 = 2;
    /// Predictions between useful-bit reset epochs.
    pub const TAGE_RESET_USEFUL_INTERVAL: u32 = 256_000;
    /// Cycles after the first-tier output before the TAGE output.
    pub const TAGE_LATENCY: u64 = 2;

    /// FTQ capacity.
    pub const FTQ_CAPACITY: u32 = 10;
    /// Initial prediction credits granted to the BPU.
    pub const FTQ_BPU_CREDITS: u32 = 5;

    /// Prefetches emitted per trigger.
    pub const NUM_TO_PREFETCH: u32 = 1;
    /// Prefetcher line size in bytes.
    pub const PREFETCH_CACHELINE_SIZE: u32 = 64;
    /// Prefetcher ingress queue size.
    pub const PREFETCH_REQ_QUEUE_SIZE: u32 = 8;
    /// Stride table entries.
    pub const STRIDE_TABLE_SIZE: u32 = 64;
    /// Stable observations before striding prefetches.
    pub const STRIDE_CONFIDENCE_THRESHOLD: u32 = 2;
}

fn d_true() -> bool {
    true
}

/// Root configuration for the simulated machine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub decode: DecodeConfig,
    pub rename: RenameConfig,
    pub dispatch: DispatchConfig,
    pub lsu: LsuConfig,
    pub mmu: MmuConfig,
    pub icache: IcacheConfig,
    pub dcache: DcacheConfig,
    pub l2cache: L2CacheConfig,
    pub biu: BiuConfig,
    pub rob: RobConfig,
    pub bpu: BpuConfig,
    pub ftq: FtqConfig,
    pub prefetcher: PrefetcherConfig,
}

impl Config {
    /// Parses a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| SimError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates parameter combinations that would build a broken machine.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.dcache.mshr_entries == 0 {
            return Err(SimError::config("there must be at least 1 MSHR entry"));
        }
        if self.lsu.mmu_lookup_stage_length == 0
            || self.lsu.cache_lookup_stage_length == 0
            || self.lsu.cache_read_stage_length == 0
        {
            return Err(SimError::config(
                "LSU pipeline stage lengths must be at least one cycle",
            ));
        }
        for (name, renames) in [
            ("num_integer_renames", self.rename.num_integer_renames),
            ("num_float_renames", self.rename.num_float_renames),
            ("num_vector_renames", self.rename.num_vector_renames),
        ] {
            if renames <= 32 || renames > MAX_PHYS_REGS {
                return Err(SimError::config(format!(
                    "{name} must be in (32, {MAX_PHYS_REGS}], got {renames}"
                )));
            }
        }
        for (name, line) in [
            ("icache.l1_line_size", self.icache.l1_line_size),
            ("dcache.l1_line_size", self.dcache.l1_line_size),
            ("l2cache.l2_line_size", self.l2cache.l2_line_size),
        ] {
            if line == 0 || !line.is_power_of_two() {
                return Err(SimError::config(format!(
                    "{name} must be a power of two, got {line}"
                )));
            }
        }
        if !self.bpu.pht_size.is_power_of_two() || !self.bpu.tage.tage_table_size.is_power_of_two()
        {
            return Err(SimError::config(
                "predictor table sizes must be powers of two",
            ));
        }
        if self.bpu.ghr_size == 0 || self.bpu.ghr_size > 64 {
            return Err(SimError::config("ghr_size must be in [1, 64]"));
        }
        if self.ftq.ftq_capacity == 0 {
            return Err(SimError::config("ftq_capacity must be non-zero"));
        }
        if self.rob.retire_timeout_interval == 0 {
            return Err(SimError::config("retire_timeout_interval must be non-zero"));
        }
        if self.l2cache.l2cache_biu_credits > self.biu.biu_req_queue_size {
            return Err(SimError::config(
                "l2cache_biu_credits cannot exceed biu_req_queue_size",
            ));
        }
        // Prefetch traffic rides the DCache channel into L2 alongside the
        // single outstanding demand miss.
        if self.prefetcher.enable_prefetcher
            && self.l2cache.dcache_req_queue_size < self.prefetcher.req_queue_size + 1
        {
            return Err(SimError::config(
                "dcache_req_queue_size must cover the prefetch queue plus one demand miss",
            ));
        }
        self.biu.validate_devices()?;
        Ok(())
    }
}

/// Fetch unit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Instructions sent to decode per cycle.
    pub num_to_fetch: u32,
    /// Fetch buffer capacity in cache blocks.
    pub fetch_buffer_size: u32,
    /// ICache block width in bytes (groups never span a block).
    pub block_width: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            num_to_fetch: defaults::NUM_TO_FETCH,
            fetch_buffer_size: defaults::FETCH_BUFFER_SIZE,
            block_width: defaults::BLOCK_WIDTH,
        }
    }
}

/// Decode unit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Decode input queue depth; credits granted to Fetch.
    pub fetch_queue_size: u32,
    /// Instructions decoded per cycle.
    pub num_to_decode: u32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            fetch_queue_size: defaults::FETCH_QUEUE_SIZE,
            num_to_decode: defaults::NUM_TO_DECODE,
        }
    }
}

/// Rename unit configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenameConfig {
    /// Instructions renamed per cycle.
    pub num_to_rename: u32,
    /// Rename input queue depth; credits granted to Decode.
    pub rename_queue_depth: u32,
    /// Physical integer registers.
    pub num_integer_renames: u32,
    /// Physical float registers.
    pub num_float_renames: u32,
    /// Physical vector registers.
    pub num_vector_renames: u32,
    /// Rename one instruction at a time when the group does not fit.
    pub partial_rename: bool,
    /// Enable move elimination.
    pub move_elimination: bool,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            num_to_rename: defaults::NUM_TO_RENAME,
            rename_queue_depth: defaults::RENAME_QUEUE_DEPTH,
            num_integer_renames: defaults::NUM_RENAMES,
            num_float_renames: defaults::NUM_RENAMES,
            num_vector_renames: defaults::NUM_RENAMES,
            partial_rename: false,
            move_elimination: false,
        }
    }
}

/// Dispatch and execution-pipe configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dispatch input queue depth; credits granted to Rename.
    pub dispatch_queue_depth: u32,
    /// ALU issue queue size (credits to Dispatch).
    pub alu_queue_size: u32,
    /// FPU issue queue size.
    pub fpu_queue_size: u32,
    /// Branch unit issue queue size.
    pub br_queue_size: u32,
    /// ALU execute latency in cycles.
    pub alu_latency: u64,
    /// FPU execute latency in cycles.
    pub fpu_latency: u64,
    /// Branch resolve latency in cycles.
    pub br_latency: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_queue_depth: defaults::DISPATCH_QUEUE_DEPTH,
            alu_queue_size: defaults::EXEC_QUEUE_SIZE,
            fpu_queue_size: defaults::EXEC_QUEUE_SIZE,
            br_queue_size: defaults::EXEC_QUEUE_SIZE,
            alu_latency: defaults::ALU_LATENCY,
            fpu_latency: defaults::FPU_LATENCY,
            br_latency: defaults::BR_LATENCY,
        }
    }
}

/// LSU configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LsuConfig {
    /// Issue queue size (credits granted to Dispatch).
    pub ldst_inst_queue_size: u32,
    /// Replay buffer size.
    pub replay_buffer_size: u32,
    /// Cycles before a replayed access becomes ready again.
    pub replay_issue_delay: u64,
    /// Allow loads to issue before older stores resolve.
    pub allow_speculative_load_exec: bool,
    /// MMU lookup stage length.
    pub mmu_lookup_stage_length: u32,
    /// Cache lookup stage length.
    pub cache_lookup_stage_length: u32,
    /// Cache read stage length.
    pub cache_read_stage_length: u32,
}

impl Default for LsuConfig {
    fn default() -> Self {
        Self {
            ldst_inst_queue_size: defaults::LDST_INST_QUEUE_SIZE,
            replay_buffer_size: defaults::REPLAY_BUFFER_SIZE,
            replay_issue_delay: defaults::REPLAY_ISSUE_DELAY,
            allow_speculative_load_exec: false,
            mmu_lookup_stage_length: defaults::MMU_LOOKUP_STAGE_LENGTH,
            cache_lookup_stage_length: defaults::CACHE_LOOKUP_STAGE_LENGTH,
            cache_read_stage_length: defaults::CACHE_READ_STAGE_LENGTH,
        }
    }
}

/// MMU/TLB configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MmuConfig {
    /// Model a TLB that never misses.
    pub tlb_always_hit: bool,
    /// Lookup latency.
    pub mmu_latency: u64,
    /// Reload latency after a TLB miss.
    pub tlb_reload_latency: u64,
    /// TLB entry count.
    pub tlb_entries: u32,
    /// Page size shift.
    pub page_shift: u32,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self {
            tlb_always_hit: false,
            mmu_latency: defaults::MMU_LATENCY,
            tlb_reload_latency: defaults::TLB_RELOAD_LATENCY,
            tlb_entries: defaults::TLB_ENTRIES,
            page_shift: defaults::PAGE_SHIFT,
        }
    }
}

/// ICache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IcacheConfig {
    /// Line size in bytes.
    pub l1_line_size: u32,
    /// Cache size in KiB.
    pub l1_size_kb: u32,
    /// Associativity.
    pub l1_associativity: u32,
    /// Hit latency.
    pub cache_latency: u64,
    /// Fetch request queue size; bounds the pending-miss buffer and the
    /// credits granted to Fetch.
    pub fetch_queue_size: u32,
    /// Replacement policy.
    pub l1_replacement_policy: ReplacementPolicy,
    /// Model a cache that never misses.
    pub l1_always_hit: bool,
}

impl Default for IcacheConfig {
    fn default() -> Self {
        Self {
            l1_line_size: defaults::L1_LINE_SIZE,
            l1_size_kb: defaults::L1_SIZE_KB,
            l1_associativity: defaults::L1_ASSOCIATIVITY,
            cache_latency: defaults::CACHE_LATENCY,
            fetch_queue_size: defaults::FETCH_QUEUE_SIZE,
            l1_replacement_policy: ReplacementPolicy::default(),
            l1_always_hit: false,
        }
    }
}

/// DCache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DcacheConfig {
    /// Line size in bytes.
    pub l1_line_size: u32,
    /// Cache size in KiB.
    pub l1_size_kb: u32,
    /// Associativity.
    pub l1_associativity: u32,
    /// Hit latency.
    pub cache_latency: u64,
    /// MSHR file size.
    pub mshr_entries: u32,
    /// Coalesced loads buffered per MSHR entry.
    pub load_miss_queue_size: u32,
    /// Replacement policy.
    pub l1_replacement_policy: ReplacementPolicy,
    /// Model a cache that never misses.
    pub l1_always_hit: bool,
}

impl Default for DcacheConfig {
    fn default() -> Self {
        Self {
            l1_line_size: defaults::L1_LINE_SIZE,
            l1_size_kb: defaults::L1_SIZE_KB,
            l1_associativity: defaults::L1_ASSOCIATIVITY,
            cache_latency: defaults::CACHE_LATENCY,
            mshr_entries: defaults::MSHR_ENTRIES,
            load_miss_queue_size: defaults::LOAD_MISS_QUEUE_SIZE,
            l1_replacement_policy: ReplacementPolicy::default(),
            l1_always_hit: false,
        }
    }
}

/// L2 cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct L2CacheConfig {
    /// Line size in bytes.
    pub l2_line_size: u32,
    /// Cache size in KiB.
    pub l2_size_kb: u32,
    /// Associativity.
    pub l2_associativity: u32,
    /// Credits held toward the BIU.
    pub l2cache_biu_credits: u32,
    /// Response latency in cycles.
    pub l2cache_latency: u64,
    /// DCache request channel queue size.
    pub dcache_req_queue_size: u32,
    /// IL1 request channel queue size.
    pub il1_req_queue_size: u32,
    /// BIU response channel queue size.
    pub biu_resp_queue_size: u32,
    /// Pipeline request queue size.
    pub pipeline_req_queue_size: u32,
    /// Miss pending buffer size.
    pub miss_pending_buffer_size: u32,
    /// Replacement policy.
    pub l2_replacement_policy: ReplacementPolicy,
    /// Model a cache that never misses.
    pub l2_always_hit: bool,
}

impl Default for L2CacheConfig {
    fn default() -> Self {
        Self {
            l2_line_size: defaults::L2_LINE_SIZE,
            l2_size_kb: defaults::L2_SIZE_KB,
            l2_associativity: defaults::L2_ASSOCIATIVITY,
            l2cache_biu_credits: defaults::L2CACHE_BIU_CREDITS,
            l2cache_latency: defaults::L2CACHE_LATENCY,
            dcache_req_queue_size: defaults::L2_DCACHE_REQ_QUEUE_SIZE,
            il1_req_queue_size: defaults::L2_REQ_QUEUE_SIZE,
            biu_resp_queue_size: defaults::L2_REQ_QUEUE_SIZE,
            pipeline_req_queue_size: defaults::PIPELINE_REQ_QUEUE_SIZE,
            miss_pending_buffer_size: defaults::MISS_PENDING_BUFFER_SIZE,
            l2_replacement_policy: ReplacementPolicy::default(),
            l2_always_hit: false,
        }
    }
}

/// A memory-mapped device range routed by the BIU.
#[derive(Debug, Clone)]
pub struct MappedDevice {
    /// Base physical address.
    pub addr: u64,
    /// Range size in bytes.
    pub size: u64,
    /// Device name (port label).
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrHex {
    Num(u64),
    Str(String),
}

impl NumOrHex {
    fn value(&self) -> Result<u64, String> {
        match self {
            NumOrHex::Num(n) => Ok(*n),
            NumOrHex::Str(s) => {
                let trimmed = s.trim();
                if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))
                {
                    u64::from_str_radix(hex, 16).map_err(|e| format!("bad hex '{s}': {e}"))
                } else {
                    trimmed
                        .parse::<u64>()
                        .map_err(|e| format!("bad number '{s}': {e}"))
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for MappedDevice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (addr, size, name): (NumOrHex, NumOrHex, String) =
            Deserialize::deserialize(deserializer)?;
        Ok(MappedDevice {
            addr: addr.value().map_err(serde::de::Error::custom)?,
            size: size.value().map_err(serde::de::Error::custom)?,
            name,
        })
    }
}

/// BIU configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BiuConfig {
    /// Request queue size; credits granted to L2.
    pub biu_req_queue_size: u32,
    /// Memory round-trip latency.
    pub biu_latency: u64,
    /// Mapped device ranges, parsed from `[addr, size, "name"]` entries.
    pub mapped_devices: Vec<MappedDevice>,
}

impl BiuConfig {
    /// Rejects zero-sized and overlapping device ranges.
    pub fn validate_devices(&self) -> Result<(), SimError> {
        for device in &self.mapped_devices {
            if device.size == 0 {
                return Err(SimError::config(format!(
                    "mapped device '{}' has zero size",
                    device.name
                )));
            }
        }
        for (i, a) in self.mapped_devices.iter().enumerate() {
            for b in &self.mapped_devices[i + 1..] {
                let overlap = a.addr.max(b.addr) < (a.addr + a.size).min(b.addr + b.size);
                if overlap {
                    return Err(SimError::config(format!(
                        "overlapping mapped devices: {} [{:#x},{:#x}) and {} [{:#x},{:#x})",
                        a.name,
                        a.addr,
                        a.addr + a.size,
                        b.name,
                        b.addr,
                        b.addr + b.size
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for BiuConfig {
    fn default() -> Self {
        Self {
            biu_req_queue_size: defaults::BIU_REQ_QUEUE_SIZE,
            biu_latency: defaults::BIU_LATENCY,
            mapped_devices: Vec::new(),
        }
    }
}

/// ROB configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RobConfig {
    /// Instructions retired per cycle.
    pub num_to_retire: u32,
    /// ROB depth; credits granted to Dispatch.
    pub retire_queue_depth: u32,
    /// Stop after this many retirements (0 = run to trace end).
    pub num_insts_to_retire: u64,
    /// Console heartbeat interval in retirements.
    pub retire_heartbeat: u64,
    /// Cycles without retirement before the lockup watchdog fires.
    pub retire_timeout_interval: u64,
}

impl Default for RobConfig {
    fn default() -> Self {
        Self {
            num_to_retire: defaults::NUM_TO_RETIRE,
            retire_queue_depth: defaults::RETIRE_QUEUE_DEPTH,
            num_insts_to_retire: 0,
            retire_heartbeat: defaults::RETIRE_HEARTBEAT,
            retire_timeout_interval: defaults::RETIRE_TIMEOUT_INTERVAL,
        }
    }
}

/// TAGE second-tier predictor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TageConfig {
    /// Bimodal table size.
    pub tage_bim_table_size: u32,
    /// Bimodal counter bits.
    pub tage_bim_ctr_bits: u32,
    /// Number of tagged components.
    pub tage_tagged_table_num: u32,
    /// Entries per tagged component.
    pub tage_table_size: u32,
    /// Tagged counter bits.
    pub tage_ctr_bits: u32,
    /// Tagged useful bits.
    pub tage_useful_bits: u32,
    /// Shortest tagged history length.
    pub tage_min_hist_len: u32,
    /// Geometric ratio between successive history lengths.
    pub tage_hist_alpha: u32,
    /// Predictions between useful-bit reset epochs.
    pub tage_reset_useful_interval: u32,
    /// Cycles after the first tier before the TAGE output arrives.
    pub tage_latency: u64,
}

impl Default for TageConfig {
    fn default() -> Self {
        Self {
            tage_bim_table_size: defaults::TAGE_BIM_TABLE_SIZE,
            tage_bim_ctr_bits: defaults::TAGE_BIM_CTR_BITS,
            tage_tagged_table_num: defaults::TAGE_TAGGED_TABLE_NUM,
            tage_table_size: defaults::TAGE_TABLE_SIZE,
            tage_ctr_bits: defaults::TAGE_CTR_BITS,
            tage_useful_bits: defaults::TAGE_USEFUL_BITS,
            tage_min_hist_len: defaults::TAGE_MIN_HIST_LEN,
            tage_hist_alpha: defaults::TAGE_HIST_ALPHA,
            tage_reset_useful_interval: defaults::TAGE_RESET_USEFUL_INTERVAL,
            tage_latency: defaults::TAGE_LATENCY,
        }
    }
}

/// BPU configuration (base predictor + TAGE).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BpuConfig {
    /// Branch history bits kept in the GHR.
    pub ghr_size: u32,
    /// GHR bits hashed with the PC when indexing the PHT.
    pub ghr_hash_bits: u32,
    /// PHT entry count.
    pub pht_size: u32,
    /// PHT counter width in bits.
    pub ctr_bits: u32,
    /// BTB capacity.
    pub btb_size: u32,
    /// RAS depth.
    pub ras_size: u32,
    /// Overwrite the oldest RAS entry on overflow.
    #[serde(default = "d_true")]
    pub ras_enable_overwrite: bool,
    /// TAGE second tier.
    pub tage: TageConfig,
}

impl Default for BpuConfig {
    fn default() -> Self {
        Self {
            ghr_size: defaults::GHR_SIZE,
            ghr_hash_bits: defaults::GHR_HASH_BITS,
            pht_size: defaults::PHT_SIZE,
            ctr_bits: defaults::CTR_BITS,
            btb_size: defaults::BTB_SIZE,
            ras_size: defaults::RAS_SIZE,
            ras_enable_overwrite: true,
            tage: TageConfig::default(),
        }
    }
}

/// FTQ configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FtqConfig {
    /// FTQ capacity in prediction outputs.
    pub ftq_capacity: u32,
    /// Initial prediction credits granted to the BPU.
    pub bpu_credits: u32,
}

impl Default for FtqConfig {
    fn default() -> Self {
        Self {
            ftq_capacity: defaults::FTQ_CAPACITY,
            bpu_credits: defaults::FTQ_BPU_CREDITS,
        }
    }
}

/// Prefetch engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetcherType {
    /// Prefetch the next K sequential lines.
    #[default]
    NextLine,
    /// PC-indexed stride detection.
    Stride,
}

/// Prefetcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetcherConfig {
    /// Enable the prefetcher.
    pub enable_prefetcher: bool,
    /// Engine type.
    pub prefetcher_type: PrefetcherType,
    /// Prefetches emitted per trigger.
    pub num_to_prefetch: u32,
    /// Cache line size used for alignment.
    pub cacheline_size: u32,
    /// Ingress queue size; credits granted to the producer.
    pub req_queue_size: u32,
    /// Stride table entries.
    pub stride_table_size: u32,
    /// Stable observations before striding prefetches fire.
    pub stride_confidence_threshold: u32,
}

impl Default for PrefetcherConfig {
    fn default() -> Self {
        Self {
            enable_prefetcher: false,
            prefetcher_type: PrefetcherType::NextLine,
            num_to_prefetch: defaults::NUM_TO_PREFETCH,
            cacheline_size: defaults::PREFETCH_CACHELINE_SIZE,
            req_queue_size: defaults::PREFETCH_REQ_QUEUE_SIZE,
            stride_table_size: defaults::STRIDE_TABLE_SIZE,
            stride_confidence_threshold: defaults::STRIDE_CONFIDENCE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_zero_mshr_rejected() {
        let mut config = Config::default();
        config.dcache.mshr_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_stage_length_rejected() {
        let mut config = Config::default();
        config.lsu.cache_lookup_stage_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_parse_hex_and_decimal() {
        let json = r#"{
            "biu": {
                "mapped_devices": [
                    ["0x10000000", 4096, "uart"],
                    [536870912, "0x1000", "clint"]
                ]
            }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.biu.mapped_devices[0].addr, 0x1000_0000);
        assert_eq!(config.biu.mapped_devices[0].size, 4096);
        assert_eq!(config.biu.mapped_devices[1].addr, 0x2000_0000);
        assert_eq!(config.biu.mapped_devices[1].size, 0x1000);
        assert_eq!(config.biu.mapped_devices[1].name, "clint");
    }

    #[test]
    fn test_overlapping_devices_rejected() {
        let json = r#"{
            "biu": {
                "mapped_devices": [
                    ["0x1000", "0x100", "a"],
                    ["0x1080", "0x100", "b"]
                ]
            }
        }"#;
        assert!(Config::from_json(json).is_err());
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{ "rename": { "num_to_rename": 2, "move_elimination": true } }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.rename.num_to_rename, 2);
        assert!(config.rename.move_elimination);
        assert_eq!(config.rename.num_integer_renames, 64);
    }
}
