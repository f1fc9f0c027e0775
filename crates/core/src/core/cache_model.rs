//! Set-associative cache tag model with pluggable replacement.
//!
//! A purely structural model: it tracks tags and replacement state, never
//! data. The ICache, DCache, L2 and the MMU's TLB all instantiate it with
//! their own geometry. The surface mirrors what the timing units need:
//! peek (no state change), touch-MRU on hit, allocate-with-MRU-update on
//! fill. Replacement is a small enum of variants rather than a trait
//! object — there are exactly two and they are hot.

use serde::Deserialize;

/// A single tag entry.
#[derive(Clone, Default)]
struct CacheLine {
    tag: u64,
    valid: bool,
}

/// Replacement policy selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Tree pseudo-LRU: one usage bit per way, collapsing when saturated.
    #[default]
    TreePlru,
    /// True LRU via per-line recency stamps.
    Lru,
}

enum ReplacementState {
    /// One usage bitmask per set.
    TreePlru { usage: Vec<u64> },
    /// A recency stamp per line plus a global tick.
    Lru { stamps: Vec<u64>, tick: u64 },
}

impl ReplacementState {
    fn new(policy: ReplacementPolicy, sets: u32, ways: u32) -> Self {
        match policy {
            ReplacementPolicy::TreePlru => ReplacementState::TreePlru {
                usage: vec![0; sets as usize],
            },
            ReplacementPolicy::Lru => ReplacementState::Lru {
                stamps: vec![0; (sets * ways) as usize],
                tick: 0,
            },
        }
    }

    fn touch(&mut self, set: u32, way: u32, ways: u32) {
        match self {
            ReplacementState::TreePlru { usage } => {
                let mask = 1u64 << way;
                usage[set as usize] |= mask;

                // Every way marked recently-used: collapse to the newest.
                let all_ones = (1u64 << ways) - 1;
                if (usage[set as usize] & all_ones) == all_ones {
                    usage[set as usize] = mask;
                }
            }
            ReplacementState::Lru { stamps, tick } => {
                *tick += 1;
                stamps[(set * ways + way) as usize] = *tick;
            }
        }
    }

    fn victim(&self, set: u32, ways: u32) -> u32 {
        match self {
            ReplacementState::TreePlru { usage } => {
                for way in 0..ways {
                    if (usage[set as usize] >> way) & 1 == 0 {
                        return way;
                    }
                }
                0
            }
            ReplacementState::Lru { stamps, .. } => {
                let base = (set * ways) as usize;
                let mut victim = 0;
                let mut oldest = u64::MAX;
                for way in 0..ways {
                    let stamp = stamps[base + way as usize];
                    if stamp < oldest {
                        oldest = stamp;
                        victim = way;
                    }
                }
                victim
            }
        }
    }
}

/// Set-associative tag array.
pub struct CacheModel {
    lines: Vec<CacheLine>,
    num_sets: u32,
    ways: u32,
    line_shift: u32,
    replacement: ReplacementState,
}

impl CacheModel {
    /// Builds a cache with `size_kb` KiB capacity, `line_size`-byte lines
    /// and the given associativity.
    pub fn new(size_kb: u32, line_size: u32, ways: u32) -> Self {
        Self::with_policy(size_kb, line_size, ways, ReplacementPolicy::TreePlru)
    }

    /// Builds a cache with an explicit replacement policy.
    pub fn with_policy(
        size_kb: u32,
        line_size: u32,
        ways: u32,
        policy: ReplacementPolicy,
    ) -> Self {
        assert!(line_size.is_power_of_two(), "line size must be a power of two");
        assert!(ways > 0, "cache must have at least one way");
        let num_lines = (size_kb * 1024) / line_size;
        let num_sets = (num_lines / ways).max(1);
        Self {
            lines: vec![CacheLine::default(); (num_sets * ways) as usize],
            num_sets,
            ways,
            line_shift: line_size.trailing_zeros(),
            replacement: ReplacementState::new(policy, num_sets, ways),
        }
    }

    /// Builds a fully-associative model with `entries` entries of
    /// `granule_shift`-sized granularity (used for the TLB).
    pub fn fully_associative(entries: u32, granule_shift: u32) -> Self {
        Self {
            lines: vec![CacheLine::default(); entries as usize],
            num_sets: 1,
            ways: entries,
            line_shift: granule_shift,
            replacement: ReplacementState::new(ReplacementPolicy::TreePlru, 1, entries),
        }
    }

    /// The block address containing `addr`.
    #[inline]
    pub fn block_addr(&self, addr: u64) -> u64 {
        addr >> self.line_shift << self.line_shift
    }

    /// The line shift (log2 of the line size).
    #[inline]
    pub fn line_shift(&self) -> u32 {
        self.line_shift
    }

    #[inline]
    fn set_of(&self, addr: u64) -> u32 {
        ((addr >> self.line_shift) % u64::from(self.num_sets)) as u32
    }

    #[inline]
    fn tag_of(&self, addr: u64) -> u64 {
        (addr >> self.line_shift) / u64::from(self.num_sets)
    }

    fn find_way(&self, addr: u64) -> Option<u32> {
        let set = self.set_of(addr);
        let tag = self.tag_of(addr);
        let base = (set * self.ways) as usize;
        (0..self.ways).find(|&way| {
            let line = &self.lines[base + way as usize];
            line.valid && line.tag == tag
        })
    }

    /// Tag lookup with no replacement-state change.
    pub fn peek(&self, addr: u64) -> bool {
        self.find_way(addr).is_some()
    }

    /// Marks the line holding `addr` most-recently used. Call on hits.
    pub fn touch_mru(&mut self, addr: u64) {
        if let Some(way) = self.find_way(addr) {
            let set = self.set_of(addr);
            self.replacement.touch(set, way, self.ways);
        }
    }

    /// Fills the line for `addr`, evicting the replacement victim, and
    /// marks it most-recently used.
    pub fn allocate_with_mru_update(&mut self, addr: u64) {
        let set = self.set_of(addr);
        let tag = self.tag_of(addr);
        let base = (set * self.ways) as usize;

        // Prefer an invalid way before evicting.
        let way = (0..self.ways)
            .find(|&w| !self.lines[base + w as usize].valid)
            .unwrap_or_else(|| self.replacement.victim(set, self.ways));

        self.lines[base + way as usize] = CacheLine { tag, valid: true };
        self.replacement.touch(set, way, self.ways);
    }
}
