//! First-tier base predictor: PHT + BTB + RAS.
//!
//! Answers in one cycle. The pattern history table holds saturating
//! counters of configurable width indexed by a PC/GHR hash; the branch
//! target buffer is a bounded PC-to-target map; the return address stack
//! has a configurable overwrite-on-overflow policy.

use std::collections::HashMap;

/// Pattern history table of saturating counters.
pub struct PatternHistoryTable {
    counters: Vec<u8>,
    max_value: u8,
    taken_threshold: u8,
}

impl PatternHistoryTable {
    /// Creates a PHT with `size` counters of `ctr_bits` width.
    pub fn new(size: u32, ctr_bits: u32) -> Self {
        assert!(size.is_power_of_two(), "PHT size must be a power of two");
        assert!((1..=8).contains(&ctr_bits), "PHT counter bits must be 1..=8");
        let max_value = ((1u16 << ctr_bits) - 1) as u8;
        Self {
            counters: vec![0; size as usize],
            max_value,
            taken_threshold: ((1u16 << ctr_bits) / 2) as u8,
        }
    }

    #[inline]
    fn mask(&self) -> usize {
        self.counters.len() - 1
    }

    /// Predicted direction for an index.
    pub fn predict(&self, idx: usize) -> bool {
        self.counters[idx & self.mask()] >= self.taken_threshold
    }

    /// Raw counter value (test visibility).
    pub fn counter(&self, idx: usize) -> u8 {
        self.counters[idx & self.mask()]
    }

    /// Saturating update toward the observed direction.
    pub fn update(&mut self, idx: usize, taken: bool) {
        let mask = self.mask();
        let ctr = &mut self.counters[idx & mask];
        if taken {
            if *ctr < self.max_value {
                *ctr += 1;
            }
        } else if *ctr > 0 {
            *ctr -= 1;
        }
    }

    /// Forces a counter to saturation in one direction (warm-up helper).
    pub fn saturate(&mut self, idx: usize, taken: bool) {
        let mask = self.mask();
        self.counters[idx & mask] = if taken { self.max_value } else { 0 };
    }
}

/// Bounded branch target buffer.
pub struct BranchTargetBuffer {
    entries: HashMap<u64, u64>,
    capacity: usize,
}

impl BranchTargetBuffer {
    /// Creates a BTB holding up to `capacity` entries.
    pub fn new(capacity: u32) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity as usize,
        }
    }

    /// Predicted target for a PC.
    pub fn lookup(&self, pc: u64) -> Option<u64> {
        self.entries.get(&pc).copied()
    }

    /// Installs or refreshes a target. Full tables drop new PCs.
    pub fn update(&mut self, pc: u64, target: u64) -> bool {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&pc) {
            return false;
        }
        let _ = self.entries.insert(pc, target);
        true
    }
}

/// Return address stack with a configurable overflow policy.
pub struct ReturnAddressStack {
    stack: Vec<u64>,
    capacity: usize,
    overwrite_on_full: bool,
}

impl ReturnAddressStack {
    /// Creates a RAS of the given depth.
    pub fn new(capacity: u32, overwrite_on_full: bool) -> Self {
        Self {
            stack: Vec::with_capacity(capacity as usize),
            capacity: capacity as usize,
            overwrite_on_full,
        }
    }

    /// Pushes a return address. On overflow either the oldest entry is
    /// dropped (overwrite policy) or the push is ignored.
    pub fn push(&mut self, addr: u64) {
        if self.stack.len() == self.capacity {
            if !self.overwrite_on_full {
                return;
            }
            let _ = self.stack.remove(0);
        }
        self.stack.push(addr);
    }

    /// Pops the predicted return address.
    pub fn pop(&mut self) -> Option<u64> {
        self.stack.pop()
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// The combined first-tier predictor.
pub struct BasePredictor {
    /// Direction counters.
    pub pht: PatternHistoryTable,
    /// Target map.
    pub btb: BranchTargetBuffer,
    /// Return address stack.
    pub ras: ReturnAddressStack,
    ghr_hash_mask: u64,
}

impl BasePredictor {
    /// Builds the predictor from its table geometries.
    pub fn new(
        pht_size: u32,
        ctr_bits: u32,
        btb_size: u32,
        ras_size: u32,
        ras_enable_overwrite: bool,
        ghr_hash_bits: u32,
    ) -> Self {
        Self {
            pht: PatternHistoryTable::new(pht_size, ctr_bits),
            btb: BranchTargetBuffer::new(btb_size),
            ras: ReturnAddressStack::new(ras_size, ras_enable_overwrite),
            ghr_hash_mask: (1u64 << ghr_hash_bits) - 1,
        }
    }

    fn index(&self, pc: u64, ghr: u64) -> usize {
        ((pc >> 2) ^ (ghr & self.ghr_hash_mask)) as usize
    }

    /// One-cycle prediction: direction from the PHT, target from the BTB
    /// (fall-through when the BTB has no entry).
    pub fn predict(&self, pc: u64, ghr: u64) -> (bool, u64) {
        let taken = self.pht.predict(self.index(pc, ghr));
        let target = self.btb.lookup(pc).unwrap_or(pc + 4);
        (taken && self.btb.lookup(pc).is_some(), target)
    }

    /// Ground-truth update from retirement.
    pub fn update(&mut self, pc: u64, ghr: u64, taken: bool, target: u64) {
        self.pht.update(self.index(pc, ghr), taken);
        if taken {
            let _ = self.btb.update(pc, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pht_saturates() {
        let mut pht = PatternHistoryTable::new(16, 2);
        for _ in 0..10 {
            pht.update(3, true);
        }
        assert_eq!(pht.counter(3), 3);
        assert!(pht.predict(3));
        for _ in 0..10 {
            pht.update(3, false);
        }
        assert_eq!(pht.counter(3), 0);
        assert!(!pht.predict(3));
    }

    #[test]
    fn test_btb_bounded() {
        let mut btb = BranchTargetBuffer::new(2);
        assert!(btb.update(0x10, 0x100));
        assert!(btb.update(0x20, 0x200));
        assert!(!btb.update(0x30, 0x300));
        // Refreshing an existing entry still works at capacity.
        assert!(btb.update(0x10, 0x108));
        assert_eq!(btb.lookup(0x10), Some(0x108));
        assert_eq!(btb.lookup(0x30), None);
    }

    #[test]
    fn test_ras_overwrite_policy() {
        let mut ras = ReturnAddressStack::new(2, true);
        ras.push(1);
        ras.push(2);
        ras.push(3);
        assert_eq!(ras.len(), 2);
        assert_eq!(ras.pop(), Some(3));
        assert_eq!(ras.pop(), Some(2));

        let mut fixed = ReturnAddressStack::new(2, false);
        fixed.push(1);
        fixed.push(2);
        fixed.push(3);
        assert_eq!(fixed.pop(), Some(2));
    }

    #[test]
    fn test_trained_predict_taken_with_target() {
        let mut bp = BasePredictor::new(64, 2, 16, 4, true, 4);
        for _ in 0..4 {
            bp.update(0x1000, 0, true, 0x2000);
        }
        let (taken, target) = bp.predict(0x1000, 0);
        assert!(taken);
        assert_eq!(target, 0x2000);
    }

    #[test]
    fn test_cold_predicts_not_taken() {
        let bp = BasePredictor::new(64, 2, 16, 4, true, 4);
        let (taken, target) = bp.predict(0x1000, 0);
        assert!(!taken);
        assert_eq!(target, 0x1004);
    }
}
