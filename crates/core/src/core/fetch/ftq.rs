//! Fetch target queue.
//!
//! A deque of prediction outputs plus a cursor marking the next entry to
//! forward to Fetch. First-tier predictions append at the tail;
//! second-tier predictions amend an earlier entry in place on
//! disagreement and rewind the cursor to it. Entries persist past the
//! cursor until the corresponding branch retires, so late second-tier
//! amendments still find them.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::FtqConfig;
use crate::core::fetch::bpu::PredictionOutput;
use crate::sim::event::{Sched, SimEvent};
use crate::sim::ports::Credits;
use crate::sim::scheduler::Phase;

/// FTQ statistics.
#[derive(Debug, Default)]
pub struct FtqStats {
    /// First-tier predictions accepted.
    pub first_tier_in: u64,
    /// Second-tier predictions observed.
    pub second_tier_in: u64,
    /// Two-tier direction disagreements.
    pub mismatches: u64,
    /// Not-taken-to-taken flips with no usable target.
    pub unresolved_flips: u64,
    /// Predictions forwarded to Fetch.
    pub forwarded: u64,
    /// Entries deallocated by branch commit.
    pub committed: u64,
}

/// The fetch target queue.
pub struct Ftq {
    queue: VecDeque<PredictionOutput>,
    cursor: usize,
    capacity: usize,
    initial_bpu_credits: u32,
    fetch_credits: Credits,
    /// Counters.
    pub stats: FtqStats,
}

impl Ftq {
    /// Builds the FTQ from configuration.
    pub fn new(config: &FtqConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            cursor: 0,
            capacity: config.ftq_capacity as usize,
            initial_bpu_credits: config.bpu_credits,
            fetch_credits: Credits::new(),
            stats: FtqStats::default(),
        }
    }

    /// Startup: grant prediction credits to the BPU.
    pub fn send_initial_credits(&mut self, sched: &mut Sched) {
        let _ = sched.schedule(
            SimEvent::FtqCreditsToBpu(self.initial_bpu_credits),
            0,
            Phase::Update,
        );
    }

    /// A first-tier prediction arrived.
    pub fn get_first_prediction(&mut self, pred: PredictionOutput, sched: &mut Sched) {
        assert!(
            self.queue.len() < self.capacity,
            "FTQ overflow: BPU sent past its credits"
        );
        self.stats.first_tier_in += 1;
        self.queue.push_back(pred);
        self.send_prediction(sched);
    }

    /// A second-tier prediction arrived; amend the matching entry on
    /// disagreement and rewind the cursor to re-forward it.
    pub fn get_second_prediction(&mut self, pred: PredictionOutput, sched: &mut Sched) {
        self.stats.second_tier_in += 1;
        let Some(idx) = self.queue.iter().position(|e| e.pc == pred.pc) else {
            return;
        };
        if self.queue[idx].taken == pred.taken {
            return;
        }

        self.stats.mismatches += 1;
        debug!(pc = pred.pc, "two-tier prediction mismatch");
        if self.queue[idx].taken && !pred.taken {
            // Taken flipped to not-taken: redirect to the fall-through.
            self.queue[idx].taken = false;
            self.queue[idx].target = pred.pc + 4;
        } else if pred.target != pred.pc + 4 {
            // Not-taken flipped to taken and the second tier carried a real
            // target (BTB hit on the tagged path).
            self.queue[idx].taken = true;
            self.queue[idx].target = pred.target;
        } else {
            // No usable target for the flip; keep the entry and count it.
            self.stats.unresolved_flips += 1;
            return;
        }

        if self.cursor > idx {
            // The amended entry was already forwarded; re-steer prediction
            // and re-forward from it.
            self.cursor = idx;
            let _ = sched.schedule(
                SimEvent::BpuRedirect(self.queue[idx].target),
                0,
                Phase::Update,
            );
        }
        self.send_prediction(sched);
    }

    /// Fetch refunded prediction-buffer credits.
    pub fn get_fetch_credits(&mut self, credits: u32, sched: &mut Sched) {
        self.fetch_credits.add(credits);
        self.send_prediction(sched);
    }

    /// Forwards entries at the cursor to Fetch, one per credit, refunding
    /// a BPU credit per forwarded entry.
    pub fn send_prediction(&mut self, sched: &mut Sched) {
        while self.fetch_credits.has_any() && self.cursor < self.queue.len() {
            self.fetch_credits.consume(1);
            let output = self.queue[self.cursor];
            self.cursor += 1;
            self.stats.forwarded += 1;
            debug!(pc = output.pc, taken = output.taken, "FTQ forwards prediction");
            let _ = sched.schedule(SimEvent::FetchPrediction(output), 1, Phase::Update);
            let _ = sched.schedule(SimEvent::FtqCreditsToBpu(1), 0, Phase::Update);
        }
    }

    /// A branch retired; deallocate its entry at the head.
    pub fn branch_commit(&mut self, pc: u64) {
        if self.queue.front().is_some_and(|e| e.pc == pc) {
            let _ = self.queue.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
            self.stats.committed += 1;
        }
    }

    /// Pipeline flush: drop everything, refunding BPU credits for entries
    /// that were never forwarded.
    pub fn handle_flush(&mut self, sched: &mut Sched) {
        let unforwarded = (self.queue.len() - self.cursor) as u32;
        if unforwarded > 0 {
            let _ = sched.schedule(SimEvent::FtqCreditsToBpu(unforwarded), 0, Phase::Update);
        }
        self.queue.clear();
        self.cursor = 0;
    }

    /// Occupancy (test visibility).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Entry lookup by PC (test visibility).
    pub fn entry_for(&self, pc: u64) -> Option<&PredictionOutput> {
        self.queue.iter().find(|e| e.pc == pc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftq_with_credits(fetch_credits: u32) -> (Ftq, Sched) {
        let mut ftq = Ftq::new(&FtqConfig::default());
        let mut sched = Sched::new();
        ftq.get_fetch_credits(fetch_credits, &mut sched);
        // Drain any no-op sends from the credit grant.
        while sched.pop().is_some() {}
        (ftq, sched)
    }

    fn pred(pc: u64, taken: bool, target: u64) -> PredictionOutput {
        PredictionOutput { pc, taken, target }
    }

    #[test]
    fn test_first_prediction_forwards_under_credit() {
        let (mut ftq, mut sched) = ftq_with_credits(1);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);

        let mut saw_fetch = false;
        let mut bpu_refund = 0;
        while let Some((_, ev)) = sched.pop() {
            match ev {
                SimEvent::FetchPrediction(p) => {
                    assert_eq!(p, pred(0x1000, true, 0x2000));
                    saw_fetch = true;
                }
                SimEvent::FtqCreditsToBpu(n) => bpu_refund += n,
                _ => {}
            }
        }
        assert!(saw_fetch);
        assert_eq!(bpu_refund, 1);
        assert_eq!(ftq.stats.forwarded, 1);
    }

    #[test]
    fn test_no_credit_no_forward() {
        let (mut ftq, mut sched) = ftq_with_credits(0);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);
        while let Some((_, ev)) = sched.pop() {
            assert!(!matches!(ev, SimEvent::FetchPrediction(_)));
        }
        assert_eq!(ftq.stats.forwarded, 0);
    }

    #[test]
    fn test_taken_to_not_taken_amends_to_fallthrough() {
        let (mut ftq, mut sched) = ftq_with_credits(0);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);
        ftq.get_second_prediction(pred(0x1000, false, 0x2000), &mut sched);

        let entry = ftq.entry_for(0x1000).unwrap();
        assert!(!entry.taken);
        assert_eq!(entry.target, 0x1004);
        assert_eq!(ftq.stats.mismatches, 1);
    }

    #[test]
    fn test_cursor_rewind_reforwards_amended_entry() {
        let (mut ftq, mut sched) = ftq_with_credits(4);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);
        while sched.pop().is_some() {}
        assert_eq!(ftq.stats.forwarded, 1);

        ftq.get_second_prediction(pred(0x1000, false, 0), &mut sched);
        let mut reforwarded = false;
        let mut redirected = false;
        while let Some((_, ev)) = sched.pop() {
            match ev {
                SimEvent::FetchPrediction(p) => {
                    assert!(!p.taken);
                    reforwarded = true;
                }
                SimEvent::BpuRedirect(pc) => {
                    assert_eq!(pc, 0x1004);
                    redirected = true;
                }
                _ => {}
            }
        }
        assert!(reforwarded);
        assert!(redirected);
    }

    #[test]
    fn test_agreeing_second_tier_is_silent() {
        let (mut ftq, mut sched) = ftq_with_credits(0);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);
        ftq.get_second_prediction(pred(0x1000, true, 0x2000), &mut sched);
        assert_eq!(ftq.stats.mismatches, 0);
    }

    #[test]
    fn test_branch_commit_deallocates_head() {
        let (mut ftq, mut sched) = ftq_with_credits(2);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);
        ftq.get_first_prediction(pred(0x2000, false, 0x2004), &mut sched);
        assert_eq!(ftq.len(), 2);
        ftq.branch_commit(0x1000);
        assert_eq!(ftq.len(), 1);
        // Commit for a PC that is not at the head is ignored.
        ftq.branch_commit(0x9999);
        assert_eq!(ftq.len(), 1);
    }

    #[test]
    fn test_flush_refunds_unforwarded() {
        let (mut ftq, mut sched) = ftq_with_credits(1);
        ftq.get_first_prediction(pred(0x1000, true, 0x2000), &mut sched);
        ftq.get_first_prediction(pred(0x2000, false, 0x2004), &mut sched);
        while sched.pop().is_some() {}
        // One forwarded, one pending.
        ftq.handle_flush(&mut sched);
        let mut refund = 0;
        while let Some((_, ev)) = sched.pop() {
            if let SimEvent::FtqCreditsToBpu(n) = ev {
                refund += n;
            }
        }
        assert_eq!(refund, 1);
        assert!(ftq.is_empty());
    }
}
