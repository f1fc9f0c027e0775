//! Discrete-event scheduler with ordered per-cycle phases.
//!
//! Simulation time advances in integer cycles. Within a cycle, events fire
//! in a strict phase order:
//! `Update → PortUpdate → Flush → Collection → Tick → PostTick`.
//! Port deliveries land on the Update phase, flush fan-out on the Flush
//! phase, and unit work on the Tick phase, so a flush always runs before
//! any Tick work in the same cycle. Events with the same cycle and phase
//! fire in enqueue order.
//!
//! Three event flavors are supported:
//! 1. **Unique events** — repeated schedules within one cycle coalesce.
//! 2. **Payload events** — one-shot, cancellable by token or predicate.
//! 3. **Non-continuing events** — do not keep the simulation alive
//!    (used by the retire watchdog and heartbeat).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::mem::Discriminant;

/// Simulated time, in integer cycles.
pub type Cycle = u64;

/// Ordered scheduling phases within a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Delayed port deliveries.
    Update,
    /// Port-derived follow-up work.
    PortUpdate,
    /// Flush delivery; always precedes Tick in the same cycle.
    Flush,
    /// Data collection (reserved for reporting hooks).
    Collection,
    /// Regular unit work.
    Tick,
    /// Late work after all Ticks.
    PostTick,
}

/// Handle to a scheduled event, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventToken(u64);

struct Entry<E> {
    cycle: Cycle,
    phase: Phase,
    seq: u64,
    continuing: bool,
    event: E,
}

impl<E> PartialEq for Entry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<E> Eq for Entry<E> {}

impl<E> PartialOrd for Entry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Entry<E> {
    // Reversed so the std max-heap pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.cycle, other.phase, other.seq).cmp(&(self.cycle, self.phase, self.seq))
    }
}

/// The event scheduler.
///
/// Generic over the event payload type; the simulator instantiates it with
/// its wire/event enum.
pub struct Scheduler<E> {
    now: Cycle,
    next_seq: u64,
    heap: BinaryHeap<Entry<E>>,
    canceled: HashSet<u64>,
    unique: HashMap<(Cycle, Discriminant<E>), u64>,
    continuing_live: usize,
    stopped: bool,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    /// Creates an empty scheduler at cycle zero.
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            heap: BinaryHeap::new(),
            canceled: HashSet::new(),
            unique: HashMap::new(),
            continuing_live: 0,
            stopped: false,
        }
    }

    /// Current simulated cycle.
    #[inline]
    pub fn now(&self) -> Cycle {
        self.now
    }

    /// Stops the simulation; no further events will be popped.
    pub fn stop_running(&mut self) {
        self.stopped = true;
    }

    /// True once `stop_running` has been called.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn push(&mut self, event: E, delay: Cycle, phase: Phase, continuing: bool) -> EventToken {
        let seq = self.next_seq;
        self.next_seq += 1;
        if continuing {
            self.continuing_live += 1;
        }
        self.heap.push(Entry {
            cycle: self.now + delay,
            phase,
            seq,
            continuing,
            event,
        });
        EventToken(seq)
    }

    /// Schedules a one-shot payload event.
    pub fn schedule(&mut self, event: E, delay: Cycle, phase: Phase) -> EventToken {
        self.push(event, delay, phase, true)
    }

    /// Schedules an event that does not keep the simulation alive.
    pub fn schedule_non_continuing(&mut self, event: E, delay: Cycle, phase: Phase) -> EventToken {
        self.push(event, delay, phase, false)
    }

    /// Schedules a unique event; repeated schedules for the same target
    /// cycle coalesce into one firing.
    pub fn schedule_unique(&mut self, event: E, delay: Cycle, phase: Phase) -> EventToken {
        let key = (self.now + delay, std::mem::discriminant(&event));
        if let Some(&seq) = self.unique.get(&key) {
            return EventToken(seq);
        }
        let token = self.push(event, delay, phase, true);
        self.unique.insert(key, token.0);
        token
    }

    /// Cancels a previously scheduled event by token.
    pub fn cancel(&mut self, token: EventToken) {
        self.canceled.insert(token.0);
    }

    /// Cancels all pending instances of a unique event kind.
    pub fn cancel_unique(&mut self, like: &E) {
        let disc = std::mem::discriminant(like);
        let seqs: Vec<u64> = self
            .unique
            .iter()
            .filter(|((_, d), _)| *d == disc)
            .map(|(_, &seq)| seq)
            .collect();
        for seq in seqs {
            self.canceled.insert(seq);
        }
        self.unique.retain(|(_, d), _| *d != disc);
    }

    /// Cancels every pending event matching the predicate.
    pub fn cancel_if(&mut self, pred: impl Fn(&E) -> bool) {
        let mut hits: Vec<u64> = Vec::new();
        for entry in self.heap.iter() {
            if !self.canceled.contains(&entry.seq) && pred(&entry.event) {
                hits.push(entry.seq);
            }
        }
        for seq in hits {
            self.canceled.insert(seq);
        }
    }

    /// Pops the next live event, advancing the clock to its cycle.
    ///
    /// Returns `None` when the simulation is stopped, the queue is empty,
    /// or only non-continuing events remain.
    pub fn pop(&mut self) -> Option<(Cycle, E)> {
        loop {
            if self.stopped || self.continuing_live == 0 {
                return None;
            }
            let entry = self.heap.pop()?;
            if entry.continuing {
                self.continuing_live -= 1;
            }
            let key = (entry.cycle, std::mem::discriminant(&entry.event));
            if self.unique.get(&key) == Some(&entry.seq) {
                let _ = self.unique.remove(&key);
            }
            if self.canceled.remove(&entry.seq) {
                continue;
            }
            debug_assert!(entry.cycle >= self.now, "scheduler time went backwards");
            self.now = entry.cycle.max(self.now);
            return Some((self.now, entry.event));
        }
    }

    /// Number of pending (possibly canceled) events.
    #[inline]
    pub fn pending(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Ev {
        A,
        B(u32),
    }

    #[test]
    fn test_phase_ordering_within_cycle() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule(Ev::B(1), 1, Phase::Tick);
        s.schedule(Ev::B(2), 1, Phase::Flush);
        s.schedule(Ev::B(3), 1, Phase::Update);
        assert_eq!(s.pop().unwrap().1, Ev::B(3));
        assert_eq!(s.pop().unwrap().1, Ev::B(2));
        assert_eq!(s.pop().unwrap().1, Ev::B(1));
    }

    #[test]
    fn test_same_phase_fires_in_enqueue_order() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule(Ev::B(1), 0, Phase::Tick);
        s.schedule(Ev::B(2), 0, Phase::Tick);
        assert_eq!(s.pop().unwrap().1, Ev::B(1));
        assert_eq!(s.pop().unwrap().1, Ev::B(2));
    }

    #[test]
    fn test_unique_coalesces_within_cycle() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule_unique(Ev::A, 1, Phase::Tick);
        s.schedule_unique(Ev::A, 1, Phase::Tick);
        assert_eq!(s.pop().unwrap().1, Ev::A);
        assert!(s.pop().is_none());
    }

    #[test]
    fn test_unique_reschedulable_after_fire() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule_unique(Ev::A, 0, Phase::Tick);
        assert!(s.pop().is_some());
        s.schedule_unique(Ev::A, 0, Phase::Tick);
        assert!(s.pop().is_some());
    }

    #[test]
    fn test_cancel_token() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        let t = s.schedule(Ev::B(9), 1, Phase::Tick);
        s.schedule(Ev::A, 2, Phase::Tick);
        s.cancel(t);
        assert_eq!(s.pop().unwrap().1, Ev::A);
    }

    #[test]
    fn test_cancel_if_predicate() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule(Ev::B(1), 1, Phase::Tick);
        s.schedule(Ev::B(2), 1, Phase::Tick);
        s.schedule(Ev::A, 1, Phase::Tick);
        s.cancel_if(|e| matches!(e, Ev::B(n) if *n == 1));
        assert_eq!(s.pop().unwrap().1, Ev::B(2));
        assert_eq!(s.pop().unwrap().1, Ev::A);
        assert!(s.pop().is_none());
    }

    #[test]
    fn test_non_continuing_does_not_keep_alive() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule_non_continuing(Ev::A, 5, Phase::Tick);
        assert!(s.pop().is_none());
    }

    #[test]
    fn test_clock_advances_to_event_cycle() {
        let mut s: Scheduler<Ev> = Scheduler::new();
        s.schedule(Ev::A, 7, Phase::Tick);
        let (cycle, _) = s.pop().unwrap();
        assert_eq!(cycle, 7);
        assert_eq!(s.now(), 7);
    }
}
