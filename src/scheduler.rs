//! EE-cycle time base and deferred event queue (spec §4.1).
//!
//! A monotonic cycle counter plus a min-heap of `(deadline, event)` entries.
//! `run_for` advances the counter and fires every event whose deadline has
//! been reached, in deadline order with insertion order as the tie-break.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Events the core originates (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    VblankStart,
    VblankEnd,
    CdvdCompletion,
    TimerOverflow(u8),
    SpuSample,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Scheduled {
    deadline: u64,
    seq: u64,
    event: Event,
}

// Reverse deadline/seq ordering so `BinaryHeap` (a max-heap) behaves as a
// min-heap keyed on (deadline, seq).
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Scheduler {
    now: u64,
    next_seq: u64,
    pending: BinaryHeap<Scheduled>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { now: 0, next_seq: 0, pending: BinaryHeap::new() }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule `event` to fire `delay` cycles from now.
    pub fn schedule(&mut self, delay: u64, event: Event) {
        let deadline = self.now.saturating_add(delay);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Scheduled { deadline, seq, event });
    }

    /// Remove every pending entry matching `event`. Idempotent: canceling an
    /// event with nothing pending is a no-op.
    pub fn cancel(&mut self, event: Event) {
        if !self.pending.iter().any(|s| s.event == event) {
            return;
        }
        let remaining: BinaryHeap<Scheduled> =
            self.pending.drain().filter(|s| s.event != event).collect();
        self.pending = remaining;
    }

    /// Advance the clock by `cycles` (saturating — the scheduler never runs
    /// negative time) and return every event whose deadline was reached, in
    /// fire order.
    pub fn run_for(&mut self, cycles: u64) -> Vec<Event> {
        self.now = self.now.saturating_add(cycles);
        let mut fired = Vec::new();
        while let Some(top) = self.pending.peek() {
            if top.deadline > self.now {
                break;
            }
            let Scheduled { event, .. } = self.pending.pop().expect("peeked Some");
            fired.push(event);
        }
        fired
    }

    pub fn has_pending(&self, event: Event) -> bool {
        self.pending.iter().any(|s| s.event == event)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut s = Scheduler::new();
        s.schedule(10, Event::VblankStart);
        s.schedule(5, Event::CdvdCompletion);
        let fired = s.run_for(20);
        assert_eq!(fired, vec![Event::CdvdCompletion, Event::VblankStart]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule(5, Event::VblankStart);
        s.schedule(5, Event::VblankEnd);
        let fired = s.run_for(5);
        assert_eq!(fired, vec![Event::VblankStart, Event::VblankEnd]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut s = Scheduler::new();
        s.cancel(Event::SpuSample);
        s.schedule(3, Event::SpuSample);
        s.cancel(Event::SpuSample);
        s.cancel(Event::SpuSample);
        assert!(s.run_for(10).is_empty());
    }

    #[test]
    fn future_events_do_not_fire_early() {
        let mut s = Scheduler::new();
        s.schedule(100, Event::TimerOverflow(0));
        assert!(s.run_for(10).is_empty());
        assert_eq!(s.now(), 10);
        let fired = s.run_for(90);
        assert_eq!(fired, vec![Event::TimerOverflow(0)]);
    }
}
