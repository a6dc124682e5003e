//! Event queue: an indexed binary heap over per-owner event lists.
//!
//! Every owner (a particle, or a system event) has a slot holding its own
//! small priority queue of predicted events. The global heap orders slots by
//! the head of their list, and a side table maps slot → heap position so a
//! single slot can be re-keyed in `O(log n)` when its head changes.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::core::event::Event;

#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    lists: Vec<BinaryHeap<Reverse<Event>>>,
    heap: Vec<usize>,
    position: Vec<usize>,
}

impl EventQueue {
    pub fn new(n_slots: usize) -> Self {
        Self {
            lists: vec![BinaryHeap::new(); n_slots],
            heap: (0..n_slots).collect(),
            position: (0..n_slots).collect(),
        }
    }

    /// Total number of queued events, stale ones included.
    pub fn len(&self) -> usize {
        self.lists.iter().map(BinaryHeap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(BinaryHeap::is_empty)
    }

    #[inline]
    fn head(&self, slot: usize) -> Option<&Event> {
        self.lists[slot].peek().map(|Reverse(e)| e)
    }

    /// Empty lists sort after everything.
    #[inline]
    fn less(&self, a: usize, b: usize) -> bool {
        match (self.head(a), self.head(b)) {
            (Some(x), Some(y)) => match x.cmp(y) {
                Ordering::Equal => a < b,
                o => o == Ordering::Less,
            },
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => a < b,
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.position[self.heap[i]] = i;
        self.position[self.heap[j]] = j;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.less(self.heap[i], self.heap[parent]) {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let l = 2 * i + 1;
            let r = l + 1;
            let mut best = i;
            if l < n && self.less(self.heap[l], self.heap[best]) {
                best = l;
            }
            if r < n && self.less(self.heap[r], self.heap[best]) {
                best = r;
            }
            if best == i {
                break;
            }
            self.swap(i, best);
            i = best;
        }
    }

    fn rekey(&mut self, slot: usize) {
        let i = self.position[slot];
        self.sift_up(i);
        self.sift_down(self.position[slot]);
    }

    /// Queue `event` on `slot`'s list.
    pub fn push(&mut self, slot: usize, event: Event) {
        let improves = self.head(slot).is_none_or(|h| event < *h);
        self.lists[slot].push(Reverse(event));
        if improves {
            self.sift_up(self.position[slot]);
        }
    }

    /// Drop every event owned by `slot`.
    pub fn clear(&mut self, slot: usize) {
        if self.lists[slot].is_empty() {
            return;
        }
        self.lists[slot].clear();
        self.sift_down(self.position[slot]);
    }

    /// Earliest queued event and its owner.
    pub fn peek(&self) -> Option<(usize, &Event)> {
        let slot = *self.heap.first()?;
        self.head(slot).map(|e| (slot, e))
    }

    /// Remove the earliest event.
    pub fn pop(&mut self) -> Option<(usize, Event)> {
        let slot = *self.heap.first()?;
        let Reverse(event) = self.lists[slot].pop()?;
        self.rekey(slot);
        Some((slot, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{EventKind, EventType};
    use crate::error::Result;

    fn ev(t: f64, i: usize) -> Result<Event> {
        Event::new(t, EventKind::Cell { i, axis: 0, dir: 1 }, EventType::Cell, 0, None)
    }

    #[test]
    fn pops_in_time_order_across_slots() -> Result<()> {
        let mut q = EventQueue::new(4);
        q.push(0, ev(3.0, 0)?);
        q.push(1, ev(1.0, 1)?);
        q.push(2, ev(2.0, 2)?);
        q.push(1, ev(0.5, 1)?);
        q.push(3, ev(2.5, 3)?);
        let mut times = Vec::new();
        while let Some((_, e)) = q.pop() {
            times.push(e.time_f64());
        }
        assert_eq!(times, vec![0.5, 1.0, 2.0, 2.5, 3.0]);
        assert!(q.is_empty());
        Ok(())
    }

    #[test]
    fn clearing_a_slot_removes_its_events() -> Result<()> {
        let mut q = EventQueue::new(3);
        q.push(0, ev(1.0, 0)?);
        q.push(1, ev(2.0, 1)?);
        q.push(2, ev(3.0, 2)?);
        q.clear(0);
        let (slot, e) = q.peek().expect("queue not empty");
        assert_eq!(slot, 1);
        assert_eq!(e.time_f64(), 2.0);
        assert_eq!(q.len(), 2);
        Ok(())
    }

    #[test]
    fn equal_times_pop_in_slot_order() -> Result<()> {
        let mut q = EventQueue::new(3);
        for slot in [2, 0, 1] {
            q.push(slot, ev(1.0, slot)?);
        }
        let order: Vec<usize> = std::iter::from_fn(|| q.pop().map(|(s, _)| s)).collect();
        assert_eq!(order, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn side_table_stays_consistent_under_churn() -> Result<()> {
        let mut q = EventQueue::new(16);
        for k in 0..200usize {
            let slot = (k * 7) % 16;
            if k % 5 == 0 {
                q.clear(slot);
            } else {
                q.push(slot, ev(((k * 37) % 101) as f64, slot)?);
            }
            for (pos, &s) in q.heap.iter().enumerate() {
                assert_eq!(q.position[s], pos);
            }
        }
        let mut last = f64::NEG_INFINITY;
        while let Some((_, e)) = q.pop() {
            assert!(e.time_f64() >= last);
            last = e.time_f64();
        }
        Ok(())
    }
}
