//! Min-heap of pending retries keyed by eligibility time
//!
//! Values live in an arena of slots; the heap itself only orders small
//! `(deadline, seq, slot)` nodes, so sifting never moves a record. Freed
//! slots are reused. Entries with equal deadlines pop in insertion order.

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Node {
    deadline: Instant,
    seq: u64,
    slot: usize,
}

impl Node {
    fn before(&self, other: &Node) -> bool {
        (self.deadline, self.seq) < (other.deadline, other.seq)
    }
}

pub(crate) struct DeadlineHeap<V> {
    slots: Vec<Option<V>>,
    free: Vec<usize>,
    nodes: Vec<Node>,
    next_seq: u64,
}

impl<V> DeadlineHeap<V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            nodes: Vec::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn push(&mut self, deadline: Instant, value: V) {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(value);
                slot
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.nodes.push(Node {
            deadline,
            seq,
            slot,
        });
        self.sift_up(self.nodes.len() - 1);
    }

    /// Earliest deadline, if any
    pub(crate) fn peek_deadline(&self) -> Option<Instant> {
        self.nodes.first().map(|node| node.deadline)
    }

    /// Pop the earliest entry if it is due at `now`
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<V> {
        match self.nodes.first() {
            Some(node) if node.deadline <= now => self.pop(),
            _ => None,
        }
    }

    pub(crate) fn pop(&mut self) -> Option<V> {
        if self.nodes.is_empty() {
            return None;
        }
        let last = self.nodes.len() - 1;
        self.nodes.swap(0, last);
        let node = self.nodes.pop()?;
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }

        let value = self.slots[node.slot].take();
        self.free.push(node.slot);
        value
    }

    /// Drop every entry and release the arena
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.slots.clear();
        self.free.clear();
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.nodes[index].before(&self.nodes[parent]) {
                break;
            }
            self.nodes.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.nodes[left].before(&self.nodes[smallest]) {
                smallest = left;
            }
            if right < len && self.nodes[right].before(&self.nodes[smallest]) {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.nodes.swap(index, smallest);
            index = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn test_pops_in_deadline_order() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.push(at(base, 30), "c");
        heap.push(at(base, 10), "a");
        heap.push(at(base, 20), "b");

        assert_eq!(heap.len(), 3);
        assert_eq!(heap.peek_deadline(), Some(at(base, 10)));
        assert_eq!(heap.pop(), Some("a"));
        assert_eq!(heap.pop(), Some("b"));
        assert_eq!(heap.pop(), Some("c"));
        assert_eq!(heap.pop(), None);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_equal_deadlines_pop_fifo() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        for i in 0..5 {
            heap.push(base, i);
        }
        let popped: Vec<_> = std::iter::from_fn(|| heap.pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_due_respects_now() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.push(at(base, 5), 1);
        heap.push(at(base, 50), 2);

        assert_eq!(heap.pop_due(base), None);
        assert_eq!(heap.pop_due(at(base, 10)), Some(1));
        assert_eq!(heap.pop_due(at(base, 10)), None);
        assert_eq!(heap.peek_deadline(), Some(at(base, 50)));
    }

    #[test]
    fn test_slots_are_reused() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.push(base, 1);
        heap.push(base, 2);
        heap.pop();
        heap.push(base, 3);

        assert_eq!(heap.slots.len(), 2);
        assert_eq!(heap.pop(), Some(2));
        assert_eq!(heap.pop(), Some(3));
    }

    #[test]
    fn test_clear() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.push(base, String::from("x"));
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.peek_deadline(), None);
    }

    proptest! {
        #[test]
        fn prop_pops_sorted(offsets in proptest::collection::vec(0u64..1_000, 0..64)) {
            let base = Instant::now();
            let mut heap = DeadlineHeap::new();
            for (i, offset) in offsets.iter().enumerate() {
                heap.push(at(base, *offset), (*offset, i));
            }

            let popped: Vec<_> = std::iter::from_fn(|| heap.pop()).collect();
            let mut expected: Vec<_> = offsets.iter().copied().enumerate().map(|(i, o)| (o, i)).collect();
            expected.sort();
            prop_assert_eq!(popped, expected);
        }

        #[test]
        fn prop_interleaved_pops_stay_ordered(
            ops in proptest::collection::vec(prop_oneof![(0u64..500).prop_map(Some), Just(None)], 0..128)
        ) {
            let base = Instant::now();
            let mut heap = DeadlineHeap::new();
            let mut last_popped: Option<u64> = None;
            let mut pushed_since_pop = Vec::new();

            for op in ops {
                match op {
                    Some(offset) => {
                        heap.push(at(base, offset), offset);
                        pushed_since_pop.push(offset);
                    }
                    None => {
                        if let Some(value) = heap.pop() {
                            // Monotone unless something earlier arrived after the last pop.
                            if let Some(prev) = last_popped {
                                if pushed_since_pop.iter().all(|p| *p >= prev) {
                                    prop_assert!(value >= prev);
                                }
                            }
                            last_popped = Some(value);
                            pushed_since_pop.clear();
                        }
                    }
                }
            }
            prop_assert_eq!(heap.len() + heap.free.len(), heap.slots.len());
        }
    }
}
