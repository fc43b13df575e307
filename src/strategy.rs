//! The closed waiter/item-ordering strategy family (spec.md §4.6, §9).
//!
//! The original exposes these as a type class with one instance per
//! strategy; per the DESIGN NOTES this becomes a small closed enum with a
//! matching container enum — there are exactly four strategies and the
//! source itself never extends the set.

use std::collections::VecDeque;

use rand::Rng;

use crate::point::Run;

/// Waiter/item ordering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// First-come, first-served: append to tail, remove from head.
    Fcfs,
    /// Last-come, first-served: append to tail, remove from tail.
    Lcfs,
    /// Serve in random order: append anywhere, dequeue a uniformly random
    /// position.
    Siro,
    /// Keyed min-heap over an attached [`Priority`]; smaller priority is
    /// served first.
    StaticPriorities,
}

/// A priority key for `StaticPriorities` waiters. Smaller values are served
/// first; ties preserve insertion order via `seq` (set by
/// [`WaiterContainer::push_with_priority`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priority {
    pub value: f64,
    seq: u64,
}

impl Priority {
    pub fn new(value: f64) -> Self {
        Priority { value, seq: 0 }
    }
}

impl Eq for Priority {}
impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.value.partial_cmp(&other.value) {
            Some(ord) => ord.then_with(|| self.seq.cmp(&other.seq)),
            None => panic!("priority value is NaN, cannot order waiters"),
        }
    }
}

/// A container of waiting items (continuations, queue payloads, ...)
/// dispatched according to a [`Strategy`].
///
/// `StaticPriorities` is the only variant requiring an explicit priority on
/// push (via [`push_with_priority`](Self::push_with_priority)); the other
/// three accept a plain [`push`](Self::push).
pub enum WaiterContainer<T> {
    Fcfs(VecDeque<T>),
    Lcfs(VecDeque<T>),
    Siro(Vec<T>),
    StaticPriorities(std::collections::BinaryHeap<std::cmp::Reverse<PriorityEntry<T>>>),
}

pub struct PriorityEntry<T> {
    priority: Priority,
    value: T,
}

impl<T> PartialEq for PriorityEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl<T> Eq for PriorityEntry<T> {}
impl<T> PartialOrd for PriorityEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for PriorityEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.cmp(&other.priority)
    }
}

impl<T> WaiterContainer<T> {
    pub fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Fcfs => WaiterContainer::Fcfs(VecDeque::new()),
            Strategy::Lcfs => WaiterContainer::Lcfs(VecDeque::new()),
            Strategy::Siro => WaiterContainer::Siro(Vec::new()),
            Strategy::StaticPriorities => {
                WaiterContainer::StaticPriorities(std::collections::BinaryHeap::new())
            }
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            WaiterContainer::Fcfs(_) => Strategy::Fcfs,
            WaiterContainer::Lcfs(_) => Strategy::Lcfs,
            WaiterContainer::Siro(_) => Strategy::Siro,
            WaiterContainer::StaticPriorities(_) => Strategy::StaticPriorities,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            WaiterContainer::Fcfs(q) | WaiterContainer::Lcfs(q) => q.len(),
            WaiterContainer::Siro(v) => v.len(),
            WaiterContainer::StaticPriorities(h) => h.len(),
        }
    }

    /// Pushes `value` with priority `0.0`. Fatal on a `StaticPriorities`
    /// container — use [`push_with_priority`](Self::push_with_priority).
    pub fn push(&mut self, value: T) {
        match self {
            WaiterContainer::Fcfs(q) | WaiterContainer::Lcfs(q) => q.push_back(value),
            WaiterContainer::Siro(v) => v.push(value),
            WaiterContainer::StaticPriorities(_) => {
                panic!("push: StaticPriorities container requires push_with_priority")
            }
        }
    }

    /// Pushes `value` under `priority` (only meaningful for
    /// `StaticPriorities`; other strategies ignore the priority value but
    /// still accept the call so callers need not special-case it).
    pub fn push_with_priority(&mut self, value: T, mut priority: Priority, run: &Run) {
        match self {
            WaiterContainer::StaticPriorities(h) => {
                priority.seq = run.next_sequence();
                h.push(std::cmp::Reverse(PriorityEntry { priority, value }));
            }
            _ => self.push(value),
        }
    }

    /// Removes and returns the next item to serve, per the container's
    /// strategy.
    pub fn pop(&mut self, run: &Run) -> Option<T> {
        match self {
            WaiterContainer::Fcfs(q) => q.pop_front(),
            WaiterContainer::Lcfs(q) => q.pop_back(),
            WaiterContainer::Siro(v) => {
                if v.is_empty() {
                    None
                } else {
                    let idx = run.rng().borrow_mut().gen_range(0..v.len());
                    Some(v.swap_remove(idx))
                }
            }
            WaiterContainer::StaticPriorities(h) => h.pop().map(|std::cmp::Reverse(e)| e.value),
        }
    }

    /// Removes every item for which `predicate` returns `false`, regardless
    /// of strategy. Used by cancellation to drop a specific waiter out of
    /// the middle of the container (spec.md §4.4, "a cancelled waiter must
    /// be removed from the waiter container on cancel").
    pub fn retain(&mut self, mut predicate: impl FnMut(&T) -> bool) {
        match self {
            WaiterContainer::Fcfs(q) | WaiterContainer::Lcfs(q) => q.retain(predicate),
            WaiterContainer::Siro(v) => v.retain(predicate),
            WaiterContainer::StaticPriorities(h) => {
                let kept: std::collections::BinaryHeap<_> = h
                    .drain()
                    .filter(|std::cmp::Reverse(e)| predicate(&e.value))
                    .collect();
                *h = kept;
            }
        }
    }
}
