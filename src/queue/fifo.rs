//! Bounded circular-buffer FIFO (spec.md §4.6).
//!
//! Backed by two [`Resource`]s acting as write/read permits (initial counts
//! `C` and `0`): `enqueue` blocks on a write permit before writing and
//! releases a read permit afterward; `dequeue` is the mirror image. This is
//! the same "permit pair guards a ring buffer" shape `request`/`release`
//! were built for in §4.4, just instantiated twice.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::process::{Outcome, Process};
use crate::resource::Resource;
use crate::strategy::Strategy;

struct FifoInner<T> {
    buf: RefCell<Vec<Option<T>>>,
    capacity: usize,
    start: Cell<usize>,
    count: Cell<usize>,
    lost_count: Cell<u64>,
    read_permits: Resource,
    write_permits: Resource,
}

/// A bounded FIFO of capacity `C`. Over capacity, `enqueue_or_lost` drops
/// the item and bumps `lost_count` rather than blocking.
#[derive(Clone)]
pub struct Fifo<T>(Rc<FifoInner<T>>);

impl<T> Fifo<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Fifo::new: capacity must be > 0");
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Fifo(Rc::new(FifoInner {
            buf: RefCell::new(buf),
            capacity,
            start: Cell::new(0),
            count: Cell::new(0),
            lost_count: Cell::new(0),
            read_permits: Resource::new(Strategy::Fcfs, 0, Some(capacity as i64)),
            write_permits: Resource::new(Strategy::Fcfs, capacity as i64, Some(capacity as i64)),
        }))
    }

    pub fn len(&self) -> usize {
        self.0.count.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    pub fn lost_count(&self) -> u64 {
        self.0.lost_count.get()
    }

    fn end(&self) -> usize {
        (self.0.start.get() + self.0.count.get()) % self.0.capacity
    }

    fn push_back(&self, value: T) {
        let end = self.end();
        self.0.buf.borrow_mut()[end] = Some(value);
        self.0.count.set(self.0.count.get() + 1);
    }

    fn pop_front(&self) -> T {
        let start = self.0.start.get();
        let value = self.0.buf.borrow_mut()[start]
            .take()
            .expect("pop_front: slot at start must be occupied");
        self.0.start.set((start + 1) % self.0.capacity);
        self.0.count.set(self.0.count.get() - 1);
        value
    }

    /// Writes `value`, suspending until a write permit (buffer slot) is
    /// free.
    pub fn enqueue(&self, value: T) -> Process<()>
    where
        T: 'static,
    {
        let this = self.clone();
        let value = Rc::new(RefCell::new(Some(value)));
        this.0.write_permits.request().and_then(move |_| {
            Process::suspend(move |run, pid, k| {
                let v = value.borrow_mut().take().expect("enqueue value taken once");
                this.push_back(v);
                this.0.read_permits.release(&run);
                k(run, pid, Outcome::Value(()));
            })
        })
    }

    /// Reads the oldest item, suspending until one is available.
    pub fn dequeue(&self) -> Process<T>
    where
        T: 'static,
    {
        let this = self.clone();
        this.0.read_permits.request().and_then(move |_| {
            Process::suspend(move |run, pid, k| {
                let v = this.pop_front();
                this.0.write_permits.release(&run);
                k(run, pid, Outcome::Value(v));
            })
        })
    }

    /// Event-context operation: if no write permit is immediately
    /// available, increments `lost_count` and drops `value` instead of
    /// blocking (spec.md §4.6, §7 tier 2 — this is a modelled failure, not
    /// an error).
    pub fn enqueue_or_lost(&self, run: &crate::point::Run, value: T) {
        if self.0.write_permits.try_request_within_event() {
            self.push_back(value);
            self.0.read_permits.release(run);
        } else {
            self.0.lost_count.set(self.0.lost_count.get() + 1);
        }
    }

    /// Non-blocking write: `true` and stores `value`, or `false` (and
    /// returns `value` back) if the buffer was full.
    pub fn try_enqueue(&self, run: &crate::point::Run, value: T) -> Result<(), T> {
        if self.0.write_permits.try_request_within_event() {
            self.push_back(value);
            self.0.read_permits.release(run);
            Ok(())
        } else {
            Err(value)
        }
    }

    /// Non-blocking read: `Some(value)` or `None` if the buffer was empty.
    pub fn try_dequeue(&self, run: &crate::point::Run) -> Option<T> {
        if self.0.read_permits.try_request_within_event() {
            let v = self.pop_front();
            self.0.write_permits.release(run);
            Some(v)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Run;
    use crate::spec::{Method, Specs};

    fn run() -> Run {
        Run::new(Specs::new(0.0, 100.0, 1.0, Method::Euler).unwrap(), 3, 0)
    }

    #[test]
    fn over_capacity_enqueue_is_lost_and_counted() {
        let run = run();
        let q: Fifo<i32> = Fifo::new(3);

        q.enqueue_or_lost(&run, 1);
        q.enqueue_or_lost(&run, 2);
        q.enqueue_or_lost(&run, 3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.lost_count(), 0);

        q.enqueue_or_lost(&run, 4);
        assert_eq!(q.len(), 3);
        assert_eq!(q.lost_count(), 1);

        let popped = q.try_dequeue(&run);
        assert_eq!(popped, Some(1));
        assert_eq!(q.len(), 2);

        q.enqueue_or_lost(&run, 6);
        assert_eq!(q.len(), 3);
        assert_eq!(q.lost_count(), 1);
    }

    #[test]
    fn fifo_preserves_insertion_order_across_wraparound() {
        let run = run();
        let q: Fifo<i32> = Fifo::new(2);
        q.enqueue_or_lost(&run, 1);
        q.enqueue_or_lost(&run, 2);
        assert_eq!(q.try_dequeue(&run), Some(1));
        q.enqueue_or_lost(&run, 3);
        assert_eq!(q.try_dequeue(&run), Some(2));
        assert_eq!(q.try_dequeue(&run), Some(3));
        assert_eq!(q.try_dequeue(&run), None);
    }

    #[test]
    fn enqueue_process_suspends_until_a_slot_frees() {
        let run = run();
        let q: Fifo<i32> = Fifo::new(1);
        q.enqueue_or_lost(&run, 1);

        let done = Rc::new(Cell::new(false));
        let done2 = Rc::clone(&done);
        let pid = crate::process::run_process(&run, false, q.enqueue(2).map(move |_| done2.set(true)));
        assert!(!done.get());
        assert_eq!(pid.state(), crate::process::ProcessState::Awaiting);

        let popped = q.try_dequeue(&run);
        assert_eq!(popped, Some(1));
        run.queue().borrow().drain(
            run.specs(),
            crate::point::Point { time: 1.0, iteration: 1, phase: -1 },
        );
        assert!(done.get());
        assert_eq!(q.len(), 1);
    }
}
