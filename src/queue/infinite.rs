//! Infinite, multi-strategy `Queue<SM, SO, T>` with a two-phase dequeue
//! protocol and wait-time statistics (spec.md §4.6).
//!
//! Storing uses `SM` (how items sit in the backing container); dequeuers
//! block on an output [`Resource`] ordered by `SO`. The two-phase split
//! between `dequeue_request` and `dequeue_extract` is what lets the queue
//! track two distinct wait-time statistics: how long a *request* waited
//! (service-level measurement) versus how long an *item* sat in the store
//! (queue-dynamics measurement) — spec.md §4.6.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::point::Run;
use crate::process::{Outcome, Process};
use crate::queue::QueueItem;
use crate::resource::Resource;
use crate::signal::SignalSource;
use crate::stats::Stats;
use crate::strategy::{Strategy, WaiterContainer};

struct InfiniteQueueInner<T> {
    store: RefCell<WaiterContainer<QueueItem<T>>>,
    output_res: Resource,
    store_count: Cell<u64>,
    output_count: Cell<u64>,
    in_queue_wait: RefCell<Stats>,
    output_wait: RefCell<Stats>,
    enqueue_stored: SignalSource<()>,
    dequeue_requested: SignalSource<()>,
    dequeue_extracted: SignalSource<()>,
}

/// An unbounded queue storing items under strategy `SM`, blocking
/// dequeuers on an output [`Resource`] ordered by strategy `SO` (spec.md
/// §3, §4.6). `max_count = None` always, by construction.
#[derive(Clone)]
pub struct InfiniteQueue<T> {
    inner: Rc<InfiniteQueueInner<T>>,
}

impl<T: 'static> InfiniteQueue<T> {
    pub fn new(storing: Strategy, output: Strategy) -> Self {
        InfiniteQueue {
            inner: Rc::new(InfiniteQueueInner {
                store: RefCell::new(WaiterContainer::new(storing)),
                output_res: Resource::new(output, 0, None),
                store_count: Cell::new(0),
                output_count: Cell::new(0),
                in_queue_wait: RefCell::new(Stats::new()),
                output_wait: RefCell::new(Stats::new()),
                enqueue_stored: SignalSource::new(),
                dequeue_requested: SignalSource::new(),
                dequeue_extracted: SignalSource::new(),
            }),
        }
    }

    pub fn store_count(&self) -> u64 {
        self.inner.store_count.get()
    }

    pub fn output_count(&self) -> u64 {
        self.inner.output_count.get()
    }

    /// `store_count - output_count`, which must equal the number of items
    /// physically in the store container for any infinite queue (spec.md
    /// §8, "queue size consistency").
    pub fn live_count(&self) -> u64 {
        self.inner.store_count.get() - self.inner.output_count.get()
    }

    pub fn in_queue_wait_stats(&self) -> Stats {
        *self.inner.in_queue_wait.borrow()
    }

    pub fn output_wait_stats(&self) -> Stats {
        *self.inner.output_wait.borrow()
    }

    pub fn enqueue_stored(&self) -> &SignalSource<()> {
        &self.inner.enqueue_stored
    }

    pub fn dequeue_requested(&self) -> &SignalSource<()> {
        &self.inner.dequeue_requested
    }

    pub fn dequeue_extracted(&self) -> &SignalSource<()> {
        &self.inner.dequeue_extracted
    }

    fn now(run: &Run) -> f64 {
        let now = run.queue().borrow().current_time();
        if now.is_finite() { now } else { run.specs().start_time }
    }

    /// Event-context operation: appends `value` (stamped with the current
    /// time) to the store, releases one output permit (waking a blocked
    /// dequeuer if any under `SO`), and triggers `enqueue_stored` (spec.md
    /// §4.6).
    pub fn enqueue(&self, run: &Run, value: T) {
        let now = Self::now(run);
        self.inner.store.borrow_mut().push(QueueItem { value, stored_at: now });
        self.inner.store_count.set(self.inner.store_count.get() + 1);
        self.inner.output_res.release(run);
        self.inner.enqueue_stored.trigger(&());
    }

    /// Requests one item, suspending until one is available. Implements
    /// the two-phase protocol: `dequeue_request` fires immediately and
    /// records the request time; once an output permit is granted,
    /// `dequeue_extract` pops the store and records both wait-time
    /// statistics before `dequeue_extracted` fires.
    pub fn dequeue(&self) -> Process<T> {
        let this = self.clone();
        Process::suspend(move |run, pid, k| {
            let request_time = Self::now(&run);
            this.inner.dequeue_requested.trigger(&());

            let this_for_extract = this.clone();
            let body = this.inner.output_res.request().and_then(move |_| {
                Process::suspend(move |run, pid, k| {
                    let value = this_for_extract.extract(&run, request_time);
                    k(run, pid, Outcome::Value(value));
                })
            });
            body.run_with(run, pid, k);
        })
    }

    fn extract(&self, run: &Run, request_time: f64) -> T {
        let now = Self::now(run);
        let item = self
            .inner
            .store
            .borrow_mut()
            .pop(run)
            .expect("extract: output permit granted but store was empty");
        self.inner.output_count.set(self.inner.output_count.get() + 1);
        self.inner.in_queue_wait.borrow_mut().record(now - item.stored_at);
        self.inner.output_wait.borrow_mut().record(now - request_time);
        self.inner.dequeue_extracted.trigger(&());
        item.value
    }

    /// Non-blocking read in Event context: `Some(value)` if an item was
    /// immediately available, `None` otherwise. Never blocks, so there is
    /// no request to time — only the in-queue wait is recorded, as `0`
    /// output wait (spec.md §4.4 `try_request_within_event`, generalized
    /// to queues).
    pub fn try_dequeue(&self, run: &Run) -> Option<T> {
        if !self.inner.output_res.try_request_within_event() {
            return None;
        }
        let now = Self::now(run);
        let item = self
            .inner
            .store
            .borrow_mut()
            .pop(run)
            .expect("try_dequeue: output permit granted but store was empty");
        self.inner.output_count.set(self.inner.output_count.get() + 1);
        self.inner.in_queue_wait.borrow_mut().record(now - item.stored_at);
        self.inner.output_wait.borrow_mut().record(0.0);
        self.inner.dequeue_extracted.trigger(&());
        Some(item.value)
    }
}
