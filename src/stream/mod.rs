//! Lazy, Process-driven `Stream<T>` and its combinators (spec.md §4.7).
//!
//! A `Stream<T>` is conceptually an infinite sequence; each access is a
//! `Process` computation yielding `(head, tail-stream)` (spec.md §3). It is
//! represented here as a boxed `Fn` so the same node can be pulled more
//! than once when wrapped in [`memo`] — laziness and restartability both
//! fall out of that one representation, the same "explicit thunk object"
//! shape the DESIGN NOTES call for.

pub mod processor;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::point::Run;
use crate::process::{CancelLinkage, Outcome, Process, ProcessId};
use crate::queue::fifo::Fifo;
use crate::queue::infinite::InfiniteQueue;
use crate::signal::SignalSource;
use crate::strategy::Strategy;

/// A lazy, process-driven sequence: pulling yields one value plus the
/// stream continuing from there (spec.md §3, §4.7).
pub struct Stream<T> {
    next: Rc<dyn Fn() -> Process<(T, Stream<T>)>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Stream { next: Rc::clone(&self.next) }
    }
}

impl<T: 'static> Stream<T> {
    pub fn new(f: impl Fn() -> Process<(T, Stream<T>)> + 'static) -> Self {
        Stream { next: Rc::new(f) }
    }

    /// Pulls the next value and the stream that continues after it.
    pub fn pull(&self) -> Process<(T, Stream<T>)> {
        (self.next)()
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// A stream whose every element is generated by repeatedly calling
    /// `f`.
    pub fn repeat(f: impl Fn() -> T + Clone + 'static) -> Stream<T> {
        Stream::new(move || {
            let f = f.clone();
            Process::pure((f(), Stream::repeat(f)))
        })
    }

    /// Pointwise transform, sequential (spec.md §4.7).
    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + Clone + 'static) -> Stream<U> {
        let this = self.clone();
        Stream::new(move || {
            let this = this.clone();
            let f = f.clone();
            this.pull().map(move |(v, tail)| {
                let mapped_tail = tail.map(f.clone());
                (f(v), mapped_tail)
            })
        })
    }

    /// Pointwise transform via a `Process`-producing function, sequential
    /// (spec.md §4.7).
    pub fn map_m<U: 'static>(&self, f: impl Fn(T) -> Process<U> + Clone + 'static) -> Stream<U> {
        let this = self.clone();
        Stream::new(move || {
            let this = this.clone();
            let f = f.clone();
            this.pull().and_then(move |(v, tail)| {
                let f2 = f.clone();
                f(v).map(move |mapped| (mapped, tail.map_m(f2)))
            })
        })
    }

    /// Skips items failing `pred` (spec.md §4.7).
    pub fn filter(&self, pred: impl Fn(&T) -> bool + Clone + 'static) -> Stream<T> {
        fn loop_pull<T: Clone + 'static>(
            s: Stream<T>,
            pred: impl Fn(&T) -> bool + Clone + 'static,
        ) -> Process<(T, Stream<T>)> {
            s.pull().and_then(move |(v, tail)| {
                if pred(&v) {
                    let pred2 = pred.clone();
                    Process::pure((v, tail.filter(pred2)))
                } else {
                    loop_pull(tail, pred)
                }
            })
        }
        let this = self.clone();
        Stream::new(move || loop_pull(this.clone(), pred.clone()))
    }

    /// Skips items whose `Process<bool>` predicate resolves to `false`
    /// (spec.md §4.7).
    pub fn filter_m(&self, pred: impl Fn(&T) -> Process<bool> + Clone + 'static) -> Stream<T> {
        fn loop_pull<T: Clone + 'static>(
            s: Stream<T>,
            pred: impl Fn(&T) -> Process<bool> + Clone + 'static,
        ) -> Process<(T, Stream<T>)> {
            s.pull().and_then(move |(v, tail)| {
                let pred2 = pred.clone();
                let check = pred(&v);
                let v2 = v.clone();
                check.and_then(move |ok| {
                    if ok {
                        Process::pure((v2, tail.filter_m(pred2)))
                    } else {
                        loop_pull(tail, pred2)
                    }
                })
            })
        }
        let this = self.clone();
        Stream::new(move || loop_pull(this.clone(), pred.clone()))
    }

    /// Pulls left then right each step, pairing them up (spec.md §4.7).
    pub fn zip_seq<U: Clone + 'static>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let a = self.clone();
        let b = other.clone();
        Stream::new(move || {
            let b = b.clone();
            a.pull().and_then(move |(av, atail)| {
                b.pull().map(move |(bv, btail)| ((av, bv), atail.zip_seq(&btail)))
            })
        })
    }

    /// Spawns the two pulls as parallel sub-processes and waits for both
    /// (spec.md §4.7) — genuinely interleaved in the cooperative sense of
    /// spec.md §5, not merely sequential like [`zip_seq`](Stream::zip_seq).
    pub fn zip_parallel<U: Clone + 'static>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let a = self.clone();
        let b = other.clone();
        Stream::new(move || {
            let a = a.clone();
            let b = b.clone();
            Process::suspend(move |run, pid, k| {
                let a_slot: Rc<RefCell<Option<(T, Stream<T>)>>> = Rc::new(RefCell::new(None));
                let b_slot: Rc<RefCell<Option<(U, Stream<U>)>>> = Rc::new(RefCell::new(None));
                let remaining = Rc::new(Cell::new(2u8));
                let k_rc: Rc<RefCell<Option<crate::process::Continuation<((T, U), Stream<(T, U)>)>>>> =
                    Rc::new(RefCell::new(Some(k)));
                let pid_outer = pid.clone();

                let finish = {
                    let remaining = Rc::clone(&remaining);
                    let a_slot = Rc::clone(&a_slot);
                    let b_slot = Rc::clone(&b_slot);
                    let k_rc = Rc::clone(&k_rc);
                    move |run: Run, pid: ProcessId| {
                        let left = remaining.get() - 1;
                        remaining.set(left);
                        if left == 0 {
                            if let Some(k) = k_rc.borrow_mut().take() {
                                let (av, atail) =
                                    a_slot.borrow_mut().take().expect("a must have resolved");
                                let (bv, btail) =
                                    b_slot.borrow_mut().take().expect("b must have resolved");
                                k(run, pid, Outcome::Value(((av, bv), atail.zip_parallel(&btail))));
                            }
                        }
                    }
                };

                let finish_a = finish.clone();
                let pid_outer_a = pid_outer.clone();
                let a_slot_write = Rc::clone(&a_slot);
                spawn_process(
                    &run,
                    &pid,
                    CancelLinkage::NoLinkage,
                    a.pull().and_then(move |pair| {
                        *a_slot_write.borrow_mut() = Some(pair);
                        Process::suspend(move |run, child_pid, k2| {
                            finish_a(run.clone(), pid_outer_a.clone());
                            k2(run, child_pid, Outcome::Value(()));
                        })
                    }),
                );

                let finish_b = finish;
                let pid_outer_b = pid_outer;
                let b_slot_write = Rc::clone(&b_slot);
                spawn_process(
                    &run,
                    &pid,
                    CancelLinkage::NoLinkage,
                    b.pull().and_then(move |pair| {
                        *b_slot_write.borrow_mut() = Some(pair);
                        Process::suspend(move |run, child_pid, k2| {
                            finish_b(run.clone(), pid_outer_b.clone());
                            k2(run, child_pid, Outcome::Value(()));
                        })
                    }),
                );
            })
        })
    }
}

fn spawn_process<T: 'static>(
    run: &Run,
    parent: &ProcessId,
    linkage: CancelLinkage,
    process: Process<T>,
) -> ProcessId {
    crate::process::spawn_process(run, parent, linkage, process)
}

/// `merge(s, s') = concat([s, s'])` under FCFS (spec.md §4.7).
pub fn merge<T: 'static>(a: Stream<T>, b: Stream<T>) -> Stream<T> {
    concat(Strategy::Fcfs, vec![a, b])
}

/// Spawns one writer process per input stream, each feeding a single
/// shared handoff queue ordered by `strategy`; the returned stream reads
/// items in the order they arrive (spec.md §4.7). Input streams are
/// pulled forever — used for conceptually infinite streams, matching the
/// spec's data model.
pub fn concat<T: 'static>(strategy: Strategy, streams: Vec<Stream<T>>) -> Stream<T> {
    let queue: InfiniteQueue<T> = InfiniteQueue::new(strategy, Strategy::Fcfs);
    let started = Rc::new(Cell::new(false));
    let streams = Rc::new(streams);
    concat_reader(queue, started, streams)
}

fn concat_reader<T: 'static>(
    queue: InfiniteQueue<T>,
    started: Rc<Cell<bool>>,
    streams: Rc<Vec<Stream<T>>>,
) -> Stream<T> {
    Stream::new(move || {
        let queue = queue.clone();
        let started = Rc::clone(&started);
        let streams = Rc::clone(&streams);
        Process::suspend(move |run, pid, k| {
            if !started.get() {
                started.set(true);
                for s in streams.iter() {
                    spawn_concat_pump(&run, &pid, s.clone(), queue.clone());
                }
            }
            let tail = concat_reader(queue.clone(), Rc::clone(&started), Rc::clone(&streams));
            queue.dequeue().map(move |v| (v, tail)).run_with(run, pid, k);
        })
    })
}

fn spawn_concat_pump<T: 'static>(run: &Run, parent: &ProcessId, s: Stream<T>, queue: InfiniteQueue<T>) {
    fn loop_pump<T: 'static>(s: Stream<T>, queue: InfiniteQueue<T>) -> Process<()> {
        s.pull().and_then(move |(v, tail)| {
            Process::suspend(move |run, pid, k| {
                queue.enqueue(&run, v);
                loop_pump(tail, queue).run_with(run, pid, k);
            })
        })
    }
    spawn_process(run, parent, CancelLinkage::CancelTogether, loop_pump(s, queue));
}

/// `n` consumer streams sharing a single read cursor over `s`, guarded by
/// a 1-capacity [`crate::resource::Resource`] under `strategy` (spec.md
/// §4.7; §8 "stream fairness for split(FCFS, n)").
pub fn split<T: Clone + 'static>(strategy: Strategy, n: usize, s: Stream<T>) -> Vec<Stream<T>> {
    let cursor = Rc::new(RefCell::new(s));
    let gate = crate::resource::Resource::new(strategy, 1, Some(1));
    (0..n).map(|_| split_consumer(Rc::clone(&cursor), gate.clone())).collect()
}

fn split_consumer<T: Clone + 'static>(
    cursor: Rc<RefCell<Stream<T>>>,
    gate: crate::resource::Resource,
) -> Stream<T> {
    Stream::new(move || {
        let cursor = Rc::clone(&cursor);
        let gate = gate.clone();
        let gate_for_release = gate.clone();
        gate.request().and_then(move |_| {
            let current = cursor.borrow().clone();
            let cursor_for_advance = Rc::clone(&cursor);
            current.pull().and_then(move |(v, tail)| {
                *cursor_for_advance.borrow_mut() = tail;
                let cursor_for_next = Rc::clone(&cursor_for_advance);
                Process::suspend(move |run, pid, k| {
                    gate_for_release.release(&run);
                    let next = split_consumer(cursor_for_next, gate_for_release.clone());
                    k(run, pid, Outcome::Value((v, next)));
                })
            })
        })
    })
}

/// A background writer always runs one item ahead of the reader, using a
/// capacity-1 [`Fifo`] for the read/write handshake (spec.md §4.7).
pub fn prefetch<T: 'static>(s: Stream<T>) -> Stream<T> {
    let fifo: Fifo<T> = Fifo::new(1);
    let started = Rc::new(Cell::new(false));
    prefetch_reader(s, fifo, started)
}

fn prefetch_reader<T: 'static>(s: Stream<T>, fifo: Fifo<T>, started: Rc<Cell<bool>>) -> Stream<T> {
    Stream::new(move || {
        let s = s.clone();
        let fifo = fifo.clone();
        let started = Rc::clone(&started);
        Process::suspend(move |run, pid, k| {
            if !started.get() {
                started.set(true);
                spawn_prefetch_writer(&run, &pid, s.clone(), fifo.clone());
            }
            let tail = prefetch_reader(s.clone(), fifo.clone(), Rc::clone(&started));
            fifo.dequeue().map(move |v| (v, tail)).run_with(run, pid, k);
        })
    })
}

fn spawn_prefetch_writer<T: 'static>(run: &Run, parent: &ProcessId, s: Stream<T>, fifo: Fifo<T>) {
    fn loop_writer<T: 'static>(s: Stream<T>, fifo: Fifo<T>) -> Process<()> {
        s.pull().and_then(move |(v, tail)| fifo.enqueue(v).and_then(move |_| loop_writer(tail, fifo)))
    }
    spawn_process(run, parent, CancelLinkage::CancelTogether, loop_writer(s, fifo));
}

/// Makes `s` restartable: every subscriber of the returned stream observes
/// the same, bit-identical sequence, computed only once (spec.md §4.7;
/// §8 "memo(s) observed twice yields bit-identical sequences").
pub fn memo<T: Clone + 'static>(s: Stream<T>) -> Stream<T> {
    let cached: Rc<RefCell<Option<(T, Stream<T>)>>> = Rc::new(RefCell::new(None));
    let source: Rc<RefCell<Option<Stream<T>>>> = Rc::new(RefCell::new(Some(s)));
    memo_node(cached, source)
}

fn memo_node<T: Clone + 'static>(
    cached: Rc<RefCell<Option<(T, Stream<T>)>>>,
    source: Rc<RefCell<Option<Stream<T>>>>,
) -> Stream<T> {
    Stream::new(move || {
        let cached = Rc::clone(&cached);
        let source = Rc::clone(&source);
        Process::suspend(move |run, pid, k| {
            if let Some(pair) = cached.borrow().clone() {
                k(run, pid, Outcome::Value(pair));
                return;
            }
            let underlying = source
                .borrow_mut()
                .take()
                .expect("memo: stream pulled concurrently before its first pull resolved");
            let cached_for_store = Rc::clone(&cached);
            underlying
                .pull()
                .map(move |(v, tail)| {
                    let memo_tail = memo(tail);
                    *cached_for_store.borrow_mut() = Some((v.clone(), memo_tail.clone()));
                    (v, memo_tail)
                })
                .run_with(run, pid, k);
        })
    })
}

/// Spawns a handler that enqueues triggered values into an FCFS queue;
/// the returned stream dequeues from it (spec.md §4.7).
pub fn signal_stream<T: Clone + 'static>(run: &Run, sig: &SignalSource<T>) -> Stream<T> {
    let queue: InfiniteQueue<T> = InfiniteQueue::new(Strategy::Fcfs, Strategy::Fcfs);
    let q = queue.clone();
    let run_for_handler = run.clone();
    sig.subscribe(move |v: &T| {
        q.enqueue(&run_for_handler, v.clone());
    });
    signal_stream_reader(queue)
}

fn signal_stream_reader<T: 'static>(queue: InfiniteQueue<T>) -> Stream<T> {
    Stream::new(move || {
        let queue = queue.clone();
        Process::suspend(move |run, pid, k| {
            let tail = signal_stream_reader(queue.clone());
            queue.dequeue().map(move |v| (v, tail)).run_with(run, pid, k);
        })
    })
}

/// Spawns a consumer that triggers a signal once per item pulled from `s`
/// (spec.md §4.7).
pub fn stream_signal<T: Clone + 'static>(run: &Run, parent: &ProcessId, s: Stream<T>) -> SignalSource<T> {
    let sig = SignalSource::new();
    fn loop_consumer<T: Clone + 'static>(s: Stream<T>, sig: SignalSource<T>) -> Process<()> {
        s.pull().and_then(move |(v, tail)| {
            sig.trigger(&v);
            loop_consumer(tail, sig)
        })
    }
    spawn_process(run, parent, CancelLinkage::NoLinkage, loop_consumer(s, sig.clone()));
    sig
}

/// Splits a stream of pairs into two independently-pullable projections
/// sharing one memoized source, so each side is pulled exactly once per
/// item regardless of how many times either projection is itself pulled
/// (SPEC_FULL, grounding for `Processor::first`/`second`/`product`).
pub fn unzip<A: Clone + 'static, B: Clone + 'static>(s: Stream<(A, B)>) -> (Stream<A>, Stream<B>) {
    let shared = memo(s);
    let left = shared.clone().map(|(a, _)| a);
    let right = shared.map(|(_, b)| b);
    (left, right)
}
