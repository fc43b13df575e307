//! Integration tests exercising several kernel layers together — the
//! concrete end-to-end scenarios of spec.md §8, driven through the public
//! `run_simulation`/`run_simulation_series` entry points rather than a
//! single module in isolation.

use kairos_sim::dynamics::{Dynamics, Integrator};
use kairos_sim::process::{cancel, hold, run_process, ProcessState};
use kairos_sim::queue::{Fifo, InfiniteQueue};
use kairos_sim::resource::Resource;
use kairos_sim::signal::SignalSource;
use kairos_sim::simulation::{run_simulation, run_simulation_series};
use kairos_sim::spec::{Method, Specs};
use kairos_sim::strategy::Strategy;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A model combining an RK4 integrator (dx/dt = 1) with a resource-gated
/// producer/consumer pair feeding an infinite FCFS queue — driving the
/// integration grid and the event-driven process layer through one call to
/// `run_simulation`, as a host application would.
#[test]
fn run_simulation_drives_integrator_and_queue_traffic_together() {
    let specs = Specs::new(0.0, 20.0, 1.0, Method::Rk4).unwrap();
    let consumed = Rc::new(RefCell::new(Vec::new()));
    let consumed_for_model = Rc::clone(&consumed);

    let x = run_simulation(specs, move |run| {
        let x = Integrator::new(specs, 0.0);
        x.set_derivative(Dynamics::constant(1.0));

        let queue: InfiniteQueue<u64> = InfiniteQueue::new(Strategy::Fcfs, Strategy::Fcfs);
        for i in 0..5u64 {
            let q = queue.clone();
            let run_for_enqueue = run.clone();
            run_process(
                run,
                false,
                hold(i as f64 * 2.0).map(move |_| q.enqueue(&run_for_enqueue, i)),
            );
        }

        let consumed = consumed_for_model;
        for _ in 0..5 {
            let consumed = Rc::clone(&consumed);
            let q = queue.clone();
            run_process(run, false, q.dequeue().map(move |v| consumed.borrow_mut().push(v)));
        }

        x.as_dynamics()
    });

    assert!((x - specs.stop_time).abs() <= 1e-9, "integrator must reach stop_time: got {x}");
    assert_eq!(*consumed.borrow(), vec![0, 1, 2, 3, 4], "queue must deliver items in FCFS order");
}

/// spec.md §8 scenario 1: a bounded FIFO of capacity 2 loses the third
/// over-capacity write and keeps an accurate `lost_count`, even when driven
/// purely through event-context traffic rather than process suspension.
#[test]
fn bounded_fifo_drops_overflow_and_counts_losses() {
    let specs = Specs::new(0.0, 1.0, 1.0, Method::Euler).unwrap();
    let run = kairos_sim::Run::new(specs, 7, 0);
    let fifo: Fifo<&'static str> = Fifo::new(2);

    fifo.enqueue_or_lost(&run, "a");
    fifo.enqueue_or_lost(&run, "b");
    fifo.enqueue_or_lost(&run, "c");

    assert_eq!(fifo.len(), 2);
    assert_eq!(fifo.lost_count(), 1);
    assert_eq!(fifo.try_dequeue(&run), Some("a"));
    assert_eq!(fifo.try_dequeue(&run), Some("b"));
    assert_eq!(fifo.try_dequeue(&run), None);
}

/// spec.md §8 scenario 5/6: a held process cancelled before its hold fires
/// never invokes its continuation, and a process waiting on a `Resource`
/// behind `StaticPriorities` is removed from the waiter list on cancel
/// rather than being silently resumed later.
#[test]
fn cancelling_a_held_process_suppresses_its_continuation() {
    let specs = Specs::new(0.0, 10.0, 1.0, Method::Euler).unwrap();
    let run = kairos_sim::Run::new(specs, 3, 0);

    let fired = Rc::new(Cell::new(false));
    let fired_for_body = Rc::clone(&fired);
    let pid = run_process(&run, false, hold(5.0).map(move |_| fired_for_body.set(true)));
    assert_eq!(pid.state(), ProcessState::Held);

    cancel(&run, &pid);
    assert_eq!(pid.state(), ProcessState::Cancelled);

    run.queue().borrow().drain(
        run.specs(),
        kairos_sim::Point { time: 10.0, iteration: 10, phase: -1 },
    );
    assert!(!fired.get(), "a cancelled hold must never resume its continuation");

    let resource = Resource::new(Strategy::StaticPriorities, 0, None);
    let waiter_pid = run_process(&run, false, resource.request_with_priority(1.0));
    assert_eq!(resource.waiter_count(), 1);
    cancel(&run, &waiter_pid);
    assert_eq!(resource.waiter_count(), 0, "a cancelled resource waiter must be dropped, not resumed");
}

/// spec.md §9's normative resolution for signal handlers added mid-trigger:
/// a subscriber that resubscribes itself during a trigger is not invoked
/// again until the *next* trigger, even though the subscriber list visibly
/// changed underneath the loop.
#[test]
fn signal_snapshot_excludes_handlers_added_during_its_own_trigger() {
    let source: SignalSource<u32> = SignalSource::new();
    let calls = Rc::new(RefCell::new(Vec::new()));

    let calls_outer = Rc::clone(&calls);
    let source_for_resub = source.clone();
    let resubscribed = Rc::new(RefCell::new(None));
    let resub_for_handler = Rc::clone(&resubscribed);
    let _outer_sub = source.subscribe(move |v: &u32| {
        calls_outer.borrow_mut().push(*v);
        let calls_inner = Rc::clone(&calls_outer);
        let sub = source_for_resub.subscribe(move |v: &u32| {
            calls_inner.borrow_mut().push(*v);
        });
        *resub_for_handler.borrow_mut() = Some(sub);
    });

    source.trigger(&1);
    assert_eq!(*calls.borrow(), vec![1], "the handler subscribed mid-trigger must not fire in the same trigger");

    source.trigger(&2);
    assert_eq!(*calls.borrow(), vec![1, 2, 2], "the next trigger must reach both the original and the newly added handler");
}

/// A deterministic series of independent runs: same `(base_seed, run_count)`
/// always reproduces the same per-run results, and distinct `run_index`
/// values diverge, because each run seeds its own `StdRng`.
#[test]
fn run_simulation_series_reproduces_and_diverges_per_run() {
    let specs = Specs::new(0.0, 5.0, 1.0, Method::Euler).unwrap();
    let draw = |run: &kairos_sim::Run| {
        use rand::Rng;
        let v: u32 = run.rng().borrow_mut().random();
        Dynamics::constant(v)
    };

    let first = run_simulation_series(specs, 2024, 6, draw);
    let second = run_simulation_series(specs, 2024, 6, draw);
    assert_eq!(first, second, "same base_seed and run_count must reproduce exactly");

    let mut distinct = first.clone();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), first.len(), "each run_index must draw from an independent RNG stream");
}

/// Round-trips a `Specs` value through both serialization formats the
/// kernel's ambient CLI carries — `bincode` for the compact path and
/// `serde_json` for the human-readable one — via real files in a temporary
/// directory, exercising the same crates the CLI's `--output` flag uses.
#[test]
fn specs_round_trips_through_bincode_and_json_files() {
    let specs = Specs::new(0.0, 42.0, 0.25, Method::Rk4).unwrap();
    let dir = tempfile::tempdir().expect("tempdir must be creatable");

    let bin_path = dir.path().join("specs.bin");
    let bytes = bincode::serialize(&specs).unwrap();
    std::fs::write(&bin_path, &bytes).unwrap();
    let read_back: Specs = bincode::deserialize(&std::fs::read(&bin_path).unwrap()).unwrap();
    assert_eq!(read_back, specs);

    let json_path = dir.path().join("specs.json");
    let json = serde_json::to_string(&specs).unwrap();
    std::fs::write(&json_path, &json).unwrap();
    let read_back: Specs = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(read_back, specs);
}
