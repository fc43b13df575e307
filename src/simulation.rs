//! The single entry point a host application calls: builds a model's
//! `Dynamics` graph over a fresh [`Run`], drives the integration grid from
//! `start_time` to `stop_time` draining due events at every tick, and
//! returns the model's value at `stop_time` (spec.md §2 "Data flow", §6
//! External Interfaces).
//!
//! There is no wire protocol or CLI surface here (spec.md §6) — a model is
//! an ordinary closure building a [`Dynamics`] graph, exactly the way the
//! teacher's `Engine::new` takes a `SimulationRequest` and an ordinary
//! closure-free particle-update loop.

use log::debug;

use crate::dynamics::Dynamics;
use crate::point::{Point, Run};
use crate::spec::Specs;

/// Builds `model`'s `Dynamics` graph over a fresh run and drives it from
/// `specs.start_time` to `specs.stop_time`, returning the graph's value at
/// `stop_time` (spec.md §6 `run_simulation`).
pub fn run_simulation<T, F>(specs: Specs, model: F) -> T
where
    T: 'static,
    F: FnOnce(&Run) -> Dynamics<T>,
{
    run_simulation_indexed(specs, 0, 0, model)
}

/// Like [`run_simulation`], but seeds the run's RNG from `(base_seed,
/// run_index)` — the building block [`run_simulation_series`] uses to
/// produce a deterministic series of independent runs (spec.md §6,
/// SPEC_FULL §B.4).
pub fn run_simulation_indexed<T, F>(specs: Specs, base_seed: u64, run_index: u64, model: F) -> T
where
    T: 'static,
    F: FnOnce(&Run) -> Dynamics<T>,
{
    let run = Run::new(specs, base_seed, run_index);
    let result = model(&run);
    drive(&run, specs);
    let final_point = Point::on_grid(&specs, specs.iteration_count(), 0);
    result.apply(&run, final_point)
}

/// Advances the integration grid one phase at a time from iteration `0` up
/// to (but not including) the final iteration, draining every due event at
/// each tick; a closing drain lands the queue's clock exactly on
/// `stop_time`. This is what lets event-queue-driven processes (`hold`,
/// resource waits, queue traffic) advance over the run's timeline even when
/// nothing in the model's `Dynamics` graph ever reads them (spec.md §2,
/// §4.2).
fn drive(run: &Run, specs: Specs) {
    let n = specs.iteration_count();
    for i in 0..n {
        for phase in 0..specs.method.phases() {
            let point = Point::on_grid(&specs, i, phase);
            run.queue().borrow().drain_sync(&specs, point);
        }
    }
    let final_point = Point::on_grid(&specs, n, 0);
    run.queue().borrow().drain_sync(&specs, final_point);
    debug!(
        "run_simulation: run_index={} drained through stop_time={}",
        run.index(),
        specs.stop_time
    );
}

/// Runs `n` independent simulations sharing `specs`, differing only in
/// `run_index` ∈ `[0, n)` (spec.md §6 `run_simulation_series`).
/// Deterministic regardless of scheduling order: each run's RNG is seeded
/// from `(base_seed, run_index)` (SPEC_FULL §B.4). The `n` runs execute in
/// parallel across independent [`Run`]s via `rayon` — the teacher's tool
/// for exactly this shape of embarrassingly-parallel, independent-unit work
/// — never *within* one run, which stays single-threaded per spec.md §1's
/// Non-goal ("parallel/multicore execution of a single simulation run").
pub fn run_simulation_series<T, F>(specs: Specs, base_seed: u64, n: u64, model: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&Run) -> Dynamics<T> + Sync,
{
    use rayon::prelude::*;
    (0..n)
        .into_par_iter()
        .map(|run_index| run_simulation_indexed(specs, base_seed, run_index, &model))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::Integrator;
    use crate::spec::Method;

    #[test]
    fn run_simulation_returns_dynamics_value_at_stop_time() {
        let specs = Specs::new(0.0, 10.0, 0.5, Method::Rk4).unwrap();
        let x = run_simulation(specs, |_run| {
            let x = Integrator::new(specs, 0.0);
            x.set_derivative(crate::dynamics::Dynamics::constant(1.0));
            x.as_dynamics()
        });
        assert!((x - 10.0).abs() <= 1e-9);
    }

    #[test]
    fn run_simulation_drains_holds_scheduled_by_a_spawned_process() {
        use crate::process::{hold, run_process, Process};
        use std::cell::Cell;
        use std::rc::Rc;

        let specs = Specs::new(0.0, 10.0, 1.0, Method::Euler).unwrap();
        let fired = Rc::new(Cell::new(false));
        let fired_for_model = Rc::clone(&fired);
        let result = run_simulation(specs, move |run| {
            let fired = Rc::clone(&fired_for_model);
            run_process(run, false, hold(3.0).map(move |_| fired.set(true)));
            crate::dynamics::Dynamics::constant(0.0)
        });
        assert_eq!(result, 0.0);
        assert!(fired.get(), "a hold() scheduled inside the model must fire during the drive loop");
    }

    #[test]
    fn run_simulation_series_is_deterministic_and_independent_per_run() {
        use rand::Rng;

        let specs = Specs::new(0.0, 1.0, 1.0, Method::Euler).unwrap();
        let draw = |run: &Run| {
            let v: u32 = run.rng().borrow_mut().random();
            crate::dynamics::Dynamics::constant(v)
        };
        let first = run_simulation_series(specs, 99, 4, draw);
        let second = run_simulation_series(specs, 99, 4, draw);
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        let mut dedup = first.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), 4, "distinct run_index must diverge in their RNG stream");
    }
}
