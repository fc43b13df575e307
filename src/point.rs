//! `Point` and `Run`: the grid coordinate and run-scoped shared state that
//! every evaluation context (Simulation/Dynamics/Event/Process, spec.md §2)
//! is built on, the way the teacher's `Simulation` struct is the one piece
//! of state every particle-update call closes over.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::event::EventQueue;
use crate::spec::Specs;

/// A point on the integration grid: simulated time plus the iteration/phase
/// coordinate it was reached at. `phase == -1` marks an off-grid point
/// reached between phases (e.g. by the event queue dispatching at an
/// arbitrary time) — `Dynamics` evaluators interpolate rather than using the
/// exact stepping rule for such points (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub time: f64,
    pub iteration: u64,
    pub phase: i64,
}

impl Point {
    /// The point at grid coordinate `(iteration, phase)` under `specs`.
    pub fn on_grid(specs: &Specs, iteration: u64, phase: usize) -> Self {
        Point {
            time: specs.basic_time(iteration, phase),
            iteration,
            phase: phase as i64,
        }
    }

    /// An off-grid point at arbitrary time `t`, with `phase = -1` and the
    /// iteration containing `t` recorded for interpolation.
    pub fn off_grid(specs: &Specs, t: f64) -> Self {
        Point {
            time: t,
            iteration: specs.iteration_at(t),
            phase: -1,
        }
    }
}

/// State shared by every context within one simulation run: the immutable
/// specs, the run's event queue, and a seeded RNG private to this run (so
/// that running a series of runs, one per rayon worker, is reproducible
/// per-run regardless of scheduling order — SPEC_FULL §B.4).
pub struct RunInner {
    pub specs: Specs,
    pub queue: RefCell<EventQueue>,
    pub rng: RefCell<StdRng>,
    pub index: u64,
    pub seq: std::cell::Cell<u64>,
}

/// A cheap-to-clone handle to one run's shared state. Every context type
/// (`Process`, `Resource`, `Stream`, ...) carries one of these, mirroring
/// how the teacher's worker closures each hold a handle onto the one
/// `Simulation` they belong to.
#[derive(Clone)]
pub struct Run(Rc<RunInner>);

impl Run {
    /// Starts a fresh run: `index` seeds `rng` as `(base_seed, index)`, so a
    /// series of runs sharing one `base_seed` are mutually independent but
    /// individually reproducible (SPEC_FULL §B.4).
    pub fn new(specs: Specs, base_seed: u64, index: u64) -> Self {
        let rng = StdRng::seed_from_u64(base_seed.wrapping_add(index.wrapping_mul(0x9E37_79B9_7F4A_7C15)));
        Run(Rc::new(RunInner {
            specs,
            queue: RefCell::new(EventQueue::new()),
            rng: RefCell::new(rng),
            index,
            seq: std::cell::Cell::new(0),
        }))
    }

    pub fn specs(&self) -> &Specs {
        &self.0.specs
    }

    pub fn queue(&self) -> &RefCell<EventQueue> {
        &self.0.queue
    }

    pub fn rng(&self) -> &RefCell<StdRng> {
        &self.0.rng
    }

    pub fn index(&self) -> u64 {
        self.0.index
    }

    /// A run-scoped monotonically increasing counter, used to break ties
    /// between equal-priority waiters in insertion order (spec.md §4.6).
    pub fn next_sequence(&self) -> u64 {
        let n = self.0.seq.get();
        self.0.seq.set(n + 1);
        n
    }

    /// The point at the start of the run.
    pub fn start_point(&self) -> Point {
        Point::on_grid(&self.0.specs, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Method;

    #[test]
    fn same_seed_same_index_reproducible() {
        let specs = Specs::new(0.0, 1.0, 0.1, Method::Euler).unwrap();
        let r1 = Run::new(specs, 42, 3);
        let r2 = Run::new(specs, 42, 3);
        use rand::Rng;
        let a: u32 = r1.rng().borrow_mut().random();
        let b: u32 = r2.rng().borrow_mut().random();
        assert_eq!(a, b);
    }

    #[test]
    fn different_index_different_stream() {
        let specs = Specs::new(0.0, 1.0, 0.1, Method::Euler).unwrap();
        let r1 = Run::new(specs, 42, 0);
        let r2 = Run::new(specs, 42, 1);
        use rand::Rng;
        let a: u32 = r1.rng().borrow_mut().random();
        let b: u32 = r2.rng().borrow_mut().random();
        assert_ne!(a, b);
    }

    #[test]
    fn off_grid_point_has_phase_minus_one() {
        let specs = Specs::new(0.0, 10.0, 1.0, Method::Euler).unwrap();
        let p = Point::off_grid(&specs, 3.5);
        assert_eq!(p.phase, -1);
        assert_eq!(p.iteration, 3);
    }
}
