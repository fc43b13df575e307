//! `Dynamics<T>`: a pure function of [`Point`], and the `Integrator` built on
//! top of it for continuous-time (ODE) state (spec.md §4.1).
//!
//! An `Integrator` memoizes one value per `(iteration, phase)` grid
//! coordinate and steps forward using the method carried by `Specs`
//! (Euler/RK2/RK4, spec.md §4.1). Self-referential derivatives (`dx/dt =
//! f(t, x)` reading `x` through `Integrator::as_dynamics`) are supported via
//! the allocate-then-patch pattern from the DESIGN NOTES: the predictor
//! value at a sub-point is cached *before* the derivative is evaluated at
//! that sub-point, so a derivative that reads the integrator's own value at
//! the same point sees the predictor rather than recursing.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::point::{Point, Run};
use crate::spec::{Method, Specs};

/// A pure function from [`Point`] to a value — the substrate every
/// integrator, interpolation, and memoized computation over the grid is
/// built from (spec.md §4.1).
pub struct Dynamics<T> {
    eval: Rc<dyn Fn(&Run, Point) -> T>,
}

impl<T> Clone for Dynamics<T> {
    fn clone(&self) -> Self {
        Dynamics {
            eval: Rc::clone(&self.eval),
        }
    }
}

impl<T: 'static> Dynamics<T> {
    pub fn new(f: impl Fn(&Run, Point) -> T + 'static) -> Self {
        Dynamics { eval: Rc::new(f) }
    }

    pub fn apply(&self, run: &Run, point: Point) -> T {
        (self.eval)(run, point)
    }
}

impl<T: Clone + 'static> Dynamics<T> {
    pub fn constant(value: T) -> Self {
        Dynamics::new(move |_run, _point| value.clone())
    }

    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Dynamics<U> {
        let this = self.clone();
        Dynamics::new(move |run, point| f(this.apply(run, point)))
    }

    /// Combines `self` and `other`, evaluated at the same point.
    pub fn zip<U: Clone + 'static>(&self, other: &Dynamics<U>) -> Dynamics<(T, U)> {
        let a = self.clone();
        let b = other.clone();
        Dynamics::new(move |run, point| (a.apply(run, point), b.apply(run, point)))
    }
}

/// The point's own simulated time, as a `Dynamics<f64>`.
pub fn time() -> Dynamics<f64> {
    Dynamics::new(|_run, point| point.time)
}

/// The point's own integration iteration, as a `Dynamics<u64>`.
pub fn iteration() -> Dynamics<u64> {
    Dynamics::new(|_run, point| point.iteration)
}

/// A memoized continuous-time state variable: `x(t)` satisfying `dx/dt =
/// f(t, x)` for some derivative `f` plugged in after construction (spec.md
/// §4.1, DESIGN NOTES "recursive mdo/fixed-point integrator wiring").
#[derive(Clone)]
pub struct Integrator {
    inner: Rc<IntegratorInner>,
}

struct IntegratorInner {
    specs: Specs,
    deriv: RefCell<Option<Dynamics<f64>>>,
    cache: RefCell<HashMap<(u64, i64), f64>>,
    /// Number of leading iterations (starting at 0) whose phase-0 value is
    /// cached; the next iteration to step is `frontier - 1`.
    frontier: Cell<u64>,
}

impl Integrator {
    /// Allocates an integrator cell with `initial` as `x` at the run's
    /// start time. The derivative must be plugged in with
    /// [`set_derivative`](Integrator::set_derivative) before the integrator
    /// is ever read — this two-step allocate/patch split is what lets a
    /// derivative close over the integrator's own `Dynamics` handle.
    pub fn new(specs: Specs, initial: f64) -> Self {
        let mut cache = HashMap::new();
        cache.insert((0u64, 0i64), initial);
        Integrator {
            inner: Rc::new(IntegratorInner {
                specs,
                deriv: RefCell::new(None),
                cache: RefCell::new(cache),
                frontier: Cell::new(1),
            }),
        }
    }

    /// Plugs in `dx/dt = f(point)`. May be (and typically is, for a
    /// self-referential ODE) a closure built from
    /// [`as_dynamics`](Integrator::as_dynamics) of this very integrator.
    pub fn set_derivative(&self, f: Dynamics<f64>) {
        *self.inner.deriv.borrow_mut() = Some(f);
    }

    /// A `Dynamics<f64>` handle reading this integrator, suitable for
    /// passing to another integrator's derivative or for composing with
    /// [`Dynamics`] combinators.
    pub fn as_dynamics(&self) -> Dynamics<f64> {
        let this = self.clone();
        Dynamics::new(move |run, point| this.read(run, point))
    }

    fn get_cached(&self, key: (u64, i64)) -> Option<f64> {
        self.inner.cache.borrow().get(&key).copied()
    }

    fn set_cached(&self, key: (u64, i64), value: f64) {
        self.inner.cache.borrow_mut().insert(key, value);
    }

    fn deriv_at(&self, run: &Run, point: Point) -> f64 {
        let f = self
            .inner
            .deriv
            .borrow()
            .clone()
            .expect("Integrator::set_derivative must be called before the integrator is read");
        f.apply(run, point)
    }

    /// Reads the integrator's value at `point`. At `phase = -1` (off-grid),
    /// linearly interpolates between the two nearest grid iterations — the
    /// normative behavior per spec.md §9's Open Questions resolution.
    pub fn read(&self, run: &Run, point: Point) -> f64 {
        if point.phase < 0 {
            return self.interpolate(run, point.time);
        }
        self.ensure(run, point.iteration, point.phase);
        self.get_cached((point.iteration, point.phase))
            .expect("ensure must populate the requested cache entry")
    }

    /// Guarantees `(target_iter, target_phase)` is cached, stepping the
    /// grid forward from the current frontier as needed.
    fn ensure(&self, run: &Run, target_iter: u64, target_phase: i64) {
        loop {
            let frontier = self.inner.frontier.get();
            let phase0_done = frontier > target_iter;
            let target_phase_done =
                target_phase <= 0 || self.get_cached((target_iter, target_phase)).is_some();
            if phase0_done && target_phase_done {
                break;
            }
            let i = frontier - 1;
            self.step_iteration(run, i);
            self.inner.frontier.set(frontier + 1);
        }
    }

    /// Advances the grid from iteration `i` to `i + 1`, caching every
    /// intermediate sub-point the method's stepping rule uses along the
    /// way (spec.md §4.1).
    fn step_iteration(&self, run: &Run, i: u64) {
        let specs = self.inner.specs;
        let dt = specs.dt;
        let x0 = self
            .get_cached((i, 0))
            .expect("step_iteration: phase 0 of the current iteration must already be cached");

        match specs.method {
            Method::Euler => {
                let k1 = self.deriv_at(run, Point::on_grid(&specs, i, 0));
                self.set_cached((i + 1, 0), x0 + dt * k1);
            }
            Method::Rk2 => {
                let k1 = self.deriv_at(run, Point::on_grid(&specs, i, 0));
                self.set_cached((i, 1), x0 + dt * k1);
                let k2 = self.deriv_at(run, Point::on_grid(&specs, i, 1));
                self.set_cached((i + 1, 0), x0 + dt / 2.0 * (k1 + k2));
            }
            Method::Rk4 => {
                let k1 = self.deriv_at(run, Point::on_grid(&specs, i, 0));
                self.set_cached((i, 1), x0 + dt / 2.0 * k1);
                let k2 = self.deriv_at(run, Point::on_grid(&specs, i, 1));
                self.set_cached((i, 2), x0 + dt / 2.0 * k2);
                let k3 = self.deriv_at(run, Point::on_grid(&specs, i, 2));
                self.set_cached((i, 3), x0 + dt * k3);
                let k4 = self.deriv_at(run, Point::on_grid(&specs, i, 3));
                self.set_cached((i + 1, 0), x0 + dt / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4));
            }
        }
    }

    fn interpolate(&self, run: &Run, t: f64) -> f64 {
        let specs = self.inner.specs;
        let lo = specs.iteration_at(t);
        let hi = lo + 1;
        self.ensure(run, hi, 0);
        let t_lo = specs.basic_time(lo, 0);
        let t_hi = specs.basic_time(hi, 0);
        let x_lo = self.get_cached((lo, 0)).expect("lo bound must be cached after ensure");
        let x_hi = self.get_cached((hi, 0)).expect("hi bound must be cached after ensure");
        if (t_hi - t_lo).abs() < f64::EPSILON {
            return x_lo;
        }
        let frac = (t - t_lo) / (t_hi - t_lo);
        x_lo + frac * (x_hi - x_lo)
    }
}
