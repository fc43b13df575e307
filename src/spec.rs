//! Immutable run parameters and the integration-grid arithmetic derived from
//! them.
//!
//! A [`Specs`] value is created once and shared read-only for the lifetime of
//! a run, the same way the teacher crate's `SimulationParams` is captured
//! once in a `SimulationRequest` and never mutated during execution.

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Numerical integration method used to advance the continuous-time grid.
///
/// The stepping rule itself (the actual RK coefficients) is a Dynamics-layer
/// concern (see [`crate::dynamics`]); this enum only carries the phase
/// structure that the rest of the kernel needs: how many sub-steps per
/// iteration, and at what fractional offset into `dt` each sub-step lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Euler,
    Rk2,
    Rk4,
}

impl Method {
    /// Number of phases per iteration: 1 for Euler, 2 for RK2, 4 for RK4.
    pub fn phases(self) -> usize {
        match self {
            Method::Euler => 1,
            Method::Rk2 => 2,
            Method::Rk4 => 4,
        }
    }

    /// Fraction of `dt` that phase `phase` lands at within the current
    /// iteration, per spec.md §4.1 (0.0 at the start of the step, 1.0 at the
    /// end; RK4's midpoint phases land at 0.5).
    ///
    /// # Panics
    ///
    /// Panics if `phase` is out of range for this method — an out-of-range
    /// phase index can only originate from a bug in the integration driver,
    /// never from model code.
    fn phase_fraction(self, phase: usize) -> f64 {
        match (self, phase) {
            (Method::Euler, 0) => 0.0,
            (Method::Rk2, 0) => 0.0,
            (Method::Rk2, 1) => 1.0,
            (Method::Rk4, 0) => 0.0,
            (Method::Rk4, 1) => 0.5,
            (Method::Rk4, 2) => 0.5,
            (Method::Rk4, 3) => 1.0,
            _ => panic!(
                "phase {} out of range for method {:?} (0..{})",
                phase,
                self,
                self.phases()
            ),
        }
    }

    /// Absolute time offset `delta(phase)` into the current iteration, i.e.
    /// `phase_fraction(phase) * dt`, per spec.md §4.1.
    pub fn phase_offset(self, phase: usize, dt: f64) -> f64 {
        self.phase_fraction(phase) * dt
    }
}

/// Immutable parameters for one simulation run: start/stop time, step size,
/// and integration method.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Specs {
    pub start_time: f64,
    pub stop_time: f64,
    pub dt: f64,
    pub method: Method,
}

impl Specs {
    /// Validates and builds a `Specs`.
    ///
    /// `dt` must be strictly positive and `stop_time` must not precede
    /// `start_time` — both are configuration mistakes, not programmer
    /// misuse of a primitive at run time, so they are reported as a
    /// [`KernelError`] rather than a panic.
    pub fn new(start_time: f64, stop_time: f64, dt: f64, method: Method) -> Result<Self, KernelError> {
        if dt <= 0.0 {
            return Err(KernelError::InvalidSpecs(format!(
                "dt must be > 0, got {dt}"
            )));
        }
        if stop_time < start_time {
            return Err(KernelError::InvalidSpecs(format!(
                "stop_time ({stop_time}) precedes start_time ({start_time})"
            )));
        }
        Ok(Specs {
            start_time,
            stop_time,
            dt,
            method,
        })
    }

    /// `N = round((stop - start) / dt)`, the number of iterations `0..=N`.
    pub fn iteration_count(&self) -> u64 {
        ((self.stop_time - self.start_time) / self.dt).round() as u64
    }

    /// Basic time at grid coordinate `(iteration, phase)`, per spec.md §4.1:
    /// `start + iteration*dt + delta(method, phase)`.
    pub fn basic_time(&self, iteration: u64, phase: usize) -> f64 {
        self.start_time + iteration as f64 * self.dt + self.method.phase_offset(phase, self.dt)
    }

    /// Integration iteration that contains simulated time `t`, i.e.
    /// `floor((t - start) / dt)`, clamped to `0`. Used by the event-queue
    /// driver to fabricate a dispatch `Point` consistent with its action's
    /// execution time (spec.md §4.2).
    pub fn iteration_at(&self, t: f64) -> u64 {
        let raw = (t - self.start_time) / self.dt;
        if raw <= 0.0 {
            0
        } else {
            raw.floor() as u64
        }
    }
}
