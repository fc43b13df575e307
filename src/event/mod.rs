//! The event queue: the time-ordered action dispatcher every context above
//! Dynamics is built on (spec.md §4.2).
//!
//! Actions are boxed once-callable closures taking the dispatch `Point`
//! they were fired at — the same "trampolined boxed closure" shape the
//! process machinery uses for continuations (spec.md DESIGN NOTES), kept
//! here at its simplest: an action has no return value, it only performs
//! side effects (usually: resume a suspended process).

use std::cell::{Cell, RefCell};

use log::trace;

use crate::point::Point;
use crate::pqueue::PriorityQueue;
use crate::spec::Specs;

/// A deferred computation dispatched by the event queue at a specific time.
pub type Action = Box<dyn FnOnce(Point)>;

/// Which events `drain`-like helpers should consider relative to a
/// reference point (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventProcessingMode {
    /// Dispatch everything scheduled at or before the reference time.
    CurrentEvents,
    /// Dispatch everything scheduled strictly before the reference time.
    EarlierEvents,
    /// Like `CurrentEvents`, but additionally tolerates the queue's clock
    /// already sitting ahead of the reference time (used internally by the
    /// Dynamics-to-Event bridge).
    CurrentEventsOrFromPast,
    /// Like `EarlierEvents`, with the same past-clock tolerance.
    EarlierEventsOrFromPast,
}

impl EventProcessingMode {
    fn includes(self, action_time: f64, reference_time: f64) -> bool {
        match self {
            EventProcessingMode::CurrentEvents | EventProcessingMode::CurrentEventsOrFromPast => {
                action_time <= reference_time
            }
            EventProcessingMode::EarlierEvents | EventProcessingMode::EarlierEventsOrFromPast => {
                action_time < reference_time
            }
        }
    }

    fn tolerates_queue_ahead(self) -> bool {
        matches!(
            self,
            EventProcessingMode::CurrentEventsOrFromPast | EventProcessingMode::EarlierEventsOrFromPast
        )
    }
}

/// A run's time-ordered action queue.
///
/// Invariants (spec.md §3): `current_time` is monotone non-decreasing over
/// the queue's entire lifetime; `busy_flag` prevents reentrant drains; the
/// heap's earliest time is `>= current_time` whenever the queue is
/// quiescent (not mid-drain). The queue is only ever touched from within
/// one Run's single-threaded event loop (spec.md §3 ownership summary), so
/// plain `RefCell` interior mutability is enough — no locking.
pub struct EventQueue {
    pq: RefCell<PriorityQueue<Action>>,
    busy_flag: Cell<bool>,
    current_time: Cell<f64>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            pq: RefCell::new(PriorityQueue::new()),
            busy_flag: Cell::new(false),
            current_time: Cell::new(f64::NEG_INFINITY),
        }
    }

    pub fn current_time(&self) -> f64 {
        self.current_time.get()
    }

    pub fn is_empty(&self) -> bool {
        self.pq.borrow().is_empty()
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.pq.borrow().peek_time()
    }

    /// Schedules `action` to run at time `t`.
    ///
    /// # Panics
    ///
    /// `t` must not precede the queue's current time — scheduling into the
    /// past is a programmer error, not a recoverable condition (spec.md
    /// §4.2, §7 tier 1).
    pub fn enqueue(&self, t: f64, action: Action) {
        let now = self.current_time.get();
        if t < now {
            panic!("cannot enqueue at time {t} before current_time {now}");
        }
        self.pq.borrow_mut().push(t, action);
    }

    /// Drains due events in time order, executing each one's action with a
    /// freshly fabricated dispatch point (phase = -1, spec.md §4.2).
    ///
    /// Idempotent under reentry: if a drain is already in progress (an
    /// action itself enqueued work and, directly or indirectly, called
    /// `drain` again), this call is a no-op — the outer drain's loop will
    /// pick up anything newly enqueued.
    pub fn drain(&self, specs: &Specs, point: Point) {
        if self.busy_flag.get() {
            return;
        }
        self.busy_flag.set(true);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.drain_inner(specs, point);
        }));
        self.busy_flag.set(false);
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    fn drain_inner(&self, specs: &Specs, point: Point) {
        loop {
            let due = match self.pq.borrow().peek_time() {
                Some(t) if t <= point.time => t,
                _ => break,
            };
            let (time, action) = self
                .pq
                .borrow_mut()
                .pop()
                .expect("peeked a due entry, pop must succeed");
            debug_assert!((time - due).abs() < f64::EPSILON);
            let now = self.current_time.get();
            if time < now {
                panic!("event time {time} is less than queue current_time {now}");
            }
            self.current_time.set(time);
            let dispatch = Point {
                time,
                iteration: specs.iteration_at(time),
                phase: -1,
            };
            trace!("dispatching event at t={time}");
            action(dispatch);
        }
    }

    /// `drain_sync`: like `drain`, but first asserts the queue's clock has
    /// not already passed `point.time` — calling it with a point behind the
    /// clock is a programmer error (spec.md §4.2).
    pub fn drain_sync(&self, specs: &Specs, point: Point) {
        let now = self.current_time.get();
        if point.time < now {
            panic!("drain_sync called with point.time {} behind current_time {now}", point.time);
        }
        self.drain(specs, point);
    }

    /// Drains events matching `mode` relative to `reference_time`, used by
    /// the Dynamics-to-Event bridge before running an event's body.
    pub fn drain_mode(&self, specs: &Specs, mode: EventProcessingMode, reference_time: f64) {
        if self.busy_flag.get() {
            return;
        }
        let now = self.current_time.get();
        if now > reference_time && !mode.tolerates_queue_ahead() {
            panic!("drain_mode: queue clock {now} already ahead of reference {reference_time}");
        }
        self.busy_flag.set(true);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
            let at = match self.pq.borrow().peek_time() {
                Some(t) if mode.includes(t, reference_time) => t,
                _ => break,
            };
            let (time, action) = self
                .pq
                .borrow_mut()
                .pop()
                .expect("peeked a matching entry, pop must succeed");
            debug_assert!((time - at).abs() < f64::EPSILON);
            let now = self.current_time.get();
            if time < now {
                panic!("event time {time} is less than queue current_time {now}");
            }
            self.current_time.set(time);
            let dispatch = Point {
                time,
                iteration: specs.iteration_at(time),
                phase: -1,
            };
            action(dispatch);
        }));
        self.busy_flag.set(false);
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }
}

/// A Dynamics-like computation pinned to event-queue semantics (spec.md
/// §4.2): it runs only at the queue's current time, after draining
/// whatever is due under `mode` relative to the point it is asked to run
/// at. This is the "Dynamics-to-Event bridge" — `Event<T>::run` is what a
/// Dynamics computation calls to cross into Event context.
pub struct Event<T> {
    mode: EventProcessingMode,
    body: std::rc::Rc<dyn Fn(&crate::point::Run, Point) -> T>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Event {
            mode: self.mode,
            body: std::rc::Rc::clone(&self.body),
        }
    }
}

impl<T: 'static> Event<T> {
    pub fn new(mode: EventProcessingMode, body: impl Fn(&crate::point::Run, Point) -> T + 'static) -> Self {
        Event {
            mode,
            body: std::rc::Rc::new(body),
        }
    }

    /// Drains due events up to `point` under this event's mode, then runs
    /// its body at `point`.
    pub fn run(&self, run: &crate::point::Run, point: Point) -> T {
        run.queue().borrow().drain_mode(run.specs(), self.mode, point.time);
        (self.body)(run, point)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
