//! Counting-semaphore resources with pluggable waiter ordering (spec.md
//! §4.4).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::point::Run;
use crate::process::{self, Outcome, Process, ProcessId};
use crate::strategy::{Priority, Strategy, WaiterContainer};

struct ResourceInner {
    waiters: RefCell<WaiterContainer<Waiter>>,
    count: Cell<i64>,
    max_count: Option<i64>,
}

/// A stored continuation waiting for a permit.
struct Waiter {
    pid: ProcessId,
    resume: Box<dyn FnOnce(Run, ProcessId)>,
}

/// A counting semaphore. `request`/`release` are the Process- and
/// Event-context primitives respectively (spec.md §4.4); `try_request_*`
/// variants never block.
#[derive(Clone)]
pub struct Resource(Rc<ResourceInner>);

impl Resource {
    /// `max_count = None` means unbounded (`release` never saturates).
    pub fn new(strategy: Strategy, count: i64, max_count: Option<i64>) -> Self {
        if let Some(max) = max_count {
            if count < 0 || count > max {
                panic!("Resource::new: count {count} out of range 0..={max}");
            }
        }
        Resource(Rc::new(ResourceInner {
            waiters: RefCell::new(WaiterContainer::new(strategy)),
            count: Cell::new(count),
            max_count,
        }))
    }

    pub fn count(&self) -> i64 {
        self.0.count.get()
    }

    pub fn waiter_count(&self) -> usize {
        self.0.waiters.borrow().len()
    }

    /// Requests one permit, suspending the calling process if none is
    /// immediately available.
    pub fn request(&self) -> Process<()> {
        self.request_inner(None)
    }

    /// Like [`request`](Resource::request), but the waiter is ordered by
    /// `priority`. Requires a `StaticPriorities` resource.
    pub fn request_with_priority(&self, priority: f64) -> Process<()> {
        self.request_inner(Some(Priority::new(priority)))
    }

    fn request_inner(&self, priority: Option<Priority>) -> Process<()> {
        let resource = self.clone();
        Process::suspend(move |run, pid, k| {
            if pid.is_cancelled() {
                k(run, pid, Outcome::Cancelled);
                return;
            }
            let count = resource.0.count.get();
            if count > 0 {
                resource.0.count.set(count - 1);
                k(run, pid, Outcome::Value(()));
                return;
            }

            pid.set_state(crate::process::ProcessState::Awaiting);

            let k_rc: Rc<RefCell<Option<process::Continuation<()>>>> = Rc::new(RefCell::new(Some(k)));

            let k_for_resume = Rc::clone(&k_rc);
            let resume: Box<dyn FnOnce(Run, ProcessId)> = Box::new(move |run, pid| {
                if let Some(k) = k_for_resume.borrow_mut().take() {
                    pid.clear_suspension_hooks();
                    pid.set_state(crate::process::ProcessState::Running);
                    k(run, pid, Outcome::Value(()));
                }
            });
            let waiter = Waiter {
                pid: pid.clone(),
                resume,
            };
            match priority {
                Some(p) => resource.0.waiters.borrow_mut().push_with_priority(waiter, p, &run),
                None => resource.0.waiters.borrow_mut().push(waiter),
            }

            let resource_for_cancel = resource.clone();
            let pid_for_remove = pid.clone();
            let k_for_cancel = Rc::clone(&k_rc);
            pid.set_on_cancel(Box::new(move |run, pid| {
                resource_for_cancel.remove_waiter(&pid_for_remove);
                if let Some(k) = k_for_cancel.borrow_mut().take() {
                    pid.set_state(crate::process::ProcessState::Cancelled);
                    k(run, pid, Outcome::Cancelled);
                }
            }));
        })
    }

    fn remove_waiter(&self, target: &ProcessId) {
        self.0
            .waiters
            .borrow_mut()
            .retain(|w| &w.pid != target);
    }

    /// Releases one permit in Event context: wakes the next waiter (per
    /// the resource's strategy) if any, otherwise increments `count` up to
    /// `max_count` (spec.md §4.4).
    pub fn release(&self, run: &Run) {
        let next = self.0.waiters.borrow_mut().pop(run);
        match next {
            Some(waiter) => {
                let resume_time = run.queue().borrow().current_time().max(run.specs().start_time);
                let run_for_event = run.clone();
                run.queue().borrow().enqueue(
                    resume_time,
                    Box::new(move |_point| (waiter.resume)(run_for_event, waiter.pid)),
                );
            }
            None => {
                let count = self.0.count.get();
                let capped = match self.0.max_count {
                    Some(max) => (count + 1).min(max),
                    None => count + 1,
                };
                self.0.count.set(capped);
            }
        }
    }

    /// Event-context non-blocking acquire: `true` and decrements `count`
    /// if a permit was free, `false` otherwise.
    pub fn try_request_within_event(&self) -> bool {
        let count = self.0.count.get();
        if count > 0 {
            self.0.count.set(count - 1);
            true
        } else {
            false
        }
    }

    /// Dynamics-context non-blocking acquire: drains due events up to the
    /// current point, then behaves as
    /// [`try_request_within_event`](Resource::try_request_within_event).
    pub fn try_request_within_dynamics(&self, run: &Run, point: crate::point::Point) -> bool {
        run.queue().borrow().drain_sync(run.specs(), point);
        self.try_request_within_event()
    }
}
