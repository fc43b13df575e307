//! Cooperative coroutine processes, represented as continuation-passing
//! computations (spec.md §4.3).
//!
//! Per the DESIGN NOTES, this is the trampolined-boxed-closures rendition
//! rather than a stackful-fiber one: the scheduler is single-threaded, so a
//! `Process<T>` is just a closure that either completes synchronously
//! (invoking its continuation right away) or stores a "resume" callback
//! somewhere — an event, a resource waiter list, a signal subscription —
//! and returns. `cancel`/`interrupt` reach into that stored callback and
//! repurpose or discard it; there is no actual OS-level suspension.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::KernelError;
use crate::point::Run;
use crate::signal::SignalSource;

/// How a `Process<T>` finished.
pub enum Outcome<T> {
    Value(T),
    Cancelled,
    Exception(KernelError),
}

pub type Continuation<T> = Box<dyn FnOnce(Run, ProcessId, Outcome<T>)>;

/// A cooperative computation that eventually produces a `T`.
pub struct Process<T> {
    start: Box<dyn FnOnce(Run, ProcessId, Continuation<T>)>,
}

impl<T: 'static> Process<T> {
    /// A process that completes immediately with `value`.
    pub fn pure(value: T) -> Self {
        Process {
            start: Box::new(move |run, pid, k| k(run, pid, Outcome::Value(value))),
        }
    }

    /// A process that fails immediately with `err`, the model-code
    /// counterpart to [`pure`](Process::pure) for raising a [`KernelError`]
    /// (spec.md §4.3 "User exceptions in Process/Event"). Propagates through
    /// `and_then`/`map` exactly like a suspended process's own exception
    /// would, reaching the nearest [`catch`] or, absent one, aborting the
    /// run once it escapes a non-catch-enabled top-level process.
    pub fn fail(err: KernelError) -> Self {
        Process {
            start: Box::new(move |run, pid, k| k(run, pid, Outcome::Exception(err))),
        }
    }

    pub(crate) fn suspend(f: impl FnOnce(Run, ProcessId, Continuation<T>) + 'static) -> Self {
        Process { start: Box::new(f) }
    }

    /// Drives this process to completion (or its next suspension point)
    /// given an already-established `(run, pid, continuation)` triple.
    /// Crate-internal: lets a combinator built outside `process::` (e.g.
    /// an infinite queue's two-phase dequeue) compose a sub-`Process` into
    /// its own suspension closure without re-deriving the CPS plumbing.
    pub(crate) fn run_with(self, run: Run, pid: ProcessId, k: Continuation<T>) {
        (self.start)(run, pid, k);
    }

    /// Sequences this process with another built from its result —
    /// monadic bind. Propagates cancellation/exception without running `f`.
    pub fn and_then<U: 'static>(self, f: impl FnOnce(T) -> Process<U> + 'static) -> Process<U> {
        Process {
            start: Box::new(move |run, pid, k| {
                (self.start)(
                    run,
                    pid,
                    Box::new(move |run, pid, outcome| match outcome {
                        Outcome::Value(v) => {
                            let next = f(v);
                            (next.start)(run, pid, k)
                        }
                        Outcome::Cancelled => k(run, pid, Outcome::Cancelled),
                        Outcome::Exception(e) => k(run, pid, Outcome::Exception(e)),
                    }),
                )
            }),
        }
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Process<U> {
        self.and_then(move |v| Process::pure(f(v)))
    }
}

/// Process lifecycle state (spec.md §4.3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Held,
    Passive,
    Awaiting,
    Finished,
    Cancelled,
    Failed,
}

/// Linkage between a spawned process and whatever composed it, used by
/// [`parallel`] and by model code spawning background helpers (spec.md
/// §4.3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelLinkage {
    /// Cancelling one side cancels the other.
    CancelTogether,
    /// The child is cancelled once the parent finishes, win or lose.
    CancelChildAfterParent,
    /// No relationship; cancelling one never affects the other.
    NoLinkage,
}

pub(crate) type CancelHook = Box<dyn FnOnce(Run, ProcessId)>;

struct ProcessInner {
    state: Cell<ProcessState>,
    cancelled: Cell<bool>,
    interrupted: Cell<bool>,
    catch_enabled: bool,
    cancel_signal: SignalSource<()>,
    pending_reactivate: RefCell<Option<CancelHook>>,
    on_cancel: RefCell<Option<CancelHook>>,
    on_interrupt: RefCell<Option<CancelHook>>,
}

/// A handle to one process's lifecycle state: cancellation, interruption,
/// and state-machine position. Cheap to clone; every clone refers to the
/// same underlying process (spec.md §4.3).
#[derive(Clone)]
pub struct ProcessId(Rc<ProcessInner>);

impl PartialEq for ProcessId {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl ProcessId {
    fn new(catch_enabled: bool) -> Self {
        ProcessId(Rc::new(ProcessInner {
            state: Cell::new(ProcessState::Created),
            cancelled: Cell::new(false),
            interrupted: Cell::new(false),
            catch_enabled,
            cancel_signal: SignalSource::new(),
            pending_reactivate: RefCell::new(None),
            on_cancel: RefCell::new(None),
            on_interrupt: RefCell::new(None),
        }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.get()
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.interrupted.get()
    }

    pub fn state(&self) -> ProcessState {
        self.0.state.get()
    }

    pub fn catch_enabled(&self) -> bool {
        self.0.catch_enabled
    }

    pub fn cancel_signal(&self) -> &SignalSource<()> {
        &self.0.cancel_signal
    }

    pub(crate) fn set_state(&self, s: ProcessState) {
        self.0.state.set(s);
    }

    pub(crate) fn set_pending_reactivate(&self, f: CancelHook) {
        *self.0.pending_reactivate.borrow_mut() = Some(f);
    }

    pub(crate) fn take_pending_reactivate(&self) -> Option<CancelHook> {
        self.0.pending_reactivate.borrow_mut().take()
    }

    pub(crate) fn set_on_cancel(&self, f: CancelHook) {
        *self.0.on_cancel.borrow_mut() = Some(f);
    }

    pub(crate) fn take_on_cancel(&self) -> Option<CancelHook> {
        self.0.on_cancel.borrow_mut().take()
    }

    pub(crate) fn set_on_interrupt(&self, f: CancelHook) {
        *self.0.on_interrupt.borrow_mut() = Some(f);
    }

    pub(crate) fn take_on_interrupt(&self) -> Option<CancelHook> {
        self.0.on_interrupt.borrow_mut().take()
    }

    /// Clears every suspension hook — called once a suspension point has
    /// actually resumed normally, so a late cancel/interrupt can no longer
    /// find anything to act on.
    pub(crate) fn clear_suspension_hooks(&self) {
        self.0.pending_reactivate.borrow_mut().take();
        self.0.on_cancel.borrow_mut().take();
        self.0.on_interrupt.borrow_mut().take();
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self.state(),
            ProcessState::Finished | ProcessState::Cancelled | ProcessState::Failed
        )
    }
}

/// Suspends the current process for `dt` simulated time, then resumes.
///
/// # Panics
///
/// `dt` must be `>= 0` — a negative hold is a programmer error (spec.md
/// §4.3, §7 tier 1).
pub fn hold(dt: f64) -> Process<()> {
    if dt < 0.0 {
        panic!("hold: dt must be >= 0, got {dt}");
    }
    Process::suspend(move |run, pid, k| {
        if pid.is_cancelled() {
            k(run, pid, Outcome::Cancelled);
            return;
        }
        pid.set_state(ProcessState::Held);
        let now = run.queue().borrow().current_time();
        let now = if now.is_finite() { now } else { run.specs().start_time };
        let resume_time = now + dt;

        let k_rc: Rc<RefCell<Option<Continuation<()>>>> = Rc::new(RefCell::new(Some(k)));

        let k_for_queue = Rc::clone(&k_rc);
        let pid_for_queue = pid.clone();
        let run_for_queue = run.clone();
        run.queue().borrow().enqueue(
            resume_time,
            Box::new(move |_point| {
                // Whichever of {queued resume, cancel, interrupt} gets here
                // first via `k_rc.take()` wins; the others become no-ops by
                // finding `None` already.
                if let Some(k) = k_for_queue.borrow_mut().take() {
                    pid_for_queue.clear_suspension_hooks();
                    pid_for_queue.set_state(ProcessState::Running);
                    k(run_for_queue, pid_for_queue, Outcome::Value(()));
                }
            }),
        );

        let k_for_cancel = Rc::clone(&k_rc);
        pid.set_on_cancel(Box::new(move |run, pid| {
            if let Some(k) = k_for_cancel.borrow_mut().take() {
                pid.set_state(ProcessState::Cancelled);
                k(run, pid, Outcome::Cancelled);
            }
        }));

        let k_for_interrupt = Rc::clone(&k_rc);
        pid.set_on_interrupt(Box::new(move |run, pid| {
            if let Some(k) = k_for_interrupt.borrow_mut().take() {
                pid.0.interrupted.set(true);
                pid.set_state(ProcessState::Running);
                k(run, pid, Outcome::Value(()));
            }
        }));
    })
}

/// Suspends indefinitely; only [`reactivate`] resumes it.
///
/// # Panics
///
/// Calling `passivate` on a process already passive is fatal (double
/// passivation, spec.md §4.3).
pub fn passivate() -> Process<()> {
    Process::suspend(move |run, pid, k| {
        if pid.is_cancelled() {
            k(run, pid, Outcome::Cancelled);
            return;
        }
        if pid.state() == ProcessState::Passive {
            panic!("passivate: process is already passive");
        }
        pid.set_state(ProcessState::Passive);

        let k_rc: Rc<RefCell<Option<Continuation<()>>>> = Rc::new(RefCell::new(Some(k)));

        let k_for_reactivate = Rc::clone(&k_rc);
        pid.set_pending_reactivate(Box::new(move |run, pid| {
            if let Some(k) = k_for_reactivate.borrow_mut().take() {
                pid.clear_suspension_hooks();
                pid.set_state(ProcessState::Running);
                k(run, pid, Outcome::Value(()));
            }
        }));

        let k_for_cancel = Rc::clone(&k_rc);
        pid.set_on_cancel(Box::new(move |run, pid| {
            if let Some(k) = k_for_cancel.borrow_mut().take() {
                pid.set_state(ProcessState::Cancelled);
                k(run, pid, Outcome::Cancelled);
            }
        }));
    })
}

/// Resumes a passive process at current time, via a zero-delay event. A
/// no-op if `pid` is not currently passive (spec.md §4.3).
pub fn reactivate(run: &Run, pid: &ProcessId) {
    if pid.state() != ProcessState::Passive {
        return;
    }
    let resume = match pid.take_pending_reactivate() {
        Some(r) => r,
        None => return,
    };
    pid.take_on_cancel();
    let now = run.queue().borrow().current_time();
    let now = if now.is_finite() { now } else { run.specs().start_time };
    let run_for_event = run.clone();
    let pid_for_event = pid.clone();
    run.queue().borrow().enqueue(
        now,
        Box::new(move |_point| resume(run_for_event, pid_for_event)),
    );
}

/// Triggers cancellation: sets the cancel flag, fires `cancel_signal`, and —
/// if the process is currently suspended — invokes the suspension's cancel
/// cleanup synchronously (spec.md §4.3, §5). A no-op on an already-terminal
/// or already-cancelled process.
pub fn cancel(run: &Run, pid: &ProcessId) {
    if pid.is_terminal() || pid.is_cancelled() {
        return;
    }
    pid.0.cancelled.set(true);
    pid.cancel_signal().trigger(&());
    pid.take_pending_reactivate();
    pid.take_on_interrupt();
    if let Some(on_cancel) = pid.take_on_cancel() {
        on_cancel(run.clone(), pid.clone());
    }
}

/// If `pid` is currently in a `hold`, cancels the pending resumption event
/// and resumes it immediately with [`interrupted`] reading `true`. A no-op
/// otherwise (spec.md §4.3).
pub fn interrupt(run: &Run, pid: &ProcessId) {
    if pid.state() != ProcessState::Held {
        return;
    }
    pid.take_on_cancel();
    if let Some(on_interrupt) = pid.take_on_interrupt() {
        on_interrupt(run.clone(), pid.clone());
    }
}

/// Whether `pid` was last resumed via [`interrupt`] rather than a normal
/// `hold` expiry.
pub fn interrupted(pid: &ProcessId) -> bool {
    pid.is_interrupted()
}

/// Suspends until `sig` next fires, resuming with the fired value. If
/// cancelled while waiting, the subscription is disposed without ever
/// observing a value (spec.md §4.3, §8 scenario 6).
pub fn await_signal<T: Clone + 'static>(sig: SignalSource<T>) -> Process<T> {
    Process::suspend(move |run, pid, k| {
        if pid.is_cancelled() {
            k(run, pid, Outcome::Cancelled);
            return;
        }
        pid.set_state(ProcessState::Awaiting);

        let k_rc: Rc<RefCell<Option<Continuation<T>>>> = Rc::new(RefCell::new(Some(k)));
        let sub_rc: Rc<RefCell<Option<crate::signal::Subscription<T>>>> = Rc::new(RefCell::new(None));

        let k_for_sub = Rc::clone(&k_rc);
        let sub_for_sub = Rc::clone(&sub_rc);
        let pid_for_sub = pid.clone();
        let run_for_sub = run.clone();
        let sub = sig.subscribe(move |value: &T| {
            if let Some(k) = k_for_sub.borrow_mut().take() {
                if let Some(s) = sub_for_sub.borrow_mut().take() {
                    s.dispose();
                }
                pid_for_sub.clear_suspension_hooks();
                pid_for_sub.set_state(ProcessState::Running);
                k(run_for_sub.clone(), pid_for_sub.clone(), Outcome::Value(value.clone()));
            }
        });
        *sub_rc.borrow_mut() = Some(sub);

        let k_for_cancel = Rc::clone(&k_rc);
        let sub_for_cancel = Rc::clone(&sub_rc);
        pid.set_on_cancel(Box::new(move |run, pid| {
            if let Some(s) = sub_for_cancel.borrow_mut().take() {
                s.dispose();
            }
            if let Some(k) = k_for_cancel.borrow_mut().take() {
                pid.set_state(ProcessState::Cancelled);
                k(run, pid, Outcome::Cancelled);
            }
        }));
    })
}

/// Races `body` against a `dt`-long timer; whichever finishes first wins
/// and the other is cancelled (spec.md §4.3: `parallel(body, hold(dt))`
/// with `CancelTogether` linkage).
pub fn timeout<T: 'static>(dt: f64, body: Process<T>) -> Process<Option<T>> {
    Process::suspend(move |run, pid, k| {
        let done = Rc::new(Cell::new(false));
        let k_rc: Rc<RefCell<Option<Continuation<Option<T>>>>> = Rc::new(RefCell::new(Some(k)));

        let body_pid = ProcessId::new(false);
        let timer_pid = ProcessId::new(false);

        let done_for_body = Rc::clone(&done);
        let k_for_body = Rc::clone(&k_rc);
        let timer_pid_for_body = timer_pid.clone();
        let pid_for_body = pid.clone();
        (body.start)(
            run.clone(),
            body_pid.clone(),
            Box::new(move |run, _body_pid, outcome| {
                if done_for_body.get() {
                    return;
                }
                done_for_body.set(true);
                cancel(&run, &timer_pid_for_body);
                if let Some(k) = k_for_body.borrow_mut().take() {
                    let out = match outcome {
                        Outcome::Value(v) => Outcome::Value(Some(v)),
                        Outcome::Cancelled => Outcome::Cancelled,
                        Outcome::Exception(e) => Outcome::Exception(e),
                    };
                    k(run, pid_for_body, out);
                }
            }),
        );

        let done_for_timer = Rc::clone(&done);
        let k_for_timer = Rc::clone(&k_rc);
        let body_pid_for_timer = body_pid.clone();
        let pid_for_timer = pid.clone();
        (hold(dt).start)(
            run.clone(),
            timer_pid.clone(),
            Box::new(move |run, _timer_pid, outcome| {
                if done_for_timer.get() {
                    return;
                }
                done_for_timer.set(true);
                cancel(&run, &body_pid_for_timer);
                if let Some(k) = k_for_timer.borrow_mut().take() {
                    let out = match outcome {
                        Outcome::Value(()) => Outcome::Value(None),
                        Outcome::Cancelled => Outcome::Cancelled,
                        Outcome::Exception(e) => Outcome::Exception(e),
                    };
                    k(run, pid_for_timer, out);
                }
            }),
        );
    })
}

/// Runs every process in `processes` concurrently (interleaved, not
/// OS-parallel — spec.md §5); waits for all to finish. If any throws, the
/// first exception is propagated after the rest are cancelled.
pub fn parallel(processes: Vec<Process<()>>) -> Process<()> {
    Process::suspend(move |run, pid, k| {
        if pid.is_cancelled() {
            k(run, pid, Outcome::Cancelled);
            return;
        }
        let total = processes.len();
        if total == 0 {
            k(run, pid, Outcome::Value(()));
            return;
        }
        pid.set_state(ProcessState::Awaiting);

        let remaining = Rc::new(Cell::new(total));
        let failure: Rc<RefCell<Option<KernelError>>> = Rc::new(RefCell::new(None));
        let children: Rc<RefCell<Vec<ProcessId>>> = Rc::new(RefCell::new(Vec::new()));
        let k_rc: Rc<RefCell<Option<Continuation<()>>>> = Rc::new(RefCell::new(Some(k)));

        let run_outer = run.clone();
        let pid_outer = pid.clone();
        let finish_one: Rc<dyn Fn(Option<KernelError>)> = {
            let remaining = Rc::clone(&remaining);
            let failure = Rc::clone(&failure);
            let children = Rc::clone(&children);
            let k_rc = Rc::clone(&k_rc);
            let pid_outer = pid_outer.clone();
            Rc::new(move |err: Option<KernelError>| {
                if let Some(e) = err {
                    let mut f = failure.borrow_mut();
                    if f.is_none() {
                        *f = Some(e);
                    }
                    drop(f);
                    for child in children.borrow().iter() {
                        cancel(&run_outer, child);
                    }
                }
                let left = remaining.get() - 1;
                remaining.set(left);
                if left == 0 {
                    if let Some(k) = k_rc.borrow_mut().take() {
                        pid_outer.clear_suspension_hooks();
                        pid_outer.set_state(ProcessState::Running);
                        let outcome = match failure.borrow_mut().take() {
                            Some(e) => Outcome::Exception(e),
                            None => Outcome::Value(()),
                        };
                        k(run_outer.clone(), pid_outer.clone(), outcome);
                    }
                }
            })
        };

        for p in processes {
            let child_pid = ProcessId::new(false);
            children.borrow_mut().push(child_pid.clone());
            let finish = Rc::clone(&finish_one);
            (p.start)(
                run.clone(),
                child_pid,
                Box::new(move |_run, _pid, outcome| match outcome {
                    Outcome::Value(()) => finish(None),
                    Outcome::Cancelled => finish(None),
                    Outcome::Exception(e) => finish(Some(e)),
                }),
            );
        }

        // Cancelling the process running `parallel` while children are
        // still suspended must cancel every child too (spec.md §4.3: each
        // child is cancellation-linked to the parent), not just let them
        // run to completion and resolve with a stale `Outcome::Value`.
        let children_for_cancel = Rc::clone(&children);
        let k_for_cancel = Rc::clone(&k_rc);
        pid.set_on_cancel(Box::new(move |run, pid| {
            // Claim `k_rc` before cancelling any child: cancelling a child
            // runs its finish callback synchronously and it would otherwise
            // race `finish_one` to resolve this with a stale `Outcome::Value`
            // once the last child unwinds, instead of `Outcome::Cancelled`.
            let claimed = k_for_cancel.borrow_mut().take();
            for child in children_for_cancel.borrow().iter() {
                cancel(&run, child);
            }
            if let Some(k) = claimed {
                pid.set_state(ProcessState::Cancelled);
                k(run, pid, Outcome::Cancelled);
            }
        }));
    })
}

/// Installs an exception handler around `process`. Only legal on processes
/// created with catch enabled ([`run_process`]/[`spawn_process`] with
/// `catch_enabled = true`); installing one on any other process is a fatal
/// misuse (spec.md §4.3, §7 tier 1).
pub fn catch<T: 'static>(
    pid: &ProcessId,
    process: Process<T>,
    handler: impl FnOnce(KernelError) -> Process<T> + 'static,
) -> Process<T> {
    if !pid.catch_enabled() {
        panic!("catch: process was not created with catch enabled");
    }
    Process::suspend(move |run, pid, k| {
        (process.start)(
            run,
            pid,
            Box::new(move |run, pid, outcome| match outcome {
                Outcome::Exception(e) => {
                    let recovery = handler(e);
                    (recovery.start)(run, pid, k)
                }
                other => k(run, pid, other),
            }),
        )
    })
}

/// Runs `cleanup` after `process` finishes, regardless of how it finished.
pub fn finally<T: 'static>(process: Process<T>, cleanup: impl FnOnce() + 'static) -> Process<T> {
    Process::suspend(move |run, pid, k| {
        (process.start)(
            run,
            pid,
            Box::new(move |run, pid, outcome| {
                cleanup();
                k(run, pid, outcome);
            }),
        )
    })
}

/// Starts `process` running immediately, returning its `ProcessId`. The
/// process's own result is discarded once it finishes — chain `and_then`
/// before calling `run_process` if the caller needs the value (e.g. write
/// it into a shared cell from within the process body).
pub fn run_process<T: 'static>(run: &Run, catch_enabled: bool, process: Process<T>) -> ProcessId {
    let pid = ProcessId::new(catch_enabled);
    pid.set_state(ProcessState::Running);
    let pid_for_return = pid.clone();
    (process.start)(run.clone(), pid, Box::new(finish_top_level));
    pid_for_return
}

/// Shared top-level continuation: records the terminal state and, per
/// spec.md §7 tier 3, aborts the run if an exception escapes a process that
/// was not created with catch enabled — a non-catch process has nowhere for
/// the exception to go but the run driver.
fn finish_top_level<T>(_run: Run, pid: ProcessId, outcome: Outcome<T>) {
    match outcome {
        Outcome::Value(_) => pid.set_state(ProcessState::Finished),
        Outcome::Cancelled => pid.set_state(ProcessState::Cancelled),
        Outcome::Exception(e) => {
            pid.set_state(ProcessState::Failed);
            if !pid.catch_enabled() {
                panic!("unhandled exception in non-catch process: {e}");
            }
        }
    }
}

/// Starts `process` running immediately with catch disabled, linked by
/// `linkage` to `parent` (`NoLinkage` is equivalent to an independent
/// [`run_process`] call; the other linkages are honored by wiring the
/// parent's cancel signal into the child's cancellation).
pub fn spawn_process<T: 'static>(
    run: &Run,
    parent: &ProcessId,
    linkage: CancelLinkage,
    process: Process<T>,
) -> ProcessId {
    let pid = run_process(run, false, process);
    if linkage == CancelLinkage::CancelTogether {
        let child = pid.clone();
        let run_for_link = run.clone();
        parent.cancel_signal().subscribe(move |_| {
            cancel(&run_for_link, &child);
        });
    }
    pid
}

/// Schedules `process` to start at time `t` (spec.md §6).
pub fn enqueue_process<T: 'static>(run: &Run, t: f64, process: Process<T>) -> ProcessId {
    let pid = ProcessId::new(false);
    let pid_for_return = pid.clone();
    let run_for_event = run.clone();
    run.queue().borrow().enqueue(
        t,
        Box::new(move |_point| {
            pid.set_state(ProcessState::Running);
            (process.start)(run_for_event, pid.clone(), Box::new(finish_top_level));
        }),
    );
    pid_for_return
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Method, Specs};

    fn run() -> Run {
        Run::new(Specs::new(0.0, 100.0, 1.0, Method::Euler).unwrap(), 1, 0)
    }

    #[test]
    fn hold_then_interrupt_sets_interrupted_flag() {
        let run = run();
        let interrupted_seen = Rc::new(Cell::new(false));
        let interrupted_seen2 = Rc::clone(&interrupted_seen);

        let body = hold(5.0).and_then(move |_| {
            interrupted_seen2.set(true);
            Process::pure(())
        });
        let pid = run_process(&run, false, body);

        let pid_for_event = pid.clone();
        let run_for_event = run.clone();
        run.queue().borrow().enqueue(
            2.0,
            Box::new(move |_p| interrupt(&run_for_event, &pid_for_event)),
        );

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 10.0, iteration: 10, phase: -1 });

        assert!(interrupted(&pid));
        assert!(interrupted_seen.get());
        assert_eq!(run.queue().borrow().current_time(), 2.0);
    }

    #[test]
    fn cancel_during_await_unsubscribes() {
        let run = run();
        let sig: SignalSource<i32> = SignalSource::new();
        let received = Rc::new(RefCell::new(None));
        let received2 = Rc::clone(&received);

        let body = await_signal(sig.clone()).map(move |v| {
            *received2.borrow_mut() = Some(v);
        });
        let pid = run_process(&run, false, body);
        assert_eq!(sig.handler_count(), 1);

        let pid_for_cancel = pid.clone();
        let run_for_cancel = run.clone();
        run.queue()
            .borrow()
            .enqueue(1.0, Box::new(move |_p| cancel(&run_for_cancel, &pid_for_cancel)));

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 1.0, iteration: 1, phase: -1 });

        assert_eq!(sig.handler_count(), 0, "cancel must dispose the subscription");
        sig.trigger(&5);
        assert!(received.borrow().is_none());
        assert_eq!(pid.state(), ProcessState::Cancelled);
    }

    #[test]
    fn passivate_then_reactivate_resumes_at_current_time() {
        let run = run();
        let resumed = Rc::new(Cell::new(false));
        let resumed2 = Rc::clone(&resumed);
        let body = passivate().map(move |_| resumed2.set(true));
        let pid = run_process(&run, false, body);
        assert_eq!(pid.state(), ProcessState::Passive);
        assert!(!resumed.get());

        reactivate(&run, &pid);
        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 0.0, iteration: 0, phase: -1 });
        assert!(resumed.get());
        assert_eq!(pid.state(), ProcessState::Finished);
    }

    #[test]
    fn pure_and_then_chains_synchronously() {
        let run = run();
        let body = Process::pure(1).and_then(|v| Process::pure(v + 1));
        let pid = run_process(&run, false, body);
        assert_eq!(pid.state(), ProcessState::Finished);
    }

    #[test]
    fn catch_recovers_from_a_failed_process() {
        let run = run();
        let recovered = Rc::new(Cell::new(false));
        let recovered2 = Rc::clone(&recovered);

        let pid = ProcessId::new(true);
        pid.set_state(ProcessState::Running);
        let body = catch(
            &pid,
            Process::<i32>::fail(KernelError::Model("boom".into())),
            move |_e| {
                recovered2.set(true);
                Process::pure(0)
            },
        );
        (body.start)(run, pid.clone(), Box::new(finish_top_level));

        assert!(recovered.get());
        assert_eq!(pid.state(), ProcessState::Finished);
    }

    #[test]
    #[should_panic(expected = "unhandled exception in non-catch process")]
    fn unhandled_exception_aborts_a_non_catch_process() {
        let run = run();
        let body = Process::<()>::fail(KernelError::Model("boom".into()));
        run_process(&run, false, body);
    }

    #[test]
    fn timeout_returns_some_when_the_body_finishes_first() {
        let run = run();
        let result: Rc<RefCell<Option<Option<&'static str>>>> = Rc::new(RefCell::new(None));
        let result2 = Rc::clone(&result);

        let body = hold(2.0).map(|_| "done");
        let pid = run_process(&run, false, timeout(5.0, body).map(move |v| *result2.borrow_mut() = Some(v)));

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 10.0, iteration: 10, phase: -1 });

        assert_eq!(*result.borrow(), Some(Some("done")));
        assert_eq!(pid.state(), ProcessState::Finished);
    }

    #[test]
    fn timeout_returns_none_and_cancels_the_body_when_the_timer_wins() {
        let run = run();
        let result: Rc<RefCell<Option<Option<i32>>>> = Rc::new(RefCell::new(None));
        let result2 = Rc::clone(&result);
        let body_finished = Rc::new(Cell::new(false));
        let body_finished2 = Rc::clone(&body_finished);

        let body = hold(10.0).map(move |_| {
            body_finished2.set(true);
            99
        });
        let pid = run_process(&run, false, timeout(2.0, body).map(move |v| *result2.borrow_mut() = Some(v)));

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 20.0, iteration: 20, phase: -1 });

        assert_eq!(*result.borrow(), Some(None));
        assert!(!body_finished.get(), "the timer winning must cancel the body before it runs");
        assert_eq!(pid.state(), ProcessState::Finished);
    }

    #[test]
    fn parallel_waits_for_every_child_to_finish() {
        let run = run();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let o2 = Rc::clone(&order);
        let o3 = Rc::clone(&order);
        let done = Rc::new(Cell::new(false));
        let done2 = Rc::clone(&done);

        let p1 = hold(3.0).map(move |_| o1.borrow_mut().push(1));
        let p2 = hold(1.0).map(move |_| o2.borrow_mut().push(2));
        let p3 = hold(2.0).map(move |_| o3.borrow_mut().push(3));
        let pid = run_process(&run, false, parallel(vec![p1, p2, p3]).map(move |_| done2.set(true)));

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 10.0, iteration: 10, phase: -1 });

        assert!(done.get());
        let mut finished = order.borrow().clone();
        finished.sort_unstable();
        assert_eq!(finished, vec![1, 2, 3]);
        assert_eq!(pid.state(), ProcessState::Finished);
    }

    #[test]
    fn parallel_propagates_the_first_exception_and_cancels_the_rest() {
        let run = run();
        let sibling_finished = Rc::new(Cell::new(false));
        let sibling_finished2 = Rc::clone(&sibling_finished);

        let failing = hold(1.0).and_then(|_| Process::<()>::fail(KernelError::Model("boom".into())));
        let sibling = hold(5.0).map(move |_| sibling_finished2.set(true));
        let pid = run_process(&run, true, parallel(vec![failing, sibling]));

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 10.0, iteration: 10, phase: -1 });

        assert_eq!(pid.state(), ProcessState::Failed);
        assert!(
            !sibling_finished.get(),
            "a sibling must be cancelled once another child fails, not run to completion"
        );
    }

    #[test]
    fn cancelling_the_parent_of_a_parallel_cancels_every_child() {
        let run = run();
        let a_finished = Rc::new(Cell::new(false));
        let b_finished = Rc::new(Cell::new(false));
        let a_finished2 = Rc::clone(&a_finished);
        let b_finished2 = Rc::clone(&b_finished);

        let a = hold(5.0).map(move |_| a_finished2.set(true));
        let b = hold(5.0).map(move |_| b_finished2.set(true));
        let pid = run_process(&run, false, parallel(vec![a, b]));
        assert_eq!(pid.state(), ProcessState::Awaiting);

        cancel(&run, &pid);
        assert_eq!(pid.state(), ProcessState::Cancelled);

        run.queue()
            .borrow()
            .drain(run.specs(), crate::point::Point { time: 10.0, iteration: 10, phase: -1 });

        assert!(!a_finished.get(), "cancelling the parent must cancel a still-suspended child");
        assert!(!b_finished.get(), "cancelling the parent must cancel a still-suspended child");
    }
}
