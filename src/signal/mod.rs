//! Publish/subscribe signals and observables.
//!
//! A [`SignalSource`] owns an ordered list of handlers and fires them
//! synchronously, in subscription order, from inside the Event context
//! (spec.md §4.5). Handlers registered while a trigger is in progress are
//! appended to the live list but are skipped for *that* trigger — `trigger`
//! snapshots the handler count up front and only calls the handlers present
//! at that count, so a handler subscribed by another handler takes effect
//! starting with the next trigger. This is the behavior spec.md's Open
//! Questions section names as normative (§9).

use std::cell::RefCell;
use std::rc::Rc;

type Handler<T> = Box<dyn FnMut(&T)>;

struct Inner<T> {
    handlers: RefCell<Vec<Option<Handler<T>>>>,
    // Tracked separately from `handlers` because a handler invoked from
    // `trigger` has its slot temporarily emptied by `take()` for the
    // duration of the call — a disposal during that call can't be seen by
    // checking the slot, only by this tombstone.
    disposed: RefCell<Vec<bool>>,
}

/// A disposable subscription handle. Dropping it does *not* unsubscribe —
/// call [`Subscription::dispose`] explicitly, matching the explicit
/// cancellation-cleanup model the process machinery relies on (spec.md
/// §4.3/§5).
pub struct Subscription<T> {
    inner: Rc<Inner<T>>,
    index: usize,
}

impl<T> Subscription<T> {
    /// Removes the handler. Safe to call more than once, after the signal
    /// itself has fired many times, or from inside the handler's own
    /// invocation — disposing an already-disposed subscription is a no-op.
    pub fn dispose(&self) {
        if let Some(flag) = self.inner.disposed.borrow_mut().get_mut(self.index) {
            *flag = true;
        }
        if let Some(slot) = self.inner.handlers.borrow_mut().get_mut(self.index) {
            *slot = None;
        }
    }
}

/// A publish/subscribe notifier. `T` is the payload type delivered to
/// handlers on [`SignalSource::trigger`].
pub struct SignalSource<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for SignalSource<T> {
    fn clone(&self) -> Self {
        SignalSource {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> SignalSource<T> {
    pub fn new() -> Self {
        SignalSource {
            inner: Rc::new(Inner {
                handlers: RefCell::new(Vec::new()),
                disposed: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Registers a handler, run in subscription order on every future
    /// `trigger` (starting with the trigger strictly after this call, if
    /// called from within a trigger — see the module docs).
    pub fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> Subscription<T> {
        let mut handlers = self.inner.handlers.borrow_mut();
        let index = handlers.len();
        handlers.push(Some(Box::new(handler)));
        drop(handlers);
        self.inner.disposed.borrow_mut().push(false);
        Subscription {
            inner: Rc::clone(&self.inner),
            index,
        }
    }

    /// Invokes every handler subscribed strictly before this call, in
    /// subscription order. A handler that panics propagates out of
    /// `trigger` to the caller (the Event context / run driver), matching
    /// spec.md §4.5 ("Exceptions from a handler propagate to the trigger
    /// site").
    pub fn trigger(&self, value: &T) {
        let snapshot_len = self.inner.handlers.borrow().len();
        for i in 0..snapshot_len {
            // Re-borrow per iteration: a handler may subscribe new handlers
            // (appended past snapshot_len, thus not visited this trigger)
            // or dispose itself/others.
            let mut handler = match self.inner.handlers.borrow_mut().get_mut(i) {
                Some(slot) => slot.take(),
                None => None,
            };
            if let Some(h) = handler.as_mut() {
                h(value);
            }
            if let Some(h) = handler {
                // Put it back unless the handler disposed its own slot
                // during this very call — checked via the tombstone, since
                // the slot itself is always empty here from `take()` above.
                let self_disposed = self.inner.disposed.borrow()[i];
                if !self_disposed {
                    self.inner.handlers.borrow_mut()[i] = Some(h);
                }
            }
        }
    }

    /// Number of handlers currently registered (disposed slots excluded).
    /// Exposed for cancellation-cleanup tests (spec.md §8, scenario 6).
    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .borrow()
            .iter()
            .filter(|h| h.is_some())
            .count()
    }
}

impl<T> Default for SignalSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A readable value paired with a change signal (spec.md §4.5).
pub struct Observable<T> {
    read: Rc<RefCell<T>>,
    changed: SignalSource<()>,
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Observable {
            read: Rc::new(RefCell::new(initial)),
            changed: SignalSource::new(),
        }
    }

    pub fn get(&self) -> T {
        self.read.borrow().clone()
    }

    pub fn changed(&self) -> &SignalSource<()> {
        &self.changed
    }

    /// Sets the value and triggers `changed`, in that order.
    pub fn set(&self, value: T) {
        *self.read.borrow_mut() = value;
        self.changed.trigger(&());
    }

    /// Derives a new observable whose value is `f(self.get())` and whose
    /// `changed` signal fires whenever this one does (SPEC_FULL §B.2).
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        let derived = Observable::new(f(self.get()));
        let read = Rc::clone(&self.read);
        let derived_read = Rc::clone(&derived.read);
        let derived_changed = derived.changed.clone();
        self.changed.subscribe(move |_| {
            let mapped = f(read.borrow().clone());
            *derived_read.borrow_mut() = mapped;
            derived_changed.trigger(&());
        });
        derived
    }

    /// Derives an observable pairing `self` with `other`; the derived
    /// `changed` signal is the union of both upstreams' (SPEC_FULL §B.2).
    pub fn zip<U: Clone + 'static>(&self, other: &Observable<U>) -> Observable<(T, U)> {
        let derived = Observable::new((self.get(), other.get()));
        for source_changed in [self.changed.clone(), other.changed.clone()] {
            let a = Rc::clone(&self.read);
            let b = Rc::clone(&other.read);
            let derived_read = Rc::clone(&derived.read);
            let derived_changed = derived.changed.clone();
            source_changed.subscribe(move |_| {
                *derived_read.borrow_mut() = (a.borrow().clone(), b.borrow().clone());
                derived_changed.trigger(&());
            });
        }
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn handlers_fire_in_subscription_order() {
        let sig = SignalSource::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        sig.subscribe(move |_: &()| o1.borrow_mut().push(1));
        let o2 = Rc::clone(&order);
        sig.subscribe(move |_: &()| o2.borrow_mut().push(2));
        sig.trigger(&());
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn handler_added_during_trigger_waits_for_next_trigger() {
        let sig: SignalSource<()> = SignalSource::new();
        let fired_late = Rc::new(Cell::new(0));
        let sig_clone = sig.clone();
        let fired_late_clone = Rc::clone(&fired_late);
        sig.subscribe(move |_| {
            let fired_late_inner = Rc::clone(&fired_late_clone);
            sig_clone.subscribe(move |_| fired_late_inner.set(fired_late_inner.get() + 1));
        });
        sig.trigger(&());
        assert_eq!(fired_late.get(), 0, "added during trigger, must not fire yet");
        sig.trigger(&());
        assert_eq!(fired_late.get(), 1, "fires starting next trigger");
    }

    #[test]
    fn disposed_handler_does_not_fire() {
        let sig = SignalSource::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let sub = sig.subscribe(move |_: &()| c.set(c.get() + 1));
        sig.trigger(&());
        sub.dispose();
        sig.trigger(&());
        assert_eq!(count.get(), 1);
        assert_eq!(sig.handler_count(), 0);
    }

    #[test]
    fn handler_disposing_its_own_subscription_mid_invocation_is_not_resurrected() {
        let sig: SignalSource<u32> = SignalSource::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let calls_for_handler = Rc::clone(&calls);
        let sub_slot: Rc<RefCell<Option<Subscription<u32>>>> = Rc::new(RefCell::new(None));
        let sub_for_handler = Rc::clone(&sub_slot);
        let sub = sig.subscribe(move |v: &u32| {
            calls_for_handler.borrow_mut().push(*v);
            if let Some(s) = sub_for_handler.borrow_mut().take() {
                s.dispose();
            }
        });
        *sub_slot.borrow_mut() = Some(sub);

        sig.trigger(&1);
        assert_eq!(*calls.borrow(), vec![1]);
        assert_eq!(sig.handler_count(), 0, "self-disposal during the handler's own call must stick");

        sig.trigger(&2);
        assert_eq!(*calls.borrow(), vec![1], "a handler that disposed itself must not fire again");
    }

    #[test]
    fn observable_map_tracks_changes() {
        let obs = Observable::new(1);
        let doubled = obs.map(|v| v * 2);
        assert_eq!(doubled.get(), 2);
        obs.set(5);
        assert_eq!(doubled.get(), 10);
    }
}
