use super::REACTOR;

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::disposable::Disposable;

/// Handle to a fire-once timer scheduled on the [`Reactor`].
///
/// Disposing the handle removes the pending callback; once the timer has
/// fired (or the reactor is gone) disposal is a no-op. Dropping the handle
/// does *not* cancel the timer.
pub struct TimerHandle {
    reactor: Weak<RefCell<InnerReactor>>,
    key: (Instant, u64),
}

impl TimerHandle {
    /// Removes the pending timer callback, releasing everything it captured.
    pub fn dispose(&self) {
        if let Some(inner) = self.reactor.upgrade() {
            inner.borrow_mut().timers.remove(&self.key);
        }
    }
}

impl Disposable for TimerHandle {
    fn dispose(&self) {
        TimerHandle::dispose(self);
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("deadline", &self.key.0)
            .finish()
    }
}

/// Manages the deferred-callback and timer queues for the currently running
/// [`block_on`][super::block_on].
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<RefCell<InnerReactor>>,
}

/// The private, internal `Reactor` implementation - factored out so we can
/// take a lock of the whole.
struct InnerReactor {
    deferred: VecDeque<Box<dyn FnOnce()>>,
    timers: BTreeMap<(Instant, u64), Box<dyn FnOnce()>>,
    next_timer_id: u64,
}

impl Reactor {
    /// Return the `Reactor` for the currently running `block_on`.
    ///
    /// # Panics
    /// This will panic if called outside of [`block_on`][super::block_on].
    pub fn current() -> Self {
        REACTOR.with(|r| {
            r.borrow()
                .as_ref()
                .expect("Reactor::current must be called within a quiesce runtime")
                .clone()
        })
    }

    /// Create a new instance of `Reactor`
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(InnerReactor {
                deferred: VecDeque::new(),
                timers: BTreeMap::new(),
                next_timer_id: 0,
            })),
        }
    }

    /// Enqueues a callback onto the deferred-callback queue.
    ///
    /// Deferred callbacks run in FIFO order, after the current call stack
    /// unwinds and before any further timer fires.
    pub fn defer(&self, callback: impl FnOnce() + 'static) {
        self.inner
            .borrow_mut()
            .deferred
            .push_back(Box::new(callback));
    }

    /// Schedules a fire-once callback for `deadline`.
    ///
    /// The reactor owns the callback until it fires or the returned handle
    /// is disposed, so anything the callback captures stays alive that long.
    pub fn schedule(&self, deadline: Instant, callback: impl FnOnce() + 'static) -> TimerHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_timer_id;
        inner.next_timer_id += 1;
        inner.timers.insert((deadline, id), Box::new(callback));
        TimerHandle {
            reactor: Rc::downgrade(&self.inner),
            key: (deadline, id),
        }
    }

    /// Runs the event loop until `awake` reports that the main future has
    /// been woken.
    ///
    /// One pass: drain the deferred queue, fire the next due timer (the
    /// deferred queue drains again after each firing), then sleep until the
    /// earliest remaining deadline.
    ///
    /// # Panics
    /// Panics when the main future is pending while both queues are empty;
    /// sleeping forever would only hide the bug.
    pub(crate) fn block_until(&self, awake: impl Fn() -> bool) {
        loop {
            while let Some(callback) = self.pop_deferred() {
                callback();
            }
            if awake() {
                return;
            }
            if let Some(callback) = self.pop_due_timer(Instant::now()) {
                callback();
                continue;
            }
            let Some(deadline) = self.next_deadline() else {
                panic!("reactor deadlock: the main future is pending but no timers or deferred callbacks remain");
            };
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
    }

    fn pop_deferred(&self) -> Option<Box<dyn FnOnce()>> {
        self.inner.borrow_mut().deferred.pop_front()
    }

    fn pop_due_timer(&self, now: Instant) -> Option<Box<dyn FnOnce()>> {
        let mut inner = self.inner.borrow_mut();
        let key = match inner.timers.first_key_value() {
            Some((&key, _)) if key.0 <= now => key,
            _ => return None,
        };
        inner.timers.remove(&key)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.inner
            .borrow()
            .timers
            .first_key_value()
            .map(|(&(deadline, _), _)| deadline)
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Reactor")
            .field("deferred", &inner.deferred.len())
            .field("timers", &inner.timers.len())
            .finish()
    }
}
