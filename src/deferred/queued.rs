use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};

struct Inner<T> {
    outcome: Option<Result<T>>,
    waiters: Vec<(u64, Waker)>,
    next_waiter: u64,
}

/// A deferred result settled from outside, with queue-based delivery.
///
/// The first `try_resolve`/`try_reject` call wins and returns `true`; later
/// calls return `false` and have no further effect. Continuations never run
/// inside the settling call: waiters are woken and observe the outcome when
/// the runtime next polls them.
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Deferred<T> {
    /// Creates a pending deferred result.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                waiters: Vec::new(),
                next_waiter: 0,
            })),
        }
    }

    /// Returns a future observing the settlement.
    ///
    /// Any number of futures may be taken; each completes with a clone of
    /// the outcome.
    pub fn future(&self) -> DeferredFuture<T> {
        DeferredFuture {
            inner: Rc::clone(&self.inner),
            waiter: None,
        }
    }

    /// `true` once the deferred result has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    /// Resolves the deferred result, unless it has already settled.
    pub fn try_resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the deferred result, unless it has already settled.
    pub fn try_reject(&self, reason: Error) -> bool {
        self.settle(Err(reason))
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome);
            std::mem::take(&mut inner.waiters)
        };
        for (_, waker) in waiters {
            waker.wake();
        }
        true
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("settled", &inner.outcome.is_some())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// Future returned by [`Deferred::future`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct DeferredFuture<T> {
    inner: Rc<RefCell<Inner<T>>>,
    waiter: Option<u64>,
}

impl<T: Clone> Future for DeferredFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut inner = this.inner.borrow_mut();
        if let Some(outcome) = &inner.outcome {
            this.waiter = None;
            return Poll::Ready(outcome.clone());
        }
        match this.waiter {
            Some(id) => {
                if let Some((_, waker)) = inner.waiters.iter_mut().find(|(i, _)| *i == id) {
                    *waker = cx.waker().clone();
                }
            }
            None => {
                let id = inner.next_waiter;
                inner.next_waiter += 1;
                inner.waiters.push((id, cx.waker().clone()));
                this.waiter = Some(id);
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for DeferredFuture<T> {
    fn drop(&mut self) {
        // Abandoned waits must not leave a waker record behind.
        if let Some(id) = self.waiter {
            let mut inner = self.inner.borrow_mut();
            if let Some(pos) = inner.waiters.iter().position(|(i, _)| *i == id) {
                inner.waiters.swap_remove(pos);
            }
        }
    }
}

impl<T> fmt::Debug for DeferredFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredFuture")
            .field("settled", &self.inner.borrow().outcome.is_some())
            .finish()
    }
}
