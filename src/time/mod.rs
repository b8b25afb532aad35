//! Timer utilities built on the reactor and the cancellation primitives.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::deferred::EagerDeferred;
use crate::error::Result;
use crate::event::Subscription;
use crate::runtime::Reactor;

/// Waits for `duration`, optionally giving up early when `token` cancels.
///
/// With a token, the call checks for cancellation at entry, races the timer
/// against the token, and releases whichever side loses: a winning timer
/// disposes the cancellation subscription, a winning cancellation disposes
/// the timer so nothing fires into the settled result later. Cancellation
/// rejects with [`Error::Cancelled`][crate::Error::Cancelled].
///
/// A zero-duration wait without a token resolves after one queue turn with
/// no cancellation machinery at all.
pub async fn delay(duration: Duration, token: Option<&CancellationToken>) -> Result<()> {
    if let Some(token) = token {
        token.check_cancelled()?;
    } else if duration.is_zero() {
        yielded().await;
        return Ok(());
    }
    let done = EagerDeferred::new();
    let value = done.value();
    let subscription: Rc<Cell<Option<Subscription<()>>>> = Rc::new(Cell::new(None));
    let timer = {
        let done = done.clone();
        let subscription = Rc::clone(&subscription);
        Reactor::current().schedule(Instant::now() + duration, move || {
            // The wait won: release the cancellation subscription with it.
            if let Some(subscription) = subscription.take() {
                subscription.dispose();
            }
            done.try_resolve(());
        })
    };
    if let Some(token) = token {
        subscription.set(Some(token.subscribe(move || {
            timer.dispose();
            done.try_cancel();
        })));
    }
    value.await
}

/// Yields once: resolves after the deferred-callback queue has taken a turn.
pub fn yielded() -> Yielded {
    Yielded { notify: None }
}

struct Notify {
    done: Cell<bool>,
    waker: RefCell<Waker>,
}

/// Future returned by [`yielded`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Yielded {
    notify: Option<Rc<Notify>>,
}

impl Future for Yielded {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if let Some(notify) = &this.notify {
            if notify.done.get() {
                return Poll::Ready(());
            }
            *notify.waker.borrow_mut() = cx.waker().clone();
            return Poll::Pending;
        }
        let notify = Rc::new(Notify {
            done: Cell::new(false),
            waker: RefCell::new(cx.waker().clone()),
        });
        let queued = Rc::clone(&notify);
        Reactor::current().defer(move || {
            queued.done.set(true);
            queued.waker.borrow().wake_by_ref();
        });
        this.notify = Some(notify);
        Poll::Pending
    }
}

impl fmt::Debug for Yielded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielded")
            .field("queued", &self.notify.is_some())
            .finish()
    }
}
