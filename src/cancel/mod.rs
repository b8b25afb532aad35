//! Cooperative cancellation.
//!
//! A [`CancellationSource`] owns the one-way `Active` →
//! `CancellationRequested` transition; the [`CancellationToken`] it derives
//! is handed down through a call chain, and every cooperating step either
//! polls it ([`CancellationToken::is_cancellation_requested`],
//! [`CancellationToken::check_cancelled`]), subscribes to it
//! ([`CancellationToken::subscribe`]), or awaits it
//! ([`CancellationToken::cancelled`]).
//!
//! Cancellation is advisory: an operation that never consults its token
//! simply runs to completion, which is accepted behavior rather than an
//! error.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::deferred::{EagerDeferred, EagerValue};
use crate::error::{Error, Result};
use crate::event::{EventChannel, Subscription};
use crate::runtime::{Reactor, TimerHandle};

struct TokenInner {
    cancelled: Cell<bool>,
    listeners: RefCell<Option<EventChannel<()>>>,
    future: RefCell<Option<EagerDeferred<()>>>,
}

/// A subscribable cancellation notification.
///
/// Tokens are cheap handles onto shared state; clone them freely into the
/// functions that should observe the cancellation. The broadcast channel
/// and the cancellation future behind [`subscribe`][Self::subscribe] and
/// [`cancelled`][Self::cancelled] are only allocated on first use.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Rc<TokenInner>,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            inner: Rc::new(TokenInner {
                cancelled: Cell::new(false),
                listeners: RefCell::new(None),
                future: RefCell::new(None),
            }),
        }
    }

    /// Whether the owning source has requested cancellation.
    ///
    /// `true` does not imply that every subscribed callback has run yet.
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Fails with [`Error::Cancelled`] iff cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.inner.cancelled.get() {
            Err(Error::cancelled())
        } else {
            Ok(())
        }
    }

    /// Registers a callback invoked exactly once when cancellation is
    /// requested.
    ///
    /// Delivery goes through the runtime's deferred-callback queue: the
    /// callback never runs inside [`CancellationSource::cancel`], and
    /// subscribing to an already-cancelled token still runs it, on a later
    /// queue turn rather than inside `subscribe`. The returned handle
    /// detaches the callback if disposed before it fires.
    pub fn subscribe(&self, callback: impl FnOnce() + 'static) -> Subscription<()> {
        if self.inner.cancelled.get() {
            Reactor::current().defer(callback);
            return Subscription::detached();
        }
        let mut listeners = self.inner.listeners.borrow_mut();
        let channel = listeners.get_or_insert_with(EventChannel::new);
        let mut callback = Some(callback);
        channel.subscribe_deferred(move |()| {
            if let Some(callback) = callback.take() {
                callback();
            }
        })
    }

    /// The cancellation future: resolves when cancellation is requested.
    ///
    /// The value settles synchronously inside the `cancel()` call, so chains
    /// built on it (releasing a timer, aborting a request) run in the same
    /// stack turn as the cancellation itself. Await it, or use
    /// [`EagerValue::force_async`] to escape to queue delivery.
    pub fn cancelled(&self) -> EagerValue<()> {
        let mut future = self.inner.future.borrow_mut();
        let deferred = future.get_or_insert_with(|| {
            let deferred = EagerDeferred::new();
            if self.inner.cancelled.get() {
                deferred.try_resolve(());
            }
            deferred
        });
        deferred.value()
    }

    pub(crate) fn request_cancellation(&self) {
        // Exactly one transition, no matter how many cancel() calls race in.
        if self.inner.cancelled.replace(true) {
            return;
        }
        // The clones keep the RefCell borrows out of the notification calls:
        // listeners may re-enter the token.
        let listeners = self.inner.listeners.borrow().clone();
        if let Some(listeners) = listeners {
            listeners.raise(());
            listeners.clear();
        }
        let future = self.inner.future.borrow().clone();
        if let Some(future) = future {
            future.try_resolve(());
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancellation_requested", &self.inner.cancelled.get())
            .finish()
    }
}

thread_local! {
    /// The pre-cancelled token handed out by sources that were cancelled
    /// before anyone observed their token.
    static CANCELLED: CancellationToken = {
        let token = CancellationToken::new();
        token.inner.cancelled.set(true);
        token
    };
}

struct SourceInner {
    token: RefCell<Option<CancellationToken>>,
    auto_cancel: Cell<Option<TimerHandle>>,
}

/// Owner of a [`CancellationToken`], and the only way to cancel it.
///
/// Sources are cheap handles onto shared state and can be cloned wherever
/// the cancel decision is made. The token is materialised lazily: a source
/// that is cancelled before [`token`][Self::token] is ever called hands out
/// a shared pre-cancelled token instead of allocating one.
#[derive(Clone)]
pub struct CancellationSource {
    inner: Rc<SourceInner>,
}

impl CancellationSource {
    /// Creates a source in the `Active` state.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SourceInner {
                token: RefCell::new(None),
                auto_cancel: Cell::new(None),
            }),
        }
    }

    /// Creates a source that cancels itself after `delay`.
    ///
    /// Requires a running [`block_on`][crate::runtime::block_on] unless
    /// `delay` is zero.
    pub fn with_timeout(delay: Duration) -> Self {
        let source = Self::new();
        source.cancel_after(delay);
        source
    }

    /// The derived token, materialised on first access.
    pub fn token(&self) -> CancellationToken {
        self.inner
            .token
            .borrow_mut()
            .get_or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Whether cancellation has been requested on this source.
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner
            .token
            .borrow()
            .as_ref()
            .is_some_and(CancellationToken::is_cancellation_requested)
    }

    /// Requests cancellation.
    ///
    /// The first call drives the token's one-way transition: subscribed
    /// callbacks are enqueued and the cancellation future resolves,
    /// synchronously, inside this call. Later calls are no-ops. A pending
    /// [`cancel_after`][Self::cancel_after] timer is released.
    pub fn cancel(&self) {
        if let Some(timer) = self.inner.auto_cancel.take() {
            timer.dispose();
        }
        let token = {
            let mut slot = self.inner.token.borrow_mut();
            match &*slot {
                Some(token) => token.clone(),
                None => {
                    // Nobody ever saw a token, so no listeners can exist:
                    // the shared pre-cancelled token is all that is needed.
                    *slot = Some(CANCELLED.with(CancellationToken::clone));
                    return;
                }
            }
        };
        token.request_cancellation();
    }

    /// Requests cancellation after a delay.
    ///
    /// A zero delay cancels synchronously, before this call returns.
    /// Re-arming replaces the previously scheduled timer. The reactor keeps
    /// the source alive until the timer fires, even if every other handle is
    /// dropped.
    pub fn cancel_after(&self, delay: Duration) {
        if delay.is_zero() {
            self.cancel();
            return;
        }
        let source = self.clone();
        let timer = Reactor::current().schedule(Instant::now() + delay, move || source.cancel());
        if let Some(previous) = self.inner.auto_cancel.replace(Some(timer)) {
            previous.dispose();
        }
    }

    /// A source that cancels as soon as any of `tokens` does.
    ///
    /// Inputs that are already cancelled trigger the composite on the next
    /// queue turn, never inside `race` itself. Racing no tokens yields a
    /// source that only cancels when told to.
    pub fn race<'a>(tokens: impl IntoIterator<Item = &'a CancellationToken>) -> CancellationSource {
        let source = CancellationSource::new();
        for token in tokens {
            let racer = source.clone();
            token.subscribe(move || racer.cancel());
        }
        source
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancellation_requested", &self.is_cancellation_requested())
            .finish()
    }
}
