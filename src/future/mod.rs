//! Composing arbitrary futures with cancellation.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::ready;
use pin_project_lite::pin_project;

use crate::cancel::CancellationToken;
use crate::deferred::EagerFuture;
use crate::error::{Error, Result};

/// Extend `Future` with cancellation-aware operations.
pub trait FutureExt: Future {
    /// Races this future against a cancellation token.
    ///
    /// Resolves with `Ok` when the wrapped future finishes first, and with
    /// [`Error::Cancelled`] when the token does; the wrapped future is then
    /// dropped, running its destructors. Cancellation wins a tie: it is
    /// checked before the wrapped future on every poll.
    fn with_cancellation(self, token: &CancellationToken) -> WithCancellation<Self>
    where
        Self: Sized,
    {
        WithCancellation {
            future: self,
            cancelled: token.cancelled().into_future(),
        }
    }
}

impl<F: Future> FutureExt for F {}

pin_project! {
    /// Future returned by [`FutureExt::with_cancellation`].
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct WithCancellation<F> {
        #[pin]
        future: F,
        cancelled: EagerFuture<()>,
    }
}

impl<F: Future> Future for WithCancellation<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if Pin::new(this.cancelled).poll(cx).is_ready() {
            return Poll::Ready(Err(Error::cancelled()));
        }
        let value = ready!(this.future.poll(cx));
        Poll::Ready(Ok(value))
    }
}
