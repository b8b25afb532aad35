use super::{Reactor, REACTOR};

use core::future::Future;
use core::pin::pin;
use core::task::Waker;
use core::task::{Context, Poll};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Wake;

/// Start the event loop and drive `fut` to completion.
///
/// # Panics
/// Panics when nested inside another `block_on` on the same thread, and when
/// the future is pending while the reactor has no timers or deferred
/// callbacks left to wait on.
pub fn block_on<Fut>(fut: Fut) -> Fut::Output
where
    Fut: Future,
{
    // Construct the reactor
    let reactor = Reactor::new();
    // Store a copy as a singleton to be used elsewhere:
    let prev = REACTOR.replace(Some(reactor.clone()));
    if prev.is_some() {
        panic!("cannot quiesce::runtime::block_on inside an existing block_on!")
    }

    // Pin the future so it can be polled
    let mut fut = pin!(fut);

    // Create a new context to be passed to the future.
    let main = Arc::new(MainWaker::new());
    let waker = Waker::from(Arc::clone(&main));
    let mut cx = Context::from_waker(&waker);

    // Either the future completes and we return, or some timer or deferred
    // callback is outstanding and we run the reactor until it wakes us. The
    // awake flag clears before each poll so a wake arriving mid-poll is
    // never lost.
    let res = loop {
        main.set_awake(false);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(res) => break res,
            Poll::Pending => reactor.block_until(|| main.awake()),
        }
    };
    // Clear the singleton
    REACTOR.replace(None);
    res
}

struct MainWaker {
    awake: AtomicBool,
}

impl MainWaker {
    fn new() -> Self {
        Self {
            awake: AtomicBool::new(false),
        }
    }

    #[inline]
    fn set_awake(&self, awake: bool) {
        self.awake.store(awake, Ordering::Relaxed);
    }

    #[inline]
    fn awake(&self) -> bool {
        self.awake.load(Ordering::Relaxed)
    }
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.set_awake(true);
    }
}
