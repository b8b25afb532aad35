#![warn(future_incompatible, unreachable_pub)]

//! Cooperative cancellation and externally-resolvable futures for
//! single-threaded async code.
//!
//! The crate is built around two ideas:
//!
//! * **Cooperative cancellation** — a [`cancel::CancellationSource`] owns a
//!   one-way cancelled transition; the [`cancel::CancellationToken`] it
//!   derives is passed down a call chain, and each cooperating step polls
//!   it, subscribes to it, or awaits it. Nothing is preempted: work that
//!   ignores its token just runs to completion.
//! * **Externally settled results** — [`deferred::Deferred`] settles through
//!   the executor's normal polling, while [`deferred::EagerDeferred`] runs
//!   its continuation chain synchronously inside the settling call, which is
//!   what lets a cancellation and the resource release it triggers happen in
//!   the same stack turn as `cancel()` itself.
//!
//! Both are driven by the crate's own single-threaded event loop,
//! [`runtime::block_on`], which provides the deferred-callback queue and the
//! timers the primitives rely on.
//!
//! # Examples
//!
//! ```
//! use quiesce::cancel::CancellationSource;
//! use quiesce::time::delay;
//! use std::time::Duration;
//!
//! quiesce::runtime::block_on(async {
//!     let source = CancellationSource::new();
//!     source.cancel_after(Duration::from_millis(10));
//!     let token = source.token();
//!     let outcome = delay(Duration::from_secs(5), Some(&token)).await;
//!     assert!(outcome.unwrap_err().is_cancelled());
//! });
//! ```

pub mod cancel;
pub mod deferred;
pub mod disposable;
mod error;
pub mod event;
pub mod future;
pub mod runtime;
pub mod time;

pub use error::{Error, Result};

pub mod prelude {
    //! Commonly used traits, anonymously re-exported.
    pub use crate::disposable::Disposable as _;
    pub use crate::future::FutureExt as _;
}
