//! Externally resolvable deferred results.
//!
//! [`Deferred`] settles through the executor's normal polling: `try_resolve`
//! records the outcome and wakes waiters, and continuations run when the
//! runtime next polls them.
//!
//! [`EagerDeferred`] settles synchronously: the whole chain of continuations
//! registered through [`EagerValue::then`] runs depth-first inside the
//! `try_resolve`/`try_reject`/`try_cancel` call itself, which is what lets a
//! cancellation notification and the resource release it triggers happen in
//! the same call stack turn. [`EagerValue::force_async`] is the escape hatch
//! back to queue-based delivery.

mod eager;
mod queued;

pub use eager::{Chain, EagerDeferred, EagerFuture, EagerValue};
pub use queued::{Deferred, DeferredFuture};
