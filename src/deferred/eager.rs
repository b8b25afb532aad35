use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use super::queued::{Deferred, DeferredFuture};
use crate::error::{Error, Result};

type NodeRef<T> = Rc<RefCell<Node<T>>>;

struct Node<T> {
    state: State<T>,
}

impl<T> Node<T> {
    fn new() -> NodeRef<T> {
        Rc::new(RefCell::new(Node {
            state: State::Pending(Waiters::new()),
        }))
    }
}

enum State<T> {
    /// Not yet settled; holds everything waiting on the settlement.
    Pending(Waiters<T>),
    /// Resolved with an inner chain; settles when the inner chain does.
    Adopting(Waiters<T>),
    Settled(Result<T>),
}

struct Waiters<T> {
    children: Vec<(u64, Child<T>)>,
    tap: Option<Deferred<T>>,
    next_child: u64,
}

impl<T> Waiters<T> {
    fn new() -> Self {
        Waiters {
            children: Vec::new(),
            tap: None,
            next_child: 0,
        }
    }

    fn attach(&mut self, child: Child<T>) -> u64 {
        let id = self.next_child;
        self.next_child += 1;
        self.children.push((id, child));
        id
    }
}

enum Child<T> {
    Chain(Box<dyn Downstream<T>>),
    Waker(Waker),
}

trait Downstream<T> {
    fn settle(self: Box<Self>, outcome: Result<T>);
}

/// Adapter turning a plain `FnOnce` into a chain child.
struct Once<F>(F);

impl<T, F: FnOnce(Result<T>)> Downstream<T> for Once<F> {
    fn settle(self: Box<Self>, outcome: Result<T>) {
        (self.0)(outcome)
    }
}

struct ThenChild<T, U> {
    target: NodeRef<U>,
    on_fulfilled: Box<dyn FnOnce(T) -> Result<Chain<U>>>,
    on_rejected: Option<Box<dyn FnOnce(Error) -> Result<Chain<U>>>>,
}

impl<T: 'static, U: Clone + 'static> Downstream<T> for ThenChild<T, U> {
    fn settle(self: Box<Self>, outcome: Result<T>) {
        let this = *self;
        match outcome {
            Ok(value) => apply(&this.target, (this.on_fulfilled)(value)),
            Err(reason) => match this.on_rejected {
                Some(on_rejected) => apply(&this.target, on_rejected(reason)),
                None => settle_now(&this.target, Err(reason)),
            },
        }
    }
}

struct CatchChild<T> {
    target: NodeRef<T>,
    on_rejected: Box<dyn FnOnce(Error) -> Result<Chain<T>>>,
}

impl<T: Clone + 'static> Downstream<T> for CatchChild<T> {
    fn settle(self: Box<Self>, outcome: Result<T>) {
        let this = *self;
        match outcome {
            Ok(value) => settle_now(&this.target, Ok(value)),
            Err(reason) => apply(&this.target, (this.on_rejected)(reason)),
        }
    }
}

/// Settles `node` and propagates the outcome, depth-first and in
/// registration order, through every waiting child.
fn settle_now<T: Clone + 'static>(node: &NodeRef<T>, outcome: Result<T>) {
    let waiters = {
        let mut n = node.borrow_mut();
        match std::mem::replace(&mut n.state, State::Settled(outcome.clone())) {
            State::Pending(waiters) | State::Adopting(waiters) => waiters,
            settled @ State::Settled(_) => {
                n.state = settled;
                tracing::error!("settled deferred value must not be settled again");
                return;
            }
        }
    };
    if let Err(reason) = &outcome {
        if waiters.children.is_empty() && waiters.tap.is_none() {
            // Never swallow a rejection silently; cancellations are routine
            // and only worth a debug line.
            if reason.is_cancelled() {
                tracing::debug!(%reason, "cancellation rejection had no observers");
            } else {
                tracing::warn!(%reason, "deferred rejection had no observers");
            }
        }
    }
    if let Some(tap) = waiters.tap {
        match outcome.clone() {
            Ok(value) => {
                tap.try_resolve(value);
            }
            Err(reason) => {
                tap.try_reject(reason);
            }
        }
    }
    for (_, child) in waiters.children {
        match child {
            Child::Chain(chain) => chain.settle(outcome.clone()),
            Child::Waker(waker) => waker.wake(),
        }
    }
}

/// Resolves `node` with an inner chain: the node adopts the chain and
/// settles, still synchronously, once the chain does.
fn adopt<T: Clone + 'static>(node: &NodeRef<T>, inner: EagerValue<T>) {
    if Rc::ptr_eq(node, &inner.node) {
        settle_now(node, Err(Error::Cycle));
        return;
    }
    {
        let mut n = node.borrow_mut();
        match std::mem::replace(&mut n.state, State::Adopting(Waiters::new())) {
            State::Pending(waiters) => n.state = State::Adopting(waiters),
            other => {
                n.state = other;
                return;
            }
        }
    }
    let target = Rc::clone(node);
    when_settled(&inner.node, move |outcome| settle_now(&target, outcome));
}

/// Runs `callback` with the node's outcome: immediately if it has settled,
/// otherwise as soon as it does.
fn when_settled<T: Clone + 'static>(node: &NodeRef<T>, callback: impl FnOnce(Result<T>) + 'static) {
    let settled = {
        let mut n = node.borrow_mut();
        match &mut n.state {
            State::Pending(waiters) | State::Adopting(waiters) => {
                waiters.attach(Child::Chain(Box::new(Once(callback))));
                return;
            }
            State::Settled(outcome) => outcome.clone(),
        }
    };
    callback(settled);
}

fn apply<U: Clone + 'static>(target: &NodeRef<U>, step: Result<Chain<U>>) {
    match step {
        Ok(Chain::Ready(value)) => settle_now(target, Ok(value)),
        Ok(Chain::Link(inner)) => adopt(target, inner),
        Err(reason) => settle_now(target, Err(reason)),
    }
}

/// What a continuation produced: a concrete value, or a further chain whose
/// settlement is transparently unwrapped before propagation continues.
pub enum Chain<T> {
    /// A concrete value; propagation continues immediately.
    Ready(T),
    /// An inner chain to adopt; propagation continues once it settles.
    Link(EagerValue<T>),
}

impl<T> fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Ready(_) => f.write_str("Chain::Ready(..)"),
            Chain::Link(_) => f.write_str("Chain::Link(..)"),
        }
    }
}

/// A deferred result settled from outside, with synchronous delivery.
///
/// Unlike [`Deferred`], settling runs the entire downstream chain of
/// continuations inside the `try_*` call itself; no queue turn is crossed
/// unless a continuation resolves to a further chain, in which case
/// propagation picks up, still synchronously, when that chain settles.
///
/// Settling a value that has already settled is a programming error: it is
/// reported through `tracing` and ignored, never raised at the second
/// caller.
pub struct EagerDeferred<T> {
    node: NodeRef<T>,
}

impl<T: Clone + 'static> EagerDeferred<T> {
    /// Creates a pending deferred result.
    pub fn new() -> Self {
        Self { node: Node::new() }
    }

    /// The observable side: chain continuations onto it or await it.
    pub fn value(&self) -> EagerValue<T> {
        EagerValue {
            node: Rc::clone(&self.node),
        }
    }

    /// Synchronously resolves the value, unless it has already settled.
    pub fn try_resolve(&self, value: T) -> bool {
        if !self.claim() {
            return false;
        }
        settle_now(&self.node, Ok(value));
        true
    }

    /// Resolves the value with another chain, adopting its eventual outcome.
    ///
    /// Resolving a value with its own chain rejects it with [`Error::Cycle`].
    pub fn try_resolve_from(&self, chain: EagerValue<T>) -> bool {
        if !self.claim() {
            return false;
        }
        adopt(&self.node, chain);
        true
    }

    /// Synchronously rejects the value, unless it has already settled.
    pub fn try_reject(&self, reason: Error) -> bool {
        if !self.claim() {
            return false;
        }
        settle_now(&self.node, Err(reason));
        true
    }

    /// Synchronously rejects the value with a cancellation error.
    pub fn try_cancel(&self) -> bool {
        if !self.claim() {
            return false;
        }
        settle_now(&self.node, Err(Error::cancelled()));
        true
    }

    /// `true` once the value has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        matches!(self.node.borrow().state, State::Settled(_))
    }

    fn claim(&self) -> bool {
        match &self.node.borrow().state {
            State::Pending(_) => true,
            State::Adopting(_) => {
                tracing::debug!(
                    "deferred value is already adopting an inner chain; duplicate settlement ignored"
                );
                false
            }
            State::Settled(_) => {
                tracing::error!("deferred value is already settled; duplicate settlement ignored");
                false
            }
        }
    }
}

impl<T> Clone for EagerDeferred<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> Default for EagerDeferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EagerDeferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerDeferred")
            .field("state", &state_name(&self.node))
            .finish()
    }
}

/// The observable side of an [`EagerDeferred`]: a chainable, awaitable
/// value.
///
/// Chaining is valid at any time. Before settlement the continuation is
/// queued; after settlement the terminal state replays into it synchronously
/// inside the `then` call. Awaiting (through [`IntoFuture`]) always goes
/// through the runtime's normal polling and never re-enters the caller.
pub struct EagerValue<T> {
    node: NodeRef<T>,
}

impl<T: Clone + 'static> EagerValue<T> {
    /// Chains a fulfillment continuation; rejections pass through untouched.
    ///
    /// An `Err` returned from the continuation becomes the rejection reason
    /// of the returned value.
    pub fn then<U, F>(&self, on_fulfilled: F) -> EagerValue<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Chain<U>> + 'static,
    {
        let target = Node::new();
        self.register(Box::new(ThenChild {
            target: Rc::clone(&target),
            on_fulfilled: Box::new(on_fulfilled),
            on_rejected: None,
        }));
        EagerValue { node: target }
    }

    /// Chains fulfillment and rejection continuations at once.
    pub fn then_or_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> EagerValue<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Chain<U>> + 'static,
        R: FnOnce(Error) -> Result<Chain<U>> + 'static,
    {
        let target = Node::new();
        self.register(Box::new(ThenChild {
            target: Rc::clone(&target),
            on_fulfilled: Box::new(on_fulfilled),
            on_rejected: Some(Box::new(on_rejected)),
        }));
        EagerValue { node: target }
    }

    /// Chains a rejection continuation; fulfillments pass through untouched.
    pub fn or_else<R>(&self, on_rejected: R) -> EagerValue<T>
    where
        R: FnOnce(Error) -> Result<Chain<T>> + 'static,
    {
        let target = Node::new();
        self.register(Box::new(CatchChild {
            target: Rc::clone(&target),
            on_rejected: Box::new(on_rejected),
        }));
        EagerValue { node: target }
    }

    /// Escapes the synchronous chain: the returned future delivers the
    /// outcome through the runtime's queue, guaranteeing the caller is not
    /// re-entered inside the settling call.
    ///
    /// While the value is pending all callers share one underlying
    /// [`Deferred`]; after settlement each call hands out a fresh, already
    /// settled one.
    pub fn force_async(&self) -> DeferredFuture<T> {
        let mut n = self.node.borrow_mut();
        match &mut n.state {
            State::Pending(waiters) | State::Adopting(waiters) => {
                waiters.tap.get_or_insert_with(Deferred::new).future()
            }
            State::Settled(outcome) => {
                let tap = Deferred::new();
                match outcome.clone() {
                    Ok(value) => {
                        tap.try_resolve(value);
                    }
                    Err(reason) => {
                        tap.try_reject(reason);
                    }
                }
                tap.future()
            }
        }
    }

    /// `true` once the value has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        matches!(self.node.borrow().state, State::Settled(_))
    }

    fn register(&self, child: Box<dyn Downstream<T>>) {
        let replay = {
            let mut n = self.node.borrow_mut();
            match &mut n.state {
                State::Pending(waiters) | State::Adopting(waiters) => {
                    waiters.attach(Child::Chain(child));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        // Chaining after settlement replays the terminal state synchronously
        // into the new node.
        child.settle(replay);
    }
}

impl<T> Clone for EagerValue<T> {
    fn clone(&self) -> Self {
        Self {
            node: Rc::clone(&self.node),
        }
    }
}

impl<T: Clone + 'static> IntoFuture for EagerValue<T> {
    type Output = Result<T>;
    type IntoFuture = EagerFuture<T>;

    fn into_future(self) -> EagerFuture<T> {
        EagerFuture {
            node: self.node,
            waiter: None,
        }
    }
}

impl<T> fmt::Debug for EagerValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerValue")
            .field("state", &state_name(&self.node))
            .finish()
    }
}

/// Future returned by awaiting an [`EagerValue`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct EagerFuture<T> {
    node: NodeRef<T>,
    waiter: Option<u64>,
}

impl<T: Clone + 'static> Future for EagerFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut n = this.node.borrow_mut();
        match &mut n.state {
            State::Settled(outcome) => {
                this.waiter = None;
                Poll::Ready(outcome.clone())
            }
            State::Pending(waiters) | State::Adopting(waiters) => {
                match this.waiter {
                    Some(id) => {
                        if let Some((_, Child::Waker(waker))) =
                            waiters.children.iter_mut().find(|(i, _)| *i == id)
                        {
                            *waker = cx.waker().clone();
                        }
                    }
                    None => {
                        this.waiter = Some(waiters.attach(Child::Waker(cx.waker().clone())));
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for EagerFuture<T> {
    fn drop(&mut self) {
        // Abandoned waits must not leave a waker record in the chain.
        let Some(id) = self.waiter else {
            return;
        };
        let mut n = self.node.borrow_mut();
        if let State::Pending(waiters) | State::Adopting(waiters) = &mut n.state {
            if let Some(pos) = waiters.children.iter().position(|(i, _)| *i == id) {
                waiters.children.remove(pos);
            }
        }
    }
}

impl<T> fmt::Debug for EagerFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerFuture")
            .field("state", &state_name(&self.node))
            .finish()
    }
}

fn state_name<T>(node: &NodeRef<T>) -> &'static str {
    match &node.borrow().state {
        State::Pending(_) => "pending",
        State::Adopting(_) => "adopting",
        State::Settled(Ok(_)) => "resolved",
        State::Settled(Err(_)) => "rejected",
    }
}
