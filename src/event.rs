//! Ordered pub-sub broadcast used by the cancellation primitives.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use slab::Slab;

use crate::disposable::Disposable;
use crate::runtime::Reactor;

type Callback<T> = Rc<RefCell<dyn FnMut(T)>>;

struct ListenerSlot<T> {
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
    deferred: bool,
    callback: Callback<T>,
}

struct Inner<T> {
    slots: Slab<ListenerSlot<T>>,
    head: Option<usize>,
    tail: Option<usize>,
    next_generation: u64,
}

/// An ordered multi-listener broadcast channel.
///
/// Listener records live in a slab arena threaded with prev/next links, so
/// subscribing and disposing are both O(1). A [`Subscription`] carries a
/// generation counter next to its slot index; a slot reused after disposal
/// can never be reached through a stale handle.
///
/// [`raise`][EventChannel::raise] delivers to listeners in subscription
/// order and snapshots the list before invoking anything: listeners added
/// during a dispatch wait for the next raise, listeners disposed during a
/// dispatch are skipped. A panicking listener propagates and abandons the
/// rest of the pass; listeners before it have already run.
pub struct EventChannel<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: 'static> EventChannel<T> {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slots: Slab::new(),
                head: None,
                tail: None,
                next_generation: 0,
            })),
        }
    }

    /// Appends a listener invoked inline on every [`raise`][Self::raise].
    pub fn subscribe(&self, callback: impl FnMut(T) + 'static) -> Subscription<T> {
        self.attach(callback, false)
    }

    /// Appends a listener delivered on the runtime's deferred-callback queue
    /// instead of inline.
    ///
    /// Raising a channel that has deferred listeners requires a running
    /// [`block_on`][crate::runtime::block_on].
    pub fn subscribe_deferred(&self, callback: impl FnMut(T) + 'static) -> Subscription<T> {
        self.attach(callback, true)
    }

    fn attach(&self, callback: impl FnMut(T) + 'static, deferred: bool) -> Subscription<T> {
        let mut inner = self.inner.borrow_mut();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let prev = inner.tail;
        let key = inner.slots.insert(ListenerSlot {
            generation,
            prev,
            next: None,
            deferred,
            callback: Rc::new(RefCell::new(callback)),
        });
        match prev {
            Some(tail) => inner.slots[tail].next = Some(key),
            None => inner.head = Some(key),
        }
        inner.tail = Some(key);
        Subscription {
            channel: Rc::downgrade(&self.inner),
            key,
            generation,
        }
    }

    /// Number of attached listeners.
    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    /// `true` when no listener is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detaches every listener without invoking any of them.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.slots.clear();
        inner.head = None;
        inner.tail = None;
    }
}

impl<T: Clone + 'static> EventChannel<T> {
    /// Delivers `payload` to every currently attached listener, in
    /// subscription order.
    ///
    /// Deferred-marked listeners are collected in order and run by a single
    /// queued callback sharing one payload; once that callback is enqueued,
    /// disposing or clearing no longer stops them.
    pub fn raise(&self, payload: T) {
        let snapshot: Vec<(usize, u64)> = {
            let inner = self.inner.borrow();
            let mut keys = Vec::with_capacity(inner.slots.len());
            let mut cursor = inner.head;
            while let Some(key) = cursor {
                let slot = &inner.slots[key];
                keys.push((key, slot.generation));
                cursor = slot.next;
            }
            keys
        };
        let mut deferred: Vec<Callback<T>> = Vec::new();
        for (key, generation) in snapshot {
            // Re-check liveness: the listener may have been disposed by an
            // earlier listener in this same pass.
            let live = {
                let inner = self.inner.borrow();
                inner.slots.get(key).and_then(|slot| {
                    (slot.generation == generation)
                        .then(|| (Rc::clone(&slot.callback), slot.deferred))
                })
            };
            match live {
                Some((callback, true)) => deferred.push(callback),
                Some((callback, false)) => (&mut *callback.borrow_mut())(payload.clone()),
                None => {}
            }
        }
        if !deferred.is_empty() {
            Reactor::current().defer(move || {
                for callback in deferred {
                    (&mut *callback.borrow_mut())(payload.clone());
                }
            });
        }
    }
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("listeners", &self.inner.borrow().slots.len())
            .finish()
    }
}

/// Handle detaching one listener from its [`EventChannel`].
///
/// Disposal is explicit: dropping the handle leaves the listener attached.
/// Disposing twice, or after the channel is gone, is a no-op.
pub struct Subscription<T> {
    channel: Weak<RefCell<Inner<T>>>,
    key: usize,
    generation: u64,
}

impl<T> Subscription<T> {
    /// A handle whose listener has already been consumed; disposal is a
    /// no-op.
    pub(crate) fn detached() -> Self {
        Subscription {
            channel: Weak::new(),
            key: 0,
            generation: 0,
        }
    }

    /// Unlinks the listener record, if it is still attached.
    pub fn dispose(&self) {
        let Some(inner) = self.channel.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        let Some(slot) = inner.slots.get(self.key) else {
            return;
        };
        if slot.generation != self.generation {
            return;
        }
        let (prev, next) = (slot.prev, slot.next);
        match prev {
            Some(p) => inner.slots[p].next = next,
            None => inner.head = next,
        }
        match next {
            Some(n) => inner.slots[n].prev = prev,
            None => inner.tail = prev,
        }
        inner.slots.remove(self.key);
    }
}

impl<T> Disposable for Subscription<T> {
    fn dispose(&self) {
        Subscription::dispose(self);
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.channel.upgrade().is_some())
            .finish()
    }
}
