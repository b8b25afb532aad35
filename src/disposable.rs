//! Release handles for subscriptions, timers, and other detachable resources.

use std::fmt;

/// A detachable resource: an event subscription, a pending timer, or any
/// other handle whose release must be safe to request more than once.
pub trait Disposable {
    /// Releases the resource.
    ///
    /// Only the first call is effective; later calls are no-ops.
    fn dispose(&self);
}

/// Combines any number of handles into one that releases them all in order.
pub fn combine(handles: impl IntoIterator<Item = Box<dyn Disposable>>) -> Combined {
    Combined {
        handles: handles.into_iter().collect(),
    }
}

/// Aggregated release handle returned by [`combine`].
pub struct Combined {
    handles: Vec<Box<dyn Disposable>>,
}

impl Disposable for Combined {
    fn dispose(&self) {
        for handle in &self.handles {
            handle.dispose();
        }
    }
}

impl fmt::Debug for Combined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combined")
            .field("handles", &self.handles.len())
            .finish()
    }
}
