use std::borrow::Cow;
use std::rc::Rc;

/// Default message attached to [`Error::Cancelled`].
const CANCELLED_MESSAGE: &str = "operation has been cancelled";

/// The crate's result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reasons carried by deferred results and cancellable operations.
///
/// A terminal state fans out to every downstream chain node and is replayed
/// to late subscribers, so the type is cheaply cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The operation observed a cancellation request and gave up.
    #[error("{0}")]
    Cancelled(Cow<'static, str>),
    /// A deferred value was resolved with a chain that leads back to itself.
    #[error("deferred value was resolved with its own chain")]
    Cycle,
    /// An application failure propagated through a continuation chain.
    #[error("{0}")]
    Failed(Rc<dyn std::error::Error>),
}

impl Error {
    /// A cancellation error carrying the default message.
    pub fn cancelled() -> Self {
        Error::Cancelled(Cow::Borrowed(CANCELLED_MESSAGE))
    }

    /// A cancellation error carrying a caller-supplied message.
    pub fn cancelled_with(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Cancelled(message.into())
    }

    /// Wraps an application error for propagation through a chain.
    pub fn failed(error: impl std::error::Error + 'static) -> Self {
        Error::Failed(Rc::new(error))
    }

    /// `true` for rejections caused by cancellation rather than failure.
    ///
    /// Callers are expected to branch on this rather than on the message
    /// text.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}
