use thiserror::Error;

/// Errors produced by the poll backend.
///
/// `Interrupted` is retried transparently inside
/// [`Context::iterate`](crate::Context::iterate) and is only visible to
/// custom poll backends. `Fatal` poisons the context: every further
/// `iterate` call returns the same error until the context is recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PollError {
    /// The wait was interrupted by a signal (`EINTR`).
    #[error("poll interrupted by a signal")]
    Interrupted,

    /// The host readiness primitive failed with the given OS error code.
    #[error("poll failed with os error {0}")]
    Fatal(i32),
}

/// Errors produced when attaching a source to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The source is already attached to a context. A source belongs to
    /// exactly one context for its whole lifetime.
    #[error("source is already attached to a context")]
    AlreadyAttached,

    /// The source has been destroyed and can no longer be attached.
    #[error("source has been destroyed")]
    Destroyed,
}

/// Errors produced by [`Context::acquire`](crate::Context::acquire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// Another thread currently owns the context.
    #[error("context is owned by another thread")]
    Contended,
}
