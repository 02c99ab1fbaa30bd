//! The dispatch context.
//!
//! This module implements the engine's owning aggregate: the source
//! registry, the ownership protocol, and the six-phase iteration state
//! machine (acquire → prepare → query → poll → check → dispatch).
//!
//! Most users drive a context through [`MainLoop`](crate::MainLoop)
//! rather than calling [`Context::iterate`] directly.

mod core;
mod owner;
mod registry;

pub use self::core::{Context, DispatchOutcome, PanicObserver};

pub(crate) use self::core::ContextInner;
