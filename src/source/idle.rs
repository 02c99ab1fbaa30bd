//! Idle sources.
//!
//! An idle source is always ready: while one is attached and enabled,
//! iterations never block, and its callback runs whenever nothing of
//! higher priority is pending. The default priority sits below timers
//! and I/O so idle work does not starve them.

use super::{Continuation, Source, SourceFuncs, lock_callback};
use crate::priority;

use std::sync::{Arc, Mutex};
use std::time::Duration;

type Callback = Arc<Mutex<Option<Box<dyn FnMut() -> Continuation + Send>>>>;

struct IdleFuncs {
    callback: Callback,
}

impl SourceFuncs for IdleFuncs {
    fn prepare(&mut self, _source: &Source, _now: i64) -> (bool, Option<Duration>) {
        (true, Some(Duration::ZERO))
    }

    fn check(&mut self, _source: &Source, _now: i64) -> bool {
        true
    }

    fn dispatch(&mut self, _source: &Source) -> Continuation {
        let mut callback = lock_callback(&self.callback);
        match callback.as_mut() {
            Some(callback) => callback(),
            None => {
                log::warn!("idle source dispatched without a callback");
                Continuation::Remove
            }
        }
    }

    fn finalize(&mut self, _source: &Source) {
        *lock_callback(&self.callback) = None;
    }
}

/// An always-ready source.
pub struct IdleSource {
    source: Source,
    callback: Callback,
}

impl IdleSource {
    /// Creates an idle source at [`priority::DEFAULT_IDLE`].
    pub fn new() -> IdleSource {
        IdleSource::with_priority(priority::DEFAULT_IDLE)
    }

    /// Creates an idle source at the given priority.
    pub fn with_priority(priority: i32) -> IdleSource {
        let callback: Callback = Arc::new(Mutex::new(None));

        let source = Source::with_priority(
            Box::new(IdleFuncs {
                callback: callback.clone(),
            }),
            priority,
        );

        IdleSource { source, callback }
    }

    /// Sets the callback invoked on every dispatch. Returning
    /// [`Continuation::Remove`] destroys the source.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut() -> Continuation + Send + 'static,
    {
        *lock_callback(&self.callback) = Some(Box::new(callback));
    }

    /// Consumes the wrapper, leaving the plain source handle.
    pub fn into_source(self) -> Source {
        self.source
    }
}

impl Default for IdleSource {
    fn default() -> IdleSource {
        IdleSource::new()
    }
}

impl std::ops::Deref for IdleSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}
