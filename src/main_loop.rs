//! The loop wrapper.
//!
//! A [`MainLoop`] repeatedly iterates a [`Context`] until
//! [`quit`](MainLoop::quit) is called — typically from a dispatched
//! callback, or from another thread.

use crate::context::Context;
use crate::error::PollError;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs a context until asked to quit.
///
/// The running flag is armed at construction, so a `quit` that happens
/// before [`run`](MainLoop::run) makes `run` return without iterating.
/// Clones share the same flag and context.
#[derive(Clone)]
pub struct MainLoop {
    context: Context,
    running: Arc<AtomicBool>,
}

impl MainLoop {
    /// Creates a loop over `context`.
    pub fn new(context: &Context) -> MainLoop {
        MainLoop {
            context: context.clone(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The driven context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Whether the loop has not (yet) been asked to quit.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Iterates the context until [`quit`](MainLoop::quit) is called.
    ///
    /// Blocks between iterations whenever no source is ready. Returns
    /// early with the poisoning error if the poll backend fails fatally.
    pub fn run(&self) -> Result<(), PollError> {
        while self.running.load(Ordering::Acquire) {
            self.context.iterate(true)?;
        }
        Ok(())
    }

    /// Stops the loop. Sources already dispatched in the current
    /// iteration still run to completion; the wake-up channel is
    /// signaled so a blocked poll returns promptly.
    pub fn quit(&self) {
        self.running.store(false, Ordering::Release);
        self.context.inner().signal_wakeup();
        self.context.inner().notify_owner_waiters();
    }
}
