//! Child-process exit watches.
//!
//! A child watch becomes ready once the watched pid has exited and been
//! reaped. Reaping happens inside the signal hub's `SIGCHLD` handling
//! with `waitpid(WNOHANG)`, so the watched process must not be waited on
//! elsewhere. A watch fires exactly once and then removes itself.

use super::signal::{
    dispatch_pending, register_child_watch, set_child_wake_fd, unregister_child_watch,
};
use super::{Continuation, Source, SourceFuncs, lock_callback};

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Callback = Arc<Mutex<Option<Box<dyn FnMut(i32, i32) + Send>>>>;

struct ChildFuncs {
    token: u64,
    pid: i32,
    exited: Arc<AtomicBool>,
    status: Arc<AtomicI32>,
    callback: Callback,
    wake_registered: bool,
}

impl SourceFuncs for ChildFuncs {
    fn prepare(&mut self, source: &Source, _now: i64) -> (bool, Option<Duration>) {
        dispatch_pending();

        if !self.wake_registered {
            if let Some(context) = source.context() {
                set_child_wake_fd(self.token, context.inner().raw_wakeup_fd());
                self.wake_registered = true;
            }
        }

        (self.exited.load(Ordering::Acquire), None)
    }

    fn check(&mut self, _source: &Source, _now: i64) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    fn dispatch(&mut self, _source: &Source) -> Continuation {
        let status = self.status.load(Ordering::Acquire);

        let mut callback = lock_callback(&self.callback);
        if let Some(callback) = callback.as_mut() {
            callback(self.pid, status);
        } else {
            log::warn!("child watch dispatched without a callback");
        }

        // The exit has been delivered; the watch is spent either way.
        Continuation::Remove
    }

    fn finalize(&mut self, _source: &Source) {
        unregister_child_watch(self.token);
        *lock_callback(&self.callback) = None;
    }
}

/// A source that fires once when a child process exits.
pub struct ChildWatchSource {
    source: Source,
    callback: Callback,
}

impl ChildWatchSource {
    /// Creates a watch for `pid`. The pid must name a child of this
    /// process; a child that exited before this call is still reported.
    pub fn new(pid: i32) -> ChildWatchSource {
        assert!(pid > 0, "child watch needs a concrete pid");

        let exited = Arc::new(AtomicBool::new(false));
        let status = Arc::new(AtomicI32::new(0));
        let callback: Callback = Arc::new(Mutex::new(None));
        let token = register_child_watch(pid, exited.clone(), status.clone());

        let source = Source::new(Box::new(ChildFuncs {
            token,
            pid,
            exited,
            status,
            callback: callback.clone(),
            wake_registered: false,
        }));

        ChildWatchSource { source, callback }
    }

    /// Sets the callback receiving the pid and the raw `waitpid` status.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(i32, i32) + Send + 'static,
    {
        *lock_callback(&self.callback) = Some(Box::new(callback));
    }

    /// Consumes the wrapper, leaving the plain source handle.
    pub fn into_source(self) -> Source {
        self.source
    }
}

impl std::ops::Deref for ChildWatchSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}
