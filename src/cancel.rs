//! Cancellation tokens.
//!
//! A [`CancellationToken`] is a one-way latch shared between threads.
//! Flipping it is idempotent and observable three ways: by polling
//! [`is_cancelled`](CancellationToken::is_cancelled), by blocking on
//! [`wait`](CancellationToken::wait), or by attaching the source from
//! [`cancelled_source`](CancellationToken::cancelled_source) to a
//! context, which wakes the context's poll when the token flips.

use crate::context::ContextInner;
use crate::source::{Continuation, Source, SourceFuncs, lock_callback};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

struct CancelInner {
    cancelled: AtomicBool,
    /// Mirror of `cancelled` guarded for the condvar.
    state: Mutex<bool>,
    signalled: Condvar,
    /// Contexts with an attached token source, to be woken on cancel.
    contexts: Mutex<Vec<Weak<ContextInner>>>,
}

/// A cloneable one-way cancellation latch.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> CancellationToken {
        CancellationToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(false),
                signalled: Condvar::new(),
                contexts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether [`cancel`](CancellationToken::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Flips the token. Idempotent; wakes blocked
    /// [`wait`](CancellationToken::wait) callers and every context
    /// holding an attached token source.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            *state = true;
            self.inner.signalled.notify_all();
        }

        let contexts = std::mem::take(&mut *self.inner.contexts.lock().unwrap());
        for context in contexts {
            if let Some(context) = context.upgrade() {
                context.signal_wakeup();
            }
        }
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while !*state {
            state = self.inner.signalled.wait(state).unwrap();
        }
    }

    /// Blocks until the token is cancelled or `timeout` elapses. Returns
    /// whether the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.inner.state.lock().unwrap();
        let (state, _) = self
            .inner
            .signalled
            .wait_timeout_while(state, timeout, |cancelled| !*cancelled)
            .unwrap();
        *state
    }

    /// Creates a source that dispatches once when the token flips.
    ///
    /// Attach it like any other source; set its callback through
    /// [`CancelSource::set_callback`]. A source created from an
    /// already-cancelled token dispatches on the first iteration.
    pub fn cancelled_source(&self) -> CancelSource {
        let callback: CancelCallback = Arc::new(Mutex::new(None));

        let source = Source::new(Box::new(CancelFuncs {
            token: self.clone(),
            callback: callback.clone(),
            context_registered: false,
        }));

        CancelSource { source, callback }
    }
}

impl Default for CancellationToken {
    fn default() -> CancellationToken {
        CancellationToken::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

type CancelCallback = Arc<Mutex<Option<Box<dyn FnMut() + Send>>>>;

struct CancelFuncs {
    token: CancellationToken,
    callback: CancelCallback,
    context_registered: bool,
}

impl SourceFuncs for CancelFuncs {
    fn prepare(&mut self, source: &Source, _now: i64) -> (bool, Option<Duration>) {
        if !self.context_registered {
            if let Some(context) = source.context() {
                self.token
                    .inner
                    .contexts
                    .lock()
                    .unwrap()
                    .push(Arc::downgrade(context.inner()));
                self.context_registered = true;
            }
        }

        (self.token.is_cancelled(), None)
    }

    fn check(&mut self, _source: &Source, _now: i64) -> bool {
        self.token.is_cancelled()
    }

    fn dispatch(&mut self, _source: &Source) -> Continuation {
        let mut callback = lock_callback(&self.callback);
        if let Some(callback) = callback.as_mut() {
            callback();
        }

        Continuation::Remove
    }

    fn finalize(&mut self, _source: &Source) {
        *lock_callback(&self.callback) = None;
    }
}

/// A source that fires once when its [`CancellationToken`] flips.
pub struct CancelSource {
    source: Source,
    callback: CancelCallback,
}

impl CancelSource {
    /// Sets the callback invoked on cancellation.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        *lock_callback(&self.callback) = Some(Box::new(callback));
    }

    /// Consumes the wrapper, leaving the plain source handle.
    pub fn into_source(self) -> Source {
        self.source
    }
}

impl std::ops::Deref for CancelSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}
