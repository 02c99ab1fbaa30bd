//! Context ownership.
//!
//! Exactly one thread at a time may run the prepare/check/dispatch
//! phases of a context. Ownership is recursive on the holding thread
//! (a callback may itself call `iterate`); releasing unwinds to the
//! outermost holder, which signals a condvar so blocked waiters can
//! take over.

use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct OwnerState {
    thread: Option<ThreadId>,
    depth: u32,
}

pub(crate) struct Owner {
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl Owner {
    pub(crate) fn new() -> Owner {
        Owner {
            state: Mutex::new(OwnerState {
                thread: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Tries to acquire ownership for the current thread without
    /// blocking. Recursive acquisition by the owner always succeeds.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let me = thread::current().id();

        match state.thread {
            None => {
                state.thread = Some(me);
                state.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Blocks until ownership can be acquired for the current thread.
    pub(crate) fn acquire_wait(&self) {
        let mut state = self.state.lock().unwrap();
        let me = thread::current().id();

        loop {
            match state.thread {
                None => {
                    state.thread = Some(me);
                    state.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return;
                }
                Some(_) => {
                    state = self.released.wait(state).unwrap();
                }
            }
        }
    }

    /// Releases one level of ownership. Returns `false` (and does
    /// nothing) if the current thread is not the owner.
    pub(crate) fn release(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.thread != Some(thread::current().id()) {
            return false;
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.thread = None;
            drop(state);
            self.released.notify_all();
        }

        true
    }

    /// Whether the current thread owns the context.
    pub(crate) fn is_owner(&self) -> bool {
        self.state.lock().unwrap().thread == Some(thread::current().id())
    }

    /// Whether a thread other than the current one owns the context.
    pub(crate) fn is_foreign_owner(&self) -> bool {
        let state = self.state.lock().unwrap();
        matches!(state.thread, Some(t) if t != thread::current().id())
    }

    /// Wakes threads blocked in [`acquire_wait`]; used by `MainLoop::quit`
    /// so a `run` that is still waiting for ownership can observe the
    /// cleared running flag.
    pub(crate) fn notify(&self) {
        self.released.notify_all();
    }
}
