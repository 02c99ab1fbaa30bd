//! File-descriptor readiness sources.
//!
//! A Unix fd source contributes one poll record to its context's
//! aggregate poll set and dispatches whenever the descriptor reports any
//! of the watched conditions. Error conditions (`ERR`, `HUP`, `NVAL`)
//! are always delivered, whether watched or not.
//!
//! The source borrows the descriptor; the caller keeps it open for the
//! lifetime of the source and closes it after `destroy`.

use super::{Continuation, Source, SourceFuncs, lock_callback};
use crate::poll::common::{IoCondition, PollCell, PollRecord};

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Callback = Arc<Mutex<Option<Box<dyn FnMut(IoCondition) -> Continuation + Send>>>>;

struct UnixFdFuncs {
    cell: PollCell,
    callback: Callback,
}

impl UnixFdFuncs {
    fn observed(&self) -> IoCondition {
        self.cell.lock().unwrap().revents
    }
}

impl SourceFuncs for UnixFdFuncs {
    fn prepare(&mut self, _source: &Source, _now: i64) -> (bool, Option<Duration>) {
        // Results from the previous poll that were not consumed by a
        // dispatch (priority cut, source disabled mid-iteration) still
        // count as ready.
        (!self.observed().is_empty(), None)
    }

    fn check(&mut self, _source: &Source, _now: i64) -> bool {
        !self.observed().is_empty()
    }

    fn dispatch(&mut self, _source: &Source) -> Continuation {
        let revents = {
            let mut record = self.cell.lock().unwrap();
            std::mem::replace(&mut record.revents, IoCondition::empty())
        };

        let mut callback = lock_callback(&self.callback);
        match callback.as_mut() {
            Some(callback) => callback(revents),
            None => {
                log::warn!("fd source dispatched without a callback");
                Continuation::Remove
            }
        }
    }

    fn finalize(&mut self, _source: &Source) {
        *lock_callback(&self.callback) = None;
    }
}

/// A source watching a file descriptor for I/O readiness.
pub struct UnixFdSource {
    source: Source,
    cell: PollCell,
    callback: Callback,
}

impl UnixFdSource {
    /// Creates a source watching `fd` for `events`.
    pub fn new(fd: RawFd, events: IoCondition) -> UnixFdSource {
        assert!(fd >= 0, "fd source needs a valid descriptor");

        let cell: PollCell = Arc::new(Mutex::new(PollRecord::new(fd, events)));
        let callback: Callback = Arc::new(Mutex::new(None));

        let source = Source::new(Box::new(UnixFdFuncs {
            cell: cell.clone(),
            callback: callback.clone(),
        }));
        source
            .inner
            .state
            .lock()
            .unwrap()
            .poll_cells
            .push(cell.clone());

        UnixFdSource {
            source,
            cell,
            callback,
        }
    }

    /// The watched descriptor.
    pub fn fd(&self) -> RawFd {
        self.cell.lock().unwrap().handle
    }

    /// Replaces the set of watched conditions. Takes effect at the next
    /// iteration; wakes the owning context so a blocked poll rebuilds
    /// its interest set.
    pub fn set_events(&self, events: IoCondition) {
        {
            let mut record = self.cell.lock().unwrap();
            if record.events == events {
                return;
            }
            record.events = events;
        }

        if let Some(context) = self.source.context() {
            context.inner().poll_set_changed();
        }
    }

    /// Sets the callback, which receives the conditions observed by the
    /// poll. Returning [`Continuation::Remove`] destroys the source.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(IoCondition) -> Continuation + Send + 'static,
    {
        *lock_callback(&self.callback) = Some(Box::new(callback));
    }

    /// Consumes the wrapper, leaving the plain source handle.
    pub fn into_source(self) -> Source {
        self.source
    }
}

impl std::ops::Deref for UnixFdSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}
