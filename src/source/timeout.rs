//! Timer sources.
//!
//! A timeout source becomes ready when a monotonic deadline passes.
//! One-shot timers fire once and remove themselves; repeating timers
//! advance their deadline by the interval after every dispatch. A
//! callback that ran late advances to the next deadline strictly after
//! now — missed intervals are skipped, not replayed.
//!
//! Seconds-granularity timers round their expirations to one-second
//! boundaries so the OS can batch wake-ups of unrelated timers.

use super::{Continuation, Source, SourceFuncs, lock_callback};
use crate::clock::monotonic_time;

use std::sync::{Arc, Mutex};
use std::time::Duration;

type Callback = Arc<Mutex<Option<Box<dyn FnMut() -> Continuation + Send>>>>;

const USEC_PER_SEC: i64 = 1_000_000;

struct TimeoutFuncs {
    interval: Option<Duration>,
    seconds: bool,
    callback: Callback,
}

impl SourceFuncs for TimeoutFuncs {
    // Readiness is carried entirely by the source's ready-time; the
    // default prepare/check are sufficient.

    fn dispatch(&mut self, source: &Source) -> Continuation {
        let again = {
            let mut callback = lock_callback(&self.callback);
            match callback.as_mut() {
                Some(callback) => callback(),
                None => {
                    log::warn!("timeout source dispatched without a callback");
                    return Continuation::Remove;
                }
            }
        };

        if again == Continuation::Remove {
            return Continuation::Remove;
        }

        match self.interval {
            None => Continuation::Remove,
            Some(interval) => {
                self.advance(source, interval);
                Continuation::Continue
            }
        }
    }

    fn finalize(&mut self, _source: &Source) {
        *lock_callback(&self.callback) = None;
    }
}

impl TimeoutFuncs {
    /// Moves the deadline to the next multiple of `interval` strictly
    /// after now.
    fn advance(&self, source: &Source, interval: Duration) {
        let now = monotonic_time();
        let step = (interval.as_micros() as i64).max(1);

        let mut expiration = source.ready_time().unwrap_or(now);
        if expiration <= now {
            expiration += ((now - expiration) / step + 1) * step;
        }
        if self.seconds {
            expiration = align_to_second(expiration);
        }

        source.set_ready_time(Some(expiration));
    }
}

/// Rounds an expiration to a one-second boundary, only ever moving it
/// later: a sub-second remainder of at least a quarter second rounds up.
fn align_to_second(expiration: i64) -> i64 {
    let remainder = expiration % USEC_PER_SEC;
    let mut aligned = expiration - remainder;
    if remainder >= USEC_PER_SEC / 4 {
        aligned += USEC_PER_SEC;
    }
    aligned
}

/// A timer source.
///
/// Created detached; attach it to a [`Context`](crate::Context) to arm
/// it. The callback decides between [`Continuation::Continue`] (keep
/// firing, repeating timers only) and [`Continuation::Remove`].
pub struct TimeoutSource {
    source: Source,
    callback: Callback,
}

impl TimeoutSource {
    /// Creates a timer that first fires `delay` from now and then, if
    /// `interval` is set, repeats every `interval`.
    pub fn new(delay: Duration, interval: Option<Duration>) -> TimeoutSource {
        TimeoutSource::build(delay, interval, false)
    }

    /// Creates a repeating seconds-granularity timer. The first
    /// expiration is `interval` from now, aligned to a second boundary.
    pub fn seconds(interval: Duration) -> TimeoutSource {
        TimeoutSource::build(interval, Some(interval), true)
    }

    fn build(delay: Duration, interval: Option<Duration>, seconds: bool) -> TimeoutSource {
        let callback: Callback = Arc::new(Mutex::new(None));

        let source = Source::new(Box::new(TimeoutFuncs {
            interval,
            seconds,
            callback: callback.clone(),
        }));

        let mut expiration = monotonic_time() + delay.as_micros() as i64;
        if seconds {
            expiration = align_to_second(expiration);
        }
        source.set_ready_time(Some(expiration));

        TimeoutSource { source, callback }
    }

    /// Sets the callback invoked at every expiration.
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

impl std::ops::Deref for TimeoutSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}
