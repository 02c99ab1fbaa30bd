//! Sources and the source protocol.
//!
//! A [`Source`] is a participant in a context's dispatch protocol. Each
//! iteration the context asks every attached source whether it is ready
//! (`prepare`), multiplexes unresolved waits through the poll backend,
//! asks again after the poll (`check`), and finally invokes the ready
//! sources' callbacks (`dispatch`) in priority order.
//!
//! Built-in source types live in the submodules:
//!
//! - [`timeout`] — one-shot and repeating timers
//! - [`idle`] — always-ready sources running when nothing else does
//! - [`invoke`] — cross-thread closure queues
//! - [`unix_fd`] — file-descriptor readiness (Unix)
//! - [`signal`] — Unix signal watches
//! - [`child`] — child-process exit watches (Unix)
//!
//! Custom sources implement [`SourceFuncs`] and wrap it with
//! [`Source::new`].

pub mod idle;
pub mod invoke;
pub mod timeout;

#[cfg(unix)]
pub mod child;
#[cfg(unix)]
pub mod signal;
#[cfg(unix)]
pub mod unix_fd;

use crate::context::{Context, ContextInner};
use crate::error::AttachError;
use crate::poll::common::{PollCell, PollRecord};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Locks a callback cell even if a previous holder panicked.
///
/// A panic in user code poisons the cell it was called under; the source
/// is destroyed right after, so all that is left to do with the cell is
/// drop or replace its contents — both fine under poison.
pub(crate) fn lock_callback<T: ?Sized>(cell: &Mutex<T>) -> MutexGuard<'_, T> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifier of an attached source, unique within its context for the
/// lifetime of the process. Ids are never reused; 0 is reserved as
/// "invalid" and names a source that was never attached.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SourceId(pub(crate) u64);

impl SourceId {
    /// The reserved "no source" id.
    pub const INVALID: SourceId = SourceId(0);

    /// The raw numeric value.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Tells the context whether a dispatched source stays attached.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Continuation {
    /// Keep the source; it will be considered again next iteration.
    Continue,
    /// Destroy the source immediately after this dispatch.
    Remove,
}

/// The polymorphic capability set every source implements.
///
/// The context calls these in a fixed order each iteration:
/// `prepare` before polling, `check` after, `dispatch` for sources that
/// reported ready, and `finalize` exactly once at destruction.
///
/// `now` is the monotonic time in microseconds sampled at the start of
/// the respective phase. Implementations must not block.
pub trait SourceFuncs: Send + 'static {
    /// Called at the start of an iteration.
    ///
    /// Returns whether the source is ready to be dispatched without
    /// polling, and an optional upper bound for the poll timeout.
    /// Independently of the result, a source whose ready-time has passed
    /// is treated as ready by the engine.
    fn prepare(&mut self, source: &Source, now: i64) -> (bool, Option<Duration>) {
        let _ = (source, now);
        (false, None)
    }

    /// Called after the poll completed. Inspects the source's poll
    /// records and internal state; returns whether to dispatch.
    fn check(&mut self, source: &Source, now: i64) -> bool {
        let _ = (source, now);
        false
    }

    /// Invokes the user callback. The returned [`Continuation`] decides
    /// whether the source survives this dispatch.
    fn dispatch(&mut self, source: &Source) -> Continuation;

    /// Releases resources held by the source. Called once, at
    /// destruction; the user callback must be dropped here so that
    /// reference cycles through it are broken at `destroy` time.
    fn finalize(&mut self, source: &Source) {
        let _ = source;
    }
}

/// Mutable registry-facing state of a source.
pub(crate) struct SourceState {
    pub(crate) priority: i32,
    pub(crate) ready_time: Option<i64>,
    pub(crate) enabled: bool,
    pub(crate) can_recurse: bool,
    pub(crate) destroyed: bool,
    /// Set while this source's `dispatch` is running on the owner thread.
    pub(crate) in_dispatch: bool,
    pub(crate) poll_cells: Vec<PollCell>,
    /// Sources destroyed together with this one.
    pub(crate) children: Vec<Source>,
}

pub(crate) struct SourceInner {
    /// Assigned on attach; 0 while detached.
    pub(crate) id: AtomicU64,
    /// Back-reference to the owning context; empty when detached.
    pub(crate) attached: Mutex<Weak<ContextInner>>,
    pub(crate) state: Mutex<SourceState>,
    /// The protocol implementation. Taken out of the cell for the
    /// duration of every `prepare`/`check`/`dispatch` call so no lock is
    /// held across user code; `None` therefore also means "in a call".
    pub(crate) funcs: Mutex<Option<Box<dyn SourceFuncs>>>,
}

/// Shared handle to a source.
///
/// Sources are created detached, attached to exactly one [`Context`]
/// (acquiring a [`SourceId`]), and destroyed explicitly. Clones share
/// the same underlying source; the memory is freed when the last clone
/// drops, but callbacks and poll records are released at
/// [`destroy`](Source::destroy) time.
#[derive(Clone)]
pub struct Source {
    pub(crate) inner: Arc<SourceInner>,
}

impl Source {
    /// Creates a detached source around a custom [`SourceFuncs`]
    /// implementation, with default priority and no ready-time.
    pub fn new(funcs: Box<dyn SourceFuncs>) -> Source {
        Source::with_priority(funcs, crate::priority::DEFAULT)
    }

    pub(crate) fn with_priority(funcs: Box<dyn SourceFuncs>, priority: i32) -> Source {
        Source {
            inner: Arc::new(SourceInner {
                id: AtomicU64::new(0),
                attached: Mutex::new(Weak::new()),
                state: Mutex::new(SourceState {
                    priority,
                    ready_time: None,
                    enabled: true,
                    can_recurse: false,
                    destroyed: false,
                    in_dispatch: false,
                    poll_cells: Vec::new(),
                    children: Vec::new(),
                }),
                funcs: Mutex::new(Some(funcs)),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SourceInner>) -> Source {
        Source { inner }
    }

    /// The id assigned at attach time, or [`SourceId::INVALID`] if the
    /// source was never attached.
    pub fn id(&self) -> SourceId {
        SourceId(self.inner.id.load(Ordering::Acquire))
    }

    /// The context this source is attached to, if any.
    pub fn context(&self) -> Option<Context> {
        self.inner
            .attached
            .lock()
            .unwrap()
            .upgrade()
            .map(Context::from_inner)
    }

    /// Attaches the source (and its child sources) to `context`.
    ///
    /// A source belongs to at most one context for its whole lifetime;
    /// attaching twice — even after a `destroy` — is an error.
    pub fn attach(&self, context: &Context) -> Result<SourceId, AttachError> {
        let children = {
            let mut slot = self.inner.attached.lock().unwrap();
            if slot.upgrade().is_some() {
                return Err(AttachError::AlreadyAttached);
            }

            let state = self.inner.state.lock().unwrap();
            if state.destroyed {
                return Err(AttachError::Destroyed);
            }
            let children = state.children.clone();
            drop(state);

            let id = context.inner().register(self.inner.clone());
            *slot = Arc::downgrade(context.inner());
            self.inner.id.store(id.0, Ordering::Release);
            children
        };

        for child in &children {
            // Already-attached children keep their context.
            let _ = child.attach(context);
        }

        log::trace!("source {:?} attached", self.id());
        Ok(self.id())
    }

    /// Destroys the source: detaches it from its context, removes its
    /// poll records, releases its callback, and cascades to child
    /// sources. Idempotent; after this call the source is never
    /// prepared, checked, or dispatched again.
    pub fn destroy(&self) {
        let context = {
            let mut slot = self.inner.attached.lock().unwrap();
            std::mem::take(&mut *slot).upgrade()
        };

        let (was_destroyed, children) = {
            let mut state = self.inner.state.lock().unwrap();
            let was = state.destroyed;
            state.destroyed = true;
            state.enabled = false;
            (was, std::mem::take(&mut state.children))
        };

        if let Some(context) = context {
            context.unregister(&self.inner);
        }

        if !was_destroyed {
            // If a dispatch is in flight the funcs box is out of the
            // cell; the context finalizes it when the call returns.
            let taken = self.inner.funcs.try_lock().ok().and_then(|mut f| f.take());
            if let Some(mut funcs) = taken {
                funcs.finalize(self);
            }

            log::trace!("source {:?} destroyed", self.id());
        }

        for child in children {
            child.destroy();
        }
    }

    /// Whether [`destroy`](Source::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().unwrap().destroyed
    }

    /// The source's priority. Lower numeric values run first.
    pub fn priority(&self) -> i32 {
        self.inner.state.lock().unwrap().priority
    }

    /// Changes the priority. Takes effect at the next iteration.
    pub fn set_priority(&self, priority: i32) {
        self.inner.state.lock().unwrap().priority = priority;
        self.wake_context();
    }

    /// The monotonic time (µs) at which this source becomes ready, or
    /// `None` if readiness is decided by `prepare`/`check` alone.
    pub fn ready_time(&self) -> Option<i64> {
        self.inner.state.lock().unwrap().ready_time
    }

    /// Sets the ready-time. A value in the past (or `Some(0)`) makes the
    /// source immediately ready. Wakes the owning context so a blocked
    /// poll re-evaluates its deadline.
    pub fn set_ready_time(&self, ready_time: Option<i64>) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.ready_time == ready_time {
                return;
            }
            state.ready_time = ready_time;
        }

        if let Some(time) = ready_time {
            if let Some(context) = self.context() {
                context.inner().ready_time_changed(time);
            }
        }
    }

    /// Whether the source may be dispatched while one of its dispatches
    /// is still in progress on the same thread.
    pub fn can_recurse(&self) -> bool {
        self.inner.state.lock().unwrap().can_recurse
    }

    /// Sets the recursion flag; see [`can_recurse`](Source::can_recurse).
    pub fn set_can_recurse(&self, can_recurse: bool) {
        self.inner.state.lock().unwrap().can_recurse = can_recurse;
    }

    /// Whether the source participates in iterations.
    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().unwrap().enabled
    }

    /// Enables or disables the source. Disabled sources keep their id
    /// and registration but are skipped by every phase.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.state.lock().unwrap().enabled = enabled;
        if enabled {
            self.wake_context();
        }
    }

    /// Adds a poll record to this source's contribution to the context's
    /// aggregate poll set, and returns the shared cell through which the
    /// post-poll results are delivered.
    pub fn add_poll(&self, record: PollRecord) -> PollCell {
        let cell: PollCell = Arc::new(Mutex::new(record));
        self.inner
            .state
            .lock()
            .unwrap()
            .poll_cells
            .push(cell.clone());
        self.poll_set_changed();
        cell
    }

    /// Removes a poll record previously added with
    /// [`add_poll`](Source::add_poll).
    pub fn remove_poll(&self, cell: &PollCell) {
        self.inner
            .state
            .lock()
            .unwrap()
            .poll_cells
            .retain(|c| !Arc::ptr_eq(c, cell));
        self.poll_set_changed();
    }

    /// Ties `child`'s lifetime to this source: destroying this source
    /// destroys `child` as well. If this source is already attached the
    /// child is attached to the same context.
    pub fn add_child_source(&self, child: &Source) {
        self.inner
            .state
            .lock()
            .unwrap()
            .children
            .push(child.clone());

        if let Some(context) = self.context() {
            let _ = child.attach(&context);
        }
    }

    fn wake_context(&self) {
        if let Some(context) = self.context() {
            context.inner().wakeup_if_foreign_owner();
        }
    }

    fn poll_set_changed(&self) {
        if let Some(context) = self.context() {
            context.inner().poll_set_changed();
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
