use super::owner::Owner;
use super::registry::{Registry, SnapshotEntry};
use crate::clock::monotonic_time;
use crate::error::{AcquireError, PollError};
use crate::poll::Poller;
use crate::poll::common::{IoCondition, PollEvent, PollHandle, QueryRecord};
use crate::source::{Continuation, Source, SourceFuncs, SourceId, SourceInner};
use crate::wakeup::WakeupChannel;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// Result of one call to [`Context::iterate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This iteration dispatched the given number of sources.
    Dispatched(usize),
    /// The iteration completed without dispatching anything.
    IdledOut,
    /// Another thread owns the context and `may_block` was `false`.
    NotOwner,
}

/// Observer invoked when a source's callback panics. Receives the id of
/// the (already destroyed) source and the panic payload.
pub type PanicObserver = Box<dyn Fn(SourceId, Box<dyn Any + Send>) + Send + Sync>;

struct ContextState {
    registry: Registry,
    /// Incremented whenever the aggregate poll record set may have
    /// changed; the backend rebuilds its registrations on a mismatch.
    poll_generation: u64,
    /// Incremented at the start of every iteration.
    iteration_epoch: u64,
    /// Whether the previous query excluded any record-bearing source
    /// (priority cut or in-flight dispatch); the next query must then
    /// re-sync the backend even if the registry itself did not change.
    last_query_filtered: bool,
    /// Cached minimum ready-time across enabled sources.
    next_ready_time: Option<i64>,
    /// OS error code of a fatal poll failure, if one occurred.
    poisoned: Option<i32>,
}

pub(crate) struct ContextInner {
    state: Mutex<ContextState>,
    owner: Owner,
    wakeup: WakeupChannel,
    poller: Mutex<Poller>,
    next_id: AtomicU64,
    panic_observer: OnceLock<PanicObserver>,
}

/// The owning aggregate of one cooperative event loop.
///
/// A context holds attached [`Source`]s and drives them through the
/// six-phase iteration protocol: acquire, prepare, query, poll, check,
/// dispatch. Exactly one thread (the owner) runs the phases at a time;
/// any thread may attach sources or call [`wakeup`](Context::wakeup).
///
/// Clones share the same underlying context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Creates a fresh context with an empty registry and an armed
    /// wake-up channel.
    pub fn new() -> Context {
        Context {
            inner: Arc::new(ContextInner {
                state: Mutex::new(ContextState {
                    registry: Registry::new(),
                    poll_generation: 0,
                    iteration_epoch: 0,
                    last_query_filtered: false,
                    next_ready_time: None,
                    poisoned: None,
                }),
                owner: Owner::new(),
                wakeup: WakeupChannel::new(),
                poller: Mutex::new(Poller::new()),
                // Id 0 is reserved as "invalid".
                next_id: AtomicU64::new(1),
                panic_observer: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Context {
        Context { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    /// Forces the next (or in-progress) poll to return promptly.
    /// Callable from any thread; always succeeds. Redundant wake-ups
    /// coalesce into a single spurious poll return.
    pub fn wakeup(&self) {
        self.inner.wakeup.signal();
    }

    /// Acquires ownership for the current thread without blocking.
    /// Ownership is recursive; every successful `acquire` must be paired
    /// with a [`release`](Context::release).
    pub fn acquire(&self) -> Result<(), AcquireError> {
        if self.inner.owner.try_acquire() {
            Ok(())
        } else {
            Err(AcquireError::Contended)
        }
    }

    /// Releases one level of ownership acquired with
    /// [`acquire`](Context::acquire).
    pub fn release(&self) {
        if !self.inner.owner.release() {
            log::warn!("release() called by a thread that does not own the context");
        }
    }

    /// Whether the current thread owns the context.
    pub fn is_owner(&self) -> bool {
        self.inner.owner.is_owner()
    }

    /// Installs the panic observer. Set-once: returns `false` (leaving
    /// the existing observer in place) if one was already installed.
    pub fn set_panic_observer<F>(&self, observer: F) -> bool
    where
        F: Fn(SourceId, Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.inner.panic_observer.set(Box::new(observer)).is_ok()
    }

    /// Looks up an attached source by id.
    pub fn find_source(&self, id: SourceId) -> Option<Source> {
        let state = self.inner.state.lock().unwrap();
        state.registry.get(id.0).cloned().map(Source::from_inner)
    }

    /// The number of sources currently attached.
    pub fn source_count(&self) -> usize {
        self.inner.state.lock().unwrap().registry.len()
    }

    /// Runs one iteration of the dispatch protocol.
    ///
    /// With `may_block == false` the call never blocks: contention for
    /// ownership yields [`DispatchOutcome::NotOwner`] and the poll runs
    /// with a zero timeout. With `may_block == true` the call waits for
    /// ownership if necessary and the poll may sleep until a source
    /// becomes ready or the wake-up channel is signaled.
    ///
    /// Errors in individual sources (panics in their callbacks) never
    /// escape this call; a fatal poll backend error poisons the context
    /// and is returned from this and every subsequent call.
    pub fn iterate(&self, may_block: bool) -> Result<DispatchOutcome, PollError> {
        // Phase 1: acquire.
        if !self.inner.owner.try_acquire() {
            if !may_block {
                return Ok(DispatchOutcome::NotOwner);
            }
            self.inner.owner.acquire_wait();
        }
        let _guard = ReleaseOnDrop(&self.inner.owner);

        if let Some(code) = self.inner.state.lock().unwrap().poisoned {
            return Err(PollError::Fatal(code));
        }

        // Phase 2: prepare.
        let now = monotonic_time();
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            state.iteration_epoch += 1;
            log::trace!("iteration {} begins", state.iteration_epoch);
            state.registry.snapshot_sorted()
        };

        let mut prepared: Vec<SnapshotEntry> = Vec::with_capacity(snapshot.len());
        let mut any_ready = false;
        let mut max_priority = i32::MAX;
        let mut min_timeout: Option<Duration> = None;
        let mut next_ready: Option<i64> = None;
        // Whether this iteration's query set excludes any record-bearing
        // source; stateful backends must then re-sync their registrations.
        let mut filtered = false;

        for entry in snapshot {
            let source = &entry.source;

            let (eligible, ready_time, has_records) = {
                let state = source.state.lock().unwrap();
                (
                    !state.destroyed && state.enabled && (!state.in_dispatch || state.can_recurse),
                    state.ready_time,
                    !state.poll_cells.is_empty(),
                )
            };
            if !eligible {
                filtered |= has_records;
                continue;
            }

            if let Some(time) = ready_time {
                next_ready = Some(next_ready.map_or(time, |min| min.min(time)));
            }

            let handle = Source::from_inner(source.clone());
            let mut ready = ready_time.is_some_and(|time| time <= now);

            let taken = source.funcs.lock().unwrap().take();
            if let Some(mut funcs) = taken {
                let result = catch_unwind(AssertUnwindSafe(|| funcs.prepare(&handle, now)));
                match result {
                    Ok((prepared_ready, hint)) => {
                        if self.return_funcs(source, funcs, &handle) {
                            // Destroyed itself during prepare.
                            continue;
                        }
                        ready |= prepared_ready;
                        if let Some(hint) = hint {
                            if hint.is_zero() {
                                ready = true;
                            } else {
                                min_timeout = Some(min_timeout.map_or(hint, |t| t.min(hint)));
                            }
                        }
                    }
                    Err(payload) => {
                        self.misbehaving(&handle, funcs, payload, "prepare");
                        continue;
                    }
                }
            }
            // A missing funcs box means the source is mid-dispatch in an
            // outer iteration (can_recurse); its poll records stay in the
            // set but it cannot report ready through prepare.

            if ready && !any_ready {
                any_ready = true;
                max_priority = entry.priority;
            }

            prepared.push(entry);
        }

        // Phase 3: query.
        let mut records: Vec<QueryRecord> = Vec::with_capacity(prepared.len() + 1);
        records.push(QueryRecord {
            handle: self.inner.wakeup.handle(),
            events: IoCondition::IN,
            cell: None,
        });

        for entry in &prepared {
            let state = entry.source.state.lock().unwrap();
            if state.poll_cells.is_empty() {
                continue;
            }
            if state.destroyed || !state.enabled || entry.priority > max_priority {
                filtered = true;
                continue;
            }
            for cell in &state.poll_cells {
                let record = cell.lock().unwrap();
                records.push(QueryRecord {
                    handle: record.handle,
                    events: record.events,
                    cell: Some(cell.clone()),
                });
            }
        }

        let generation = {
            let mut state = self.inner.state.lock().unwrap();
            state.next_ready_time = next_ready;
            if filtered || state.last_query_filtered {
                state.poll_generation += 1;
            }
            state.last_query_filtered = filtered;
            state.poll_generation
        };

        let timeout = if any_ready || !may_block {
            Some(Duration::ZERO)
        } else {
            let mut timeout = min_timeout;
            if let Some(time) = next_ready {
                let until = Duration::from_micros((time - now).max(0) as u64);
                timeout = Some(timeout.map_or(until, |t| t.min(until)));
            }
            timeout
        };

        // Phase 4: poll. No context lock is held here; other threads may
        // attach sources or signal the wake-up channel meanwhile.
        let mut events: Vec<PollEvent> = Vec::new();
        {
            let mut poller = self.inner.poller.lock().unwrap();
            loop {
                events.clear();
                match poller.poll(&records, generation, timeout, &mut events) {
                    Ok(_) => break,
                    Err(PollError::Interrupted) => continue,
                    Err(PollError::Fatal(code)) => {
                        log::warn!("poll failed with os error {code}; poisoning context");
                        self.inner.state.lock().unwrap().poisoned = Some(code);
                        return Err(PollError::Fatal(code));
                    }
                }
            }
        }

        let mut by_handle: HashMap<PollHandle, IoCondition> = HashMap::with_capacity(events.len());
        for event in &events {
            *by_handle
                .entry(event.handle)
                .or_insert(IoCondition::empty()) |= event.revents;
        }

        if by_handle.contains_key(&self.inner.wakeup.handle()) {
            self.inner.wakeup.drain();
        }

        let error_mask = IoCondition::ERR | IoCondition::HUP | IoCondition::NVAL;
        for record in &records {
            if let Some(cell) = &record.cell {
                let observed = by_handle
                    .get(&record.handle)
                    .copied()
                    .unwrap_or(IoCondition::empty());
                cell.lock().unwrap().revents = observed & (record.events | error_mask);
            }
        }

        // Phase 5: check.
        let now = monotonic_time();
        let mut pending: Vec<Arc<SourceInner>> = Vec::new();

        for entry in &prepared {
            if any_ready && entry.priority > max_priority {
                continue;
            }
            let source = &entry.source;

            let (eligible, ready_time) = {
                let state = source.state.lock().unwrap();
                (
                    !state.destroyed && state.enabled && (!state.in_dispatch || state.can_recurse),
                    state.ready_time,
                )
            };
            if !eligible {
                continue;
            }

            let handle = Source::from_inner(source.clone());
            let mut ready = ready_time.is_some_and(|time| time <= now);

            let taken = source.funcs.lock().unwrap().take();
            if let Some(mut funcs) = taken {
                let result = catch_unwind(AssertUnwindSafe(|| funcs.check(&handle, now)));
                match result {
                    Ok(check_ready) => {
                        if self.return_funcs(source, funcs, &handle) {
                            continue;
                        }
                        ready |= check_ready;
                    }
                    Err(payload) => {
                        self.misbehaving(&handle, funcs, payload, "check");
                        continue;
                    }
                }
            }

            if ready {
                if !any_ready {
                    // A source becoming ready only in check also caps the
                    // priorities dispatched this iteration.
                    any_ready = true;
                    max_priority = entry.priority;
                }
                // The snapshot holds each source once, so a source enters
                // the pending list at most once per iteration.
                pending.push(source.clone());
            }
        }

        // Phase 6: dispatch.
        let mut dispatched = 0usize;

        for source in pending {
            let handle = Source::from_inner(source.clone());

            {
                let state = source.state.lock().unwrap();
                if state.destroyed || !state.enabled {
                    // Destroyed by an earlier callback this iteration.
                    continue;
                }
                if state.in_dispatch && !state.can_recurse {
                    continue;
                }
            }

            let Some(mut funcs) = source.funcs.lock().unwrap().take() else {
                // The running closure cannot be re-entered.
                continue;
            };

            let prev_in_dispatch = {
                let mut state = source.state.lock().unwrap();
                std::mem::replace(&mut state.in_dispatch, true)
            };

            let result = catch_unwind(AssertUnwindSafe(|| funcs.dispatch(&handle)));

            source.state.lock().unwrap().in_dispatch = prev_in_dispatch;
            dispatched += 1;

            match result {
                Ok(continuation) => {
                    let finalized = self.return_funcs(&source, funcs, &handle);
                    if continuation == Continuation::Remove && !finalized {
                        handle.destroy();
                    }
                }
                Err(payload) => {
                    self.misbehaving(&handle, funcs, payload, "dispatch");
                }
            }
        }

        if dispatched > 0 {
            Ok(DispatchOutcome::Dispatched(dispatched))
        } else {
            Ok(DispatchOutcome::IdledOut)
        }
    }

    /// Puts a funcs box back into its source, unless the source was
    /// destroyed while the box was out — then finalizes it instead.
    /// Returns whether finalization happened.
    fn return_funcs(
        &self,
        source: &Arc<SourceInner>,
        mut funcs: Box<dyn SourceFuncs>,
        handle: &Source,
    ) -> bool {
        if source.state.lock().unwrap().destroyed {
            funcs.finalize(handle);
            return true;
        }

        *source.funcs.lock().unwrap() = Some(funcs);

        // A destroy may have raced between the check above and the
        // put-back; it found the cell empty, so finish the job here.
        if source.state.lock().unwrap().destroyed {
            if let Some(mut funcs) = source.funcs.lock().unwrap().take() {
                funcs.finalize(handle);
            }
            return true;
        }

        false
    }

    /// Destroys a source whose callback panicked and reports the panic
    /// through the context's observer.
    fn misbehaving(
        &self,
        handle: &Source,
        mut funcs: Box<dyn SourceFuncs>,
        payload: Box<dyn Any + Send>,
        phase: &str,
    ) {
        let id = handle.id();
        log::warn!("source {id:?} panicked during {phase}; destroying it");

        handle.destroy();
        funcs.finalize(handle);

        if let Some(observer) = self.inner.panic_observer.get() {
            observer(id, payload);
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("Context")
            .field("sources", &state.registry.len())
            .field("iteration_epoch", &state.iteration_epoch)
            .field("poisoned", &state.poisoned)
            .finish()
    }
}

struct ReleaseOnDrop<'a>(&'a Owner);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl ContextInner {
    /// Registers a source, assigning its id. Wakes the owner if it is a
    /// different thread so an in-progress poll re-evaluates its set.
    pub(crate) fn register(&self, source: Arc<SourceInner>) -> SourceId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.lock().unwrap();
            state.registry.insert(id, source);
            state.poll_generation += 1;
        }

        self.wakeup_if_foreign_owner();
        SourceId(id)
    }

    /// Removes a source from the registry and drops the context's
    /// reference to it.
    pub(crate) fn unregister(&self, source: &Arc<SourceInner>) {
        let id = source.id.load(Ordering::Acquire);
        let mut state = self.state.lock().unwrap();
        state.registry.remove(id);
        state.poll_generation += 1;
    }

    /// Called when a source's poll record set changed.
    pub(crate) fn poll_set_changed(&self) {
        self.state.lock().unwrap().poll_generation += 1;
        self.wakeup_if_foreign_owner();
    }

    /// Called when a source's ready-time moved. Keeps the cached minimum
    /// monotonic within the iteration and wakes a foreign owner whose
    /// poll deadline may now be too late.
    pub(crate) fn ready_time_changed(&self, time: i64) {
        let earlier = {
            let mut state = self.state.lock().unwrap();
            match state.next_ready_time {
                Some(cached) if cached <= time => false,
                _ => {
                    state.next_ready_time = Some(time);
                    true
                }
            }
        };

        if earlier {
            self.wakeup_if_foreign_owner();
        }
    }

    pub(crate) fn wakeup_if_foreign_owner(&self) {
        if self.owner.is_foreign_owner() {
            self.wakeup.signal();
        }
    }

    pub(crate) fn signal_wakeup(&self) {
        self.wakeup.signal();
    }

    pub(crate) fn notify_owner_waiters(&self) {
        self.owner.notify();
    }

    /// Write-side descriptor of the wake-up channel, for the Unix signal
    /// hub. Only `write(2)` may be performed on it.
    #[cfg(unix)]
    pub(crate) fn raw_wakeup_fd(&self) -> std::os::fd::RawFd {
        crate::wakeup::raw_signal_handle(&self.wakeup)
    }
}
