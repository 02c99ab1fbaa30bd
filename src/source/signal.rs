//! Unix signal sources.
//!
//! Signals are received once by a process-global handler that only
//! touches atomics and writes to registered wake-up descriptors — the
//! async-signal-safe minimum. Distribution to the individual watches
//! happens later, on a normal thread, under the hub lock: any context
//! iterating a signal-derived source calls [`dispatch_pending`] during
//! its prepare phase.
//!
//! Delivery is coalesced: a signal firing N times between dispatches
//! invokes the watch callback once.

use super::{Continuation, Source, SourceFuncs, lock_callback};
use crate::wakeup::signal_raw;

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Highest signal number the hub tracks (covers every portable signal).
const MAX_SIGNAL: usize = 64;

/// Capacity of the lock-free wake-descriptor table read by the handler.
/// Contexts beyond it still get every delivery through the distribution
/// in [`dispatch_pending`]; they are just not woken out of a blocked poll
/// by the handler itself.
const WAKE_SLOTS: usize = 32;

/// Set by the handler; swapped off by [`dispatch_pending`].
static ANY_PENDING: AtomicBool = AtomicBool::new(false);
static PENDING: [AtomicBool; MAX_SIGNAL] = [const { AtomicBool::new(false) }; MAX_SIGNAL];

/// Wake-up descriptors of contexts with signal-derived sources.
/// `-1` marks a free slot. Written under the hub lock, read by the
/// handler without one.
static WAKE_FDS: [AtomicI64; WAKE_SLOTS] = [const { AtomicI64::new(-1) }; WAKE_SLOTS];

static HUB: Mutex<Hub> = Mutex::new(Hub {
    handler_refs: [0; MAX_SIGNAL],
    watches: Vec::new(),
    child_watches: Vec::new(),
    wake_fds: Vec::new(),
    next_token: 1,
});

struct SignalReg {
    token: u64,
    signum: i32,
    pending: Arc<AtomicBool>,
    wake_fd: Option<RawFd>,
}

pub(crate) struct ChildReg {
    token: u64,
    pid: i32,
    exited: Arc<AtomicBool>,
    status: Arc<AtomicI32>,
    wake_fd: Option<RawFd>,
}

struct Hub {
    /// Number of live watches per signal; the OS handler is installed at
    /// the first and restored to the default at the last.
    handler_refs: [u32; MAX_SIGNAL],
    watches: Vec<SignalReg>,
    child_watches: Vec<ChildReg>,
    /// Refcounted wake-up descriptors mirrored into [`WAKE_FDS`].
    wake_fds: Vec<(RawFd, usize)>,
    next_token: u64,
}

impl Hub {
    fn install_handler(&mut self, signum: i32) {
        let slot = signum as usize;
        self.handler_refs[slot] += 1;
        if self.handler_refs[slot] > 1 {
            return;
        }

        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            let handler: extern "C" fn(libc::c_int) = unix_signal_handler;
            action.sa_sigaction = handler as usize;
            action.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signum, &action, std::ptr::null_mut());
        }
    }

    fn uninstall_handler(&mut self, signum: i32) {
        let slot = signum as usize;
        self.handler_refs[slot] -= 1;
        if self.handler_refs[slot] > 0 {
            return;
        }

        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signum, &action, std::ptr::null_mut());
        }
    }

    fn add_wake_fd(&mut self, fd: RawFd) {
        if let Some(entry) = self.wake_fds.iter_mut().find(|(f, _)| *f == fd) {
            entry.1 += 1;
            return;
        }
        self.wake_fds.push((fd, 1));
        self.sync_wake_slots();
    }

    fn remove_wake_fd(&mut self, fd: RawFd) {
        if let Some(pos) = self.wake_fds.iter().position(|(f, _)| *f == fd) {
            self.wake_fds[pos].1 -= 1;
            if self.wake_fds[pos].1 == 0 {
                self.wake_fds.remove(pos);
                self.sync_wake_slots();
            }
        }
    }

    fn sync_wake_slots(&self) {
        if self.wake_fds.len() > WAKE_SLOTS {
            log::warn!(
                "signal wake-up table is full ({} descriptors, {} slots); \
                 contexts beyond the limit are not woken by the handler",
                self.wake_fds.len(),
                WAKE_SLOTS
            );
        }

        for (index, slot) in WAKE_FDS.iter().enumerate() {
            let fd = self.wake_fds.get(index).map_or(-1, |&(fd, _)| fd as i64);
            slot.store(fd, Ordering::Release);
        }
    }
}

/// The process-global handler. Async-signal-safe: atomics and `write(2)`
/// only.
extern "C" fn unix_signal_handler(signum: libc::c_int) {
    let slot = signum as usize;
    if slot >= MAX_SIGNAL {
        return;
    }

    PENDING[slot].store(true, Ordering::Relaxed);
    ANY_PENDING.store(true, Ordering::Release);

    for slot in &WAKE_FDS {
        let fd = slot.load(Ordering::Acquire);
        if fd >= 0 {
            signal_raw(fd as RawFd);
        }
    }
}

/// Distributes globally-pending signals to the individual watches.
///
/// Called from the prepare phase of every signal-derived source; cheap
/// when nothing is pending.
pub(crate) fn dispatch_pending() {
    if !ANY_PENDING.swap(false, Ordering::Acquire) {
        return;
    }

    let mut fired = [false; MAX_SIGNAL];
    for (signum, flag) in PENDING.iter().enumerate() {
        fired[signum] = flag.swap(false, Ordering::Acquire);
    }

    let hub = HUB.lock().unwrap();

    if fired[libc::SIGCHLD as usize] {
        // A pending SIGCHLD can stand for several exits; scan every
        // watched pid. waitpid(-1) would reap children we do not watch.
        for child in &hub.child_watches {
            reap_child(child);
        }
    }

    for watch in &hub.watches {
        if fired[watch.signum as usize] && !watch.pending.swap(true, Ordering::AcqRel) {
            if let Some(fd) = watch.wake_fd {
                signal_raw(fd);
            }
        }
    }
}

pub(crate) fn reap_child(child: &ChildReg) {
    if child.exited.load(Ordering::Acquire) {
        return;
    }

    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(child.pid, &mut status, libc::WNOHANG) };

        if pid > 0 {
            child.status.store(status, Ordering::Release);
            child.exited.store(true, Ordering::Release);
            if let Some(fd) = child.wake_fd {
                signal_raw(fd);
            }
            return;
        }

        let err = std::io::Error::last_os_error();
        if pid == -1 && err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        if pid == -1 && err.raw_os_error() == Some(libc::ECHILD) {
            log::warn!(
                "child watch: waitpid({}) returned ECHILD; was the child reaped elsewhere?",
                child.pid
            );
            child.status.store(0, Ordering::Release);
            child.exited.store(true, Ordering::Release);
            if let Some(fd) = child.wake_fd {
                signal_raw(fd);
            }
        }
        return;
    }
}

pub(crate) fn register_signal_watch(signum: i32, pending: Arc<AtomicBool>) -> u64 {
    let mut hub = HUB.lock().unwrap();
    let token = hub.next_token;
    hub.next_token += 1;

    hub.install_handler(signum);
    hub.watches.push(SignalReg {
        token,
        signum,
        pending,
        wake_fd: None,
    });

    token
}

pub(crate) fn set_signal_wake_fd(token: u64, fd: RawFd) {
    let mut hub = HUB.lock().unwrap();
    let bound = match hub.watches.iter_mut().find(|w| w.token == token) {
        Some(watch) if watch.wake_fd != Some(fd) => {
            debug_assert!(watch.wake_fd.is_none(), "watch rebound to another context");
            watch.wake_fd = Some(fd);
            true
        }
        _ => false,
    };
    if bound {
        hub.add_wake_fd(fd);
    }
}

pub(crate) fn unregister_signal_watch(token: u64) {
    let mut hub = HUB.lock().unwrap();
    if let Some(pos) = hub.watches.iter().position(|w| w.token == token) {
        let watch = hub.watches.remove(pos);
        hub.uninstall_handler(watch.signum);
        if let Some(fd) = watch.wake_fd {
            hub.remove_wake_fd(fd);
        }
    }
}

pub(crate) fn register_child_watch(
    pid: i32,
    exited: Arc<AtomicBool>,
    status: Arc<AtomicI32>,
) -> u64 {
    let mut hub = HUB.lock().unwrap();
    let token = hub.next_token;
    hub.next_token += 1;

    hub.install_handler(libc::SIGCHLD);
    hub.child_watches.push(ChildReg {
        token,
        pid,
        exited,
        status,
        wake_fd: None,
    });

    // The child may have exited before the handler was installed; probe
    // once so that exit is not lost.
    if let Some(child) = hub.child_watches.last() {
        reap_child(child);
    }

    token
}

pub(crate) fn set_child_wake_fd(token: u64, fd: RawFd) {
    let mut hub = HUB.lock().unwrap();
    let bound = match hub.child_watches.iter_mut().find(|c| c.token == token) {
        Some(child) if child.wake_fd != Some(fd) => {
            child.wake_fd = Some(fd);
            true
        }
        _ => false,
    };
    if bound {
        hub.add_wake_fd(fd);
    }
}

pub(crate) fn unregister_child_watch(token: u64) {
    let mut hub = HUB.lock().unwrap();
    if let Some(pos) = hub.child_watches.iter().position(|c| c.token == token) {
        let child = hub.child_watches.remove(pos);
        hub.uninstall_handler(libc::SIGCHLD);
        if let Some(fd) = child.wake_fd {
            hub.remove_wake_fd(fd);
        }
    }
}

type Callback = Arc<Mutex<Option<Box<dyn FnMut() -> Continuation + Send>>>>;

struct SignalFuncs {
    token: u64,
    pending: Arc<AtomicBool>,
    callback: Callback,
    wake_registered: bool,
}

impl SourceFuncs for SignalFuncs {
    fn prepare(&mut self, source: &Source, _now: i64) -> (bool, Option<Duration>) {
        dispatch_pending();

        if !self.wake_registered {
            if let Some(context) = source.context() {
                set_signal_wake_fd(self.token, context.inner().raw_wakeup_fd());
                self.wake_registered = true;
            }
        }

        (self.pending.load(Ordering::Acquire), None)
    }

    fn check(&mut self, _source: &Source, _now: i64) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn dispatch(&mut self, _source: &Source) -> Continuation {
        self.pending.store(false, Ordering::Release);

        let mut callback = lock_callback(&self.callback);
        match callback.as_mut() {
            Some(callback) => callback(),
            None => {
                log::warn!("signal source dispatched without a callback");
                Continuation::Remove
            }
        }
    }

    fn finalize(&mut self, _source: &Source) {
        unregister_signal_watch(self.token);
        *lock_callback(&self.callback) = None;
    }
}

/// A source that becomes ready when a Unix signal is delivered.
///
/// Multiple sources may watch the same signal; each receives its own
/// coalesced delivery.
pub struct UnixSignalSource {
    source: Source,
    callback: Callback,
}

impl UnixSignalSource {
    /// Creates a watch for `signum`, installing the process-global
    /// handler if this is the first watch for that signal.
    pub fn new(signum: i32) -> UnixSignalSource {
        assert!(
            (1..MAX_SIGNAL as i32).contains(&signum),
            "signal number out of range"
        );

        let pending = Arc::new(AtomicBool::new(false));
        let callback: Callback = Arc::new(Mutex::new(None));
        let token = register_signal_watch(signum, pending.clone());

        let source = Source::new(Box::new(SignalFuncs {
            token,
            pending,
            callback: callback.clone(),
            wake_registered: false,
        }));

        UnixSignalSource { source, callback }
    }

    /// Sets the callback invoked on delivery. Returning
    /// [`Continuation::Remove`] destroys the watch.
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

impl std::ops::Deref for UnixSignalSource {
    type Target = Source;

    fn deref(&self) -> &Source {
        &self.source
    }
}
