use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::{Arc, Mutex};

/// Platform handle watched by the poll backend.
///
/// A file descriptor on Unix, a waitable `HANDLE` on Windows.
#[cfg(unix)]
pub type PollHandle = std::os::fd::RawFd;

/// Platform handle watched by the poll backend.
#[cfg(windows)]
pub type PollHandle = isize;

/// A set of I/O readiness conditions.
///
/// Used both as an interest mask (which conditions a source wants to be
/// woken for) and as a result mask (which conditions are currently true).
/// Error-class conditions (`ERR`, `HUP`, `NVAL`) are always reported,
/// whether requested or not.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IoCondition(u32);

impl IoCondition {
    /// Data is available to read.
    pub const IN: IoCondition = IoCondition(1 << 0);
    /// Writing will not block.
    pub const OUT: IoCondition = IoCondition(1 << 1);
    /// Urgent data is available.
    pub const PRI: IoCondition = IoCondition(1 << 2);
    /// An error occurred on the handle.
    pub const ERR: IoCondition = IoCondition(1 << 3);
    /// The peer hung up.
    pub const HUP: IoCondition = IoCondition(1 << 4);
    /// The handle is invalid.
    pub const NVAL: IoCondition = IoCondition(1 << 5);

    /// The empty condition set.
    pub const fn empty() -> IoCondition {
        IoCondition(0)
    }

    /// Returns `true` if no condition is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every condition in `other` is also set in `self`.
    pub const fn contains(self, other: IoCondition) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if `self` and `other` share at least one condition.
    pub const fn intersects(self, other: IoCondition) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for IoCondition {
    type Output = IoCondition;

    fn bitor(self, rhs: IoCondition) -> IoCondition {
        IoCondition(self.0 | rhs.0)
    }
}

impl BitOrAssign for IoCondition {
    fn bitor_assign(&mut self, rhs: IoCondition) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for IoCondition {
    type Output = IoCondition;

    fn bitand(self, rhs: IoCondition) -> IoCondition {
        IoCondition(self.0 & rhs.0)
    }
}

impl std::fmt::Debug for IoCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        for (bit, name) in [
            (IoCondition::IN, "IN"),
            (IoCondition::OUT, "OUT"),
            (IoCondition::PRI, "PRI"),
            (IoCondition::ERR, "ERR"),
            (IoCondition::HUP, "HUP"),
            (IoCondition::NVAL, "NVAL"),
        ] {
            if self.contains(bit) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// A (handle, interest, result) triple contributed by a source to its
/// context's aggregate poll set.
///
/// The record lives for as long as the owning source is attached. After
/// each poll the context writes the subset of `events` (plus error-class
/// conditions) that is currently true into `revents`.
#[derive(Clone, Copy, Debug)]
pub struct PollRecord {
    /// The handle to watch.
    pub handle: PollHandle,
    /// The conditions the source is interested in.
    pub events: IoCondition,
    /// The conditions observed by the most recent poll.
    pub revents: IoCondition,
}

impl PollRecord {
    /// Creates a record watching `handle` for `events`.
    pub fn new(handle: PollHandle, events: IoCondition) -> PollRecord {
        PollRecord {
            handle,
            events,
            revents: IoCondition::empty(),
        }
    }
}

/// Shared cell through which a source and its context exchange a record.
///
/// The source keeps one clone to read `revents` in `check`; the context
/// keeps another to fill results in after polling.
pub type PollCell = Arc<Mutex<PollRecord>>;

/// One entry of the aggregate set handed to the poll backend.
pub(crate) struct QueryRecord {
    pub(crate) handle: PollHandle,
    pub(crate) events: IoCondition,
    /// Result slot; `None` for the wake-up channel's permanent record.
    pub(crate) cell: Option<PollCell>,
}

/// A readiness result reported by the poll backend.
pub(crate) struct PollEvent {
    pub(crate) handle: PollHandle,
    pub(crate) revents: IoCondition,
}
