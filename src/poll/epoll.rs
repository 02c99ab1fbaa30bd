//! Linux `epoll`-based poll backend.
//!
//! This module provides the Linux backend for the dispatch engine.
//! It is functionally equivalent to the macOS `kqueue` backend and
//! exposes the same interface to the context.
//!
//! Responsibilities:
//! - Mirror the context's aggregate poll set into an epoll instance
//! - Block until a watched handle becomes ready or the deadline expires
//! - Translate `epoll` events back into [`IoCondition`] masks
//!
//! The registration set is rebuilt only when the context's poll records
//! changed since the last call, tracked by a monotonic generation counter.
//!
//! This backend is selected automatically on Linux targets.

use super::common::{IoCondition, PollEvent, QueryRecord};
use crate::error::PollError;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLPRI, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Linux `epoll` poll backend.
///
/// Owns the epoll instance, the set of currently registered descriptors
/// (with their merged interest masks), and a reusable event buffer.
pub(crate) struct Poller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Currently registered descriptors: `fd → merged interest`.
    registered: HashMap<RawFd, IoCondition>,

    /// Generation of the record set last mirrored into `registered`.
    generation: u64,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,
}

impl Poller {
    /// Creates a new epoll backend.
    pub(crate) fn new() -> Poller {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        assert!(epoll >= 0, "epoll_create1 failed");

        Poller {
            epoll,
            registered: HashMap::new(),
            // Forces the first sync regardless of the context's counter.
            generation: u64::MAX,
            events: vec![epoll_event { events: 0, u64: 0 }; 64],
        }
    }

    /// Waits until a record's handle is ready or `timeout` expires.
    ///
    /// `generation` identifies the record set; registrations are rebuilt
    /// only when it differs from the last synced value. On success the
    /// observed readiness is appended to `out` and the number of distinct
    /// ready handles is returned. A `timeout` of `None` blocks
    /// indefinitely, `Some(ZERO)` polls without blocking.
    pub(crate) fn poll(
        &mut self,
        records: &[QueryRecord],
        generation: u64,
        timeout: Option<Duration>,
        out: &mut Vec<PollEvent>,
    ) -> Result<usize, PollError> {
        self.sync(records, generation);

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Err(PollError::Interrupted);
            }
            return Err(PollError::Fatal(err.raw_os_error().unwrap_or(0)));
        }

        for ev in &self.events[..n as usize] {
            let fd = ev.u64 as RawFd;

            let mut revents = IoCondition::empty();
            if ev.events & EPOLLIN as u32 != 0 {
                revents |= IoCondition::IN;
            }
            if ev.events & EPOLLOUT as u32 != 0 {
                revents |= IoCondition::OUT;
            }
            if ev.events & EPOLLPRI as u32 != 0 {
                revents |= IoCondition::PRI;
            }
            if ev.events & EPOLLERR as u32 != 0 {
                revents |= IoCondition::ERR;
            }
            if ev.events & EPOLLHUP as u32 != 0 {
                revents |= IoCondition::HUP;
            }

            if !revents.is_empty() {
                out.push(PollEvent {
                    handle: fd,
                    revents,
                });
            }
        }

        Ok(out.len())
    }

    /// Mirrors `records` into the epoll registration set.
    ///
    /// Interests of records sharing a descriptor are merged; readiness is
    /// fanned back out to the individual records by the context.
    fn sync(&mut self, records: &[QueryRecord], generation: u64) {
        if generation == self.generation {
            return;
        }
        self.generation = generation;

        let mut wanted: HashMap<RawFd, IoCondition> = HashMap::with_capacity(records.len());
        for rec in records {
            *wanted.entry(rec.handle).or_insert(IoCondition::empty()) |= rec.events;
        }

        // Drop descriptors that are no longer watched.
        let stale: Vec<RawFd> = self
            .registered
            .keys()
            .filter(|fd| !wanted.contains_key(fd))
            .copied()
            .collect();

        for fd in stale {
            unsafe {
                epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
            self.registered.remove(&fd);
        }

        for (&fd, &interest) in &wanted {
            match self.registered.get(&fd) {
                Some(&old) if old == interest => {}
                Some(_) => {
                    let mut event = epoll_event {
                        events: interest_flags(interest),
                        u64: fd as u64,
                    };
                    let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
                    debug_assert_eq!(rc, 0);
                    self.registered.insert(fd, interest);
                }
                None => {
                    let mut event = epoll_event {
                        events: interest_flags(interest),
                        u64: fd as u64,
                    };
                    let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
                    debug_assert_eq!(rc, 0);
                    self.registered.insert(fd, interest);
                }
            }
        }
    }
}

fn interest_flags(interest: IoCondition) -> u32 {
    let mut flags = 0u32;

    if interest.contains(IoCondition::IN) {
        flags |= EPOLLIN as u32;
    }
    if interest.contains(IoCondition::OUT) {
        flags |= EPOLLOUT as u32;
    }
    if interest.contains(IoCondition::PRI) {
        flags |= EPOLLPRI as u32;
    }

    flags
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
