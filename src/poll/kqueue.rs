//! macOS / BSD `kqueue`-based poll backend.
//!
//! Mirrors the semantics of the Linux `epoll` backend: the context's
//! aggregate poll set is kept registered in a kqueue, one `EVFILT_READ`
//! and/or `EVFILT_WRITE` filter per descriptor, and readiness is reported
//! back as [`IoCondition`] masks.
//!
//! This backend is selected automatically on macOS and BSD targets.

use super::common::{IoCondition, PollEvent, QueryRecord};
use crate::error::PollError;

use libc::{EV_ADD, EV_DELETE, EV_EOF, EVFILT_READ, EVFILT_WRITE, kevent, kqueue, timespec};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// `kqueue` poll backend.
pub(crate) struct Poller {
    /// Kqueue file descriptor.
    kq: RawFd,

    /// Currently registered descriptors: `fd → merged interest`.
    registered: HashMap<RawFd, IoCondition>,

    /// Generation of the record set last mirrored into `registered`.
    generation: u64,

    /// Reusable buffer for kevent results.
    events: Vec<kevent>,
}

impl Poller {
    /// Creates a new kqueue backend.
    pub(crate) fn new() -> Poller {
        let kq = unsafe { kqueue() };
        assert!(kq >= 0, "kqueue failed");

        Poller {
            kq,
            registered: HashMap::new(),
            // Forces the first sync regardless of the context's counter.
            generation: u64::MAX,
            events: vec![filter_change(0, 0, 0); 64],
        }
    }

    /// Waits until a record's handle is ready or `timeout` expires.
    ///
    /// Same contract as the epoll backend.
    pub(crate) fn poll(
        &mut self,
        records: &[QueryRecord],
        generation: u64,
        timeout: Option<Duration>,
        out: &mut Vec<PollEvent>,
    ) -> Result<usize, PollError> {
        self.sync(records, generation);

        let ts;
        let ts_ptr = match timeout {
            Some(t) => {
                ts = timespec {
                    tv_sec: t.as_secs() as libc::time_t,
                    tv_nsec: t.subsec_nanos() as libc::c_long,
                };
                &ts as *const timespec
            }
            None => std::ptr::null(),
        };

        let n = unsafe {
            kevent(
                self.kq,
                std::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                ts_ptr,
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
            let fd = ev.ident as RawFd;

            let mut revents = IoCondition::empty();
            if ev.filter == EVFILT_READ {
                revents |= IoCondition::IN;
            }
            if ev.filter == EVFILT_WRITE {
                revents |= IoCondition::OUT;
            }
            if ev.flags & EV_EOF != 0 {
                revents |= IoCondition::HUP;
            }

            // Readable and writable arrive as separate kevents; merge them.
            if let Some(prev) = out.iter_mut().find(|e| e.handle == fd) {
                prev.revents |= revents;
            } else {
                out.push(PollEvent {
                    handle: fd,
                    revents,
                });
            }
        }

        Ok(out.len())
    }

    /// Mirrors `records` into the kqueue registration set.
    fn sync(&mut self, records: &[QueryRecord], generation: u64) {
        if generation == self.generation {
            return;
        }
        self.generation = generation;

        let mut wanted: HashMap<RawFd, IoCondition> = HashMap::with_capacity(records.len());
        for rec in records {
            *wanted.entry(rec.handle).or_insert(IoCondition::empty()) |= rec.events;
        }

        let stale: Vec<(RawFd, IoCondition)> = self
            .registered
            .iter()
            .filter(|(fd, _)| !wanted.contains_key(fd))
            .map(|(&fd, &i)| (fd, i))
            .collect();

        for (fd, old) in stale {
            self.update(fd, old, IoCondition::empty());
            self.registered.remove(&fd);
        }

        for (&fd, &interest) in &wanted {
            let old = self
                .registered
                .get(&fd)
                .copied()
                .unwrap_or(IoCondition::empty());

            if old != interest {
                self.update(fd, old, interest);
                self.registered.insert(fd, interest);
            }
        }
    }

    /// Adds or deletes the read/write filters needed to move a descriptor
    /// from interest `old` to interest `new`.
    fn update(&self, fd: RawFd, old: IoCondition, new: IoCondition) {
        let mut changes: Vec<kevent> = Vec::with_capacity(2);

        let read_old = old.intersects(IoCondition::IN | IoCondition::PRI);
        let read_new = new.intersects(IoCondition::IN | IoCondition::PRI);
        if read_new != read_old {
            changes.push(filter_change(
                fd,
                EVFILT_READ,
                if read_new { EV_ADD } else { EV_DELETE },
            ));
        }

        let write_old = old.contains(IoCondition::OUT);
        let write_new = new.contains(IoCondition::OUT);
        if write_new != write_old {
            changes.push(filter_change(
                fd,
                EVFILT_WRITE,
                if write_new { EV_ADD } else { EV_DELETE },
            ));
        }

        if changes.is_empty() {
            return;
        }

        let zero = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        let rc = unsafe {
            kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                &zero,
            )
        };
        debug_assert!(rc >= 0);
    }
}

fn filter_change(fd: RawFd, filter: i16, flags: u16) -> kevent {
    kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
