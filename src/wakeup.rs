//! Cross-thread wake-up channel.
//!
//! Every context owns one wake-up channel: a permanently watched handle
//! that any thread can signal to force a blocked poll to return. Signals
//! are idempotent — many signals coalesce into a single readable state
//! and one drain clears them all.
//!
//! On Linux the channel is an `eventfd`; on other Unixes a non-blocking
//! CLOEXEC pipe; on Windows a manual-reset event object.

#[cfg(unix)]
use std::os::unix::io::RawFd;

use crate::poll::common::PollHandle;

/// Linux wake-up channel backed by an `eventfd`.
#[cfg(target_os = "linux")]
pub(crate) struct WakeupChannel {
    fd: RawFd,
}

#[cfg(target_os = "linux")]
impl WakeupChannel {
    pub(crate) fn new() -> WakeupChannel {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(fd >= 0, "eventfd failed");

        WakeupChannel { fd }
    }

    /// The handle the context keeps permanently in its poll set.
    pub(crate) fn handle(&self) -> PollHandle {
        self.fd
    }

    /// Signals the channel. Callable from any thread; idempotent.
    pub(crate) fn signal(&self) {
        signal_raw(self.fd);
    }

    /// Clears all buffered signals. Called by the owner after a poll
    /// reported the channel ready.
    pub(crate) fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.fd, &mut buf as *mut _ as *mut _, 8);
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for WakeupChannel {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Portable Unix wake-up channel backed by a non-blocking pipe.
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) struct WakeupChannel {
    read_fd: RawFd,
    write_fd: RawFd,
}

#[cfg(all(unix, not(target_os = "linux")))]
impl WakeupChannel {
    pub(crate) fn new() -> WakeupChannel {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert!(rc == 0, "pipe failed");

        for fd in fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
            }
        }

        WakeupChannel {
            read_fd: fds[0],
            write_fd: fds[1],
        }
    }

    pub(crate) fn handle(&self) -> PollHandle {
        self.read_fd
    }

    pub(crate) fn signal(&self) {
        signal_raw(self.write_fd);
    }

    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 16];
        loop {
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
impl Drop for WakeupChannel {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Writes a wake-up token to a channel's write-side descriptor.
///
/// Async-signal-safe: only calls `write(2)`. The Unix signal hub uses
/// this from the signal handler to wake watching contexts.
#[cfg(target_os = "linux")]
pub(crate) fn signal_raw(fd: RawFd) {
    let buf: u64 = 1;
    unsafe {
        libc::write(fd, &buf as *const _ as *const _, 8);
    }
}

/// Writes a wake-up token to a channel's write-side descriptor.
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn signal_raw(fd: RawFd) {
    let buf = [1u8; 1];
    unsafe {
        libc::write(fd, buf.as_ptr() as *const _, 1);
    }
}

/// The descriptor the signal hub should hand to [`signal_raw`].
#[cfg(target_os = "linux")]
pub(crate) fn raw_signal_handle(channel: &WakeupChannel) -> RawFd {
    channel.fd
}

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) fn raw_signal_handle(channel: &WakeupChannel) -> RawFd {
    channel.write_fd
}

/// Windows wake-up channel backed by a manual-reset event object.
#[cfg(windows)]
pub(crate) struct WakeupChannel {
    event: isize,
}

#[cfg(windows)]
impl WakeupChannel {
    pub(crate) fn new() -> WakeupChannel {
        use windows_sys::Win32::System::Threading::CreateEventW;

        let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
        assert!(!event.is_null(), "CreateEventW failed");

        WakeupChannel {
            event: event as isize,
        }
    }

    pub(crate) fn handle(&self) -> PollHandle {
        self.event
    }

    pub(crate) fn signal(&self) {
        use windows_sys::Win32::System::Threading::SetEvent;

        unsafe {
            SetEvent(self.event as _);
        }
    }

    pub(crate) fn drain(&self) {
        use windows_sys::Win32::System::Threading::ResetEvent;

        unsafe {
            ResetEvent(self.event as _);
        }
    }
}

#[cfg(windows)]
impl Drop for WakeupChannel {
    fn drop(&mut self) {
        use windows_sys::Win32::Foundation::CloseHandle;

        unsafe {
            CloseHandle(self.event as _);
        }
    }
}

// The channel is written from arbitrary threads and drained by the owner.
unsafe impl Send for WakeupChannel {}
unsafe impl Sync for WakeupChannel {}

#[cfg(all(test, unix))]
mod tests {
    use super::WakeupChannel;

    #[test]
    fn signal_then_drain_coalesces() {
        let channel = WakeupChannel::new();

        for _ in 0..10 {
            channel.signal();
        }
        channel.drain();

        // A drained channel must not report readable again: reading the
        // descriptor directly would block, so it must return nothing.
        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(channel.handle(), buf.as_mut_ptr() as *mut _, buf.len()) };
        assert!(n < 0, "channel still readable after drain");
    }
}
