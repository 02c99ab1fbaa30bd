//! Platform-specific poll backend abstraction.
//!
//! This module provides a unified interface over the host readiness
//! primitive: `epoll` on Linux, `kqueue` on macOS and the BSDs, and
//! `WaitForMultipleObjectsEx` on Windows.
//!
//! The backend is used by the context to:
//! - wait for watched handles to become ready,
//! - honor the deadline computed during the prepare phase,
//! - return promptly when the wake-up channel is signaled.
//!
//! The concrete implementation is selected at compile time depending on
//! the target operating system.

pub(crate) mod common;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod kqueue;

#[cfg(windows)]
mod windows;

#[cfg(target_os = "linux")]
pub(crate) use epoll::Poller;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
pub(crate) use kqueue::Poller;

#[cfg(windows)]
pub(crate) use windows::Poller;
