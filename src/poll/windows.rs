//! Windows poll backend based on `WaitForMultipleObjectsEx`.
//!
//! Windows sources watch waitable handles (events, process handles)
//! rather than file descriptors. The wait wakes on the first signaled
//! handle; the remaining handles are then probed with zero-timeout waits
//! so one call can report several ready records.
//!
//! This backend is primarily intended for semantic parity and simplicity.

use super::common::{PollEvent, QueryRecord};
use crate::error::PollError;

use std::time::Duration;

use windows_sys::Win32::Foundation::{HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Threading::{INFINITE, WaitForMultipleObjectsEx, WaitForSingleObject};

/// `WaitForMultipleObjects` limit.
const MAX_HANDLES: usize = 64;

/// Windows poll backend.
///
/// The wait array is rebuilt from the records on every call; the API has
/// no persistent registration to keep in sync, so the generation counter
/// is unused here.
pub(crate) struct Poller;

impl Poller {
    pub(crate) fn new() -> Poller {
        Poller
    }

    /// Waits until a record's handle is signaled or `timeout` expires.
    pub(crate) fn poll(
        &mut self,
        records: &[QueryRecord],
        _generation: u64,
        timeout: Option<Duration>,
        out: &mut Vec<PollEvent>,
    ) -> Result<usize, PollError> {
        if records.len() > MAX_HANDLES {
            log::warn!(
                "poll set has {} handles; only the first {} are waited on",
                records.len(),
                MAX_HANDLES
            );
        }

        let mut handles: Vec<HANDLE> = Vec::with_capacity(records.len().min(MAX_HANDLES));
        for rec in records.iter().take(MAX_HANDLES) {
            handles.push(rec.handle as HANDLE);
        }

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(INFINITE as u128 - 1) as u32)
            .unwrap_or(INFINITE);

        let rc = unsafe {
            WaitForMultipleObjectsEx(
                handles.len() as u32,
                handles.as_ptr(),
                0,
                timeout_ms,
                0,
            )
        };

        if rc == WAIT_TIMEOUT {
            return Ok(0);
        }
        if rc == WAIT_FAILED {
            let err = std::io::Error::last_os_error();
            return Err(PollError::Fatal(err.raw_os_error().unwrap_or(0)));
        }

        let first = (rc - WAIT_OBJECT_0) as usize;
        if first >= handles.len() {
            return Ok(0);
        }

        // The wait reports only the first signaled handle; probe the rest
        // so a single poll can surface several ready records.
        for (idx, &handle) in handles.iter().enumerate() {
            let signaled = if idx == first {
                true
            } else {
                unsafe { WaitForSingleObject(handle, 0) == WAIT_OBJECT_0 }
            };

            if signaled {
                // A signaled handle satisfies whatever it was waited for.
                out.push(PollEvent {
                    handle: handle as super::common::PollHandle,
                    revents: records[idx].events,
                });
            }
        }

        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_HANDLES, Poller};
    use crate::poll::common::{IoCondition, QueryRecord};

    use std::time::Duration;

    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::CreateEventW;

    #[test]
    fn oversized_record_set_is_truncated_not_fatal() {
        let mut poller = Poller::new();

        let mut records = Vec::new();
        for _ in 0..MAX_HANDLES + 8 {
            let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
            assert!(!event.is_null());
            records.push(QueryRecord {
                handle: event as isize,
                events: IoCondition::IN,
                cell: None,
            });
        }

        let mut out = Vec::new();
        let ready = poller
            .poll(&records, 0, Some(Duration::ZERO), &mut out)
            .unwrap();
        assert_eq!(ready, 0, "nothing is signaled");

        for rec in &records {
            unsafe { CloseHandle(rec.handle as _) };
        }
    }
}
