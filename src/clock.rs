//! Monotonic time.
//!
//! The engine timestamps everything with a single host dependency: a
//! monotonic clock with microsecond resolution that never goes backwards.
//! Deadlines ([`Source::set_ready_time`](crate::Source::set_ready_time),
//! timer expirations) are expressed in this clock's units.

/// Returns the current monotonic time in microseconds.
///
/// The epoch is arbitrary but fixed for the lifetime of the process.
/// Successive calls never observe a smaller value.
#[cfg(unix)]
pub fn monotonic_time() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    debug_assert_eq!(rc, 0);

    ts.tv_sec as i64 * 1_000_000 + ts.tv_nsec as i64 / 1_000
}

/// Returns the current monotonic time in microseconds.
#[cfg(windows)]
pub fn monotonic_time() -> i64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static ORIGIN: OnceLock<Instant> = OnceLock::new();

    let origin = *ORIGIN.get_or_init(Instant::now);
    Instant::now().duration_since(origin).as_micros() as i64
}

#[cfg(test)]
mod tests {
    use super::monotonic_time;

    #[test]
    fn never_goes_backwards() {
        let mut prev = monotonic_time();
        for _ in 0..1_000 {
            let now = monotonic_time();
            assert!(now >= prev, "monotonic clock went backwards");
            prev = now;
        }
    }
}
