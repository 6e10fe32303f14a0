//! Coarse monotonic clock snapshots.
//!
//! "Now" for the timer wheel is sampled once per dispatch iteration from a
//! coarse monotonic clock and only ever advances forward. The free
//! functions here are usable from any thread without taking the gate.

use std::mem;

#[cfg(target_os = "linux")]
const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC_COARSE;

#[cfg(not(target_os = "linux"))]
const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

/// Milliseconds since an arbitrary fixed origin.
///
/// Monotonic and coarse: the kernel updates this clock once per scheduler
/// tick, which is enough resolution for wheel granularities of a few
/// milliseconds and up.
pub fn current_millisecond() -> u64 {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    unsafe {
        libc::clock_gettime(CLOCK, &mut ts);
    }
    ts.tv_sec as u64 * 1_000 + ts.tv_nsec as u64 / 1_000_000
}

/// Whole seconds since the same origin as [`current_millisecond`].
pub fn current_second() -> u64 {
    current_millisecond() / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn milliseconds_never_go_backwards() {
        let mut last = current_millisecond();
        for _ in 0..1_000 {
            let now = current_millisecond();
            assert!(now >= last, "coarse clock went backwards");
            last = now;
        }
    }

    #[test]
    fn seconds_track_milliseconds() {
        let ms = current_millisecond();
        let s = current_second();
        assert!(s <= ms / 1_000 + 1);
    }
}
