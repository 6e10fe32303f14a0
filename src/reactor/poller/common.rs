use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;

/// A set of readiness conditions for a watched file descriptor.
///
/// Used both as the subscription mask passed to `watch_create` /
/// `watch_mod` and as the observed mask delivered to a watch handler.
/// `ERROR` and `HANGUP` are always reported by the kernel and never need
/// to be subscribed explicitly.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Events(u8);

impl Events {
    /// The empty set.
    pub const NONE: Events = Events(0);

    /// The descriptor is readable.
    pub const READ: Events = Events(1 << 0);

    /// The descriptor is writable.
    pub const WRITE: Events = Events(1 << 1);

    /// An error condition was reported.
    pub const ERROR: Events = Events(1 << 2);

    /// The peer hung up.
    pub const HANGUP: Events = Events(1 << 3);

    /// Returns `true` if every condition in `other` is present in `self`.
    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no condition is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

/// Wake-up handle wrapping the poller's internal eventfd.
pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}
