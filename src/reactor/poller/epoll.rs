//! Linux `epoll`-based poller.
//!
//! Responsibilities:
//! - Create the epoll instance and the internal wake eventfd
//! - Register, modify and deregister watched file descriptors
//! - Block waiting for readiness, bounded by the caller's timeout
//! - Translate kernel events back into `(token, Events)` pairs
//!
//! Registration and deregistration go straight to `epoll_ctl`, which is
//! safe to call from any thread, including while another thread is blocked
//! in `epoll_wait` on the same instance. The blocking wait itself is only
//! ever entered by the dispatch thread.

use super::common::{Events, Waker};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Reserved token for the internal wake event.
///
/// Watch tokens pack a 32-bit slot index and a 32-bit generation; an index
/// of `u32::MAX` is never allocated, so this value cannot collide.
const WAKE_TOKEN: u64 = u64::MAX;

/// Upper bound on events fetched per wait call.
const MAX_EVENTS: usize = 256;

/// One readiness result from a wait call.
#[derive(Clone, Copy)]
pub(crate) struct ReadyEvent {
    /// Token supplied at registration time.
    pub(crate) token: u64,

    /// Observed readiness conditions.
    pub(crate) events: Events,
}

/// Linux `epoll` poller.
///
/// Owns the epoll file descriptor and a non-blocking `eventfd` registered
/// as a persistent wake source. Writing to the eventfd causes a blocked
/// `epoll_wait` to return immediately; the wait call drains it and filters
/// it out of the reported results.
pub(crate) struct Poller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

unsafe impl Send for Poller {}
unsafe impl Sync for Poller {}

impl Waker {
    /// Wake the poller.
    ///
    /// Writes to the internal eventfd so `epoll_wait` returns immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const _ as *const _, 8);
        }
    }
}

impl Poller {
    /// Create a new poller.
    ///
    /// Creates the epoll instance, the wake eventfd, and registers the
    /// eventfd under [`WAKE_TOKEN`].
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(eventfd);
                libc::close(epoll);
            }
            return Err(err);
        }

        Ok(Self {
            epoll,
            waker: Arc::new(Waker(eventfd)),
        })
    }

    /// Return the poller waker.
    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a file descriptor under `token`.
    pub(crate) fn register(&self, fd: RawFd, token: u64, events: Events) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(events),
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Update the interest mask of an already registered descriptor.
    pub(crate) fn reregister(&self, fd: RawFd, token: u64, events: Events) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_flags(events),
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Remove a file descriptor from the poller.
    ///
    /// After this returns, no further events for `fd` are reported, even
    /// ones already queued inside the kernel.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Wait for readiness events.
    ///
    /// Blocks until at least one descriptor is ready, the wake event
    /// fires, or `timeout_ms` elapses. Interrupted-by-signal is retried
    /// internally and never surfaced. Duplicate events for one token are
    /// merged into a single [`ReadyEvent`].
    pub(crate) fn wait(
        &self,
        results: &mut Vec<ReadyEvent>,
        timeout_ms: i32,
    ) -> io::Result<()> {
        let mut buffer: [epoll_event; MAX_EVENTS] = unsafe { mem::zeroed() };

        let n = loop {
            let n = unsafe {
                epoll_wait(self.epoll, buffer.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
            };

            if n >= 0 {
                break n as usize;
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        results.clear();

        for ev in &buffer[..n] {
            if ev.u64 == WAKE_TOKEN {
                let mut buf = 0u64;
                unsafe {
                    libc::read(self.waker.0, &mut buf as *mut _ as *mut _, 8);
                }
                continue;
            }

            let events = observed_events(ev.events);

            if let Some(r) = results.iter_mut().find(|r| r.token == ev.u64) {
                r.events |= events;
            } else {
                results.push(ReadyEvent {
                    token: ev.u64,
                    events,
                });
            }
        }

        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.waker.0);
            libc::close(self.epoll);
        }
    }
}

/// Translate a subscription mask into epoll interest flags.
fn interest_flags(events: Events) -> u32 {
    let mut flags = 0;

    if events.contains(Events::READ) {
        flags |= EPOLLIN;
    }
    if events.contains(Events::WRITE) {
        flags |= EPOLLOUT;
    }

    flags as u32
}

/// Translate kernel-reported flags into an observed mask.
fn observed_events(flags: u32) -> Events {
    let mut events = Events::NONE;

    if flags & (EPOLLIN as u32) != 0 {
        events |= Events::READ;
    }
    if flags & (EPOLLOUT as u32) != 0 {
        events |= Events::WRITE;
    }
    if flags & (EPOLLERR as u32) != 0 {
        events |= Events::ERROR;
    }
    if flags & (EPOLLHUP as u32) != 0 {
        events |= Events::HANGUP;
    }

    events
}
