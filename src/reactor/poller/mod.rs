//! Kernel readiness-notification abstraction.
//!
//! The poller wraps one kernel multiplexer instance and is used by the
//! dispatch loop to:
//! - wait for I/O readiness events, bounded by the next timer deadline,
//! - wake the dispatch thread when another thread needs its attention,
//! - map ready descriptors back to watch tokens.
//!
//! Registration calls are safe from any thread; only the blocking wait is
//! reserved to the dispatch thread.

pub(crate) mod common;

pub(crate) use common::Waker;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) use epoll::{Poller, ReadyEvent};
