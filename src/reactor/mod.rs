//! Dispatch loop core and event handling.
//!
//! This module implements the event loop proper:
//! - multiplexing socket readiness through the kernel poller,
//! - bucketing software timers in a hierarchical timing wheel,
//! - running both kinds of handler on one dedicated dispatch thread,
//! - keeping every structure safely mutable from any other thread
//!   through the gate protocol.
//!
//! It is the sole source of "when" for everything built on top: a
//! timeout, a retry, or async I/O readiness all arrive here first.

mod clock;
mod core;
mod gate;
mod timer;
mod watch;
mod wheel;

pub(crate) mod poller;

pub use clock::{current_millisecond, current_second};
pub use self::core::EventLoop;
pub use poller::common::Events;
pub use timer::{Timer, TimerHandler};
pub use watch::{Watch, WatchHandler};
