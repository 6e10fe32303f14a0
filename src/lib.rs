//! # Metronome
//!
//! **Metronome** is a single-threaded event dispatch loop: one dedicated
//! thread multiplexes socket readiness and software timers, and every
//! structure it owns is safely mutable from any other thread.
//!
//! It is not a task scheduler and not an async runtime. It provides
//! exactly three things:
//!
//! - **Readiness notification** — bind a file descriptor and interest
//!   mask to a callback with [`EventLoop::watch_create`]
//! - **One-shot timers** — a hierarchical timing wheel behind
//!   [`EventLoop::timer_create`], with O(1) amortized insert and cascade
//! - **Safe cross-thread mutation** — every mutator is callable from any
//!   thread, including re-entrantly from a handler on the dispatch
//!   thread; [`EventLoop::sync`] brackets multi-step critical sections
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use metronome::EventLoop;
//!
//! let el = EventLoop::new()?;
//! el.start()?;
//!
//! // Fires once, 250 ms from now; re-arm from the handler for repeats.
//! el.timer_create(250, Box::new(|el, timer| {
//!     println!("tick");
//!     el.timer_mod(timer, 250).unwrap();
//! }))?;
//! ```
//!
//! Linux-only: readiness notification is built on `epoll`.

mod builder;
mod error;
mod reactor;
mod utils;

pub use builder::LoopBuilder;
pub use error::{Error, Result};
pub use reactor::{
    EventLoop, Events, Timer, TimerHandler, Watch, WatchHandler, current_millisecond,
    current_second,
};
