use std::os::fd::RawFd;

use super::core::EventLoop;
use super::poller::common::Events;

/// Callback invoked with the observed readiness mask when a watched
/// descriptor becomes ready.
pub type WatchHandler = Box<dyn FnMut(&EventLoop, Watch, Events) + Send>;

/// Handle to a registration binding one file descriptor and interest mask
/// to a handler.
///
/// The handle is a plain `(index, generation)` pair: cheap to copy, safe
/// to send anywhere, and rejected with [`Error::Stale`] once the watch is
/// destroyed and its slot recycled.
///
/// [`Error::Stale`]: crate::Error::Stale
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Watch {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Watch {
    /// Packs the handle into the 64-bit token registered with the poller.
    pub(crate) fn token(self) -> u64 {
        (self.generation as u64) << 32 | self.index as u64
    }

    pub(crate) fn from_token(token: u64) -> Self {
        Self {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

/// A watch slot.
///
/// Either live and registered with the poller (`fd >= 0`), or destroyed
/// and awaiting recycle (`fd == -1`), never both or neither. The handler
/// is `None` while checked out for an unlocked invocation on the dispatch
/// thread.
pub(crate) struct WatchEntry {
    pub(crate) fd: RawFd,
    pub(crate) events: Events,
    pub(crate) handler: Option<WatchHandler>,
}

impl WatchEntry {
    pub(crate) fn is_live(&self) -> bool {
        self.fd >= 0
    }
}
