use super::core::EventLoop;

/// Callback invoked when a timer expires.
///
/// Timers are one-shot: the wheel has no repeat concept, so a periodic
/// timer re-arms itself by calling
/// [`timer_mod`](EventLoop::timer_mod) from its own handler.
pub type TimerHandler = Box<dyn FnMut(&EventLoop, Timer) + Send>;

/// Handle to a one-shot deferred callback keyed to an absolute expiry
/// tick.
///
/// Like [`Watch`](super::watch::Watch), a `(index, generation)` pair; a
/// stray `timer_mod` or `timer_destroy` on an already-recycled timer is
/// rejected with [`Error::Stale`] rather than corrupting another timer's
/// slot.
///
/// [`Error::Stale`]: crate::Error::Stale
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Timer {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// A timer slot. Queueing state lives in the wheel's node table; the
/// handler is `None` while checked out for an unlocked invocation.
pub(crate) struct TimerEntry {
    pub(crate) handler: Option<TimerHandler>,
}
