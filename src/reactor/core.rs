use super::clock;
use super::gate::Gate;
use super::poller::common::Events;
use super::poller::{Poller, ReadyEvent, Waker};
use super::timer::{Timer, TimerEntry, TimerHandler};
use super::watch::{Watch, WatchEntry, WatchHandler};
use super::wheel::TimerWheel;
use crate::error::{Error, Result};
use crate::utils::Arena;

use std::mem;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to one event dispatch loop.
///
/// The handle is cheaply cloneable and every method is callable from any
/// thread, including from a watch or timer handler running on the
/// dispatch thread itself. Exactly one dedicated OS thread runs the
/// dispatch loop, started once via [`start`](Self::start).
///
/// There is deliberately no hidden global instance: a process typically
/// constructs one loop at startup and threads the handle through
/// everything that needs timeouts or readiness callbacks.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<Inner>,
}

struct Inner {
    /// The gate: one mutex around all loop-owned structures, plus the
    /// busy-claim protocol for whole-iteration exclusion.
    gate: Gate<Core>,

    /// Kernel multiplexer; registration calls are thread-safe.
    poller: Poller,

    /// Interrupts a blocked wait for shutdown and cross-thread
    /// zero-timeout timers.
    waker: Arc<Waker>,

    started: AtomicBool,
    stop: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,

    /// Clock reading taken at construction; tick 0 starts here.
    epoch_ms: u64,

    /// Wall-clock width of one wheel tick.
    granularity_ms: u64,
}

/// Everything the gate guards.
struct Core {
    watches: Arena<WatchEntry>,
    timers: Arena<TimerEntry>,
    wheel: TimerWheel,

    /// Watches destroyed but withheld from slot reuse until the previous
    /// iteration's result array no longer references them.
    recycle: Vec<u32>,
}

impl Core {
    /// Drains the recycle list into the free list, nulling any pending
    /// result whose watch is now dead so dispatch skips it.
    fn reconcile(&mut self, results: &mut Vec<ReadyEvent>) {
        if self.recycle.is_empty() {
            return;
        }

        results.retain(|r| {
            let watch = Watch::from_token(r.token);
            self.watches
                .get(watch.index, watch.generation)
                .is_some_and(WatchEntry::is_live)
        });

        for index in mem::take(&mut self.recycle) {
            if let Some(generation) = self.watches.generation(index) {
                self.watches.remove(index, generation);
            }
        }
    }

    /// Takes the handler out of a live watch slot for an unlocked
    /// invocation. `None` if the watch died or was recycled since the
    /// readiness was observed.
    fn checkout_watch(&mut self, watch: Watch) -> Option<WatchHandler> {
        let entry = self.watches.get_mut(watch.index, watch.generation)?;
        if !entry.is_live() {
            return None;
        }
        entry.handler.take()
    }

    /// Puts a checked-out handler back, unless the watch was destroyed
    /// mid-invocation; then the box is dropped here instead.
    fn restore_watch(&mut self, watch: Watch, handler: WatchHandler) {
        if let Some(entry) = self.watches.get_mut(watch.index, watch.generation)
            && entry.is_live()
            && entry.handler.is_none()
        {
            entry.handler = Some(handler);
        }
    }

    fn checkout_timer(&mut self, timer: Timer) -> Option<TimerHandler> {
        let entry = self.timers.get_mut(timer.index, timer.generation)?;
        entry.handler.take()
    }

    fn restore_timer(&mut self, timer: Timer, handler: TimerHandler) {
        if let Some(entry) = self.timers.get_mut(timer.index, timer.generation)
            && entry.handler.is_none()
        {
            entry.handler = Some(handler);
        }
    }

    /// Watches that are live (fd != -1): creates minus destroys.
    fn live_watches(&self) -> usize {
        self.watches.len() - self.recycle.len()
    }
}

impl EventLoop {
    pub(crate) fn from_parts(
        granularity_ms: u64,
        watch_reserve: usize,
        timer_reserve: usize,
    ) -> Result<Self> {
        let poller = Poller::new()?;
        let waker = poller.waker();

        Ok(Self {
            inner: Arc::new(Inner {
                gate: Gate::new(Core {
                    watches: Arena::new(watch_reserve),
                    timers: Arena::new(timer_reserve),
                    wheel: TimerWheel::new(0),
                    recycle: Vec::new(),
                }),
                poller,
                waker,
                started: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                thread: Mutex::new(None),
                epoch_ms: clock::current_millisecond(),
                granularity_ms,
            }),
        })
    }

    /// Creates a loop with default configuration; see
    /// [`LoopBuilder`](crate::LoopBuilder) for the knobs.
    pub fn new() -> Result<Self> {
        crate::LoopBuilder::new().build()
    }

    /// Starts the dispatch thread. Idempotent: every call after the
    /// first is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let el = self.clone();
        let handle = thread::Builder::new()
            .name("metronome-dispatch".into())
            .spawn(move || run(el))
            .map_err(|err| {
                self.inner.started.store(false, Ordering::Release);
                Error::Io(err)
            })?;

        *self.inner.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stops the dispatch thread.
    ///
    /// The thread finishes its current iteration and exits; pending
    /// watches and timers are dropped with the loop state, not drained.
    /// Joins the thread unless called from a handler on the dispatch
    /// thread itself, where it only signals.
    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.waker.wake();

        if !self.inner.gate.on_dispatch_thread()
            && let Some(handle) = self.inner.thread.lock().unwrap().take()
        {
            let _ = handle.join();
        }
    }

    /// Registers `fd` with the kernel multiplexer and binds `handler` to
    /// its readiness.
    ///
    /// On registration failure the error is returned and nothing is
    /// retained. The handler runs on the dispatch thread, unlocked, and
    /// may call back into this API freely.
    pub fn watch_create(
        &self,
        fd: RawFd,
        events: Events,
        handler: WatchHandler,
    ) -> Result<Watch> {
        if fd < 0 {
            return Err(Error::InvalidArgument("negative file descriptor"));
        }

        let mut state = self.inner.gate.lock();
        let (index, generation) = state.inner.watches.insert(WatchEntry {
            fd,
            events,
            handler: Some(handler),
        });
        let watch = Watch { index, generation };

        if let Err(err) = self.inner.poller.register(fd, watch.token(), events) {
            log::warn!("watch registration failed for fd {fd}: {err}");
            state.inner.watches.remove(index, generation);
            return Err(err.into());
        }

        Ok(watch)
    }

    /// Replaces the subscribed event mask. Idempotent: applying the same
    /// mask twice is observably identical to once.
    pub fn watch_mod(&self, watch: Watch, events: Events) -> Result<()> {
        let mut state = self.inner.gate.lock();
        let entry = state
            .inner
            .watches
            .get_mut(watch.index, watch.generation)
            .filter(|e| e.is_live())
            .ok_or(Error::Stale)?;

        self.inner.poller.reregister(entry.fd, watch.token(), events)?;
        entry.events = events;
        Ok(())
    }

    /// Destroys a watch.
    ///
    /// Deregistration is synchronous: once this returns, the handler is
    /// never invoked again, even for readiness already fetched into the
    /// current iteration's result set. The slot itself is withheld from
    /// reuse until the next reconcile pass.
    pub fn watch_destroy(&self, watch: Watch) -> Result<()> {
        let mut state = self.inner.gate.lock();
        let entry = state
            .inner
            .watches
            .get_mut(watch.index, watch.generation)
            .filter(|e| e.is_live())
            .ok_or(Error::Stale)?;

        self.inner.poller.deregister(entry.fd);
        entry.fd = -1;
        entry.handler = None;
        state.inner.recycle.push(watch.index);
        Ok(())
    }

    /// The file descriptor a live watch is bound to.
    pub fn watch_fd(&self, watch: Watch) -> Result<RawFd> {
        let state = self.inner.gate.lock();
        state
            .inner
            .watches
            .get(watch.index, watch.generation)
            .filter(|e| e.is_live())
            .map(|e| e.fd)
            .ok_or(Error::Stale)
    }

    /// The event mask a live watch is currently subscribed to.
    pub fn watch_events(&self, watch: Watch) -> Result<Events> {
        let state = self.inner.gate.lock();
        state
            .inner
            .watches
            .get(watch.index, watch.generation)
            .filter(|e| e.is_live())
            .map(|e| e.events)
            .ok_or(Error::Stale)
    }

    /// Creates a timer firing once after `timeout_ms`.
    ///
    /// A zero timeout goes straight to the immediate-fire list and runs
    /// before the next kernel wait returns. Re-arm from inside the
    /// handler with [`timer_mod`](Self::timer_mod).
    pub fn timer_create(&self, timeout_ms: u64, handler: TimerHandler) -> Result<Timer> {
        let mut state = self.inner.gate.lock();
        let (index, generation) = state.inner.timers.insert(TimerEntry {
            handler: Some(handler),
        });
        let timer = Timer { index, generation };

        state.inner.wheel.ensure(index);
        self.arm(&mut state.inner.wheel, index, timeout_ms);
        Ok(timer)
    }

    /// Re-arms a timer to fire `timeout_ms` from now, whatever state it
    /// was in. A timer re-armed to the current tick from inside a
    /// handler fires within the same drain pass.
    pub fn timer_mod(&self, timer: Timer, timeout_ms: u64) -> Result<()> {
        let mut state = self.inner.gate.lock();
        state
            .inner
            .timers
            .get(timer.index, timer.generation)
            .ok_or(Error::Stale)?;

        self.arm(&mut state.inner.wheel, timer.index, timeout_ms);
        Ok(())
    }

    /// Destroys a timer. Returns `true` iff it was still queued to fire.
    pub fn timer_destroy(&self, timer: Timer) -> Result<bool> {
        let mut state = self.inner.gate.lock();
        state
            .inner
            .timers
            .get(timer.index, timer.generation)
            .ok_or(Error::Stale)?;

        let was_queued = state.inner.wheel.cancel(timer.index);
        state.inner.timers.remove(timer.index, timer.generation);
        Ok(was_queued)
    }

    /// Absolute expiry of the timer's last arming, in the clock domain
    /// of [`current_millisecond`](crate::current_millisecond).
    pub fn timer_expire(&self, timer: Timer) -> Result<u64> {
        let state = self.inner.gate.lock();
        state
            .inner
            .timers
            .get(timer.index, timer.generation)
            .ok_or(Error::Stale)?;

        let target = state.inner.wheel.target(timer.index);
        Ok(self.inner.epoch_ms + target * self.inner.granularity_ms)
    }

    /// Opens a multi-operation critical section against the dispatch
    /// thread; see [`unsync`](Self::unsync). No-op on the dispatch
    /// thread itself. Not reentrant.
    pub fn sync(&self) {
        self.inner.gate.sync();
    }

    /// Closes the bracket opened by [`sync`](Self::sync).
    pub fn unsync(&self) {
        self.inner.gate.unsync();
    }

    /// Number of live watches (created minus destroyed).
    pub fn watch_count(&self) -> usize {
        self.inner.gate.lock().inner.live_watches()
    }

    /// Number of live timers.
    pub fn timer_count(&self) -> usize {
        self.inner.gate.lock().inner.timers.len()
    }

    /// Wall-clock width of one wheel tick.
    pub fn granularity(&self) -> Duration {
        Duration::from_millis(self.inner.granularity_ms)
    }

    /// Queues `index` for `timeout_ms` from the current tick, waking the
    /// dispatch thread when an already-due timer is armed from another
    /// thread.
    fn arm(&self, wheel: &mut TimerWheel, index: u32, timeout_ms: u64) {
        let ticks = timeout_ms.div_ceil(self.inner.granularity_ms);
        let target = wheel.tick() + ticks;
        wheel.schedule(index, target);

        if ticks == 0 && !self.inner.gate.on_dispatch_thread() {
            self.inner.waker.wake();
        }
    }

    /// Milliseconds until the next wheel-tick boundary, so timers fire
    /// punctually even absent I/O. Never zero, to avoid spinning ahead
    /// of a coarse clock.
    fn next_wait_timeout(&self, tick: u64) -> i32 {
        let boundary = self.inner.epoch_ms + (tick + 1) * self.inner.granularity_ms;
        let now = clock::current_millisecond();
        boundary
            .saturating_sub(now)
            .clamp(1, self.inner.granularity_ms) as i32
    }

    /// Ticks elapsed since construction, per the coarse clock.
    fn tick_now(&self) -> u64 {
        let now = clock::current_millisecond();
        now.saturating_sub(self.inner.epoch_ms) / self.inner.granularity_ms
    }
}

/// The dispatch thread body: iterate, block, repeat.
fn run(el: EventLoop) {
    let inner = &el.inner;
    inner.gate.adopt_dispatcher();
    log::debug!(
        "dispatch thread started (granularity {} ms)",
        inner.granularity_ms
    );

    let mut results: Vec<ReadyEvent> = Vec::new();

    loop {
        // Phase 1: claim the gate, reconcile recycled watches against the
        // previous result array, dispatch still-live readiness.
        let mut state = inner.gate.claim_dispatch();
        state.inner.reconcile(&mut results);

        let mut at = 0;
        while at < results.len() {
            let ready = results[at];
            at += 1;

            let watch = Watch::from_token(ready.token);
            let Some(mut handler) = state.inner.checkout_watch(watch) else {
                continue;
            };

            // Handlers run unlocked so they may re-enter the mutator API
            // from this very thread.
            drop(state);
            handler(&el, watch, ready.events);
            state = inner.gate.lock();
            state.inner.restore_watch(watch, handler);
        }
        results.clear();

        // Phase 2: advance the wheel to now, then drain the immediate
        // list to empty. Timers re-armed to the current tick from inside
        // a handler are picked up by this same drain.
        let now_tick = el.tick_now();
        state.inner.wheel.advance_to(now_tick);

        while let Some(index) = state.inner.wheel.pop_due() {
            let Some(generation) = state.inner.timers.generation(index) else {
                continue;
            };
            let timer = Timer { index, generation };
            let Some(mut handler) = state.inner.checkout_timer(timer) else {
                continue;
            };

            drop(state);
            handler(&el, timer);
            state = inner.gate.lock();
            state.inner.restore_timer(timer, handler);
        }

        let timeout_ms = el.next_wait_timeout(state.inner.wheel.tick());

        // Phase 3: release the gate, broadcasting to waiters.
        inner.gate.release_dispatch(state);

        if inner.stop.load(Ordering::Acquire) {
            break;
        }

        // Phase 4: block in the kernel until readiness, wake-up, or the
        // next tick boundary. EINTR is retried inside the poller; any
        // other wait error is fatal to this thread.
        if let Err(err) = inner.poller.wait(&mut results, timeout_ms) {
            log::error!("readiness wait failed, dispatch thread exiting: {err}");
            return;
        }
    }

    log::debug!("dispatch thread stopped");
}
