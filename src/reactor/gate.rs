//! Cross-thread mutual-exclusion gate.
//!
//! The gate lets any thread mutate loop-owned structures without racing
//! the dispatch thread, while the dispatch thread never deadlocks calling
//! back into the mutator API from a handler it is currently running.
//!
//! Protocol:
//! - the dispatch loop claims the gate at iteration start and releases it
//!   (broadcasting) at iteration end;
//! - [`sync`](Gate::sync) from an external thread blocks until no claim is
//!   held, then claims it for that caller; [`unsync`](Gate::unsync) is the
//!   mirrored release;
//! - both are no-ops on the dispatch thread itself — the thread-identity
//!   check substitutes for a recursive mutex, so a handler is free to
//!   create and destroy watches and timers on the very loop driving it;
//! - individual mutators take the same mutex for their own brief critical
//!   section and are safe with or without an explicit bracket.

use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, ThreadId};

/// Who currently holds the gate claim.
///
/// The C rendition of this protocol is a signed busy counter; an enum
/// makes the two claim owners explicit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Claim {
    Idle,
    Dispatch,
    External,
}

/// State guarded by the gate's single mutex.
pub(crate) struct Gated<T> {
    claim: Claim,
    pub(crate) inner: T,
}

pub(crate) struct Gate<T> {
    state: Mutex<Gated<T>>,
    cond: Condvar,
    dispatcher: OnceLock<ThreadId>,
}

impl<T> Gate<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            state: Mutex::new(Gated {
                claim: Claim::Idle,
                inner,
            }),
            cond: Condvar::new(),
            dispatcher: OnceLock::new(),
        }
    }

    /// Records the calling thread as the dispatch thread. Called once
    /// from the dispatch thread body before its first iteration.
    pub(crate) fn adopt_dispatcher(&self) {
        let _ = self.dispatcher.set(thread::current().id());
    }

    pub(crate) fn on_dispatch_thread(&self) -> bool {
        self.dispatcher.get() == Some(&thread::current().id())
    }

    /// Brief critical section for a single mutator call.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Gated<T>> {
        self.state.lock().unwrap()
    }

    /// Claims the gate for the dispatch phase of one iteration.
    ///
    /// Blocks while an external bracket is open. The returned guard may
    /// be dropped and re-taken with [`lock`](Self::lock) around handler
    /// invocations; the claim stays held until
    /// [`release_dispatch`](Self::release_dispatch).
    pub(crate) fn claim_dispatch(&self) -> MutexGuard<'_, Gated<T>> {
        let mut state = self.state.lock().unwrap();
        while state.claim != Claim::Idle {
            state = self.cond.wait(state).unwrap();
        }
        state.claim = Claim::Dispatch;
        state
    }

    /// Clears the dispatch claim and wakes every waiter.
    pub(crate) fn release_dispatch(&self, mut state: MutexGuard<'_, Gated<T>>) {
        debug_assert_eq!(state.claim, Claim::Dispatch);
        state.claim = Claim::Idle;
        drop(state);
        self.cond.notify_all();
    }

    /// Opens an external critical-section bracket.
    ///
    /// No-op on the dispatch thread. Otherwise blocks until the gate is
    /// unclaimed, then claims it so the dispatch phase (and other
    /// brackets) wait until [`unsync`](Self::unsync).
    pub(crate) fn sync(&self) {
        if self.on_dispatch_thread() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        while state.claim != Claim::Idle {
            state = self.cond.wait(state).unwrap();
        }
        state.claim = Claim::External;
    }

    /// Closes the bracket opened by [`sync`](Self::sync).
    pub(crate) fn unsync(&self) {
        if self.on_dispatch_thread() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.claim, Claim::External);
        state.claim = Claim::Idle;
        drop(state);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn sync_excludes_the_dispatch_claim() {
        let gate = Arc::new(Gate::new(0u32));
        gate.sync();

        let (tx, rx) = mpsc::channel();
        let claimed = {
            let gate = gate.clone();
            thread::spawn(move || {
                let guard = gate.claim_dispatch();
                tx.send(guard.inner).expect("send claimed value");
                gate.release_dispatch(guard);
            })
        };

        // The dispatch claim must not go through while the bracket is open.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        gate.lock().inner = 7;
        gate.unsync();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5))
                .expect("dispatch claim after unsync"),
            7
        );
        claimed.join().expect("dispatch thread");
    }

    #[test]
    fn bracket_is_a_noop_on_the_dispatch_thread() {
        let gate = Gate::new(());
        gate.adopt_dispatcher();

        let guard = gate.claim_dispatch();
        drop(guard);

        // Would deadlock if the identity check did not short-circuit:
        // the dispatch claim is still conceptually this thread's.
        gate.sync();
        gate.unsync();
    }

    #[test]
    fn mutator_lock_passes_between_iterations() {
        let gate = Arc::new(Gate::new(Vec::new()));

        let guard = gate.claim_dispatch();
        gate.release_dispatch(guard);

        let writer = {
            let gate = gate.clone();
            thread::spawn(move || {
                gate.lock().inner.push(1);
            })
        };
        writer.join().expect("writer thread");

        assert_eq!(gate.lock().inner, vec![1]);
    }
}
