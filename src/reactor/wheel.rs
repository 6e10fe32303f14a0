//! Hierarchical timing wheel.
//!
//! Timers are bucketed by their absolute target tick: a near ring of 256
//! buckets indexed by the low 8 bits of the target, and four far rings of
//! 64 buckets each indexed by successive higher 6-bit groups. Whenever the
//! near ring wraps, the matching far bucket one level up is emptied and
//! its timers re-placed relative to the new current tick, exactly as carry
//! propagates in multi-digit addition.
//!
//! Buckets are intrusive doubly-linked FIFO lists over a node table
//! indexed the same way as the timer arena; `u32::MAX` is the "no link"
//! sentinel, and an unqueued node carries poisoned links. The wheel knows
//! nothing about clocks or handlers: it is driven purely by [`advance_to`]
//! with a tick count, which keeps placement and cascade testable with
//! simulated time.
//!
//! [`advance_to`]: TimerWheel::advance_to

/// "No node" link sentinel.
const NONE: u32 = u32::MAX;

/// "Not in any bucket" sentinel.
const NO_BUCKET: u16 = u16::MAX;

const NEAR_BITS: u32 = 8;
const NEAR_SLOTS: usize = 1 << NEAR_BITS;
const NEAR_MASK: u64 = (NEAR_SLOTS - 1) as u64;

const FAR_BITS: u32 = 6;
const FAR_SLOTS: usize = 1 << FAR_BITS;
const FAR_MASK: u64 = (FAR_SLOTS - 1) as u64;
const FAR_LEVELS: usize = 4;

/// Ticks spanned by the whole wheel; targets beyond this are clamped into
/// the outermost ring and re-placed by cascades as they draw nearer.
const HORIZON: u64 = 1 << (NEAR_BITS + FAR_LEVELS as u32 * FAR_BITS);

/// Bucket index of the immediate-fire list in the flat bucket array.
const IMMEDIATE: usize = NEAR_SLOTS + FAR_LEVELS * FAR_SLOTS;

/// Where a target tick lands relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Already due: goes straight to the immediate-fire list.
    Immediate,

    /// Near ring slot.
    Near(usize),

    /// Far ring level and slot within it.
    Far(usize, usize),
}

/// Selects the bucket for `target` as seen from `now`.
///
/// Pure function over ticks; the reverse mapping (which tick drains a
/// bucket) is exercised by the cascade tests below.
pub(crate) fn placement(now: u64, target: u64) -> Placement {
    let delta = target.saturating_sub(now);

    if delta == 0 {
        return Placement::Immediate;
    }

    if delta < NEAR_SLOTS as u64 {
        return Placement::Near((target & NEAR_MASK) as usize);
    }

    for level in 0..FAR_LEVELS {
        let span = 1u64 << (NEAR_BITS + (level as u32 + 1) * FAR_BITS);
        if delta < span {
            let shift = NEAR_BITS + level as u32 * FAR_BITS;
            return Placement::Far(level, ((target >> shift) & FAR_MASK) as usize);
        }
    }

    // Beyond the horizon: park in the outermost ring at the clamped
    // position; cascades re-place it as its expiry approaches.
    let clamped = now + HORIZON - 1;
    let shift = NEAR_BITS + (FAR_LEVELS as u32 - 1) * FAR_BITS;
    Placement::Far(FAR_LEVELS - 1, ((clamped >> shift) & FAR_MASK) as usize)
}

#[derive(Clone, Copy)]
struct List {
    head: u32,
    tail: u32,
}

impl List {
    const EMPTY: List = List {
        head: NONE,
        tail: NONE,
    };
}

#[derive(Clone, Copy)]
struct Node {
    next: u32,
    prev: u32,
    /// Absolute expiry tick of the node's last arming.
    target: u64,
    /// Flat bucket index, or [`NO_BUCKET`] when unqueued.
    bucket: u16,
}

impl Node {
    const IDLE: Node = Node {
        next: NONE,
        prev: NONE,
        target: 0,
        bucket: NO_BUCKET,
    };
}

/// The wheel proper: current tick, flat bucket array, node table.
pub(crate) struct TimerWheel {
    tick: u64,
    buckets: Vec<List>,
    nodes: Vec<Node>,
}

impl TimerWheel {
    pub(crate) fn new(start_tick: u64) -> Self {
        Self {
            tick: start_tick,
            buckets: vec![List::EMPTY; IMMEDIATE + 1],
            nodes: Vec::new(),
        }
    }

    /// Current tick; only ever advances.
    pub(crate) fn tick(&self) -> u64 {
        self.tick
    }

    /// Grows the node table to cover arena index `index`.
    pub(crate) fn ensure(&mut self, index: u32) {
        let needed = index as usize + 1;
        if self.nodes.len() < needed {
            self.nodes.resize(needed, Node::IDLE);
        }
    }

    /// Absolute expiry tick of the node's last arming.
    pub(crate) fn target(&self, index: u32) -> u64 {
        self.nodes[index as usize].target
    }

    pub(crate) fn is_queued(&self, index: u32) -> bool {
        self.nodes[index as usize].bucket != NO_BUCKET
    }

    /// Queues `index` for `target`, unlinking it first if queued.
    ///
    /// Targets at or before the current tick go to the immediate-fire
    /// list; a drain already in progress picks them up in the same pass.
    pub(crate) fn schedule(&mut self, index: u32, target: u64) {
        self.unlink(index);

        let bucket = match placement(self.tick, target) {
            Placement::Immediate => IMMEDIATE,
            Placement::Near(slot) => slot,
            Placement::Far(level, slot) => NEAR_SLOTS + level * FAR_SLOTS + slot,
        };

        self.nodes[index as usize].target = target;
        self.push_tail(bucket, index);
    }

    /// Removes `index` from its bucket. Returns `true` iff it was queued.
    pub(crate) fn cancel(&mut self, index: u32) -> bool {
        self.unlink(index)
    }

    /// Advances the wheel to `now`, one tick at a time, cascading far
    /// rings whenever the near ring wraps and splicing each elapsed
    /// tick's near bucket onto the immediate-fire list.
    pub(crate) fn advance_to(&mut self, now: u64) {
        while self.tick < now {
            self.tick += 1;

            if self.tick & NEAR_MASK == 0 {
                self.cascade();
            }

            let slot = (self.tick & NEAR_MASK) as usize;
            self.splice_to_immediate(slot);
        }
    }

    /// Pops the next due timer off the immediate-fire list, FIFO.
    pub(crate) fn pop_due(&mut self) -> Option<u32> {
        let head = self.buckets[IMMEDIATE].head;
        if head == NONE {
            return None;
        }
        self.unlink(head);
        Some(head)
    }

    /// Re-places every timer in the far bucket matching the new tick's
    /// position, walking upward while each ring has itself wrapped.
    fn cascade(&mut self) {
        for level in 0..FAR_LEVELS {
            let shift = NEAR_BITS + level as u32 * FAR_BITS;
            let slot = ((self.tick >> shift) & FAR_MASK) as usize;
            let bucket = NEAR_SLOTS + level * FAR_SLOTS + slot;

            let mut index = self.buckets[bucket].head;
            self.buckets[bucket] = List::EMPTY;

            while index != NONE {
                let next = self.nodes[index as usize].next;
                let target = self.nodes[index as usize].target;

                self.nodes[index as usize] = Node {
                    target,
                    ..Node::IDLE
                };
                self.schedule(index, target);

                index = next;
            }

            // Carry stops at the first ring that did not wrap.
            if slot != 0 {
                break;
            }
        }
    }

    /// Appends the whole near bucket `slot` to the immediate-fire list,
    /// preserving FIFO order.
    fn splice_to_immediate(&mut self, slot: usize) {
        let mut index = self.buckets[slot].head;
        self.buckets[slot] = List::EMPTY;

        while index != NONE {
            let next = self.nodes[index as usize].next;
            let node = &mut self.nodes[index as usize];
            node.next = NONE;
            node.prev = NONE;
            node.bucket = NO_BUCKET;

            self.push_tail(IMMEDIATE, index);
            index = next;
        }
    }

    fn push_tail(&mut self, bucket: usize, index: u32) {
        let tail = self.buckets[bucket].tail;

        let node = &mut self.nodes[index as usize];
        node.bucket = bucket as u16;
        node.next = NONE;
        node.prev = tail;

        if tail == NONE {
            self.buckets[bucket].head = index;
        } else {
            self.nodes[tail as usize].next = index;
        }
        self.buckets[bucket].tail = index;
    }

    /// Detaches the node from its bucket, poisoning its links.
    /// Returns `true` iff it was queued.
    fn unlink(&mut self, index: u32) -> bool {
        let node = self.nodes[index as usize];
        if node.bucket == NO_BUCKET {
            return false;
        }

        let bucket = node.bucket as usize;

        if node.prev == NONE {
            self.buckets[bucket].head = node.next;
        } else {
            self.nodes[node.prev as usize].next = node.next;
        }

        if node.next == NONE {
            self.buckets[bucket].tail = node.prev;
        } else {
            self.nodes[node.next as usize].prev = node.prev;
        }

        let node = &mut self.nodes[index as usize];
        node.next = NONE;
        node.prev = NONE;
        node.bucket = NO_BUCKET;

        true
    }
}
