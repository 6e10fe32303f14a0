/// A generation-tagged slot arena.
///
/// An `Arena` stores values of type `T` in a contiguous slot array and
/// hands out `(index, generation)` pairs. Freed slots are pushed onto a
/// free stack and reused by later insertions; every free bumps the slot's
/// generation, so a handle minted before the free no longer resolves.
///
/// The free stack is capped at a small reserve: when it grows beyond the
/// reserve, trailing vacant slots are popped and their memory returned to
/// the allocator. Interior vacant slots are kept, since popping them would
/// invalidate the indices of everything behind them.
pub(crate) struct Arena<T> {
    /// Slot storage; a vacant slot keeps its generation counter.
    slots: Vec<Slot<T>>,

    /// Stack of vacant indices available for reuse.
    free: Vec<u32>,

    /// Vacant slots retained beyond this count are reclaimed when possible.
    reserve: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> Arena<T> {
    /// Creates an empty arena keeping at most `reserve` vacant slots.
    pub(crate) fn new(reserve: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            reserve,
        }
    }

    /// Inserts a value and returns its `(index, generation)` handle.
    ///
    /// A vacant slot is reused if one is available; otherwise the slot
    /// array grows by one.
    pub(crate) fn insert(&mut self, value: T) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return (index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        (index, 0)
    }

    /// Returns the value at `index` if the handle is still current.
    pub(crate) fn get(&self, index: u32, generation: u32) -> Option<&T> {
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutable variant of [`get`](Self::get).
    pub(crate) fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Returns the current generation of an occupied slot.
    pub(crate) fn generation(&self, index: u32) -> Option<u32> {
        let slot = self.slots.get(index as usize)?;
        slot.value.as_ref()?;
        Some(slot.generation)
    }

    /// Frees the slot at `index`, dropping its value and bumping the
    /// generation so outstanding handles go stale.
    ///
    /// Returns the removed value, or `None` if the slot was already
    /// vacant or the generation does not match.
    pub(crate) fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.reclaim();

        Some(value)
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total slot count, occupied or vacant.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pops trailing vacant slots while the free stack exceeds the
    /// reserve. Only the tail can be released without renumbering.
    fn reclaim(&mut self) {
        while self.free.len() > self.reserve && !self.slots.is_empty() {
            let tail = (self.slots.len() - 1) as u32;
            match self.free.iter().position(|&i| i == tail) {
                Some(at) => {
                    self.free.swap_remove(at);
                    self.slots.pop();
                }
                None => break,
            }
        }
    }
}
