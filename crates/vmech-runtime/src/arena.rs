//! [`SlotArena`] – ordered storage with generation-checked handles.
//!
//! Live entries are kept densely in insertion order, so a positional index
//! is simply the entry's place in that order and removing an entry shifts
//! every later index down by one.  Alongside the positional view, every
//! entry carries a [`MechanismHandle`]: its slot number plus the slot's
//! generation.  Removing an entry bumps the generation of its slot before
//! the slot is recycled, so a handle held across a removal never resolves
//! to the entry that later reuses the slot.

use vmech_types::MechanismHandle;

#[derive(Debug)]
pub struct SlotArena<T> {
    live: Vec<(MechanismHandle, T)>,
    generations: Vec<u32>,
    free: Vec<u32>,
}

impl<T> Default for SlotArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotArena<T> {
    pub fn new() -> Self {
        Self {
            live: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Append `value` at the end of the order and return its handle.
    pub fn insert(&mut self, value: T) -> MechanismHandle {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.generations.push(0);
                (self.generations.len() - 1) as u32
            }
        };
        let handle = MechanismHandle {
            slot,
            generation: self.generations[slot as usize],
        };
        self.live.push((handle, value));
        handle
    }

    /// Remove the entry at `index`, compacting the order.
    pub fn remove_at(&mut self, index: usize) -> Option<(MechanismHandle, T)> {
        if index >= self.live.len() {
            return None;
        }
        let (handle, value) = self.live.remove(index);
        let generation = &mut self.generations[handle.slot as usize];
        *generation = generation.wrapping_add(1);
        self.free.push(handle.slot);
        Some((handle, value))
    }

    /// Remove the entry `handle` refers to, if it is still live.
    pub fn remove(&mut self, handle: MechanismHandle) -> Option<T> {
        let index = self.index_of(handle)?;
        self.remove_at(index).map(|(_, value)| value)
    }

    /// Current position of `handle`, or `None` once it has been removed.
    pub fn index_of(&self, handle: MechanismHandle) -> Option<usize> {
        if self.generations.get(handle.slot as usize) != Some(&handle.generation) {
            return None;
        }
        self.live.iter().position(|(h, _)| *h == handle)
    }

    pub fn handle_at(&self, index: usize) -> Option<MechanismHandle> {
        self.live.get(index).map(|(h, _)| *h)
    }

    pub fn at(&self, index: usize) -> Option<&T> {
        self.live.get(index).map(|(_, v)| v)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut T> {
        self.live.get_mut(index).map(|(_, v)| v)
    }

    pub fn get(&self, handle: MechanismHandle) -> Option<&T> {
        let index = self.index_of(handle)?;
        self.at(index)
    }

    pub fn get_mut(&mut self, handle: MechanismHandle) -> Option<&mut T> {
        let index = self.index_of(handle)?;
        self.at_mut(index)
    }

    /// Entries in positional order.
    pub fn iter(&self) -> impl Iterator<Item = (MechanismHandle, &T)> {
        self.live.iter().map(|(h, v)| (*h, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (MechanismHandle, &mut T)> {
        self.live.iter_mut().map(|(h, v)| (*h, v))
    }

    /// Position of the first entry matching `pred`.
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.live.iter().position(|(_, v)| pred(v))
    }
}
