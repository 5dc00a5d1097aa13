/// A stable handle into an [`Arena`].
///
/// The generation is bumped every time a slot is vacated, so a key whose
/// value was removed never resolves again even after the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Key {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generational slab allocator.
///
/// An `Arena` stores values in a contiguous array and hands out [`Key`]s
/// made of a slot index and the slot's generation. Freed indices are kept on
/// a stack and reused by later insertions.
///
/// Lookups with a stale key return `None` instead of aliasing the value that
/// now lives in the slot.
pub(crate) struct Arena<T> {
    /// Storage for values; vacant slots keep their generation.
    slots: Vec<Slot<T>>,
    /// Stack of vacant indices that can be reused.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an arena with `size` vacant slots.
    pub(crate) fn new(size: usize) -> Self {
        let slots = (0..size)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        let free = (0..size as u32).rev().collect();

        Self {
            slots,
            free,
            len: 0,
        }
    }

    /// Inserts a value and returns its key.
    ///
    /// A vacant slot is reused when available; otherwise the arena doubles.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let len = self.slots.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.slots.extend((len..new_len).map(|_| Slot {
                    generation: 0,
                    value: None,
                }));
                self.free.extend(((len + 1) as u32..new_len as u32).rev());

                len as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;

        Key {
            index,
            generation: slot.generation,
        }
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// Returns `None` if the key is stale or out of range.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;

        Some(value)
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Whether `key` was handed out once and its value has since been
    /// removed.
    pub(crate) fn is_retired(&self, key: Key) -> bool {
        self.slots
            .get(key.index as usize)
            .is_some_and(|slot| slot.generation > key.generation)
    }

    /// Iterates over occupied slots in index order.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
