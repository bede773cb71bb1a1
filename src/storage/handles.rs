// src/storage/handles.rs
//! Generation-checked slot table backing the opaque request handles.
//!
//! A handle names a slot and the generation the slot had when the value was
//! inserted. Removing a value bumps the generation, so every outstanding
//! copy of the old handle stops resolving and slot reuse cannot alias it.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Never produced by a table: generations start at 1.
    pub const NULL: Handle = Handle { index: 0, generation: 0 };
    pub const SENTINEL: Handle = Handle { index: u32::MAX, generation: u32::MAX };

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slots<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), len: 0 }
    }

    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 1, value: Some(value) });
        Handle { index, generation: 1 }
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Empties the table, invalidating every handle it ever issued.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        for index in 0..self.slots.len() {
            let handle = Handle { index: index as u32, generation: self.slots[index].generation };
            if let Some(value) = self.remove(handle) {
                values.push(value);
            }
        }
        values
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_handles_stop_resolving() {
        let mut slots = Slots::new();
        let a = slots.insert("a");
        assert_eq!(slots.get(a), Some(&"a"));
        assert_eq!(slots.remove(a), Some("a"));
        assert_eq!(slots.get(a), None);
        assert_eq!(slots.remove(a), None);
        assert!(slots.is_empty());
    }

    #[test]
    fn reused_slot_does_not_alias_stale_handle() {
        let mut slots = Slots::new();
        let old = slots.insert(1);
        slots.remove(old);
        let new = slots.insert(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(slots.get(old), None);
        assert_eq!(slots.get(new), Some(&2));
    }

    #[test]
    fn sentinels_never_resolve() {
        let mut slots = Slots::new();
        slots.insert(());
        assert!(!slots.contains(Handle::NULL));
        assert!(!slots.contains(Handle::SENTINEL));
    }

    #[test]
    fn drain_invalidates_everything() {
        let mut slots = Slots::new();
        let handles: Vec<_> = (0..4).map(|i| slots.insert(i)).collect();
        slots.remove(handles[1]);
        let mut drained = slots.drain();
        drained.sort();
        assert_eq!(drained, vec![0, 2, 3]);
        assert!(handles.iter().all(|h| !slots.contains(*h)));
        assert_eq!(slots.len(), 0);
    }
}
