//! Generational arena backing the render tree and the host document.
//!
//! Keys carry the generation of the slot they were issued for, so a key held
//! across a rebuild never aliases the value that later reuses its slot.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub(crate) fn from_parts(index: u32, generation: u32) -> Self {
        Key { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Slot in a generational arena. Either occupied with data and its generation,
/// or free with the next generation to use when the slot is reused.
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Free { next_generation: u32 },
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Key {
        self.len += 1;
        if let Some(free_idx) = self.free_list.pop() {
            let idx = free_idx as usize;
            let next_gen = match &self.slots[idx] {
                Slot::Free { next_generation } => *next_generation,
                Slot::Occupied { .. } => unreachable!("free list points to occupied slot"),
            };
            self.slots[idx] = Slot::Occupied {
                generation: next_gen,
                value,
            };
            Key {
                index: free_idx,
                generation: next_gen,
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("arena exceeded u32 slots");
            self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            });
            Key {
                index,
                generation: 0,
            }
        }
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        match self.slots.get(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.slots.get_mut(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Free the slot. Stale keys return `None`.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let idx = key.index as usize;
        match self.slots.get(idx) {
            Some(Slot::Occupied { generation, .. }) if *generation == key.generation => {}
            _ => return None,
        }
        let old = std::mem::replace(
            &mut self.slots[idx],
            Slot::Free {
                next_generation: key.generation.wrapping_add(1),
            },
        );
        self.free_list.push(key.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Free { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");

        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_removal_and_clear() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        let c = arena.insert(3);
        arena.remove(b);
        *arena.get_mut(c).unwrap() = 30;

        assert_eq!(arena.len(), 2);
        assert!(!arena.contains(b));
        assert_eq!(arena.get(c), Some(&30));
        arena.clear();
        assert!(arena.is_empty());
        assert!(!arena.contains(a));
    }
}
