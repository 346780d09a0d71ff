//! Insertion-order eviction list
//!
//! A doubly linked list threaded through a slab arena by index. Newest entries
//! sit at the head, oldest at the tail. Slots are recycled by the slab, so
//! every handed-out [`SlotKey`] carries the generation the slot had when it was
//! linked; a stale key can never unlink a slot's later occupant.

use slab::Slab;

use crate::path::RepoPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    path: RepoPath,
    generation: u64,
    newer: Option<usize>,
    older: Option<usize>,
}

#[derive(Debug, Default)]
pub struct EvictionList {
    slots: Slab<Slot>,
    head: Option<usize>,
    tail: Option<usize>,
    next_generation: u64,
}

impl EvictionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Link `path` as the newest entry.
    pub fn push_front(&mut self, path: RepoPath) -> SlotKey {
        let generation = self.next_generation;
        self.next_generation += 1;

        let index = self.slots.insert(Slot {
            path,
            generation,
            newer: None,
            older: self.head,
        });
        match self.head {
            Some(head) => self.slots[head].newer = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);

        SlotKey { index, generation }
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.slots
            .get(key.index)
            .map(|slot| slot.generation == key.generation)
            .unwrap_or(false)
    }

    /// Unlink the slot behind `key`. Stale keys are ignored.
    pub fn unlink(&mut self, key: SlotKey) -> Option<RepoPath> {
        if !self.contains(key) {
            return None;
        }
        Some(self.detach(key.index))
    }

    /// Unlink and return the oldest entry.
    pub fn pop_oldest(&mut self) -> Option<RepoPath> {
        let tail = self.tail?;
        Some(self.detach(tail))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = None;
        self.tail = None;
    }

    /// Paths from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &RepoPath> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            let slot = &self.slots[index];
            cursor = slot.older;
            Some(&slot.path)
        })
    }

    /// Walk both directions and check the links agree with the arena.
    pub fn is_well_formed(&self) -> bool {
        let mut forward = 0;
        let mut previous: Option<usize> = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let Some(slot) = self.slots.get(index) else {
                return false;
            };
            if slot.newer != previous {
                return false;
            }
            forward += 1;
            if forward > self.slots.len() {
                return false;
            }
            previous = Some(index);
            cursor = slot.older;
        }
        previous == self.tail && forward == self.slots.len()
    }

    fn detach(&mut self, index: usize) -> RepoPath {
        let slot = self.slots.remove(index);
        match slot.newer {
            Some(newer) => self.slots[newer].older = slot.older,
            None => self.head = slot.older,
        }
        match slot.older {
            Some(older) => self.slots[older].newer = slot.newer,
            None => self.tail = slot.newer,
        }
        slot.path
    }
}
