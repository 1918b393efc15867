//! Tri-state slot and the open-addressing table it lives in.
//!
//! A `Slot` is addressed purely by its index in `Table::slots` — there is
//! no pointer or generation counter to keep safe, just a `Vec` index,
//! which is how this engine gets open addressing without `unsafe`.

use super::entry::Entry;

#[derive(Debug, Clone, Copy, Default)]
pub enum Slot {
    #[default]
    Empty,
    Tombstone,
    Live(Entry),
}

/// One hash table (either the shard's `current` table or the `incoming`
/// one it's rehashing into). Capacity is always a power of two so the
/// hash can be masked instead of modulo'd.
pub struct Table {
    slots: Vec<Slot>,
    capacity: usize,
    live: usize,
    tombstones: usize,
}

impl Table {
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Table {
            slots: vec![Slot::Empty; capacity],
            capacity,
            live: 0,
            tombstones: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    fn mask(&self) -> usize {
        self.capacity - 1
    }

    fn start_index(&self, hash: u64) -> usize {
        (hash as usize) & self.mask()
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Linear probe starting at `hash`'s slot, calling `key_eq` on every
    /// live entry's hash to test for a match (full key-byte comparison
    /// happens one layer up, in `Shard`, which can read the slab).
    pub fn find(&self, hash: u64, mut key_eq: impl FnMut(&Entry) -> bool) -> Option<usize> {
        let start = self.start_index(hash);
        for step in 0..self.capacity {
            let index = (start + step) & self.mask();
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => continue,
                Slot::Live(entry) if entry.hash == hash && key_eq(entry) => return Some(index),
                Slot::Live(_) => continue,
            }
        }
        None
    }

    /// Finds the index to insert `hash` at: either a matching live entry
    /// to overwrite, or the first empty/tombstone slot on the probe path.
    pub fn find_insert_slot(
        &self,
        hash: u64,
        mut key_eq: impl FnMut(&Entry) -> bool,
    ) -> InsertSlot {
        let start = self.start_index(hash);
        let mut first_free: Option<usize> = None;
        for step in 0..self.capacity {
            let index = (start + step) & self.mask();
            match &self.slots[index] {
                Slot::Empty => {
                    return InsertSlot::Fresh(first_free.unwrap_or(index));
                }
                Slot::Tombstone => {
                    if first_free.is_none() {
                        first_free = Some(index);
                    }
                }
                Slot::Live(entry) if entry.hash == hash && key_eq(entry) => {
                    return InsertSlot::Occupied(index);
                }
                Slot::Live(_) => continue,
            }
        }
        match first_free {
            Some(index) => InsertSlot::Fresh(index),
            None => InsertSlot::Full,
        }
    }

    pub fn set_live(&mut self, index: usize, entry: Entry) {
        if let Slot::Empty | Slot::Tombstone = self.slots[index] {
            self.live += 1;
        }
        if let Slot::Tombstone = self.slots[index] {
            self.tombstones -= 1;
        }
        self.slots[index] = Slot::Live(entry);
    }

    pub fn tombstone(&mut self, index: usize) {
        if let Slot::Live(_) = self.slots[index] {
            self.live -= 1;
            self.tombstones += 1;
            self.slots[index] = Slot::Tombstone;
        }
    }

    /// Fraction of capacity that's live or tombstoned, driving growth.
    pub fn load_factor(&self) -> f64 {
        (self.live + self.tombstones) as f64 / self.capacity as f64
    }
}

pub enum InsertSlot {
    /// A live slot already holding this exact key; overwrite in place.
    Occupied(usize),
    /// An empty or tombstoned slot on the probe path; write a new entry.
    Fresh(usize),
    /// The whole probe sequence is live entries for other keys; the
    /// table must grow before this key can be inserted.
    Full,
}
