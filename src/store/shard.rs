//! A single shard: slab allocator, current/incoming tables, and the
//! incremental rehash cursor between them.
//!
//! Mode B (the only mode this engine actually runs; see `DESIGN.md` for
//! the Mode A/B resolution) guards all of a shard's mutable state behind
//! one `parking_lot::RwLock`. `get` copies the value bytes out to an
//! owned `Vec<u8>` while still holding the read lock, so a writer that
//! later frees and reuses that same slab slot can never race a reader
//! that's still looking at the old bytes — the lock, not a copy
//! ordering trick, is what makes that safe.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use crate::error::EngineError;
use crate::slab::Slab;
use crate::store::entry::Entry;
use crate::store::slot::{InsertSlot, Slot, Table};

/// Migrate at most this many slots of `current` into `incoming` per
/// operation, so a rehash never stalls a caller for a full table scan.
const MIGRATE_BATCH: usize = 16;

/// Starting table capacity for a freshly created or flushed shard.
const INITIAL_CAPACITY: usize = 64;

/// Trigger growth once live+tombstoned slots cross this fraction of
/// capacity.
const GROWTH_LOAD_FACTOR: f64 = 0.7;

struct ShardData {
    slab: Slab,
    current: Table,
    incoming: Option<Table>,
    migrate_cursor: usize,
}

pub struct Shard {
    id: u64,
    data: RwLock<ShardData>,
    /// Live entry count, updated under the write lock, readable without
    /// taking any lock for `stats`.
    len: AtomicI64,
    /// Approximate bytes reserved by this shard's arena pages.
    bytes: AtomicI64,
}

impl Shard {
    pub fn new(id: u64, max_bytes_per_shard: Option<usize>) -> Self {
        Shard {
            id,
            data: RwLock::new(ShardData {
                slab: Slab::new(max_bytes_per_shard),
                current: Table::with_capacity(INITIAL_CAPACITY),
                incoming: None,
                migrate_cursor: 0,
            }),
            len: AtomicI64::new(0),
            bytes: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> i64 {
        self.len.load(Ordering::Relaxed)
    }

    pub fn bytes_reserved(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Whether this shard is currently migrating into an `incoming`
    /// table.
    pub fn is_resizing(&self) -> bool {
        self.data.read().incoming.is_some()
    }

    /// Looks up `key` (already hashed by the caller) and returns a copy
    /// of its value bytes if present and unexpired.
    pub fn get(&self, hash: u64, key: &[u8], now: u64) -> Option<Vec<u8>> {
        let data = self.data.read();
        let entry = Self::lookup(&data, hash, key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(data.slab.read(entry.value).to_vec())
    }

    fn lookup<'a>(data: &'a ShardData, hash: u64, key: &[u8]) -> Option<&'a Entry> {
        if let Some(incoming) = &data.incoming {
            if let Some(idx) = incoming.find(hash, |e| data.slab.read(e.key) == key) {
                if let Slot::Live(e) = incoming.slot(idx) {
                    return Some(e);
                }
            }
        }
        let idx = data.current.find(hash, |e| data.slab.read(e.key) == key)?;
        match data.current.slot(idx) {
            Slot::Live(e) => Some(e),
            _ => None,
        }
    }

    /// Inserts or overwrites `key` with `value`, expiring at
    /// `expires_at` (already normalized by the engine: `None` means
    /// never). Frees the previous value's slab block, if any.
    pub fn set(
        &self,
        hash: u64,
        key: &[u8],
        value: &[u8],
        expires_at: Option<u64>,
    ) -> Result<(), EngineError> {
        let mut data = self.data.write();

        // A not-yet-migrated copy in `current` is superseded by this
        // write; tombstone it so lookups don't see two live copies of
        // the same key once the fresh one lands in whichever table is
        // currently receiving writes.
        if let Some(idx) = data.current.find(hash, |e| data.slab.read(e.key) == key) {
            Self::retire_slot(&mut data.slab, &mut data.current, idx, &self.len);
        }

        let key_block = data.slab.alloc(key.len())?;
        data.slab.write(key_block, key);
        let value_block = match data.slab.alloc(value.len()) {
            Ok(b) => b,
            Err(e) => {
                data.slab.free(key_block);
                return Err(e);
            }
        };
        data.slab.write(value_block, value);
        let entry = Entry {
            hash,
            key: key_block,
            value: value_block,
            expires_at,
        };

        if data.incoming.is_some() {
            let ShardData { slab, incoming, .. } = &mut *data;
            Self::insert_into(slab, incoming.as_mut().expect("checked above"), hash, key, entry, &self.len)?;
        } else {
            let ShardData { slab, current, .. } = &mut *data;
            match Self::insert_into(slab, current, hash, key, entry, &self.len) {
                Ok(()) => {}
                Err(EngineError::OutOfMemory) => {
                    start_migration(&mut data);
                    let ShardData { slab, incoming, .. } = &mut *data;
                    Self::insert_into(slab, incoming.as_mut().expect("just started"), hash, key, entry, &self.len)?;
                }
                Err(e) => return Err(e),
            }
        }

        if data.incoming.is_none() && data.current.load_factor() >= GROWTH_LOAD_FACTOR {
            start_migration(&mut data);
        }
        self.migrate_step(&mut data);
        self.bytes
            .store(data.slab.bytes_reserved() as i64, Ordering::Relaxed);
        Ok(())
    }

    /// Tombstones a live slot, freeing its key/value blocks and
    /// decrementing the live count. No-op on an already-dead slot.
    fn retire_slot(slab: &mut Slab, table: &mut Table, idx: usize, len: &AtomicI64) {
        if let Slot::Live(old) = *table.slot(idx) {
            slab.free(old.key);
            slab.free(old.value);
            len.fetch_sub(1, Ordering::Relaxed);
        }
        table.tombstone(idx);
    }

    /// Inserts `entry` into `table`, overwriting (and freeing) any
    /// existing live entry for the same key. Returns `OutOfMemory` if
    /// the whole probe sequence is occupied by other keys (table full).
    fn insert_into(
        slab: &mut Slab,
        table: &mut Table,
        hash: u64,
        key: &[u8],
        entry: Entry,
        len: &AtomicI64,
    ) -> Result<(), EngineError> {
        match table.find_insert_slot(hash, |e| slab.read(e.key) == key) {
            InsertSlot::Occupied(idx) => {
                Self::retire_slot(slab, table, idx, len);
                table.set_live(idx, entry);
                len.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            InsertSlot::Fresh(idx) => {
                table.set_live(idx, entry);
                len.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            InsertSlot::Full => Err(EngineError::OutOfMemory),
        }
    }

    /// Tombstones `key` if present. Returns whether anything was
    /// removed.
    pub fn delete(&self, hash: u64, key: &[u8]) -> bool {
        let mut data = self.data.write();
        let mut removed = false;

        let incoming_idx = data
            .incoming
            .as_ref()
            .and_then(|t| t.find(hash, |e| data.slab.read(e.key) == key));
        if let Some(idx) = incoming_idx {
            let ShardData { slab, incoming, .. } = &mut *data;
            let incoming = incoming.as_mut().expect("checked above");
            if matches!(incoming.slot(idx), Slot::Live(_)) {
                removed = true;
            }
            Self::retire_slot(slab, incoming, idx, &self.len);
        }

        let current_idx = data.current.find(hash, |e| data.slab.read(e.key) == key);
        if let Some(idx) = current_idx {
            if matches!(data.current.slot(idx), Slot::Live(_)) {
                removed = true;
            }
            let ShardData { slab, current, .. } = &mut *data;
            Self::retire_slot(slab, current, idx, &self.len);
        }

        self.migrate_step(&mut data);
        removed
    }

    /// Drops every entry and resets both tables to their initial
    /// capacity (`flush_all`).
    pub fn clear(&self, max_bytes_per_shard: Option<usize>) {
        let mut data = self.data.write();
        *data = ShardData {
            slab: Slab::new(max_bytes_per_shard),
            current: Table::with_capacity(INITIAL_CAPACITY),
            incoming: None,
            migrate_cursor: 0,
        };
        self.len.store(0, Ordering::Relaxed);
        self.bytes
            .store(data.slab.bytes_reserved() as i64, Ordering::Relaxed);
    }

    /// Moves up to `MIGRATE_BATCH` slots of `current` into `incoming`.
    /// A current entry superseded by a newer write already present in
    /// `incoming` is dropped rather than overwriting the fresher copy.
    fn migrate_step(&self, data: &mut ShardData) {
        if data.incoming.is_none() {
            return;
        }
        let capacity = data.current.capacity();
        let mut migrated = 0;
        while migrated < MIGRATE_BATCH && data.migrate_cursor < capacity {
            let idx = data.migrate_cursor;
            data.migrate_cursor += 1;
            migrated += 1;
            if let Slot::Live(entry) = *data.current.slot(idx) {
                let ShardData { slab, incoming, current, .. } = &mut *data;
                let incoming = incoming.as_mut().expect("checked above");
                let key_bytes = slab.read(entry.key).to_vec();
                match incoming.find_insert_slot(entry.hash, |e| slab.read(e.key) == key_bytes) {
                    InsertSlot::Fresh(dest) => incoming.set_live(dest, entry),
                    InsertSlot::Occupied(_) => {
                        // A newer write already landed in `incoming`;
                        // the stale copy from `current` is discarded.
                        slab.free(entry.key);
                        slab.free(entry.value);
                    }
                    InsertSlot::Full => {
                        // `incoming` shouldn't fill before `current`
                        // finishes draining into it; bail out of this
                        // batch and retry next operation.
                        data.migrate_cursor -= 1;
                        break;
                    }
                }
                current.tombstone(idx);
            }
        }
        if data.migrate_cursor >= capacity {
            let incoming = data.incoming.take().expect("checked above");
            data.current = incoming;
            data.migrate_cursor = 0;
        }
    }
}

fn start_migration(data: &mut ShardData) {
    let new_capacity = data.current.capacity() * 2;
    data.incoming = Some(Table::with_capacity(new_capacity));
    data.migrate_cursor = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let shard = Shard::new(0, None);
        shard.set(1, b"k", b"v", None).unwrap();
        assert_eq!(shard.get(1, b"k", 0).unwrap(), b"v");
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let shard = Shard::new(0, None);
        shard.set(1, b"k", b"v", Some(100)).unwrap();
        assert!(shard.get(1, b"k", 100).is_none());
        assert!(shard.get(1, b"k", 50).is_some());
    }

    #[test]
    fn delete_removes_entry() {
        let shard = Shard::new(0, None);
        shard.set(1, b"k", b"v", None).unwrap();
        assert!(shard.delete(1, b"k"));
        assert!(shard.get(1, b"k", 0).is_none());
        assert!(!shard.delete(1, b"k"));
    }

    #[test]
    fn overwrite_replaces_value() {
        let shard = Shard::new(0, None);
        shard.set(1, b"k", b"v1", None).unwrap();
        shard.set(1, b"k", b"v2", None).unwrap();
        assert_eq!(shard.get(1, b"k", 0).unwrap(), b"v2");
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn growth_migrates_all_entries() {
        let shard = Shard::new(0, None);
        for i in 0..200u64 {
            let key = format!("key-{i}");
            shard.set(i, key.as_bytes(), b"v", None).unwrap();
        }
        for i in 0..200u64 {
            let key = format!("key-{i}");
            assert_eq!(shard.get(i, key.as_bytes(), 0).unwrap(), b"v");
        }
        assert_eq!(shard.len(), 200);
    }

    #[test]
    fn overwrite_during_migration_keeps_latest_value() {
        let shard = Shard::new(0, None);
        for i in 0..100u64 {
            let key = format!("key-{i}");
            shard.set(i, key.as_bytes(), b"v1", None).unwrap();
        }
        // By now at least one migration has started; overwrite a key
        // that may live in either table.
        shard.set(3, b"key-3", b"v2", None).unwrap();
        assert_eq!(shard.get(3, b"key-3", 0).unwrap(), b"v2");
    }

    #[test]
    fn clear_drops_everything() {
        let shard = Shard::new(0, None);
        shard.set(1, b"k", b"v", None).unwrap();
        shard.clear(None);
        assert!(shard.get(1, b"k", 0).is_none());
        assert_eq!(shard.len(), 0);
    }
}
