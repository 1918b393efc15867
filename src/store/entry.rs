//! Entry data model.

use crate::slab::BlockHandle;

/// A live key/value pair. Key and value bytes live in the shard's slab;
/// `Entry` itself only carries the handles and bookkeeping needed to
/// read, expire, and eventually free them.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub hash: u64,
    pub key: BlockHandle,
    pub value: BlockHandle,
    /// Unix epoch seconds the entry expires at; `None` means it never
    /// expires (`exptime <= 0` is normalized to this at `set` time).
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

/// Per-entry client flags are accepted on the wire but never stored or
/// echoed back as anything other than `0`; flags are dormant in this
/// engine.
pub const WIRE_FLAGS: u32 = 0;
