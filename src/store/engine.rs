//! Shard-selecting façade over the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{EngineError, EngineResult};
use crate::hash::fnv1a_64;
use crate::store::shard::Shard;

/// Version string surfaced in `stats`, reported on the wire rather than
/// printed at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Snapshot of the engine's own wire-visible counters.
/// `bloom_bits`/`bloom_fill_pct` are always zero: this engine has no
/// Bloom pre-check, but keeps the field shape (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct Stats {
    pub pid: u32,
    pub uptime_secs: u64,
    pub curr_items: u64,
    pub bytes: u64,
    /// Configured memory ceiling across all shards, `0` meaning
    /// unbounded.
    pub limit_maxbytes: u64,
    pub cmd_get: u64,
    pub cmd_set: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub version: &'static str,
    pub storage_mode: &'static str,
    /// Number of shards currently migrating into an `incoming` table.
    pub resize_in_progress: u64,
    pub bloom_bits: u64,
    pub bloom_fill_pct: u64,
}

/// Per-shard memory ceiling, derived from the configured total.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub shard_count: usize,
    pub max_memory_bytes: Option<usize>,
}

pub struct Engine {
    shards: Vec<Shard>,
    start: SystemTime,
    cmd_get: AtomicU64,
    cmd_set: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let per_shard_cap = config
            .max_memory_bytes
            .map(|total| total / config.shard_count.max(1));
        let shards = (0..config.shard_count)
            .map(|id| Shard::new(id as u64, per_shard_cap))
            .collect();
        Engine {
            shards,
            start: SystemTime::now(),
            cmd_get: AtomicU64::new(0),
            cmd_set: AtomicU64::new(0),
            get_hits: AtomicU64::new(0),
            get_misses: AtomicU64::new(0),
            config,
        }
    }

    fn shard_for(&self, hash: u64) -> &Shard {
        let index = (hash as usize) % self.shards.len();
        &self.shards[index]
    }

    fn now_secs(&self) -> u64 {
        now_unix_secs()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cmd_get.fetch_add(1, Ordering::Relaxed);
        let hash = fnv1a_64(key);
        let result = self.shard_for(hash).get(hash, key, self.now_secs());
        if result.is_some() {
            self.get_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.get_misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// `exptime <= 0` is normalized to "never expires", otherwise it's
    /// treated as seconds from now.
    pub fn set(&self, key: &[u8], value: &[u8], exptime: i64) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::BadArg("empty key".into()));
        }
        self.cmd_set.fetch_add(1, Ordering::Relaxed);
        let hash = fnv1a_64(key);
        let expires_at = if exptime <= 0 {
            None
        } else {
            Some(self.now_secs() + exptime as u64)
        };
        self.shard_for(hash).set(hash, key, value, expires_at)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        let hash = fnv1a_64(key);
        self.shard_for(hash).delete(hash, key)
    }

    pub fn flush_all(&self) {
        let per_shard_cap = self
            .config
            .max_memory_bytes
            .map(|total| total / self.config.shard_count.max(1));
        for shard in &self.shards {
            shard.clear(per_shard_cap);
        }
    }

    pub fn stats(&self) -> Stats {
        let curr_items: i64 = self.shards.iter().map(Shard::len).sum();
        let bytes: i64 = self.shards.iter().map(Shard::bytes_reserved).sum();
        let resize_in_progress = self.shards.iter().filter(|s| s.is_resizing()).count();
        let uptime_secs = SystemTime::now()
            .duration_since(self.start)
            .unwrap_or_default()
            .as_secs();
        Stats {
            pid: std::process::id(),
            uptime_secs,
            curr_items: curr_items.max(0) as u64,
            bytes: bytes.max(0) as u64,
            limit_maxbytes: self.config.max_memory_bytes.map(|b| b as u64).unwrap_or(0),
            cmd_get: self.cmd_get.load(Ordering::Relaxed),
            cmd_set: self.cmd_set.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            get_misses: self.get_misses.load(Ordering::Relaxed),
            version: VERSION,
            storage_mode: "sharded-open-addressing",
            resize_in_progress: resize_in_progress as u64,
            bloom_bits: 0,
            bloom_fill_pct: 0,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
