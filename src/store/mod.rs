//! Data model, shard, and engine façade.

pub mod engine;
pub mod entry;
pub mod shard;
pub mod slot;

pub use engine::{Engine, EngineConfig, Stats};
