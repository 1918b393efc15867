//! Universal properties of the engine, exercised directly
//! against `Engine` rather than over the wire.

use shardcache::error::EngineError;
use shardcache::store::{Engine, EngineConfig};

fn engine(shards: usize) -> Engine {
    Engine::new(EngineConfig { shard_count: shards, max_memory_bytes: None })
}

#[test]
fn set_is_visible_to_a_subsequent_get_regardless_of_shard_count() {
    for shards in [1, 2, 8, 64] {
        let e = engine(shards);
        for i in 0..500u32 {
            let key = format!("key-{i}");
            e.set(key.as_bytes(), b"value", 0).unwrap();
        }
        for i in 0..500u32 {
            let key = format!("key-{i}");
            assert_eq!(e.get(key.as_bytes()).unwrap(), b"value", "shards={shards}");
        }
    }
}

#[test]
fn delete_is_idempotent() {
    let e = engine(8);
    e.set(b"k", b"v", 0).unwrap();
    assert!(e.delete(b"k"));
    assert!(!e.delete(b"k"));
    assert!(!e.delete(b"k"));
}

#[test]
fn overwritten_key_always_reads_the_latest_value() {
    let e = engine(4);
    for i in 0..10u32 {
        e.set(b"k", format!("v{i}").as_bytes(), 0).unwrap();
    }
    assert_eq!(e.get(b"k").unwrap(), b"v9");
}

#[test]
fn exptime_zero_or_negative_never_expires() {
    let e = engine(4);
    e.set(b"a", b"v", 0).unwrap();
    e.set(b"b", b"v", -100).unwrap();
    assert!(e.get(b"a").is_some());
    assert!(e.get(b"b").is_some());
}

#[test]
fn empty_key_is_rejected_on_every_shard_count() {
    for shards in [1, 4, 16] {
        let e = engine(shards);
        assert!(matches!(e.set(b"", b"v", 0), Err(EngineError::BadArg(_))));
    }
}

#[test]
fn flush_all_is_visible_across_every_shard() {
    let e = engine(16);
    for i in 0..200u32 {
        e.set(format!("k{i}").as_bytes(), b"v", 0).unwrap();
    }
    assert_eq!(e.stats().curr_items, 200);
    e.flush_all();
    assert_eq!(e.stats().curr_items, 0);
    for i in 0..200u32 {
        assert!(e.get(format!("k{i}").as_bytes()).is_none());
    }
}

#[test]
fn many_keys_survive_concurrent_growth_without_loss() {
    let e = engine(1);
    for i in 0..5000u32 {
        let key = format!("stress-{i}");
        e.set(key.as_bytes(), b"payload", 0).unwrap();
    }
    for i in 0..5000u32 {
        let key = format!("stress-{i}");
        assert!(e.get(key.as_bytes()).is_some(), "missing {key}");
    }
}
