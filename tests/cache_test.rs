/*!
 * LRU Cache Integration Tests
 */

use coord_kit::cache::BoundedLruCache;
use coord_kit::SyncError;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_touched_key_survives_eviction() {
    let cache = BoundedLruCache::new(3).unwrap();
    cache.put("A", 1);
    cache.put("B", 2);
    cache.put("C", 3);
    assert_eq!(cache.get("A"), Some(1));

    cache.put("D", 4);

    assert_eq!(cache.keys_by_recency(), vec!["C", "A", "D"]);
    assert_eq!(cache.get("B"), None);
    assert_eq!(cache.get("A"), Some(1));
}

#[test]
fn test_untouched_cache_evicts_in_insertion_order() {
    let cache = BoundedLruCache::new(2).unwrap();
    for key in 0..5 {
        cache.put(key, key * 100);
    }

    assert_eq!(cache.keys_by_recency(), vec![3, 4]);
    assert_eq!(cache.stats().evictions, 3);
}

#[test]
fn test_repeated_gets_only_change_recency() {
    let cache = BoundedLruCache::new(3).unwrap();
    cache.put(1, "one");
    cache.put(2, "two");
    cache.put(3, "three");

    for _ in 0..5 {
        assert_eq!(cache.get(&1), Some("one"));
        assert_eq!(cache.get(&2), Some("two"));
        assert_eq!(cache.size(), 3);
    }

    assert_eq!(cache.keys_by_recency(), vec![3, 1, 2]);
    assert_eq!(cache.peek(&3), Some("three"));
}

#[test]
fn test_update_moves_key_to_most_recent() {
    let cache = BoundedLruCache::new(2).unwrap();
    cache.put("x", 1);
    cache.put("y", 2);
    assert_eq!(cache.put("x", 10), Some(1));

    cache.put("z", 3);
    assert!(!cache.contains_key("y"));
    assert_eq!(cache.get("x"), Some(10));
}

#[test]
fn test_zero_capacity_is_configuration_error() {
    let err = BoundedLruCache::<String, u8>::new(0).unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
}

#[test]
fn test_readers_and_writers_interleave_safely() {
    const THREADS: usize = 6;
    const OPS: usize = 500;

    let cache = Arc::new(BoundedLruCache::new(16).unwrap());
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = cache.clone();
            let start = start.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                start.wait();
                for _ in 0..OPS {
                    let key = rng.gen_range(0..40usize);
                    match rng.gen_range(0..4u8) {
                        0 | 1 => {
                            cache.put(key, key);
                        }
                        2 => {
                            if let Some(value) = cache.get(&key) {
                                assert_eq!(value, key);
                            }
                        }
                        _ => {
                            assert!(cache.len() <= cache.capacity());
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let keys = cache.keys_by_recency();
    assert_eq!(keys.len(), cache.len());
    assert!(cache.len() <= 16);
    for key in keys {
        assert_eq!(cache.peek(&key), Some(key));
    }
}
