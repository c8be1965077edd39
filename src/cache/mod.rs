/*!
 * Cache Module
 * Bounded LRU cache built on the hybrid lock
 */

mod list;
mod lru;

pub use lru::{BoundedLruCache, CacheStats};
