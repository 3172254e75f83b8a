//! Persistent local cache and the cache-through layer built on it.
//!
//! - Entries carry a TTL and are evicted lazily when a read finds them expired
//! - Stores partition the cache by entity kind
//! - Storage failures never fail a read; callers fall back to the network

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::LocalCache;
pub use traits::{CacheResult, CacheSource, Cacheable, Store};
