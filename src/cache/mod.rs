pub mod read_through;

pub use read_through::{CacheEntry, CacheEvent, CacheSource, CacheStats, CacheStatsSnapshot, Cached, ReadThroughCache};
