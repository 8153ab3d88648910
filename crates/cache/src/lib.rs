//! Two-tier (memory + optional remote) cache of tool results.

pub mod cache;
pub mod error;
pub mod key;
pub mod memory;
pub mod remote;

pub use cache::{CacheConfig, CacheStats, ToolCache, MAX_CACHE_TTL};
pub use error::CacheError;
pub use key::{canonical_json, generate_key};
pub use remote::{connect_remote, RemoteCache};

#[cfg(feature = "redis")]
pub use remote::redis_tier::RedisRemoteCache;
