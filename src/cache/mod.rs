//! Banner read cache.
//!
//! Cache-aside accelerator for `(tag, feature)` lookups:
//!
//! - [`KvCache`]: string cache capability with per-entry TTL
//! - [`MemoryCache`]: bounded in-process LRU implementation
//! - [`BannerCache`]: key derivation and banner encoding on top of a `KvCache`
//! - [`CachePopulator`]: bounded background pool filling the cache after reads
//!
//! The cache never holds authoritative state. Every entry can be rebuilt from
//! the store, and a missing or broken entry only costs a store round trip.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_seconds = 300
//! capacity = 10000
//! populate_workers = 2
//! populate_queue_limit = 1024
//! ```

mod banner;
mod config;
mod keys;
mod populate;
mod store;

pub use banner::{BannerCache, decode_banner, encode_banner};
pub use config::CacheConfig;
pub use keys::BannerKey;
pub use populate::CachePopulator;
pub use store::{CacheError, KvCache, MemoryCache};
