//! # Response Cache
//!
//! TTL cache with single-flight de-duplication for idempotent reads against
//! the metadata provider and the library manager.
//!
//! ## Usage
//!
//! ```ignore
//! use core_gateway::{RequestContext, ResponseCache};
//!
//! let releases: Vec<Release> = cache
//!     .get_or_fetch(&ctx, "release-search", &query, None, || client.search(&query))
//!     .await?;
//!
//! if ctx.served_from_cache() {
//!     // render the "cached" badge
//! }
//! ```

mod key;
mod response_cache;
mod stats;
mod store;

pub use key::CacheKey;
pub use response_cache::ResponseCache;
pub use stats::CacheStats;
pub use store::{CacheStore, MemoryCacheStore};
