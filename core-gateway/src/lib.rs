//! # Gateway
//!
//! Throughput control for outbound calls to rate-limited external services.
//!
//! - [`RequestScheduler`] bounds how many calls one actor has in flight and
//!   queues the rest in submission order.
//! - [`ResponseCache`] answers repeated idempotent reads from memory and
//!   collapses concurrent identical reads into one upstream call.
//!
//! Handlers typically nest the two:
//!
//! ```ignore
//! let ctx = RequestContext::new(Actor::user(&user.id));
//! let artist = scheduler
//!     .enqueue(ctx.actor(), || {
//!         cache.get_or_fetch(&ctx, "artist-lookup", &id, None, || provider.artist(&id))
//!     })
//!     .await?;
//! ```
//!
//! All state is process-local; several instances enforce limits independently.

pub mod cache;
pub mod context;
pub mod error;
pub mod scheduler;

pub use cache::{CacheKey, CacheStats, CacheStore, MemoryCacheStore, ResponseCache};
pub use context::{Actor, RequestContext};
pub use error::{GatewayError, Result};
pub use scheduler::{ActorStats, RequestScheduler};
