//! Hybrid Redis Cache
//!
//! A two-tier cache for application processes that share a Redis deployment:
//! - **Local tier**: in-process memory (Moka) for low-latency reads
//! - **Redis tier**: shared, durable-within-TTL storage
//! - **Coherence bus**: two Redis Pub/Sub channels keep the per-instance
//!   local tiers approximately consistent - invalidations broadcast keys to
//!   drop, the back-channel broadcasts fresh values so peers warm their
//!   local tiers without a Redis round-trip
//!
//! Writes propagate the new value to peers; deletes propagate the key list.
//! Consistency is eventual: last-publish-observed wins in each peer's local
//! tier, with Redis as the tie-breaker on the next miss-reload.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hybrid_redis_cache::{HybridCache, HybridCacheOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> hybrid_redis_cache::error::Result<()> {
//!     let options = HybridCacheOptions::new("app")
//!         .with_redis_connect_string("redis://127.0.0.1:6379");
//!     let cache = HybridCache::new(options).await?;
//!
//!     // Write both tiers and warm every peer's local tier
//!     cache
//!         .set(
//!             "u:1",
//!             &"alice",
//!             Some(Duration::from_secs(30)),
//!             Some(Duration::from_secs(60)),
//!             false,
//!         )
//!         .await?;
//!
//!     // Local tier first, Redis fallback with TTL-aligned backfill
//!     let name: Option<String> = cache.get("u:1").await?;
//!     assert_eq!(name.as_deref(), Some("alice"));
//!
//!     // Delete everywhere and invalidate every peer
//!     cache.remove("u:1", false).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! set(k, v) ── local tier ── Redis SET ── publish sync(k, v, ttl) ──▶ peers warm
//! remove(k) ─ Redis DEL ──── local drop ─ publish invalidation(k) ──▶ peers drop
//! get(k) ──── local tier ──▶ hit? return
//!                └─ miss ──▶ Redis GET ──▶ backfill local with remaining TTL
//! ```
//!
//! All instances sharing an `instances_shared_name` group see each other's
//! invalidations and warming messages; each instance ignores its own echo.

pub mod bus;
pub mod codecs;
pub mod engine;
pub mod error;
pub mod local_tier;
pub mod naming;
pub mod options;
pub mod traits;

pub use bus::{CacheInvalidationMessage, CacheSyncMessage};
pub use codecs::JsonCodec;
#[cfg(feature = "bincode")]
pub use codecs::BincodeCodec;
#[cfg(feature = "msgpack")]
pub use codecs::MsgPackCodec;
pub use engine::{CacheStatsSnapshot, HybridCache};
pub use error::CacheError;
pub use naming::KeyNamer;
pub use options::{CacheEntryOptions, HybridCacheOptions};
pub use traits::CacheCodec;

// Re-export the cancellation token used by pattern removal and key scans
pub use tokio_util::sync::CancellationToken;
