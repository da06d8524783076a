//! Engine configuration
//!
//! [`HybridCacheOptions`] configures one engine instance; the defaults work
//! against a local Redis. [`CacheEntryOptions`] is the grouped per-write
//! record for callers that need to steer a single entry (tier enablement,
//! expiries, fire-and-forget).

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Configuration for a [`HybridCache`](crate::HybridCache) engine
#[derive(Debug, Clone)]
pub struct HybridCacheOptions {
    /// Redis connection string (e.g. `redis://127.0.0.1:6379`)
    pub redis_connect_string: String,
    /// Key-namespace prefix shared by cooperating instances; also the basis
    /// of the invalidation channel name (`<group>:invalidate`)
    pub instances_shared_name: String,
    /// Pub/Sub channel carrying sync (cache-warming) messages
    pub redis_back_channel_name: String,
    /// Fallback TTL for local-tier entries when a write supplies none
    pub default_local_expiration: Duration,
    /// Fallback TTL for Redis entries when a write supplies none
    pub default_distributed_expiration: Duration,
    /// Transport connect and bus-publish retry ceiling
    pub connect_retry: u32,
    /// Base delay of the linear publish back-off (`base × attempt`)
    pub publish_retry_base: Duration,
    /// Fail construction on the first connect error instead of retrying
    pub abort_on_connect_fail: bool,
    /// Surface Redis-side errors to callers; when false they are logged and
    /// swallowed (reads degrade to a miss, writes/deletes stay local-first)
    pub throw_if_distributed_cache_error: bool,
    /// Rebuild the local tier when the bus connection is restored, since
    /// invalidations may have been missed while disconnected
    pub flush_local_cache_on_bus_reconnection: bool,
    /// Emit diagnostic `tracing` events
    pub enable_logging: bool,
    /// Max entry count of the local tier store
    pub local_max_capacity: u64,
}

impl Default for HybridCacheOptions {
    fn default() -> Self {
        Self {
            redis_connect_string: "redis://127.0.0.1:6379".to_string(),
            instances_shared_name: "hybrid-cache".to_string(),
            redis_back_channel_name: "hybrid-cache:back-channel".to_string(),
            default_local_expiration: Duration::from_secs(300),
            default_distributed_expiration: Duration::from_secs(1800),
            connect_retry: 3,
            publish_retry_base: Duration::from_millis(100),
            abort_on_connect_fail: true,
            throw_if_distributed_cache_error: true,
            flush_local_cache_on_bus_reconnection: false,
            enable_logging: false,
            local_max_capacity: 10_000,
        }
    }
}

impl HybridCacheOptions {
    /// Options with the given group name and defaults for everything else
    #[must_use]
    pub fn new(instances_shared_name: impl Into<String>) -> Self {
        Self {
            instances_shared_name: instances_shared_name.into(),
            ..Self::default()
        }
    }

    /// Set the Redis connection string
    #[must_use]
    pub fn with_redis_connect_string(mut self, url: impl Into<String>) -> Self {
        self.redis_connect_string = url.into();
        self
    }

    /// Set the back-channel name
    #[must_use]
    pub fn with_back_channel_name(mut self, name: impl Into<String>) -> Self {
        self.redis_back_channel_name = name.into();
        self
    }

    /// Set the default local-tier TTL
    #[must_use]
    pub fn with_default_local_expiration(mut self, ttl: Duration) -> Self {
        self.default_local_expiration = ttl;
        self
    }

    /// Set the default Redis TTL
    #[must_use]
    pub fn with_default_distributed_expiration(mut self, ttl: Duration) -> Self {
        self.default_distributed_expiration = ttl;
        self
    }

    /// Set the connect/publish retry ceiling
    #[must_use]
    pub fn with_connect_retry(mut self, retries: u32) -> Self {
        self.connect_retry = retries;
        self
    }

    /// Set the transport startup policy
    #[must_use]
    pub fn with_abort_on_connect_fail(mut self, abort: bool) -> Self {
        self.abort_on_connect_fail = abort;
        self
    }

    /// Set whether Redis-side errors surface or are swallowed
    #[must_use]
    pub fn with_throw_if_distributed_cache_error(mut self, throw: bool) -> Self {
        self.throw_if_distributed_cache_error = throw;
        self
    }

    /// Set the reconnect flush policy
    #[must_use]
    pub fn with_flush_local_cache_on_bus_reconnection(mut self, flush: bool) -> Self {
        self.flush_local_cache_on_bus_reconnection = flush;
        self
    }

    /// Toggle diagnostic log emission
    #[must_use]
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }

    /// Set the local tier capacity
    #[must_use]
    pub fn with_local_max_capacity(mut self, capacity: u64) -> Self {
        self.local_max_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.instances_shared_name.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "instances_shared_name must not be empty".to_string(),
            ));
        }
        if self.redis_back_channel_name.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "redis_back_channel_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Literal invalidation channel name for this group.
    pub(crate) fn invalidation_channel(&self) -> String {
        format!("{}:invalidate", self.instances_shared_name)
    }
}

/// Per-entry write options
///
/// `None` expiries fall back to the engine defaults. Disabling a tier skips
/// that tier's write; the sync publish still happens so peers can warm.
#[derive(Debug, Clone)]
pub struct CacheEntryOptions {
    /// Local-tier TTL; `None` uses `default_local_expiration`
    pub local_expiry: Option<Duration>,
    /// Redis TTL; `None` uses `default_distributed_expiration`
    pub redis_expiry: Option<Duration>,
    /// Do not await the Redis write acknowledgement
    pub fire_and_forget: bool,
    /// Write the entry into the local tier
    pub local_cache_enable: bool,
    /// Write the entry into Redis
    pub redis_cache_enable: bool,
}

impl Default for CacheEntryOptions {
    fn default() -> Self {
        Self {
            local_expiry: None,
            redis_expiry: None,
            fire_and_forget: false,
            local_cache_enable: true,
            redis_cache_enable: true,
        }
    }
}

impl CacheEntryOptions {
    /// Set the local-tier TTL
    #[must_use]
    pub fn with_local_expiry(mut self, ttl: Duration) -> Self {
        self.local_expiry = Some(ttl);
        self
    }

    /// Set the Redis TTL
    #[must_use]
    pub fn with_redis_expiry(mut self, ttl: Duration) -> Self {
        self.redis_expiry = Some(ttl);
        self
    }

    /// Do not await the Redis write
    #[must_use]
    pub fn with_fire_and_forget(mut self, faf: bool) -> Self {
        self.fire_and_forget = faf;
        self
    }

    /// Enable or disable the local-tier write
    #[must_use]
    pub fn with_local_cache_enable(mut self, enable: bool) -> Self {
        self.local_cache_enable = enable;
        self
    }

    /// Enable or disable the Redis write
    #[must_use]
    pub fn with_redis_cache_enable(mut self, enable: bool) -> Self {
        self.redis_cache_enable = enable;
        self
    }
}
