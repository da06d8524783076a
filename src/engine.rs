//! Hybrid engine - orchestration across the local tier, Redis, and the bus
//!
//! The engine owns the read/write/evict state machine of the two tiers and
//! the failure policy. Within one instance every tier mutation completes
//! before the corresponding bus publish, so a subsequent read on the same
//! instance observes the write. Across instances delivery is best-effort:
//! last-publish-observed wins in each peer's local tier, and Redis is the
//! tie-breaker for any later miss-reload. Eventually consistent by design.

use dashmap::DashMap;
use futures_util::Stream;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::{BusConfig, BusEvent, BusPublisher, BusSubscriber, CacheSyncMessage};
use crate::codecs::JsonCodec;
use crate::error::{CacheError, Result};
use crate::local_tier::LocalTier;
use crate::naming::KeyNamer;
use crate::options::{CacheEntryOptions, HybridCacheOptions};
use crate::traits::CacheCodec;

/// Keys fetched per SCAN iteration
const SCAN_COUNT: usize = 100;

/// Type alias for the in-flight requests map
type InFlightMap = DashMap<String, Arc<Mutex<()>>>;

/// RAII cleanup guard for in-flight request tracking
/// Ensures that entries are removed from the map even on early return
struct CleanupGuard<'a> {
    map: &'a InFlightMap,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Engine counters (`AtomicU64` is already thread-safe, no Arc needed)
#[derive(Debug, Default)]
struct EngineStats {
    reads: AtomicU64,
    local_hits: AtomicU64,
    redis_hits: AtomicU64,
    misses: AtomicU64,
    publishes: AtomicU64,
}

/// Snapshot of engine counters
#[derive(Debug, Clone)]
pub struct CacheStatsSnapshot {
    pub reads: u64,
    pub local_hits: u64,
    pub redis_hits: u64,
    pub misses: u64,
    pub publishes: u64,
    pub in_flight_requests: usize,
}

struct EngineInner<C: CacheCodec> {
    options: HybridCacheOptions,
    namer: KeyNamer,
    instance_id: String,
    connection: ConnectionManager,
    local: Arc<LocalTier>,
    publisher: BusPublisher,
    subscriber: BusSubscriber,
    codec: Arc<C>,
    /// In-flight retriever calls, coalesced per key
    in_flight: InFlightMap,
    stats: EngineStats,
    disposed: AtomicBool,
}

impl<C: CacheCodec> Drop for EngineInner<C> {
    fn drop(&mut self) {
        self.subscriber.shutdown();
    }
}

/// Two-tier hybrid cache engine
///
/// Construction connects to Redis, subscribes to both coherence channels,
/// and registers the reconnect handler; the engine is serving only once the
/// subscription is up. Cloning is cheap (one `Arc`).
///
/// # Example
///
/// ```rust,no_run
/// use hybrid_redis_cache::{HybridCache, HybridCacheOptions};
///
/// #[tokio::main]
/// async fn main() -> hybrid_redis_cache::error::Result<()> {
///     let cache = HybridCache::new(HybridCacheOptions::new("app")).await?;
///
///     cache.set("u:1", &"alice", None, None, false).await?;
///     let name: Option<String> = cache.get("u:1").await?;
///     assert_eq!(name.as_deref(), Some("alice"));
///
///     Ok(())
/// }
/// ```
pub struct HybridCache<C: CacheCodec = JsonCodec> {
    inner: Arc<EngineInner<C>>,
}

impl<C: CacheCodec> Clone for HybridCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl HybridCache<JsonCodec> {
    /// Create an engine with the default JSON codec.
    pub async fn new(options: HybridCacheOptions) -> Result<Self> {
        Self::with_codec(options, JsonCodec).await
    }
}

impl<C: CacheCodec + 'static> HybridCache<C> {
    /// Create an engine with a specific codec.
    ///
    /// All instances sharing a group must use the same codec; bus payloads
    /// cross instance boundaries.
    pub async fn with_codec(options: HybridCacheOptions, codec: C) -> Result<Self> {
        options.validate()?;

        let instance_id = Uuid::new_v4().to_string();
        let namer = KeyNamer::new(&options.instances_shared_name);
        let codec = Arc::new(codec);

        if options.enable_logging {
            info!(
                group = %options.instances_shared_name,
                instance_id = %instance_id,
                codec = codec.name(),
                "Initializing hybrid cache engine"
            );
        }

        let client = redis::Client::open(options.redis_connect_string.as_str())?;
        let connection = Self::connect(client, &options).await?;

        // Test connection
        let mut conn = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        let local = Arc::new(LocalTier::new(options.local_max_capacity));

        let bus_config = Arc::new(BusConfig {
            invalidation_channel: options.invalidation_channel(),
            back_channel: options.redis_back_channel_name.clone(),
            instance_id: instance_id.clone(),
            connect_retry: options.connect_retry.max(1),
            publish_retry_base: options.publish_retry_base,
            enable_logging: options.enable_logging,
        });

        let publisher = BusPublisher::new(connection.clone(), Arc::clone(&bus_config));
        let subscriber =
            BusSubscriber::new(&options.redis_connect_string, Arc::clone(&bus_config))
                .map_err(|e| CacheError::Transport(e.to_string()))?;

        // Bus handler: applies peer events to the local tier. All mutations
        // go through the tier's guarded path, serializing with rebuild.
        let tier = Arc::clone(&local);
        let sentinel = namer.clear_all_sentinel();
        let flush_on_reconnect = options.flush_local_cache_on_bus_reconnection;
        let enable_logging = options.enable_logging;

        let _bus_task = subscriber
            .start(Arc::clone(&codec), move |event| {
                let tier = Arc::clone(&tier);
                let sentinel = sentinel.clone();
                async move {
                    match event {
                        BusEvent::Invalidation(msg) => {
                            if msg.is_clear_all(&sentinel) {
                                tier.rebuild().await;
                                if enable_logging {
                                    debug!("Peer ordered a full local-tier drop");
                                }
                            } else {
                                for key in &msg.keys {
                                    tier.remove(key).await;
                                }
                                if enable_logging {
                                    debug!(count = msg.keys.len(), "Applied peer invalidation");
                                }
                            }
                        }
                        BusEvent::Sync(msg) => {
                            // Trust the wall-clock expiry the message carries.
                            if let Some(ttl) = msg.remaining_ttl() {
                                tier.set(&msg.key, msg.value, ttl).await;
                                if enable_logging {
                                    debug!(key = %msg.key, "Warmed local tier from peer write");
                                }
                            }
                        }
                        BusEvent::Reconnected => {
                            if flush_on_reconnect {
                                tier.rebuild().await;
                                if enable_logging {
                                    info!("Bus reconnected; local tier flushed as stale");
                                }
                            }
                        }
                    }
                    Ok(())
                }
            })
            .await
            .map_err(|e| CacheError::Transport(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                options,
                namer,
                instance_id,
                connection,
                local,
                publisher,
                subscriber,
                codec,
                in_flight: DashMap::new(),
                stats: EngineStats::default(),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    async fn connect(
        client: redis::Client,
        options: &HybridCacheOptions,
    ) -> Result<ConnectionManager> {
        if options.abort_on_connect_fail {
            return Ok(ConnectionManager::new(client).await?);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match ConnectionManager::new(client.clone()).await {
                Ok(conn) => return Ok(conn),
                Err(e) if attempt < options.connect_retry.max(1) => {
                    if options.enable_logging {
                        warn!(attempt, error = %e, "Redis connect failed, retrying");
                    }
                    tokio::time::sleep(options.publish_retry_base * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// This instance's bus identity.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    /// Log a transport failure, then surface or swallow it per policy.
    fn transport_failure(&self, operation: &str, err: &redis::RedisError) -> Result<()> {
        if self.inner.options.enable_logging {
            error!(operation, error = %err, "Redis operation failed");
        }
        if self.inner.options.throw_if_distributed_cache_error {
            Err(CacheError::Transport(err.to_string()))
        } else {
            Ok(())
        }
    }

    // ===== Read path =====

    /// Look up a key: local tier first, then Redis with local backfill.
    ///
    /// A Redis hit is written back into the local tier with TTL equal to
    /// Redis's remaining TTL for that key, so both tiers expire together.
    /// Transport errors degrade to a miss unless
    /// `throw_if_distributed_cache_error` is set.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.ensure_live()?;
        CacheError::check_key(key)?;
        self.inner.stats.reads.fetch_add(1, Ordering::Relaxed);

        let named = self.inner.namer.name(key);

        if let Some(value) = self.read_local::<T>(&named).await {
            self.inner.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(value));
        }

        match self.read_redis::<T>(&named).await? {
            Some(value) => {
                self.inner.stats.redis_hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Look up a key, invoking `retriever` on a full miss.
    ///
    /// Concurrent misses for the same key are coalesced so the retriever
    /// runs once. On retriever success the value is written to both tiers
    /// with the given expiries and broadcast on the back-channel; retriever
    /// errors follow the same surface/swallow policy as transport errors.
    pub async fn get_with<T, F, Fut>(
        &self,
        key: &str,
        retriever: F,
        local_ttl: Option<Duration>,
        redis_ttl: Option<Duration>,
        fire_and_forget: bool,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.ensure_live()?;
        CacheError::check_key(key)?;
        self.inner.stats.reads.fetch_add(1, Ordering::Relaxed);

        let named = self.inner.namer.name(key);

        if let Some(value) = self.read_local::<T>(&named).await {
            self.inner.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(value));
        }

        // Coalesce concurrent misses so only one caller runs the retriever.
        let lock_guard = self
            .inner
            .in_flight
            .entry(named.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock_guard.lock().await;
        let _cleanup_guard = CleanupGuard {
            map: &self.inner.in_flight,
            key: named.clone(),
        };

        // A coalesced waiter may find the entry warmed by the winner.
        if let Some(value) = self.read_local::<T>(&named).await {
            self.inner.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(value));
        }

        match self.read_redis::<T>(&named).await? {
            Some(value) => {
                self.inner.stats.redis_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(value));
            }
            None => {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
            }
        }

        if self.inner.options.enable_logging {
            debug!(key = %named, "Cache miss, invoking data retriever");
        }

        match retriever().await {
            Ok(value) => {
                let entry_options = CacheEntryOptions {
                    local_expiry: local_ttl,
                    redis_expiry: redis_ttl,
                    fire_and_forget,
                    ..CacheEntryOptions::default()
                };
                let bytes = self.inner.codec.serialize(&value)?;
                self.write_entry(&named, bytes, &entry_options).await?;
                Ok(Some(value))
            }
            Err(e) => {
                if self.inner.options.enable_logging {
                    error!(key = %named, error = %e, "Data retriever failed");
                }
                if self.inner.options.throw_if_distributed_cache_error {
                    Err(CacheError::Retrieval(e.to_string()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Boolean-flag read variant; never returns an error.
    ///
    /// Transport and codec failures degrade to `(false, None)`.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> (bool, Option<T>) {
        match self.get(key).await {
            Ok(Some(value)) => (true, Some(value)),
            Ok(None) | Err(_) => (false, None),
        }
    }

    async fn read_local<T: DeserializeOwned>(&self, named: &str) -> Option<T> {
        let bytes = self.inner.local.get(named).await?;
        match self.inner.codec.deserialize(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                // Undecodable for the requested type; treat as a miss.
                if self.inner.options.enable_logging {
                    warn!(key = %named, error = %e, "Local entry failed to deserialize");
                }
                None
            }
        }
    }

    async fn read_redis<T: DeserializeOwned>(&self, named: &str) -> Result<Option<T>> {
        let mut conn = self.inner.connection.clone();

        let fetched: redis::RedisResult<Option<Vec<u8>>> = conn.get(named).await;
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                // Policy decides: surface, or degrade to a miss.
                self.transport_failure("GET", &e)?;
                return Ok(None);
            }
        };

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let value: T = self.inner.codec.deserialize(&bytes)?;

        // Backfill with Redis's own remaining TTL so the local copy cannot
        // outlive the shared one.
        let ttl = self.expiration_of(named).await;
        self.inner.local.set(named, bytes, ttl).await;

        if self.inner.options.enable_logging {
            debug!(key = %named, ttl_ms = ttl.as_millis() as u64, "Backfilled local tier from Redis");
        }

        Ok(Some(value))
    }

    // ===== Write path =====

    /// Write a value to both tiers and broadcast it on the back-channel.
    ///
    /// Peers receive a warming sync carrying the new value, not a purge:
    /// writes propagate the value, deletes propagate the key list. `None`
    /// expiries fall back to the configured defaults.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        local_ttl: Option<Duration>,
        redis_ttl: Option<Duration>,
        fire_and_forget: bool,
    ) -> Result<()> {
        let entry_options = CacheEntryOptions {
            local_expiry: local_ttl,
            redis_expiry: redis_ttl,
            fire_and_forget,
            ..CacheEntryOptions::default()
        };
        self.set_with_options(key, value, &entry_options).await
    }

    /// Write a value with the full per-entry options record.
    pub async fn set_with_options<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        entry_options: &CacheEntryOptions,
    ) -> Result<()> {
        self.ensure_live()?;
        CacheError::check_key(key)?;

        let named = self.inner.namer.name(key);
        let bytes = self.inner.codec.serialize(value)?;
        self.write_entry(&named, bytes, entry_options).await
    }

    /// Write every entry of the map, publishing one sync per entry.
    pub async fn set_all<T: Serialize>(
        &self,
        entries: &HashMap<String, T>,
        local_ttl: Option<Duration>,
        redis_ttl: Option<Duration>,
        fire_and_forget: bool,
    ) -> Result<()> {
        let entry_options = CacheEntryOptions {
            local_expiry: local_ttl,
            redis_expiry: redis_ttl,
            fire_and_forget,
            ..CacheEntryOptions::default()
        };
        self.set_all_with_options(entries, &entry_options).await
    }

    /// Bulk write with the full per-entry options record.
    ///
    /// A swallowed transport error on one entry does not stop the rest.
    pub async fn set_all_with_options<T: Serialize>(
        &self,
        entries: &HashMap<String, T>,
        entry_options: &CacheEntryOptions,
    ) -> Result<()> {
        self.ensure_live()?;
        if entries.is_empty() {
            return Err(CacheError::InvalidArgument(
                "bulk write requires at least one entry".to_string(),
            ));
        }

        for (key, value) in entries {
            CacheError::check_key(key)?;
            let named = self.inner.namer.name(key);
            let bytes = self.inner.codec.serialize(value)?;
            self.write_entry(&named, bytes, entry_options).await?;
        }
        Ok(())
    }

    async fn write_entry(
        &self,
        named: &str,
        bytes: Vec<u8>,
        entry_options: &CacheEntryOptions,
    ) -> Result<()> {
        let local_ttl = entry_options
            .local_expiry
            .unwrap_or(self.inner.options.default_local_expiration);
        let redis_ttl = entry_options
            .redis_expiry
            .unwrap_or(self.inner.options.default_distributed_expiration);

        if entry_options.local_cache_enable {
            self.inner.local.set(named, bytes.clone(), local_ttl).await;
        }

        if entry_options.redis_cache_enable {
            if entry_options.fire_and_forget {
                let mut conn = self.inner.connection.clone();
                let key = named.to_string();
                let payload = bytes.clone();
                let secs = redis_ttl.as_secs().max(1);
                let log = self.inner.options.enable_logging;
                tokio::spawn(async move {
                    let result: redis::RedisResult<()> = conn.set_ex(&key, payload, secs).await;
                    if let Err(e) = result {
                        if log {
                            warn!(key = %key, error = %e, "Fire-and-forget SET failed");
                        }
                    }
                });
            } else {
                let mut conn = self.inner.connection.clone();
                let result: redis::RedisResult<()> = conn
                    .set_ex(named, bytes.as_slice(), redis_ttl.as_secs().max(1))
                    .await;
                if let Err(e) = result {
                    // When swallowed, the local write stands and the sync
                    // still goes out; this instance stays authoritative
                    // until the next reload.
                    self.transport_failure("SET", &e)?;
                }
            }
        }

        let sync = CacheSyncMessage::new(self.inner.instance_id.clone(), named, bytes, local_ttl);
        self.inner
            .publisher
            .publish_sync(self.inner.codec.as_ref(), &sync)
            .await;
        self.inner.stats.publishes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    // ===== Delete path =====

    /// Remove a single key everywhere.
    pub async fn remove(&self, key: &str, fire_and_forget: bool) -> Result<()> {
        self.remove_many(&[key], fire_and_forget).await
    }

    /// Remove keys from Redis and the local tier, then broadcast one
    /// invalidation carrying the full list.
    pub async fn remove_many<K: AsRef<str>>(
        &self,
        keys: &[K],
        fire_and_forget: bool,
    ) -> Result<()> {
        self.ensure_live()?;
        CacheError::check_keys(keys)?;

        let named: Vec<String> = keys
            .iter()
            .map(|k| self.inner.namer.name(k.as_ref()))
            .collect();

        if fire_and_forget {
            let mut conn = self.inner.connection.clone();
            let keys = named.clone();
            let log = self.inner.options.enable_logging;
            tokio::spawn(async move {
                let result: redis::RedisResult<()> = conn.del(&keys).await;
                if let Err(e) = result {
                    if log {
                        warn!(error = %e, "Fire-and-forget DEL failed");
                    }
                }
            });
        } else {
            let mut conn = self.inner.connection.clone();
            let result: redis::RedisResult<()> = conn.del(&named).await;
            if let Err(e) = result {
                // Swallowed: the local removal and the invalidation still
                // run, so this instance and its peers stop serving the key.
                self.transport_failure("DEL", &e)?;
            }
        }

        for key in &named {
            self.inner.local.remove(key).await;
        }

        self.inner
            .publisher
            .publish_invalidation(self.inner.codec.as_ref(), named)
            .await;
        self.inner.stats.publishes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Scan Redis for keys matching the namespaced pattern and delete each.
    ///
    /// Returns the namespaced keys actually removed. Cancellation stops the
    /// scan and further deletes; keys already deleted remain deleted, are
    /// removed locally, and are still published to peers.
    pub async fn remove_with_pattern(
        &self,
        pattern: &str,
        fire_and_forget: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.ensure_live()?;
        CacheError::check_key(pattern)?;

        let named_pattern = self.inner.namer.pattern(pattern);
        let mut conn = self.inner.connection.clone();
        let mut removed: Vec<String> = Vec::new();
        let mut failure: Option<CacheError> = None;
        let mut cursor: u64 = 0;

        'scan: loop {
            if cancel.is_cancelled() {
                break;
            }

            let scanned: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&named_pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await;

            let (next, batch) = match scanned {
                Ok(result) => result,
                Err(e) => {
                    // The cursor is unusable after a failed SCAN; stop here
                    // and clean up what was already deleted.
                    failure = self.transport_failure("SCAN", &e).err();
                    break;
                }
            };
            cursor = next;

            for key in batch {
                if cancel.is_cancelled() {
                    break 'scan;
                }

                if fire_and_forget {
                    let mut conn = self.inner.connection.clone();
                    let k = key.clone();
                    let log = self.inner.options.enable_logging;
                    tokio::spawn(async move {
                        let result: redis::RedisResult<()> = conn.del(&k).await;
                        if let Err(e) = result {
                            if log {
                                warn!(key = %k, error = %e, "Fire-and-forget DEL failed");
                            }
                        }
                    });
                    removed.push(key);
                } else {
                    let result: redis::RedisResult<()> = conn.del(&key).await;
                    match result {
                        Ok(()) => removed.push(key),
                        Err(e) => {
                            if let Err(err) = self.transport_failure("DEL", &e) {
                                failure = Some(err);
                                break 'scan;
                            }
                            // Swallowed: skip this key, keep scanning.
                        }
                    }
                }
            }

            if cursor == 0 {
                break;
            }
        }

        if !removed.is_empty() {
            for key in &removed {
                self.inner.local.remove(key).await;
            }
            self.inner
                .publisher
                .publish_invalidation(self.inner.codec.as_ref(), removed.clone())
                .await;
            self.inner.stats.publishes.fetch_add(1, Ordering::Relaxed);
        }

        if self.inner.options.enable_logging {
            debug!(
                pattern = %named_pattern,
                count = removed.len(),
                "Pattern removal finished"
            );
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    /// Lazy stream of namespaced keys matching the pattern.
    ///
    /// Each SCAN page is fetched on demand as the stream is polled; the
    /// cancellation token ends the stream between pages.
    pub fn keys(
        &self,
        pattern: &str,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<String>> + Send + use<C> {
        struct ScanState {
            conn: ConnectionManager,
            pattern: String,
            cursor: u64,
            buffer: VecDeque<String>,
            done: bool,
            cancel: CancellationToken,
        }

        let state = ScanState {
            conn: self.inner.connection.clone(),
            pattern: self.inner.namer.pattern(pattern),
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
            cancel,
        };

        futures_util::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(key) = state.buffer.pop_front() {
                    return Ok(Some((key, state)));
                }
                if state.done || state.cancel.is_cancelled() {
                    return Ok(None);
                }

                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(state.cursor)
                    .arg("MATCH")
                    .arg(&state.pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut state.conn)
                    .await
                    .map_err(CacheError::from)?;

                state.cursor = next;
                if next == 0 {
                    state.done = true;
                }
                state.buffer.extend(batch);
            }
        })
    }

    // ===== Existence, expiry, clearing =====

    /// Check whether a key exists in either tier.
    ///
    /// Redis is consulted first; a purely-local entry still counts as
    /// existing when Redis misses or is unreachable (swallow mode).
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_live()?;
        CacheError::check_key(key)?;

        let named = self.inner.namer.name(key);
        let mut conn = self.inner.connection.clone();

        let result: redis::RedisResult<bool> = conn.exists(&named).await;
        match result {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                self.transport_failure("EXISTS", &e)?;
            }
        }

        Ok(self.inner.local.get(&named).await.is_some())
    }

    /// Remaining TTL of a key as Redis reports it.
    ///
    /// Any failure, missing key, or missing expiry yields the configured
    /// default distributed expiration.
    pub async fn get_expiration(&self, key: &str) -> Result<Duration> {
        self.ensure_live()?;
        CacheError::check_key(key)?;

        let named = self.inner.namer.name(key);
        Ok(self.expiration_of(&named).await)
    }

    async fn expiration_of(&self, named: &str) -> Duration {
        let mut conn = self.inner.connection.clone();

        // PTTL: >= 0 remaining ms, -1 no expiry, -2 missing key.
        let remaining: redis::RedisResult<i64> = redis::cmd("PTTL")
            .arg(named)
            .query_async(&mut conn)
            .await;

        match remaining {
            Ok(ms) if ms >= 0 => Duration::from_millis(ms as u64),
            Ok(_) => self.inner.options.default_distributed_expiration,
            Err(e) => {
                if self.inner.options.enable_logging {
                    warn!(key = %named, error = %e, "PTTL failed, using default expiration");
                }
                self.inner.options.default_distributed_expiration
            }
        }
    }

    /// Flush the Redis database, drop the local tier, and order every peer
    /// to drop theirs via the clear-all sentinel.
    pub async fn clear_all(&self) -> Result<()> {
        self.ensure_live()?;

        let mut conn = self.inner.connection.clone();
        let result: redis::RedisResult<()> =
            redis::cmd("FLUSHDB").query_async(&mut conn).await;
        if let Err(e) = result {
            self.transport_failure("FLUSHDB", &e)?;
        }

        self.inner.local.rebuild().await;

        self.inner
            .publisher
            .publish_invalidation(
                self.inner.codec.as_ref(),
                vec![self.inner.namer.clear_all_sentinel()],
            )
            .await;
        self.inner.stats.publishes.fetch_add(1, Ordering::Relaxed);

        if self.inner.options.enable_logging {
            info!("Cleared Redis database and all local tiers");
        }

        Ok(())
    }

    /// Drop the local tier on this instance and on every peer.
    ///
    /// Peers receive the same sentinel as for [`clear_all`](Self::clear_all)
    /// and cannot distinguish the two; Redis itself is untouched.
    pub async fn flush_local_caches(&self) -> Result<()> {
        self.ensure_live()?;

        self.inner.local.rebuild().await;

        self.inner
            .publisher
            .publish_invalidation(
                self.inner.codec.as_ref(),
                vec![self.inner.namer.clear_all_sentinel()],
            )
            .await;
        self.inner.stats.publishes.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    // ===== Lifecycle, introspection =====

    /// Shut the engine down: the bus subscription ends and every further
    /// public operation fails with [`CacheError::Disposed`].
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.subscriber.shutdown();
        }
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            reads: self.inner.stats.reads.load(Ordering::Relaxed),
            local_hits: self.inner.stats.local_hits.load(Ordering::Relaxed),
            redis_hits: self.inner.stats.redis_hits.load(Ordering::Relaxed),
            misses: self.inner.stats.misses.load(Ordering::Relaxed),
            publishes: self.inner.stats.publishes.load(Ordering::Relaxed),
            in_flight_requests: self.inner.in_flight.len(),
        }
    }

    /// Approximate entry count of the local tier (test and monitoring aid).
    pub async fn local_entry_count(&self) -> u64 {
        self.inner.local.entry_count().await
    }
}
