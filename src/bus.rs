//! Coherence bus - cross-instance invalidation and cache warming
//!
//! Two Redis Pub/Sub channels keep the per-instance local tiers approximately
//! consistent: the invalidation channel broadcasts keys to drop, the
//! back-channel broadcasts freshly written values so peers can warm their
//! local tiers without a Redis round-trip.
//!
//! Redis delivers every published message to all subscribers, including the
//! publisher itself. Each message therefore carries the originating instance
//! id, and the subscriber drops its own echo; without this a local write
//! would be overwritten by its own broadcast.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::traits::CacheCodec;

/// Pause before re-subscribing after a dropped Pub/Sub connection
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

/// Wall-clock milliseconds since the Unix epoch
pub(crate) fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Invalidation payload: keys every peer must drop from its local tier
///
/// When the first key is the group's clear-all sentinel, recipients rebuild
/// their entire local tier instead of removing individual keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheInvalidationMessage {
    /// Originating instance, used to suppress self-echo
    pub instance_id: String,
    /// Non-empty list of namespaced keys
    pub keys: Vec<String>,
}

impl CacheInvalidationMessage {
    pub fn new(instance_id: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            keys,
        }
    }

    /// True when this message orders a full local-tier drop.
    #[must_use]
    pub fn is_clear_all(&self, sentinel: &str) -> bool {
        self.keys.first().is_some_and(|k| k == sentinel)
    }
}

/// Sync payload: a freshly written entry peers may use to warm their tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSyncMessage {
    /// Originating instance, used to suppress self-echo
    pub event_creator_id: String,
    /// Namespaced key
    pub key: String,
    /// Serialized value, exactly as it sits in Redis
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    /// Wall-clock expiry of the entry in the recipient's local tier
    pub expires_at_unix_ms: u64,
}

impl CacheSyncMessage {
    pub fn new(
        event_creator_id: impl Into<String>,
        key: impl Into<String>,
        value: Vec<u8>,
        local_ttl: Duration,
    ) -> Self {
        Self {
            event_creator_id: event_creator_id.into(),
            key: key.into(),
            value,
            expires_at_unix_ms: unix_ms_now() + local_ttl.as_millis() as u64,
        }
    }

    /// Remaining lifetime of the carried entry, `None` once already expired.
    ///
    /// Recipients trust this wall-clock expiry as-is; there is no further
    /// freshness validation.
    #[must_use]
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let now = unix_ms_now();
        if self.expires_at_unix_ms > now {
            Some(Duration::from_millis(self.expires_at_unix_ms - now))
        } else {
            None
        }
    }
}

/// Event delivered to the engine's bus handler
#[derive(Debug)]
pub enum BusEvent {
    /// A peer invalidated keys (or the whole tier via the sentinel)
    Invalidation(CacheInvalidationMessage),
    /// A peer wrote an entry and broadcast it for warming
    Sync(CacheSyncMessage),
    /// The Pub/Sub connection was restored after a drop; messages may have
    /// been missed in between
    Reconnected,
}

/// Shared bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Literal invalidation channel name (`<group>:invalidate`)
    pub invalidation_channel: String,
    /// Literal back-channel name
    pub back_channel: String,
    /// This instance's id, stamped on every outgoing message
    pub instance_id: String,
    /// Publish retry ceiling
    pub connect_retry: u32,
    /// Base delay of the linear publish back-off
    pub publish_retry_base: Duration,
    /// Emit diagnostic events
    pub enable_logging: bool,
}

/// Fire-and-forget publisher over the shared data connection
///
/// Publish failures never surface to callers: each publish gets a bounded
/// linear-back-off retry budget (`publish_retry_base × attempt`, up to
/// `connect_retry` attempts) and is then dropped.
pub struct BusPublisher {
    connection: ConnectionManager,
    config: Arc<BusConfig>,
}

impl BusPublisher {
    pub fn new(connection: ConnectionManager, config: Arc<BusConfig>) -> Self {
        Self { connection, config }
    }

    /// Publish an invalidation message, stamped with this instance's id.
    pub async fn publish_invalidation<C: CacheCodec>(
        &self,
        codec: &C,
        keys: Vec<String>,
    ) {
        let msg = CacheInvalidationMessage::new(self.config.instance_id.clone(), keys);
        match codec.serialize(&msg) {
            Ok(payload) => {
                self.publish(&self.config.invalidation_channel, payload).await;
            }
            Err(e) => {
                if self.config.enable_logging {
                    error!(error = %e, "Failed to serialize invalidation message");
                }
            }
        }
    }

    /// Publish a sync message on the back-channel.
    pub async fn publish_sync<C: CacheCodec>(&self, codec: &C, msg: &CacheSyncMessage) {
        match codec.serialize(msg) {
            Ok(payload) => {
                self.publish(&self.config.back_channel, payload).await;
            }
            Err(e) => {
                if self.config.enable_logging {
                    error!(error = %e, key = %msg.key, "Failed to serialize sync message");
                }
            }
        }
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut conn = self.connection.clone();
            let result: redis::RedisResult<()> = redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload.as_slice())
                .query_async(&mut conn)
                .await;

            match result {
                Ok(()) => {
                    if self.config.enable_logging {
                        debug!(channel = %channel, attempt, "Published bus message");
                    }
                    return;
                }
                Err(e) if attempt < self.config.connect_retry => {
                    if self.config.enable_logging {
                        warn!(
                            channel = %channel,
                            attempt,
                            error = %e,
                            "Bus publish failed, retrying"
                        );
                    }
                    tokio::time::sleep(self.config.publish_retry_base * attempt).await;
                }
                Err(e) => {
                    if self.config.enable_logging {
                        error!(
                            channel = %channel,
                            attempts = attempt,
                            error = %e,
                            "Bus publish dropped after exhausting retries"
                        );
                    }
                    return;
                }
            }
        }
    }
}

/// Decode one raw Pub/Sub message into a [`BusEvent`]
///
/// Returns `Ok(None)` for this instance's own echo and for unrelated
/// channels.
fn decode_event<C: CacheCodec>(
    channel: &str,
    payload: &[u8],
    config: &BusConfig,
    codec: &C,
) -> Result<Option<BusEvent>> {
    if channel == config.invalidation_channel {
        let msg: CacheInvalidationMessage = codec
            .deserialize(payload)
            .context("Failed to deserialize invalidation message")?;
        if msg.instance_id == config.instance_id {
            return Ok(None);
        }
        Ok(Some(BusEvent::Invalidation(msg)))
    } else if channel == config.back_channel {
        let msg: CacheSyncMessage = codec
            .deserialize(payload)
            .context("Failed to deserialize sync message")?;
        if msg.event_creator_id == config.instance_id {
            return Ok(None);
        }
        Ok(Some(BusEvent::Sync(msg)))
    } else {
        Ok(None)
    }
}

/// Background subscriber for both coherence channels
///
/// Spawns a task that subscribes to the invalidation channel and the
/// back-channel on one Pub/Sub connection and feeds decoded events to the
/// engine's handler. On connection errors the task reconnects after a pause;
/// a successful re-subscribe after a drop is reported as
/// [`BusEvent::Reconnected`].
pub struct BusSubscriber {
    client: redis::Client,
    config: Arc<BusConfig>,
    shutdown_tx: broadcast::Sender<()>,
}

impl BusSubscriber {
    pub fn new(redis_url: &str, config: Arc<BusConfig>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client for bus subscriber")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            client,
            config,
            shutdown_tx,
        })
    }

    /// Start the subscriber background task.
    ///
    /// The returned handle resolves once the task shuts down. The first
    /// successful subscription is awaited before this method returns, so the
    /// engine is never serving while unsubscribed.
    pub async fn start<C, F, Fut>(
        &self,
        codec: Arc<C>,
        handler: F,
    ) -> Result<tokio::task::JoinHandle<()>>
    where
        C: CacheCodec + 'static,
        F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // Barrier for the initial subscribe: public operations must not run
        // before the engine is listening.
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<()>>();

        let handle = tokio::spawn(async move {
            let handler = Arc::new(handler);
            let mut ready_tx = Some(ready_tx);
            let mut connected_before = false;

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut subscribed = false;
                let run = Self::run_loop(
                    &client,
                    &config,
                    Arc::clone(&codec),
                    Arc::clone(&handler),
                    &mut shutdown_rx,
                    connected_before,
                    &mut subscribed,
                    &mut ready_tx,
                )
                .await;
                if subscribed {
                    connected_before = true;
                }

                match run {
                    Ok(()) => break,
                    Err(e) => {
                        if let Some(tx) = ready_tx.take() {
                            // Initial subscribe failed; surface to the
                            // constructor instead of retrying silently.
                            let _ = tx.send(Err(e));
                            return;
                        }
                        if config.enable_logging {
                            error!(error = %e, "Bus subscriber error, reconnecting");
                        }
                        tokio::select! {
                            () = tokio::time::sleep(RECONNECT_PAUSE) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }

            if config.enable_logging {
                info!("Bus subscriber stopped");
            }
        });

        ready_rx
            .await
            .context("Bus subscriber task ended before subscribing")??;

        Ok(handle)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop<C, F, Fut>(
        client: &redis::Client,
        config: &BusConfig,
        codec: Arc<C>,
        handler: Arc<F>,
        shutdown_rx: &mut broadcast::Receiver<()>,
        connected_before: bool,
        subscribed: &mut bool,
        ready_tx: &mut Option<tokio::sync::oneshot::Sender<Result<()>>>,
    ) -> Result<()>
    where
        C: CacheCodec,
        F: Fn(BusEvent) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .context("Failed to get pubsub connection")?;

        pubsub
            .subscribe(&config.invalidation_channel)
            .await
            .context("Failed to subscribe to invalidation channel")?;
        pubsub
            .subscribe(&config.back_channel)
            .await
            .context("Failed to subscribe to back-channel")?;

        *subscribed = true;
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Ok(()));
        }

        if config.enable_logging {
            info!(
                invalidation = %config.invalidation_channel,
                back_channel = %config.back_channel,
                "Subscribed to coherence channels"
            );
        }

        if connected_before {
            // The gap between drop and re-subscribe may have swallowed
            // invalidations; let the engine decide whether to flush.
            if let Err(e) = handler(BusEvent::Reconnected).await {
                if config.enable_logging {
                    error!(error = %e, "Reconnect handler failed");
                }
            }
        }

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(anyhow::anyhow!("Pub/Sub message stream ended"));
                    };

                    let channel = msg.get_channel_name().to_string();
                    let payload: Vec<u8> = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            if config.enable_logging {
                                warn!(error = %e, "Failed to read bus payload");
                            }
                            continue;
                        }
                    };

                    let event = match decode_event(&channel, &payload, config, codec.as_ref()) {
                        Ok(Some(event)) => event,
                        Ok(None) => continue,
                        Err(e) => {
                            if config.enable_logging {
                                warn!(channel = %channel, error = %e, "Dropped undecodable bus message");
                            }
                            continue;
                        }
                    };

                    if let Err(e) = handler(event).await {
                        if config.enable_logging {
                            error!(error = %e, "Bus event handler failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }

    /// Signal the subscriber task to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::JsonCodec;

    fn test_config() -> BusConfig {
        BusConfig {
            invalidation_channel: "app:invalidate".to_string(),
            back_channel: "app:back-channel".to_string(),
            instance_id: "instance-a".to_string(),
            connect_retry: 3,
            publish_retry_base: Duration::from_millis(100),
            enable_logging: false,
        }
    }

    #[test]
    fn invalidation_message_round_trips() {
        let codec = JsonCodec;
        let msg = CacheInvalidationMessage::new("i-1", vec!["app:a".into(), "app:b".into()]);

        let bytes = codec.serialize(&msg).unwrap();
        let parsed: CacheInvalidationMessage = codec.deserialize(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn sync_message_round_trips() {
        let codec = JsonCodec;
        let msg = CacheSyncMessage::new("i-1", "app:u:1", b"\"alice\"".to_vec(), Duration::from_secs(30));

        let bytes = codec.serialize(&msg).unwrap();
        let parsed: CacheSyncMessage = codec.deserialize(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn sentinel_first_key_means_clear_all() {
        let msg = CacheInvalidationMessage::new("i-1", vec!["app:*FLUSHDB*".into()]);
        assert!(msg.is_clear_all("app:*FLUSHDB*"));

        let msg = CacheInvalidationMessage::new("i-1", vec!["app:k".into(), "app:*FLUSHDB*".into()]);
        assert!(!msg.is_clear_all("app:*FLUSHDB*"));

        let empty = CacheInvalidationMessage::new("i-1", vec![]);
        assert!(!empty.is_clear_all("app:*FLUSHDB*"));
    }

    #[test]
    fn sync_remaining_ttl_tracks_wall_clock() {
        let live = CacheSyncMessage::new("i-1", "app:k", b"1".to_vec(), Duration::from_secs(60));
        let remaining = live.remaining_ttl().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(58));

        let expired = CacheSyncMessage {
            event_creator_id: "i-1".to_string(),
            key: "app:k".to_string(),
            value: b"1".to_vec(),
            expires_at_unix_ms: unix_ms_now().saturating_sub(1_000),
        };
        assert_eq!(expired.remaining_ttl(), None);
    }

    #[test]
    fn own_echo_is_dropped() {
        let config = test_config();
        let codec = JsonCodec;

        let own = CacheInvalidationMessage::new("instance-a", vec!["app:k".into()]);
        let bytes = codec.serialize(&own).unwrap();
        let event = decode_event("app:invalidate", &bytes, &config, &codec).unwrap();
        assert!(event.is_none());

        let own_sync = CacheSyncMessage::new("instance-a", "app:k", b"1".to_vec(), Duration::from_secs(5));
        let bytes = codec.serialize(&own_sync).unwrap();
        let event = decode_event("app:back-channel", &bytes, &config, &codec).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn foreign_messages_decode_by_channel() {
        let config = test_config();
        let codec = JsonCodec;

        let inval = CacheInvalidationMessage::new("instance-b", vec!["app:k".into()]);
        let bytes = codec.serialize(&inval).unwrap();
        match decode_event("app:invalidate", &bytes, &config, &codec).unwrap() {
            Some(BusEvent::Invalidation(msg)) => assert_eq!(msg.keys, vec!["app:k"]),
            other => panic!("Wrong event: {other:?}"),
        }

        let sync = CacheSyncMessage::new("instance-b", "app:k", b"1".to_vec(), Duration::from_secs(5));
        let bytes = codec.serialize(&sync).unwrap();
        match decode_event("app:back-channel", &bytes, &config, &codec).unwrap() {
            Some(BusEvent::Sync(msg)) => assert_eq!(msg.key, "app:k"),
            other => panic!("Wrong event: {other:?}"),
        }

        // Unknown channel is ignored rather than an error.
        let event = decode_event("elsewhere", &bytes, &config, &codec).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn garbage_payload_is_an_error_not_a_panic() {
        let config = test_config();
        let codec = JsonCodec;
        assert!(decode_event("app:invalidate", b"not json", &config, &codec).is_err());
    }
}
