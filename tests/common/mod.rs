//! Common utilities for integration tests
//!
//! Tests require a reachable Redis; the connection string comes from the
//! `REDIS_URL` environment variable (default `redis://127.0.0.1:6379`).
//! Each test uses its own random group name so concurrently running tests
//! never share keys or channels.

#![allow(dead_code)]

use hybrid_redis_cache::{HybridCache, HybridCacheOptions};
use std::sync::Once;
use std::time::Duration;

/// Upper bound on one bus round-trip in the test environment
pub const PROPAGATION_WAIT: Duration = Duration::from_millis(250);

static TRACING: Once = Once::new();

/// Install a tracing subscriber once per test binary (`RUST_LOG` controls
/// verbosity)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Generate a unique group name so tests do not see each other's traffic
pub fn unique_group(prefix: &str) -> String {
    format!("{}-{}", prefix, rand::random::<u32>())
}

/// Default options for a test engine in the given group
pub fn test_options(group: &str) -> HybridCacheOptions {
    HybridCacheOptions::new(group)
        .with_redis_connect_string(redis_url())
        .with_back_channel_name(format!("{group}:back-channel"))
        .with_default_local_expiration(Duration::from_secs(60))
        .with_default_distributed_expiration(Duration::from_secs(120))
}

/// One engine in a fresh group
pub async fn setup_engine(prefix: &str) -> HybridCache {
    init_tracing();
    let group = unique_group(prefix);
    HybridCache::new(test_options(&group))
        .await
        .expect("Redis must be reachable for integration tests")
}

/// Two cooperating engines sharing one fresh group
pub async fn setup_pair(prefix: &str) -> (HybridCache, HybridCache) {
    init_tracing();
    let group = unique_group(prefix);
    let a = HybridCache::new(test_options(&group))
        .await
        .expect("Redis must be reachable for integration tests");
    let b = HybridCache::new(test_options(&group))
        .await
        .expect("Redis must be reachable for integration tests");
    (a, b)
}

/// Wait one bus round-trip
pub async fn propagate() {
    tokio::time::sleep(PROPAGATION_WAIT).await;
}

/// Test data shared across integration tests
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct User {
        pub id: u64,
        pub name: String,
        pub email: String,
    }

    impl User {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                name: format!("User {id}"),
                email: format!("user{id}@example.com"),
            }
        }
    }
}
