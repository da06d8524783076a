//! Serialization trait for cache values and bus payloads
//!
//! The engine is generic over a [`CacheCodec`] so users can swap the default
//! JSON codec for MessagePack, bincode, or a custom serializer. A single
//! codec instance handles both user values and coherence-bus messages, so the
//! wire format is uniform across the cluster.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::error::Result;

/// Trait for cache value serialization/deserialization
///
/// Implementations must be `Send + Sync + Debug` so the codec can be shared
/// across tasks and show up in engine debug output.
///
/// # Example: Custom Codec
///
/// ```rust,ignore
/// use hybrid_redis_cache::CacheCodec;
/// use hybrid_redis_cache::error::Result;
/// use serde::{Serialize, de::DeserializeOwned};
///
/// #[derive(Debug)]
/// struct MyCodec;
///
/// impl CacheCodec for MyCodec {
///     fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
///         // your encoding
///     }
///
///     fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
///         // your decoding
///     }
///
///     fn name(&self) -> &'static str {
///         "mycodec"
///     }
/// }
/// ```
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Codec name, used in logging
    fn name(&self) -> &'static str;
}
