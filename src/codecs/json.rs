//! JSON Codec using `serde_json`

use crate::error::{CacheError, Result};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
///
/// The default codec. JSON keeps bus payloads and Redis values readable from
/// `redis-cli`, which matters when debugging coherence across instances.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(CacheError::from)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(CacheError::from)
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}
