//! Bincode Codec using `bincode`

use crate::error::{CacheError, Result};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bincode Codec using `bincode`
///
/// Fast, compact binary codec. Not self-describing; all instances sharing a
/// group must use identical value types and codec versions.
#[derive(Debug, Default, Clone)]
pub struct BincodeCodec;

impl CacheCodec for BincodeCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "bincode"
    }
}
