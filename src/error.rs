//! Error types for hybrid cache operations

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error kinds surfaced by the cache engine
///
/// A cache miss is not an error: read operations return `Ok(None)` (or a
/// `false` flag) for missing keys.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Null/empty key, empty key list, or empty bulk input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Redis I/O failure (connect, command, or scan)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Codec failure while encoding or decoding a value or bus payload
    #[error("Serialization failure: {0}")]
    Serialization(String),

    /// The caller-supplied data retriever failed on a cache miss
    #[error("Data retriever failed: {0}")]
    Retrieval(String),

    /// Operation attempted after `dispose`
    #[error("Cache engine has been disposed")]
    Disposed,
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl CacheError {
    /// Reject empty or whitespace-only keys.
    pub(crate) fn check_key(key: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "cache key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Reject empty key collections.
    pub(crate) fn check_keys(keys: &[impl AsRef<str>]) -> Result<()> {
        if keys.is_empty() {
            return Err(CacheError::InvalidArgument(
                "key list must not be empty".to_string(),
            ));
        }
        for key in keys {
            Self::check_key(key.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_invalid_argument() {
        assert!(matches!(
            CacheError::check_key(""),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            CacheError::check_key("   "),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(CacheError::check_key("user:1").is_ok());
    }

    #[test]
    fn empty_key_list_is_invalid_argument() {
        let none: Vec<&str> = vec![];
        assert!(matches!(
            CacheError::check_keys(&none),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(CacheError::check_keys(&["a", "b"]).is_ok());
    }
}
