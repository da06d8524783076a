//! Key naming for the shared instance group
//!
//! Every key written to Redis or referenced in a bus message carries the
//! group prefix, so several logical caches can share one Redis deployment
//! without colliding. Raw user keys never reach the wire.

/// Reserved key suffix meaning "drop the entire local tier".
///
/// The namespaced form is never stored in Redis and never returned by user
/// reads; it only travels as the first key of an invalidation message.
const CLEAR_ALL_SUFFIX: &str = "*FLUSHDB*";

/// Forms namespaced keys, patterns, and the clear-all sentinel for one
/// instance group.
#[derive(Debug, Clone)]
pub struct KeyNamer {
    group: String,
}

impl KeyNamer {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }

    /// Group name shared by all cooperating instances.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Namespace a user key: `<group>:<user-key>`.
    #[must_use]
    pub fn name(&self, user_key: &str) -> String {
        format!("{}:{}", self.group, user_key)
    }

    /// The reserved namespaced key meaning "drop the entire local tier".
    #[must_use]
    pub fn clear_all_sentinel(&self) -> String {
        format!("{}:{}", self.group, CLEAR_ALL_SUFFIX)
    }

    /// Namespace a glob pattern: prepend `*`, append `*` unless the pattern
    /// already ends in `*`, then prefix the group.
    #[must_use]
    pub fn pattern(&self, user_pattern: &str) -> String {
        if user_pattern.ends_with('*') {
            format!("{}:*{}", self.group, user_pattern)
        } else {
            format!("{}:*{}*", self.group, user_pattern)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_user_keys() {
        let namer = KeyNamer::new("app");
        assert_eq!(namer.name("u:1"), "app:u:1");
        assert_eq!(namer.name(""), "app:");
    }

    #[test]
    fn sentinel_is_group_scoped() {
        let namer = KeyNamer::new("app");
        assert_eq!(namer.clear_all_sentinel(), "app:*FLUSHDB*");

        let other = KeyNamer::new("other");
        assert_ne!(namer.clear_all_sentinel(), other.clear_all_sentinel());
    }

    #[test]
    fn patterns_are_wrapped_and_prefixed() {
        let namer = KeyNamer::new("app");
        assert_eq!(namer.pattern("a:"), "app:*a:*");
        assert_eq!(namer.pattern("user:*"), "app:*user:*");
        assert_eq!(namer.pattern("*"), "app:**");
    }
}
