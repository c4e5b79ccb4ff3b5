// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Per-call metadata headers.

use serde::{Deserialize, Serialize};

/// The key carrying the current session id on non-exempt calls.
pub const SESSION_ID_KEY: &str = "session-id";

/// The (repeatable) key on which a server reports the resources that
/// participated in the just-completed call.
pub const SAFETY_MONITORED_RESOURCES_KEY: &str = "safety-monitored-resources";

/// The key carrying the caller-correlated operation id.
pub const OPERATION_ID_KEY: &str = "operation-id";

/// The key carrying the `language;version;api-version` client identifier.
pub const CLIENT_VERSION_KEY: &str = "language-client-version";

/// Call metadata: an ordered multimap of lowercase ascii keys to values,
/// carried alongside requests and responses. Keys may repeat; insertion
/// order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    /// Create an empty [`Metadata`].
    pub fn new() -> Self {
        Metadata::default()
    }

    /// Set `key` to `value`, removing any existing entries for `key`.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        let key = key.as_ref().to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value.into()));
    }

    /// Append a value for `key`, keeping any existing entries.
    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((key.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// The first value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether any entry exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Append every entry of `other`.
    pub fn merge(&mut self, other: &Metadata) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over all `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_append_repeats() {
        let mut md = Metadata::new();
        md.insert("Session-Id", "a");
        md.insert("session-id", "b");
        assert_eq!(md.get("session-id"), Some("b"));
        assert_eq!(md.len(), 1);

        md.append(SAFETY_MONITORED_RESOURCES_KEY, "arm1");
        md.append(SAFETY_MONITORED_RESOURCES_KEY, "arm2");
        let all: Vec<_> = md.get_all(SAFETY_MONITORED_RESOURCES_KEY).collect();
        assert_eq!(all, vec!["arm1", "arm2"]);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let mut md = Metadata::new();
        md.insert("Operation-Id", "xyz");
        assert!(md.contains_key("operation-id"));
        assert_eq!(md.get("OPERATION-ID"), Some("xyz"));
    }

    #[test]
    fn merge_keeps_both_sides() {
        let mut a = Metadata::new();
        a.insert("k", "1");
        let mut b = Metadata::new();
        b.append("k", "2");
        a.merge(&b);
        let all: Vec<_> = a.get_all("k").collect();
        assert_eq!(all, vec!["1", "2"]);
    }
}
