//! Contract the registry needs from the coordination store, plus two backends.
//!
//! The store is the single source of truth and of ordering. It must offer
//! atomic conditional writes, per-key TTL and an ordered watch stream; the
//! registry builds everything else on top of those three primitives.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Notifications buffered per watcher before it starts lagging.
pub const WATCH_CAPACITY: usize = 1024;

/// Kind of mutation reported on the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Set,
    Delete,
    /// The key's TTL elapsed and the store removed it.
    Expire,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Set => "set",
            Action::Delete => "delete",
            Action::Expire => "expire",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "set" => Ok(Action::Set),
            "delete" => Ok(Action::Delete),
            "expire" => Ok(Action::Expire),
            other => Err(format!("unknown watch action: {other}")),
        }
    }
}

/// One mutation of one key, as delivered by [`Store::watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub action: Action,
    /// Full path of the mutated key.
    pub key: String,
    /// New value for `set`; the last known value for `delete`/`expire`.
    pub value: String,
    pub modified_index: u64,
}

impl WatchResponse {
    pub fn new(action: Action, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action,
            key: key.into(),
            value: value.into(),
            modified_index: 0,
        }
    }
}

/// A key (or implicit directory) read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    /// Empty for directories.
    pub value: String,
    pub dir: bool,
    pub modified_index: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Node {
    fn directory(key: String) -> Self {
        Self {
            key,
            value: String::new(),
            dir: true,
            modified_index: 0,
            expires_at: None,
        }
    }

    /// Final path segment of the key.
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Synchronous client of the coordination store.
///
/// Implementations must be safe to share across threads; every call is one
/// round-trip and any serialisation happens inside the store.
pub trait Store: Send + Sync {
    /// Read a live key. `NotFound` if absent or expired.
    fn get(&self, key: &str) -> Result<Node>;

    /// Immediate children of `dir`, sorted by key. A child with descendants
    /// is returned as a directory node. `NotFound` if `dir` has no children.
    fn list(&self, dir: &str) -> Result<Vec<Node>>;

    /// Unconditional upsert.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if no live value exists, else `AlreadyExists`.
    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write only if the live value equals `prev_value`, else `CompareFailed`
    /// (or `NotFound` when there is no live value at all).
    fn compare_and_swap(
        &self,
        key: &str,
        prev_value: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Remove `key`, and with `recursive` everything below it. `NotFound` if
    /// nothing was removed.
    fn delete(&self, key: &str, recursive: bool) -> Result<()>;

    /// Drop every key whose TTL has elapsed, emitting one `expire` each.
    fn reap_expired(&self) -> Result<usize>;

    /// Subscribe to the ordered stream of mutations from now on.
    fn watch(&self) -> broadcast::Receiver<WatchResponse>;
}

pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = ttl?;
    Some(
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    )
}

pub(crate) fn is_live(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(at) => at > now,
        None => true,
    }
}

/// Fold a key-sorted run of leaf nodes into the immediate children of `dir`.
pub(crate) fn children_of(dir: &str, sorted: impl IntoIterator<Item = Node>) -> Vec<Node> {
    let base = dir_base(dir);
    let mut out: Vec<Node> = Vec::new();
    for node in sorted {
        let Some(rest) = node.key.strip_prefix(base.as_str()) else {
            continue;
        };
        match rest.split_once('/') {
            None => out.push(node),
            Some((child, _)) => {
                let child_key = format!("{base}{child}");
                // Keys sharing a prefix are contiguous once sorted.
                if out.last().map(|n| n.key.as_str()) != Some(child_key.as_str()) {
                    out.push(Node::directory(child_key));
                }
            }
        }
    }
    out
}

/// `dir` with exactly one trailing slash.
pub(crate) fn dir_base(dir: &str) -> String {
    format!("{}/", dir.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str) -> Node {
        Node {
            key: key.to_string(),
            value: "v".to_string(),
            dir: false,
            modified_index: 1,
            expires_at: None,
        }
    }

    #[test]
    fn action_wire_strings() {
        for action in [Action::Set, Action::Delete, Action::Expire] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("update".parse::<Action>().is_err());
    }

    #[test]
    fn children_groups_directories() {
        let nodes = vec![
            leaf("/h/job/a/object"),
            leaf("/h/job/a/target"),
            leaf("/h/job/b-c/object"),
            leaf("/h/job/b/object"),
            leaf("/h/job/top"),
        ];
        let children = children_of("/h/job", nodes);
        let keys: Vec<_> = children.iter().map(|n| (n.key.as_str(), n.dir)).collect();
        assert_eq!(
            keys,
            vec![
                ("/h/job/a", true),
                ("/h/job/b-c", true),
                ("/h/job/b", true),
                ("/h/job/top", false),
            ]
        );
        assert_eq!(children[0].name(), "a");
    }

    #[test]
    fn expiry_is_absent_without_ttl() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, None), None);
        let at = expiry_after(now, Some(Duration::from_secs(5))).unwrap();
        assert!(is_live(Some(at), now));
        assert!(!is_live(Some(at), at));
        assert!(is_live(None, now));
    }
}
