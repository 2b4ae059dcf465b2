//! In-process coordination store.
//!
//! Everything lives in a `BTreeMap` behind an `RwLock`, so state is shared by
//! every handle in the process and lost when it exits. Suitable for tests and
//! single-process deployments.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use super::{children_of, dir_base, expiry_after, is_live, Action, Node, Store, WatchResponse};
use crate::error::{RegistryError, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
    modified_index: u64,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Entry>,
    index: u64,
}

impl State {
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        self.nodes
            .get(key)
            .filter(|entry| is_live(entry.expires_at, now))
    }

    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }
}

pub struct MemoryStore {
    state: RwLock<State>,
    events: broadcast::Sender<WatchResponse>,
}

fn poison_err<T>(_: PoisonError<T>) -> RegistryError {
    RegistryError::LockPoisoned
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(super::WATCH_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            events,
        }
    }

    /// Publish while the write lock is still held so watchers observe
    /// mutations in commit order.
    fn emit(&self, action: Action, key: &str, value: String, modified_index: u64) {
        trace!(%action, key, modified_index, "watch notification");
        // No subscribers is fine.
        let _ = self.events.send(WatchResponse {
            action,
            key: key.to_string(),
            value,
            modified_index,
        });
    }

    /// Turn a stale entry at `key` into an `expire` notification before it
    /// is overwritten, so watchers never miss the expiry.
    fn expire_stale(&self, state: &mut State, key: &str, now: DateTime<Utc>) {
        let stale = state
            .nodes
            .get(key)
            .is_some_and(|entry| !is_live(entry.expires_at, now));
        if stale {
            if let Some(entry) = state.nodes.remove(key) {
                let index = state.next_index();
                self.emit(Action::Expire, key, entry.value, index);
            }
        }
    }

    fn write(
        &self,
        state: &mut State,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) {
        let index = state.next_index();
        state.nodes.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry_after(now, ttl),
                modified_index: index,
            },
        );
        self.emit(Action::Set, key, value.to_string(), index);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Node> {
        let state = self.state.read().map_err(poison_err)?;
        let entry = state
            .live(key, Utc::now())
            .ok_or_else(|| RegistryError::NotFound { key: key.to_string() })?;
        Ok(Node {
            key: key.to_string(),
            value: entry.value.clone(),
            dir: false,
            modified_index: entry.modified_index,
            expires_at: entry.expires_at,
        })
    }

    fn list(&self, dir: &str) -> Result<Vec<Node>> {
        let state = self.state.read().map_err(poison_err)?;
        let now = Utc::now();
        let base = dir_base(dir);
        let leaves = state
            .nodes
            .range(base.clone()..)
            .take_while(|(key, _)| key.starts_with(base.as_str()))
            .filter(|(_, entry)| is_live(entry.expires_at, now))
            .map(|(key, entry)| Node {
                key: key.clone(),
                value: entry.value.clone(),
                dir: false,
                modified_index: entry.modified_index,
                expires_at: entry.expires_at,
            });
        let children = children_of(dir, leaves);
        if children.is_empty() {
            return Err(RegistryError::NotFound { key: dir.to_string() });
        }
        Ok(children)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();
        self.expire_stale(&mut state, key, now);
        self.write(&mut state, key, value, ttl, now);
        Ok(())
    }

    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();
        self.expire_stale(&mut state, key, now);
        if state.nodes.contains_key(key) {
            return Err(RegistryError::AlreadyExists { key: key.to_string() });
        }
        self.write(&mut state, key, value, ttl, now);
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        prev_value: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();
        self.expire_stale(&mut state, key, now);
        match state.nodes.get(key) {
            None => return Err(RegistryError::NotFound { key: key.to_string() }),
            Some(entry) if entry.value != prev_value => {
                return Err(RegistryError::CompareFailed { key: key.to_string() })
            }
            Some(_) => {}
        }
        self.write(&mut state, key, value, ttl, now);
        Ok(())
    }

    fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();
        let mut doomed = vec![key.to_string()];
        if recursive {
            let base = dir_base(key);
            doomed.extend(
                state
                    .nodes
                    .range(base.clone()..)
                    .take_while(|(k, _)| k.starts_with(base.as_str()))
                    .map(|(k, _)| k.clone()),
            );
        }

        let mut removed = 0;
        for k in doomed {
            self.expire_stale(&mut state, &k, now);
            if let Some(entry) = state.nodes.remove(&k) {
                let index = state.next_index();
                self.emit(Action::Delete, &k, entry.value, index);
                removed += 1;
            }
        }

        if removed == 0 {
            return Err(RegistryError::NotFound { key: key.to_string() });
        }
        Ok(())
    }

    fn reap_expired(&self) -> Result<usize> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Utc::now();
        let stale: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, entry)| !is_live(entry.expires_at, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.expire_stale(&mut state, key, now);
        }
        Ok(stale.len())
    }

    fn watch(&self) -> broadcast::Receiver<WatchResponse> {
        self.events.subscribe()
    }
}
