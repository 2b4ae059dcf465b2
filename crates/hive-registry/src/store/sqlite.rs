//! SQLite-backed coordination store.
//!
//! Gives the same semantics as [`MemoryStore`](super::MemoryStore) but keeps
//! keys on disk, so a single-host cluster survives restarts. Expiry times are
//! stored as unix milliseconds; a NULL `expires_at` means the key never expires.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{children_of, dir_base, expiry_after, Action, Node, Store, WatchResponse};
use crate::error::{RegistryError, Result};

/// Initialise the store schema in `conn`.
///
/// Creates the `nodes` table (idempotent) and an index on `expires_at` so the
/// reaper does not scan live keys.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            key             TEXT    NOT NULL PRIMARY KEY,
            value           TEXT    NOT NULL,
            expires_at      INTEGER,            -- unix millis or NULL
            modified_index  INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_nodes_expires_at ON nodes (expires_at);
        ",
    )?;
    Ok(())
}

struct Inner {
    conn: Connection,
    index: u64,
}

pub struct SqliteStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<WatchResponse>,
}

/// One stored row, before it is turned into a [`Node`].
struct Row {
    key: String,
    value: String,
    expires_at: Option<i64>,
    modified_index: u64,
}

impl Row {
    fn into_node(self) -> Node {
        Node {
            key: self.key,
            value: self.value,
            dir: false,
            modified_index: self.modified_index,
            expires_at: self.expires_at.and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok(Row {
        key: row.get(0)?,
        value: row.get(1)?,
        expires_at: row.get(2)?,
        modified_index: row.get::<_, i64>(3)? as u64,
    })
}

const LIVE: &str = "(expires_at IS NULL OR expires_at > ?2)";

/// Upper bound for a range scan over every key starting with `base`.
///
/// `base` always ends in `/`; `0` is the next code point, so `[base, upper)`
/// covers exactly the keys below the directory.
fn range_upper(base: &str) -> String {
    format!("{}0", base.trim_end_matches('/'))
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        let index: i64 =
            conn.query_row("SELECT COALESCE(MAX(modified_index), 0) FROM nodes", [], |row| {
                row.get(0)
            })?;
        let (events, _) = broadcast::channel(super::WATCH_CAPACITY);
        debug!(index, "sqlite store opened");
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                index: index as u64,
            }),
            events,
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| RegistryError::LockPoisoned)
    }

    fn emit(&self, action: Action, key: &str, value: String, modified_index: u64) {
        trace!(%action, key, modified_index, "watch notification");
        let _ = self.events.send(WatchResponse {
            action,
            key: key.to_string(),
            value,
            modified_index,
        });
    }

    fn read(tx: &Connection, key: &str, now_ms: i64) -> Result<Option<Row>> {
        let row = tx
            .query_row(
                &format!(
                    "SELECT key, value, expires_at, modified_index FROM nodes
                     WHERE key = ?1 AND {LIVE}"
                ),
                rusqlite::params![key, now_ms],
                row_from_sql,
            )
            .optional()?;
        Ok(row)
    }

    /// Remove `key` if its TTL has elapsed and report it as expired.
    ///
    /// Returns the notification to emit once the transaction commits.
    fn expire_stale(
        tx: &Transaction<'_>,
        index: &mut u64,
        key: &str,
        now_ms: i64,
    ) -> Result<Option<WatchResponse>> {
        let stale: Option<String> = tx
            .query_row(
                "DELETE FROM nodes WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2
                 RETURNING value",
                rusqlite::params![key, now_ms],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stale.map(|value| {
            *index += 1;
            WatchResponse {
                action: Action::Expire,
                key: key.to_string(),
                value,
                modified_index: *index,
            }
        }))
    }

    fn upsert(
        tx: &Transaction<'_>,
        index: &mut u64,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<WatchResponse> {
        *index += 1;
        let expires_at = expiry_after(now, ttl).map(|at| at.timestamp_millis());
        tx.execute(
            "INSERT INTO nodes (key, value, expires_at, modified_index)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                modified_index = excluded.modified_index",
            rusqlite::params![key, value, expires_at, *index as i64],
        )?;
        Ok(WatchResponse {
            action: Action::Set,
            key: key.to_string(),
            value: value.to_string(),
            modified_index: *index,
        })
    }

    /// Run a conditional write inside one transaction, then publish the
    /// notifications it produced in order.
    fn write_with<F>(&self, key: &str, value: &str, ttl: Option<Duration>, check: F) -> Result<()>
    where
        F: FnOnce(Option<&Row>) -> Result<()>,
    {
        let mut guard = self.lock()?;
        let Inner { conn, index } = &mut *guard;
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let start_index = *index;

        let tx = conn.transaction()?;
        let result = (|| -> Result<Vec<WatchResponse>> {
            let mut out = Vec::with_capacity(2);
            out.extend(Self::expire_stale(&tx, index, key, now_ms)?);
            let current = Self::read(&tx, key, now_ms)?;
            check(current.as_ref())?;
            out.push(Self::upsert(&tx, index, key, value, ttl, now)?);
            Ok(out)
        })();

        match result {
            Ok(notifications) => {
                tx.commit()?;
                for n in notifications {
                    self.emit(n.action, &n.key, n.value, n.modified_index);
                }
                Ok(())
            }
            Err(e) => {
                *index = start_index;
                Err(e)
            }
        }
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> Result<Node> {
        let guard = self.lock()?;
        Self::read(&guard.conn, key, Utc::now().timestamp_millis())?
            .map(Row::into_node)
            .ok_or_else(|| RegistryError::NotFound { key: key.to_string() })
    }

    fn list(&self, dir: &str) -> Result<Vec<Node>> {
        let guard = self.lock()?;
        let base = dir_base(dir);
        let mut stmt = guard.conn.prepare_cached(&format!(
            "SELECT key, value, expires_at, modified_index FROM nodes
             WHERE key >= ?1 AND key < ?3 AND {LIVE}
             ORDER BY key"
        ))?;
        let rows: Vec<Row> = stmt
            .query_map(
                rusqlite::params![base, Utc::now().timestamp_millis(), range_upper(&base)],
                row_from_sql,
            )?
            .collect::<rusqlite::Result<_>>()?;
        let children = children_of(dir, rows.into_iter().map(Row::into_node));
        if children.is_empty() {
            return Err(RegistryError::NotFound { key: dir.to_string() });
        }
        Ok(children)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.write_with(key, value, ttl, |_| Ok(()))
    }

    fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.write_with(key, value, ttl, |current| match current {
            Some(_) => Err(RegistryError::AlreadyExists { key: key.to_string() }),
            None => Ok(()),
        })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        prev_value: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.write_with(key, value, ttl, |current| match current {
            None => Err(RegistryError::NotFound { key: key.to_string() }),
            Some(row) if row.value != prev_value => {
                Err(RegistryError::CompareFailed { key: key.to_string() })
            }
            Some(_) => Ok(()),
        })
    }

    fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut guard = self.lock()?;
        let Inner { conn, index } = &mut *guard;
        let now_ms = Utc::now().timestamp_millis();

        let tx = conn.transaction()?;
        let removed: Vec<(String, String, Option<i64>)> = {
            let base = dir_base(key);
            let mut stmt = tx.prepare(
                "DELETE FROM nodes
                 WHERE key = ?1 OR (?2 AND key >= ?3 AND key < ?4)
                 RETURNING key, value, expires_at",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![key, recursive, base, range_upper(&base)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        tx.commit()?;

        // RETURNING order is unspecified; report in key order.
        let mut removed = removed;
        removed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut live = 0;
        for (k, value, expires_at) in removed {
            *index += 1;
            let action = match expires_at {
                Some(at) if at <= now_ms => Action::Expire,
                _ => {
                    live += 1;
                    Action::Delete
                }
            };
            self.emit(action, &k, value, *index);
        }

        if live == 0 {
            return Err(RegistryError::NotFound { key: key.to_string() });
        }
        Ok(())
    }

    fn reap_expired(&self) -> Result<usize> {
        let mut guard = self.lock()?;
        let Inner { conn, index } = &mut *guard;
        let now_ms = Utc::now().timestamp_millis();

        let tx = conn.transaction()?;
        let mut reaped: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "DELETE FROM nodes WHERE expires_at IS NOT NULL AND expires_at <= ?1
                 RETURNING key, value",
            )?;
            let rows = stmt
                .query_map([now_ms], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        tx.commit()?;

        reaped.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in &reaped {
            *index += 1;
            self.emit(Action::Expire, key, value.clone(), *index);
        }
        Ok(reaped.len())
    }

    fn watch(&self) -> broadcast::Receiver<WatchResponse> {
        self.events.subscribe()
    }
}
