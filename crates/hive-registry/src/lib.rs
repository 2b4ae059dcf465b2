//! `hive-registry` — job registry and claim protocol on a watchable key-value store.
//!
//! # Overview
//!
//! Job definitions, payloads and machine assignments live under a namespace
//! prefix in a coordination store. Any number of agents read and write them
//! through a [`Registry`]; none of them is in charge. Who may schedule a job
//! is decided by TTL-bound claims backed by the store's conditional writes.
//! An [`EventStream`] turns the store's raw mutations into lifecycle events.
//!
//! # Keys
//!
//! | Key                          | Value                    |
//! |------------------------------|--------------------------|
//! | `<prefix>/job/<name>/object` | JSON-encoded `Job`       |
//! | `<prefix>/job/<name>/target` | machine boot id          |
//! | `<prefix>/payload/<name>`    | JSON-encoded `JobPayload`|
//! | `<prefix>/job-<name>`        | claim holder, with TTL   |
//!
//! # Events
//!
//! | Notification                 | Event             |
//! |------------------------------|-------------------|
//! | `set` on `.../object`        | `EventJobCreated` |
//! | `set` on `.../target`        | `EventJobScheduled` |
//! | `delete`/`expire` on `.../target` | `EventJobStopped` |

mod claim;
pub mod codec;
pub mod error;
pub mod event;
pub mod keys;
pub mod registry;
pub mod store;
pub mod stream;

use std::sync::Arc;

use hive_core::config::{StoreBackend, StoreConfig};

pub use error::{RegistryError, Result};
pub use event::{Event, EventKind, StopCause};
pub use keys::KeySchema;
pub use registry::{LogErr, Registry};
pub use store::{Action, MemoryStore, SqliteStore, Store, WatchResponse};
pub use stream::EventStream;

/// Build the store backend named in `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
    };
    tracing::info!(backend = ?config.backend, "coordination store opened");
    Ok(store)
}
