use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PREFIX: &str = "/hive";
pub const DEFAULT_CLAIM_TTL_SECS: u64 = 10;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000; // TTL sweep cadence of the event stream

/// Top-level config (hive.toml + HIVE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Namespace every registry key is rooted under.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Lease length used by agents when claiming a job.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            claim_ttl_secs: default_claim_ttl_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn claim_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.claim_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database file, only read by the sqlite backend.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Capacity of the channel events are forwarded on.
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer: default_event_buffer(),
            reap_interval_ms: default_reap_interval_ms(),
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}
fn default_claim_ttl_secs() -> u64 {
    DEFAULT_CLAIM_TTL_SECS
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_reap_interval_ms() -> u64 {
    DEFAULT_REAP_INTERVAL_MS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hive/hive.db", home)
}

impl HiveConfig {
    /// Load config from a TOML file with HIVE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `HIVE_REGISTRY__PREFIX=/prod`.
    /// A missing file is not an error; defaults apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::from(Serialized::defaults(HiveConfig::default()))
                .merge(Toml::file(&path))
                .merge(Env::prefixed("HIVE_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::HiveError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.hive/hive.toml", home)
}
