use serde::{Deserialize, Serialize};
use std::fmt;

/// A cluster node as seen by the registry.
///
/// Only the boot id is known at this layer. Addresses and metadata belong to
/// the membership subsystem and are joined in by whoever needs them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Machine {
    /// Stable identifier of the machine for the lifetime of its boot.
    pub boot_id: String,
}

impl Machine {
    pub fn new(boot_id: impl Into<String>) -> Self {
        Self {
            boot_id: boot_id.into(),
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.boot_id)
    }
}

impl From<&str> for Machine {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A named, reusable execution artifact (e.g. a unit definition).
///
/// `kind` and `value` are opaque to the registry and carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl JobPayload {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// A named unit of work. The name is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    /// Execution artifact for this job, if one has been attached.
    #[serde(default)]
    pub payload: Option<JobPayload>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload),
        }
    }
}
