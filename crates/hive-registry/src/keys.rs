//! Mapping from job and payload names onto store paths.
//!
//! ```text
//! <prefix>/job/<name>/object   -> encoded Job
//! <prefix>/job/<name>/target   -> raw machine boot id
//! <prefix>/payload/<name>      -> encoded JobPayload
//! <prefix>/job-<name>          -> claim holder, TTL-bearing
//! ```

use crate::error::{RegistryError, Result};

const JOB_DIR: &str = "job";
const PAYLOAD_DIR: &str = "payload";
const OBJECT_SEGMENT: &str = "object";
const TARGET_SEGMENT: &str = "target";
const CLAIM_PREFIX: &str = "job-";

/// Reject names that would not map onto exactly one path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Which record under a job directory a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKeyKind {
    Object,
    Target,
}

/// A store key recognised as belonging to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobKey<'a> {
    pub name: &'a str,
    pub kind: JobKeyKind,
}

/// Path builder rooted at a namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Normalised: either empty or `/segment[/segment...]` without a trailing slash.
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn jobs_root(&self) -> String {
        format!("{}/{JOB_DIR}", self.prefix)
    }

    pub fn payloads_root(&self) -> String {
        format!("{}/{PAYLOAD_DIR}", self.prefix)
    }

    pub fn job_object_path(&self, name: &str) -> String {
        format!("{}/{name}/{OBJECT_SEGMENT}", self.jobs_root())
    }

    pub fn job_target_path(&self, name: &str) -> String {
        format!("{}/{name}/{TARGET_SEGMENT}", self.jobs_root())
    }

    pub fn payload_path(&self, name: &str) -> String {
        format!("{}/{name}", self.payloads_root())
    }

    pub fn claim_path(&self, name: &str) -> String {
        format!("{}/{CLAIM_PREFIX}{name}", self.prefix)
    }

    /// Recognise `<prefix>/job/<name>/object` and `<prefix>/job/<name>/target`.
    ///
    /// Anything else, including keys outside the namespace, yields `None`.
    pub fn parse_job_key<'a>(&self, key: &'a str) -> Option<JobKey<'a>> {
        let rest = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(JOB_DIR)?
            .strip_prefix('/')?;
        let (name, segment) = rest.split_once('/')?;
        validate_name(name).ok()?;
        let kind = match segment {
            OBJECT_SEGMENT => JobKeyKind::Object,
            TARGET_SEGMENT => JobKeyKind::Target,
            _ => return None,
        };
        Some(JobKey { name, kind })
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new(hive_core::config::DEFAULT_PREFIX)
    }
}
