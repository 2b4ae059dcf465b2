//! `hive-core` — domain values, configuration and errors shared by every
//! hive crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::HiveConfig;
pub use error::{HiveError, Result};
pub use types::{Job, JobPayload, Machine};
