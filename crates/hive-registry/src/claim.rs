//! Lease-based mutual exclusion over the right to schedule a job.
//!
//! A claim is the key `<prefix>/job-<name>` holding the claimant's boot id
//! with a TTL. The store's conditional writes are the only enforcement:
//!
//! - no live claim: `create` wins for exactly one contender
//! - live claim held by the caller: `compare_and_swap` refreshes the TTL
//! - live claim held by someone else: denied
//!
//! Claims are never released; they lapse when the holder stops refreshing.
//! Holding a claim does not move the job's target, the caller does that with
//! [`Registry::schedule_job`] afterwards.

use std::time::Duration;

use hive_core::Machine;
use tracing::{debug, instrument, warn};

use crate::codec;
use crate::error::{RegistryError, Result};
use crate::keys::validate_name;
use crate::registry::Registry;
use crate::store::Store;

impl Registry {
    /// Try to acquire or refresh the claim on `name` for `machine`.
    ///
    /// `Ok(false)` means another machine holds a live claim. `Err` is kept
    /// for store failures.
    #[instrument(skip(self, machine), fields(machine = %machine))]
    pub fn try_claim_job(&self, name: &str, machine: &Machine, ttl: Duration) -> Result<bool> {
        validate_name(name)?;
        let key = self.keys().claim_path(name);
        let holder = codec::machine_to_value(machine);
        let store = self.store();

        let acquired = match store.get(&key) {
            Ok(node) if node.value == holder => {
                match store.compare_and_swap(&key, holder, holder, Some(ttl)) {
                    Ok(()) => true,
                    // Lapsed between the read and the swap; start a fresh claim.
                    Err(e) if e.is_not_found() => create_claim(store.as_ref(), &key, holder, ttl)?,
                    Err(RegistryError::CompareFailed { .. }) => false,
                    Err(e) => return Err(e),
                }
            }
            Ok(node) => {
                debug!(holder = %node.value, "job already claimed");
                false
            }
            Err(e) if e.is_not_found() => create_claim(store.as_ref(), &key, holder, ttl)?,
            Err(e) => return Err(e),
        };

        debug!(acquired, "claim attempt finished");
        Ok(acquired)
    }

    /// [`Registry::try_claim_job`] with store failures reported as a denial.
    pub fn claim_job(&self, name: &str, machine: &Machine, ttl: Duration) -> bool {
        self.try_claim_job(name, machine, ttl).unwrap_or_else(|e| {
            warn!(job = name, machine = %machine, "claim attempt failed: {e}");
            false
        })
    }

    /// The machine currently holding a live claim on `name`.
    pub fn claim_holder(&self, name: &str) -> Option<Machine> {
        validate_name(name).ok()?;
        match self.store().get(&self.keys().claim_path(name)) {
            Ok(node) => Some(codec::machine_from_value(&node.value)),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(job = name, "failed to read claim: {e}");
                None
            }
        }
    }
}

fn create_claim(store: &dyn Store, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
    match store.create(key, holder, Some(ttl)) {
        Ok(()) => Ok(true),
        Err(RegistryError::AlreadyExists { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
