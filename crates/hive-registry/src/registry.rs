use std::sync::Arc;

use hive_core::config::RegistryConfig;
use hive_core::{Job, JobPayload, Machine};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::codec;
use crate::error::{RegistryError, Result};
use crate::keys::{validate_name, KeySchema};
use crate::store::Store;

/// Jobs, payloads and target assignments stored in the coordination store.
///
/// Holds no state besides the store handle: every read goes to the store, so
/// results are as fresh as the store itself. Clones share the handle.
///
/// Reads come in two forms. `try_*` returns `Ok(None)` for an absent key and
/// `Err` for a store or decode failure. The plain form logs that failure and
/// reports the record as absent, so a polling agent never fails on a
/// transient hiccup.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
    keys: KeySchema,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, keys: KeySchema) -> Self {
        Self { store, keys }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &RegistryConfig) -> Self {
        Self::new(store, KeySchema::new(&config.prefix))
    }

    pub fn keys(&self) -> &KeySchema {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // --- payloads -----------------------------------------------------------

    #[instrument(skip(self))]
    pub fn try_list_payloads(&self) -> Result<Vec<JobPayload>> {
        let nodes = match self.store.list(&self.keys.payloads_root()) {
            Ok(nodes) => nodes,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let payloads = nodes
            .into_iter()
            .filter(|node| !node.dir)
            .filter_map(|node| match codec::decode::<JobPayload>(&node.value) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    debug!(key = %node.key, "skipping undecodable payload: {e}");
                    None
                }
            })
            .collect();
        Ok(payloads)
    }

    pub fn list_payloads(&self) -> Vec<JobPayload> {
        self.try_list_payloads().unwrap_or_else(|e| {
            warn!("failed to list payloads: {e}");
            Vec::new()
        })
    }

    #[instrument(skip(self))]
    pub fn try_get_payload(&self, name: &str) -> Result<Option<JobPayload>> {
        if validate_name(name).is_err() {
            return Ok(None);
        }
        self.read_record(&self.keys.payload_path(name))
    }

    pub fn get_payload(&self, name: &str) -> Option<JobPayload> {
        collapse("get payload", name, self.try_get_payload(name))
    }

    /// Upsert a payload under its name.
    #[instrument(skip(self, payload), fields(name = %payload.name))]
    pub fn create_payload(&self, payload: &JobPayload) -> Result<()> {
        validate_name(&payload.name)?;
        let value = codec::encode(payload)?;
        self.store
            .set(&self.keys.payload_path(&payload.name), &value, None)?;
        debug!("payload stored");
        Ok(())
    }

    /// Remove a payload. Removing one that does not exist is not an error.
    #[instrument(skip(self))]
    pub fn destroy_payload(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match self.store.delete(&self.keys.payload_path(name), false) {
            Ok(()) => {
                debug!("payload removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- jobs ---------------------------------------------------------------

    /// Every job with a decodable object record.
    ///
    /// Costs one listing plus one read per job. Only a failed listing is an
    /// error; a job whose read fails is logged and left out.
    #[instrument(skip(self))]
    pub fn try_list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for name in self.job_names()? {
            match self.try_get_job(&name) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(RegistryError::Codec(e)) => {
                    debug!(job = %name, "skipping undecodable job: {e}");
                }
                Err(e) => warn!(job = %name, "skipping unreadable job: {e}"),
            }
        }
        Ok(jobs)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.try_list_jobs().unwrap_or_else(|e| {
            warn!("failed to list jobs: {e}");
            Vec::new()
        })
    }

    /// Jobs whose current target is `machine`.
    #[instrument(skip(self), fields(machine = %machine))]
    pub fn try_list_jobs_by_machine(&self, machine: &Machine) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for job in self.try_list_jobs()? {
            match self.try_get_job_target(&job.name) {
                Ok(Some(target)) if &target == machine => jobs.push(job),
                Ok(_) => {}
                Err(e) => warn!(job = %job.name, "skipping job with unreadable target: {e}"),
            }
        }
        Ok(jobs)
    }

    pub fn list_jobs_by_machine(&self, machine: &Machine) -> Vec<Job> {
        self.try_list_jobs_by_machine(machine).unwrap_or_else(|e| {
            warn!(machine = %machine, "failed to list jobs by machine: {e}");
            Vec::new()
        })
    }

    #[instrument(skip(self))]
    pub fn try_get_job(&self, name: &str) -> Result<Option<Job>> {
        if validate_name(name).is_err() {
            return Ok(None);
        }
        self.read_record(&self.keys.job_object_path(name))
    }

    pub fn get_job(&self, name: &str) -> Option<Job> {
        collapse("get job", name, self.try_get_job(name))
    }

    /// Upsert a job's object record. Does not touch its target.
    #[instrument(skip(self, job), fields(name = %job.name))]
    pub fn create_job(&self, job: &Job) -> Result<()> {
        validate_name(&job.name)?;
        let value = codec::encode(job)?;
        self.store
            .set(&self.keys.job_object_path(&job.name), &value, None)?;
        debug!("job stored");
        Ok(())
    }

    /// The machine a job is currently scheduled to, if any.
    #[instrument(skip(self))]
    pub fn try_get_job_target(&self, name: &str) -> Result<Option<Machine>> {
        if validate_name(name).is_err() {
            return Ok(None);
        }
        match self.store.get(&self.keys.job_target_path(name)) {
            Ok(node) => Ok(Some(codec::machine_from_value(&node.value))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_job_target(&self, name: &str) -> Option<Machine> {
        collapse("get job target", name, self.try_get_job_target(name))
    }

    /// Point a job's target at the machine with boot id `machine`.
    ///
    /// Last writer wins; callers coordinate through [`Registry::claim_job`].
    #[instrument(skip(self))]
    pub fn schedule_job(&self, name: &str, machine: &str) -> Result<()> {
        validate_name(name)?;
        self.store
            .set(&self.keys.job_target_path(name), machine, None)?;
        debug!("job scheduled");
        Ok(())
    }

    /// Remove a job's target. The object record stays. Stopping an
    /// unscheduled job is not an error.
    #[instrument(skip(self))]
    pub fn stop_job(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match self.store.delete(&self.keys.job_target_path(name), true) {
            Ok(()) => {
                debug!("job stopped");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // --- helpers ------------------------------------------------------------

    fn job_names(&self) -> Result<Vec<String>> {
        match self.store.list(&self.keys.jobs_root()) {
            Ok(nodes) => Ok(nodes
                .iter()
                .filter(|node| node.dir)
                .map(|node| node.name().to_string())
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key) {
            Ok(node) => codec::decode(&node.value).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Log a failed read and report the record as absent.
fn collapse<T>(op: &str, name: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(found) => found,
        Err(RegistryError::Codec(e)) => {
            debug!(op, name, "record failed to decode: {e}");
            None
        }
        Err(e) => {
            warn!(op, name, "registry read failed: {e}");
            None
        }
    }
}

/// Fire-and-forget for registry writes: log the failure and move on.
pub trait LogErr {
    fn log_err(self, op: &str);
}

impl<T> LogErr for Result<T> {
    fn log_err(self, op: &str) {
        if let Err(e) = self {
            warn!(op, code = e.code(), "registry write failed: {e}");
        }
    }
}
