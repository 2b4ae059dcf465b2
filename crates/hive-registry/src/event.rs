//! Lifecycle events derived from raw watch notifications.
//!
//! Each filter looks at exactly one [`WatchResponse`] and either recognises a
//! transition or returns `None`. Non-matching notifications are the normal
//! case, not an error. The filters are mutually exclusive, so running all
//! three yields at most one event per notification.

use hive_core::{Job, Machine};
use tracing::debug;

use crate::codec;
use crate::keys::{JobKeyKind, KeySchema};
use crate::store::{Action, WatchResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    JobCreated,
    JobScheduled,
    JobStopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobCreated => "EventJobCreated",
            EventKind::JobScheduled => "EventJobScheduled",
            EventKind::JobStopped => "EventJobStopped",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job lost its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopCause {
    /// The target was removed by an explicit stop.
    Deleted,
    /// The target's TTL elapsed.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    JobCreated(Job),
    JobScheduled { job_name: String, machine: Machine },
    JobStopped { job_name: String, cause: StopCause },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::JobCreated(_) => EventKind::JobCreated,
            Event::JobScheduled { .. } => EventKind::JobScheduled,
            Event::JobStopped { .. } => EventKind::JobStopped,
        }
    }

    pub fn job_name(&self) -> &str {
        match self {
            Event::JobCreated(job) => &job.name,
            Event::JobScheduled { job_name, .. } | Event::JobStopped { job_name, .. } => job_name,
        }
    }

    /// Present only for `JobScheduled`.
    pub fn machine(&self) -> Option<&Machine> {
        match self {
            Event::JobScheduled { machine, .. } => Some(machine),
            _ => None,
        }
    }
}

/// `set` on `<jobs>/<name>/object` with a decodable job.
pub fn filter_job_created(keys: &KeySchema, resp: &WatchResponse) -> Option<Event> {
    if resp.action != Action::Set {
        return None;
    }
    let key = keys.parse_job_key(&resp.key)?;
    if key.kind != JobKeyKind::Object {
        return None;
    }
    match codec::decode::<Job>(&resp.value) {
        Ok(job) => Some(Event::JobCreated(job)),
        Err(e) => {
            debug!(key = %resp.key, "failed to deserialize job: {e}");
            None
        }
    }
}

/// `set` on `<jobs>/<name>/target`; the value is the machine's boot id.
pub fn filter_job_scheduled(keys: &KeySchema, resp: &WatchResponse) -> Option<Event> {
    if resp.action != Action::Set {
        return None;
    }
    let key = keys.parse_job_key(&resp.key)?;
    if key.kind != JobKeyKind::Target {
        return None;
    }
    Some(Event::JobScheduled {
        job_name: key.name.to_string(),
        machine: codec::machine_from_value(&resp.value),
    })
}

/// `delete` or `expire` of `<jobs>/<name>/target`.
pub fn filter_job_stopped(keys: &KeySchema, resp: &WatchResponse) -> Option<Event> {
    let cause = match resp.action {
        Action::Delete => StopCause::Deleted,
        Action::Expire => StopCause::Expired,
        Action::Set => return None,
    };
    let key = keys.parse_job_key(&resp.key)?;
    if key.kind != JobKeyKind::Target {
        return None;
    }
    Some(Event::JobStopped {
        job_name: key.name.to_string(),
        cause,
    })
}

/// Run every filter over `resp` and return the event it produced, if any.
pub fn translate(keys: &KeySchema, resp: &WatchResponse) -> Option<Event> {
    filter_job_created(keys, resp)
        .or_else(|| filter_job_scheduled(keys, resp))
        .or_else(|| filter_job_stopped(keys, resp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::JobPayload;

    fn keys() -> KeySchema {
        KeySchema::new("/hive")
    }

    fn notification(action: Action, key: &str, value: &str) -> WatchResponse {
        WatchResponse::new(action, key, value)
    }

    #[test]
    fn created_from_valid_object() {
        let job = Job::with_payload("foo", JobPayload::new("foo.service", "unit", "body"));
        let value = codec::encode(&job).unwrap();
        let resp = notification(Action::Set, "/hive/job/foo/object", &value);

        let event = filter_job_created(&keys(), &resp).unwrap();
        assert_eq!(event.kind(), EventKind::JobCreated);
        assert_eq!(event, Event::JobCreated(job));
        assert!(event.machine().is_none());
    }

    #[test]
    fn created_ignores_garbage() {
        let resp = notification(Action::Set, "/hive/job/foo/object", "{not json");
        assert_eq!(filter_job_created(&keys(), &resp), None);
        assert_eq!(translate(&keys(), &resp), None);
    }

    #[test]
    fn created_ignores_payload_named_object() {
        let value = codec::encode(&Job::new("x")).unwrap();
        let resp = notification(Action::Set, "/hive/payload/object", &value);
        assert_eq!(filter_job_created(&keys(), &resp), None);
    }

    #[test]
    fn created_ignores_delete() {
        let value = codec::encode(&Job::new("foo")).unwrap();
        let resp = notification(Action::Delete, "/hive/job/foo/object", &value);
        assert_eq!(filter_job_created(&keys(), &resp), None);
    }

    #[test]
    fn scheduled_carries_name_and_machine() {
        let resp = notification(Action::Set, "/hive/job/foo/target", "m1");
        let event = filter_job_scheduled(&keys(), &resp).unwrap();
        assert_eq!(event.kind().as_str(), "EventJobScheduled");
        assert_eq!(event.job_name(), "foo");
        assert_eq!(event.machine(), Some(&Machine::new("m1")));
    }

    #[test]
    fn scheduled_ignores_object_key() {
        let resp = notification(Action::Set, "/hive/job/foo/object", "m1");
        assert_eq!(filter_job_scheduled(&keys(), &resp), None);
    }

    #[test]
    fn stopped_on_delete_and_expire() {
        let deleted = notification(Action::Delete, "/hive/job/foo/target", "");
        let expired = notification(Action::Expire, "/hive/job/foo/target", "m1");

        assert_eq!(
            filter_job_stopped(&keys(), &deleted),
            Some(Event::JobStopped {
                job_name: "foo".into(),
                cause: StopCause::Deleted
            })
        );
        let event = filter_job_stopped(&keys(), &expired).unwrap();
        assert_eq!(event.kind(), EventKind::JobStopped);
        assert_eq!(event.job_name(), "foo");
        assert!(event.machine().is_none());
    }

    #[test]
    fn stopped_ignores_set() {
        let resp = notification(Action::Set, "/hive/job/foo/target", "m1");
        assert_eq!(filter_job_stopped(&keys(), &resp), None);
    }

    #[test]
    fn claim_keys_produce_nothing() {
        for action in [Action::Set, Action::Delete, Action::Expire] {
            let resp = notification(action, "/hive/job-foo", "m1");
            assert_eq!(translate(&keys(), &resp), None);
        }
    }

    #[test]
    fn at_most_one_filter_matches() {
        let value = codec::encode(&Job::new("foo")).unwrap();
        let samples = [
            notification(Action::Set, "/hive/job/foo/object", &value),
            notification(Action::Set, "/hive/job/foo/target", "m1"),
            notification(Action::Delete, "/hive/job/foo/target", ""),
            notification(Action::Expire, "/hive/job/foo/target", ""),
            notification(Action::Delete, "/hive/job/foo/object", ""),
        ];
        for resp in &samples {
            let hits = [
                filter_job_created(&keys(), resp),
                filter_job_scheduled(&keys(), resp),
                filter_job_stopped(&keys(), resp),
            ]
            .into_iter()
            .flatten()
            .count();
            assert!(hits <= 1, "{resp:?} matched {hits} filters");
        }
    }
}
