// Registry behaviour shared by every store backend.

use std::sync::Arc;
use std::time::Duration;

use hive_core::{Job, JobPayload, Machine};
use hive_registry::{KeySchema, MemoryStore, Registry, RegistryError, SqliteStore, Store};

fn registries() -> Vec<(&'static str, Registry)> {
    let memory: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sqlite: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
    vec![
        ("memory", Registry::new(memory, KeySchema::new("/hive"))),
        ("sqlite", Registry::new(sqlite, KeySchema::new("/hive"))),
    ]
}

fn unit(name: &str) -> JobPayload {
    JobPayload::new(name, "systemd-unit", "[Service]\nExecStart=/usr/bin/sleep 60")
}

#[test]
fn job_round_trip() {
    for (backend, reg) in registries() {
        let job = Job::with_payload("web", unit("web.service"));
        reg.create_job(&job).unwrap();
        assert_eq!(reg.get_job("web"), Some(job.clone()), "{backend}");
        assert_eq!(reg.try_get_job("web").unwrap(), Some(job), "{backend}");
    }
}

#[test]
fn create_job_overwrites() {
    for (backend, reg) in registries() {
        reg.create_job(&Job::new("web")).unwrap();
        let updated = Job::with_payload("web", unit("web-v2.service"));
        reg.create_job(&updated).unwrap();
        assert_eq!(reg.get_job("web"), Some(updated), "{backend}");
        assert_eq!(reg.list_jobs().len(), 1, "{backend}");
    }
}

#[test]
fn payload_round_trip_and_destroy() {
    for (backend, reg) in registries() {
        let payload = unit("web.service");
        reg.create_payload(&payload).unwrap();
        assert_eq!(reg.get_payload("web.service"), Some(payload), "{backend}");

        reg.destroy_payload("web.service").unwrap();
        assert_eq!(reg.get_payload("web.service"), None, "{backend}");
        // Destroying twice is harmless.
        reg.destroy_payload("web.service").unwrap();
    }
}

#[test]
fn list_payloads() {
    for (backend, reg) in registries() {
        assert!(reg.list_payloads().is_empty(), "{backend}");
        reg.create_payload(&unit("a.service")).unwrap();
        reg.create_payload(&unit("b.service")).unwrap();

        let mut names: Vec<_> = reg.list_payloads().into_iter().map(|p| p.name).collect();
        names.sort();
        assert_eq!(names, vec!["a.service", "b.service"], "{backend}");
    }
}

#[test]
fn absent_records_are_none() {
    for (backend, reg) in registries() {
        assert_eq!(reg.get_job("nonexistent"), None, "{backend}");
        assert_eq!(reg.get_payload("nonexistent"), None, "{backend}");
        assert_eq!(reg.get_job_target("nonexistent"), None, "{backend}");
        assert!(reg.try_get_job("nonexistent").unwrap().is_none(), "{backend}");
        assert!(reg.list_jobs().is_empty(), "{backend}");
    }
}

#[test]
fn target_lifecycle() {
    for (backend, reg) in registries() {
        reg.create_job(&Job::new("web")).unwrap();
        assert_eq!(reg.get_job_target("web"), None, "{backend}");

        reg.schedule_job("web", "m1").unwrap();
        assert_eq!(reg.get_job_target("web"), Some(Machine::new("m1")), "{backend}");

        reg.schedule_job("web", "m2").unwrap();
        assert_eq!(reg.get_job_target("web"), Some(Machine::new("m2")), "{backend}");

        reg.stop_job("web").unwrap();
        assert_eq!(reg.get_job_target("web"), None, "{backend}");
        // The object record survives a stop.
        assert!(reg.get_job("web").is_some(), "{backend}");
        // Stopping an unscheduled job is a no-op.
        reg.stop_job("web").unwrap();
    }
}

#[test]
fn list_jobs_by_machine_filters_on_target() {
    for (backend, reg) in registries() {
        for name in ["a", "b", "c"] {
            reg.create_job(&Job::new(name)).unwrap();
        }
        reg.schedule_job("a", "X").unwrap();
        reg.schedule_job("b", "Y").unwrap();

        let on_x: Vec<_> = reg
            .list_jobs_by_machine(&Machine::new("X"))
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(on_x, vec!["a"], "{backend}");
        assert!(reg.list_jobs_by_machine(&Machine::new("Z")).is_empty(), "{backend}");
        assert_eq!(reg.list_jobs().len(), 3, "{backend}");
    }
}

#[test]
fn list_jobs_skips_undecodable_objects() {
    for (backend, reg) in registries() {
        reg.create_job(&Job::new("good")).unwrap();
        reg.store()
            .set(&reg.keys().job_object_path("bad"), "{broken", None)
            .unwrap();
        // A target without an object is not a job either.
        reg.schedule_job("orphan", "m1").unwrap();

        let names: Vec<_> = reg.list_jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names, vec!["good"], "{backend}");

        assert_eq!(reg.get_job("bad"), None, "{backend}");
        assert!(
            matches!(reg.try_get_job("bad"), Err(RegistryError::Codec(_))),
            "{backend}"
        );
    }
}

#[test]
fn names_with_separators_are_rejected() {
    for (backend, reg) in registries() {
        for bad in ["", "a/b", "..", "."] {
            assert!(
                matches!(reg.create_job(&Job::new(bad)), Err(RegistryError::InvalidName(_))),
                "{backend}: {bad:?}"
            );
            assert!(reg.create_payload(&unit(bad)).is_err(), "{backend}: {bad:?}");
            assert!(reg.schedule_job(bad, "m1").is_err(), "{backend}: {bad:?}");
            assert_eq!(reg.get_job(bad), None, "{backend}: {bad:?}");
            assert!(!reg.claim_job(bad, &Machine::new("m1"), Duration::from_secs(1)));
        }
        assert!(reg.list_jobs().is_empty(), "{backend}");
    }
}

#[test]
fn claim_is_exclusive_and_refreshable() {
    for (backend, reg) in registries() {
        let (m1, m2) = (Machine::new("m1"), Machine::new("m2"));
        let ttl = Duration::from_secs(30);

        assert!(reg.claim_job("web", &m1, ttl), "{backend}");
        assert!(!reg.claim_job("web", &m2, ttl), "{backend}");
        assert!(reg.claim_job("web", &m1, ttl), "{backend}");
        assert_eq!(reg.claim_holder("web"), Some(m1.clone()), "{backend}");

        // Claims on different jobs are independent.
        assert!(reg.claim_job("db", &m2, ttl), "{backend}");
        // Claiming never moves the target.
        assert_eq!(reg.get_job_target("web"), None, "{backend}");
    }
}

#[test]
fn claim_lapses_after_ttl() {
    for (backend, reg) in registries() {
        let (m1, m2) = (Machine::new("m1"), Machine::new("m2"));
        let ttl = Duration::from_millis(50);

        assert!(reg.claim_job("web", &m1, ttl), "{backend}");
        assert!(!reg.claim_job("web", &m2, ttl), "{backend}");
        std::thread::sleep(Duration::from_millis(120));

        assert_eq!(reg.claim_holder("web"), None, "{backend}");
        assert!(reg.claim_job("web", &m2, ttl), "{backend}");
        assert!(!reg.claim_job("web", &m1, ttl), "{backend}");
    }
}

#[test]
fn refresh_extends_claim() {
    for (backend, reg) in registries() {
        let (m1, m2) = (Machine::new("m1"), Machine::new("m2"));
        let ttl = Duration::from_millis(300);

        assert!(reg.claim_job("web", &m1, ttl), "{backend}");
        std::thread::sleep(Duration::from_millis(200));
        assert!(reg.claim_job("web", &m1, ttl), "{backend}");
        std::thread::sleep(Duration::from_millis(200));
        // 400ms after the first claim, but only 200ms after the refresh.
        assert!(!reg.claim_job("web", &m2, ttl), "{backend}");
    }
}

#[test]
fn concurrent_claims_have_one_winner() {
    for (backend, reg) in registries() {
        let winners = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let reg = reg.clone();
                    s.spawn(move || {
                        reg.claim_job("web", &Machine::new(format!("m{i}")), Duration::from_secs(30))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(winners, 1, "{backend}");
    }
}
