use std::sync::Arc;
use std::time::Duration;

use hive_core::config::EventsConfig;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::event::{translate, Event};
use crate::keys::KeySchema;
use crate::store::{Store, WatchResponse};

/// Watch loop: turns the store's raw notification stream into [`Event`]s.
///
/// Also drives TTL expiry by reaping the store on a fixed interval, so lapsed
/// targets surface as `JobStopped` without any participant deleting them.
pub struct EventStream {
    store: Arc<dyn Store>,
    keys: KeySchema,
    watch_rx: broadcast::Receiver<WatchResponse>,
    events_tx: mpsc::Sender<Event>,
    reap_interval: Duration,
}

impl EventStream {
    /// Subscribes immediately, so mutations made before [`EventStream::run`]
    /// starts are still delivered.
    pub fn new(store: Arc<dyn Store>, keys: KeySchema, events_tx: mpsc::Sender<Event>) -> Self {
        let watch_rx = store.watch();
        Self {
            store,
            keys,
            watch_rx,
            events_tx,
            reap_interval: Duration::from_millis(hive_core::config::DEFAULT_REAP_INTERVAL_MS),
        }
    }

    /// Build a stream and the receiving end of its event channel.
    pub fn channel(
        store: Arc<dyn Store>,
        keys: KeySchema,
        config: &EventsConfig,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let stream = Self::new(store, keys, tx)
            .with_reap_interval(Duration::from_millis(config.reap_interval_ms));
        (stream, rx)
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Main loop. Runs until `shutdown` broadcasts `true` or the store's
    /// watch stream closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("event stream started");

        let mut reap = tokio::time::interval(self.reap_interval);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                recv = self.watch_rx.recv() => match recv {
                    Ok(resp) => self.forward(&resp),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged; notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("watch stream closed");
                        break;
                    }
                },
                _ = reap.tick() => match self.store.reap_expired() {
                    Ok(0) => {}
                    Ok(n) => debug!(count = n, "expired keys reaped"),
                    Err(e) => error!("reap failed: {e}"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("event stream shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn forward(&self, resp: &WatchResponse) {
        let Some(event) = translate(&self.keys, resp) else {
            return;
        };
        debug!(kind = %event.kind(), job = event.job_name(), "event");
        // try_send never blocks the loop; a slow consumer loses events.
        if self.events_tx.try_send(event).is_err() {
            warn!(key = %resp.key, "event channel full or closed; event dropped");
        }
    }
}
