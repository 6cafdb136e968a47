//! Consumer mount contract.
//!
//! A consumer describes its subscriptions once, as a setup function of the
//! current [`TopicFactory`] (`None` while offline). [`Mount`] runs that
//! function on creation and again whenever the transport generation or the
//! online flag changes. Before each rerun the previous subscriptions are
//! disposed, so a consumer never has two live sets at once. Dropping the
//! mount disposes everything synchronously.

use std::sync::Arc;

use parking_lot::Mutex;
use rosdeck_middleware::{ConnectionManager, ConnectionSnapshot, Subscription, TopicFactory};
use rosdeck_types::{ConnectionStatus, DeckError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a rerun depends on: the transport epoch and whether it is online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountKey {
    pub epoch: u64,
    pub online: bool,
}

impl MountKey {
    fn of(snapshot: &ConnectionSnapshot) -> Self {
        Self {
            epoch: snapshot.epoch,
            online: snapshot.status == ConnectionStatus::Connected,
        }
    }
}

type Setup = Box<dyn FnMut(Option<TopicFactory>) -> Result<Vec<Subscription>, DeckError> + Send>;

struct Slot {
    setup: Setup,
    active: Vec<Subscription>,
    last_error: Option<DeckError>,
    runs: u64,
}

impl Slot {
    fn rerun(&mut self, manager: &ConnectionManager, label: &str) {
        for mut sub in self.active.drain(..) {
            sub.dispose();
        }
        let factory = manager.topic_factory();
        self.runs += 1;
        match (self.setup)(factory) {
            Ok(subs) => {
                debug!(consumer = label, subscriptions = subs.len(), "consumer mounted");
                self.active = subs;
                self.last_error = None;
            }
            Err(e) => {
                warn!(consumer = label, error = %e, "consumer subscription failed");
                self.last_error = Some(e);
            }
        }
    }
}

/// Live mount of one consumer.
pub struct Mount {
    label: String,
    slot: Arc<Mutex<Slot>>,
    watcher: Option<JoinHandle<()>>,
}

impl Mount {
    /// Mount `setup` against `manager`. Must be called inside a Tokio
    /// runtime; the initial run happens before this returns.
    pub fn new<F>(manager: &ConnectionManager, label: impl Into<String>, setup: F) -> Self
    where
        F: FnMut(Option<TopicFactory>) -> Result<Vec<Subscription>, DeckError> + Send + 'static,
    {
        let label = label.into();
        let mut snapshots = manager.watch();
        let mut key = MountKey::of(&snapshots.borrow_and_update());

        let slot = Arc::new(Mutex::new(Slot {
            setup: Box::new(setup),
            active: Vec::new(),
            last_error: None,
            runs: 0,
        }));
        slot.lock().rerun(manager, &label);

        let watcher = {
            let slot = Arc::clone(&slot);
            let manager = manager.clone();
            let label = label.clone();
            tokio::spawn(async move {
                while snapshots.changed().await.is_ok() {
                    let next = MountKey::of(&snapshots.borrow_and_update());
                    if next != key {
                        key = next;
                        slot.lock().rerun(&manager, &label);
                    }
                }
            })
        };

        Self {
            label,
            slot,
            watcher: Some(watcher),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of live subscriptions.
    pub fn active(&self) -> usize {
        self.slot.lock().active.len()
    }

    /// How many times setup has run.
    pub fn runs(&self) -> u64 {
        self.slot.lock().runs
    }

    /// Failure of the most recent setup, if it failed.
    pub fn last_error(&self) -> Option<DeckError> {
        self.slot.lock().last_error.clone()
    }

    /// Stop watching and dispose every subscription. Idempotent.
    pub fn unmount(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        for mut sub in self.slot.lock().active.drain(..) {
            sub.dispose();
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_middleware::{ConnectionSettings, LoopbackConnector, Topic};
    use rosdeck_types::msgs::Float32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_manager() -> (LoopbackConnector, ConnectionManager) {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), ConnectionSettings::default());
        (connector, manager)
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn offline_mount_runs_setup_with_no_factory() {
        let (_connector, manager) = make_manager();
        let offline_runs = Arc::new(AtomicUsize::new(0));
        let runs = Arc::clone(&offline_runs);
        let mount = Mount::new(&manager, "probe", move |factory| {
            if factory.is_none() {
                runs.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Vec::new())
        });
        assert_eq!(offline_runs.load(Ordering::SeqCst), 1);
        assert_eq!(mount.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replaces_subscription_instead_of_adding_one() {
        let (connector, manager) = make_manager();
        manager.connect("10.0.0.1").await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mount = Mount::new(&manager, "temperature", move |factory| {
            let Some(factory) = factory else { return Ok(Vec::new()) };
            let counter = Arc::clone(&counter);
            Ok(vec![factory.subscribe(Topic::Temperature, move |_: Float32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })?])
        });
        assert_eq!(mount.active(), 1);

        manager.connect("10.0.0.2").await.unwrap();
        settle().await;

        let peers = connector.peers();
        assert_eq!(mount.active(), 1);
        assert_eq!(peers[1].sent_ops("subscribe").len(), 1);
        peers[1].publish("/imu_temp", serde_json::json!({"data": 30.0}));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_disposes_synchronously() {
        let (connector, manager) = make_manager();
        manager.connect("10.0.0.1").await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut mount = Mount::new(&manager, "temperature", move |factory| {
            let Some(factory) = factory else { return Ok(Vec::new()) };
            let counter = Arc::clone(&counter);
            Ok(vec![factory.subscribe(Topic::Temperature, move |_: Float32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })?])
        });

        mount.unmount();
        connector.last_peer().unwrap().publish("/imu_temp", serde_json::json!({"data": 30.0}));

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(mount.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn going_offline_reruns_setup_without_factory() {
        let (_connector, manager) = make_manager();
        manager.connect("10.0.0.1").await.unwrap();
        let online = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&online);
        let mount = Mount::new(&manager, "probe", move |factory| {
            log.lock().push(factory.is_some());
            Ok(Vec::new())
        });

        manager.shutdown();
        settle().await;

        assert_eq!(online.lock().as_slice(), &[true, false]);
        assert_eq!(mount.runs(), 2);
    }
}
