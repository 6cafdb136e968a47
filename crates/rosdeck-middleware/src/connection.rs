//! Connection Manager – owner of the single transport to the robot bridge.
//!
//! # State machine
//!
//! | From | Event | To |
//! |---|---|---|
//! | `idle` | [`connect`](ConnectionManager::connect) | `connecting` |
//! | `connecting` | transport open | `connected` |
//! | `connecting` | transport error or 10 s timeout | `error` |
//! | `connected` | transport close (or failed keep-alive) | `idle`, then an immediate reconnect |
//! | `error` | backoff elapsed (4 s, 8 s, 16 s; capped at 30 s) | `connecting` |
//!
//! After the last retry fails the manager stays in `error` until the next
//! manual `connect`.
//!
//! One supervisor task per connection generation runs the keep-alive probe
//! and the retry policy. Every `connect` (and [`shutdown`](ConnectionManager::shutdown))
//! starts a new generation: the previous transport is closed, its supervisor
//! is aborted, and an attempt still in flight resolves with
//! [`DeckError::Superseded`] without touching the status.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rosdeck_types::{ConnectionStatus, DeckError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::address;
use crate::factory::{ServiceFactory, TopicFactory};
use crate::registry::{Service, Topic};
use crate::subscription::Subscription;
use crate::transport::{Connector, TransportHandle};

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Default rosbridge port.
pub const DEFAULT_PORT: u16 = 9090;
/// Default robot host.
pub const DEFAULT_HOST: &str = "192.168.1.40";

/// Tunables of the connection lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_retries: u32,
    pub default_host: String,
    pub default_port: u16,
    /// Reject operator input that fails [`address::validate`].
    pub validate_addresses: bool,
    /// Resolve every topic and service under the simulated prefix.
    pub simulated: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(10),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            max_retries: 3,
            default_host: DEFAULT_HOST.to_string(),
            default_port: DEFAULT_PORT,
            validate_addresses: true,
            simulated: false,
        }
    }
}

impl ConnectionSettings {
    /// Delay before retry number `attempt` (1-based): `base · 2^attempt`,
    /// capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_cap, |d| d.min(self.backoff_cap))
    }

    /// URL of the configured default robot.
    pub fn default_url(&self) -> String {
        address::normalize(&self.default_host, self.default_port)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status projection
// ────────────────────────────────────────────────────────────────────────────

/// What observers see of the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    /// Normalised URL of the current or last target.
    pub url: Option<String>,
    /// Incremented every time a new transport becomes `connected`.
    pub epoch: u64,
}

#[derive(Default)]
struct State {
    transport: Option<TransportHandle>,
    supervisor: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    state: Mutex<State>,
    generation: watch::Sender<u64>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    transitions: broadcast::Sender<ConnectionStatus>,
}

impl Shared {
    fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    /// Resolves once `generation` is no longer the current one.
    async fn superseded(&self, generation: u64) {
        let mut rx = self.generation.subscribe();
        let _ = rx.wait_for(|g| *g != generation).await;
    }

    fn publish(&self, update: impl FnOnce(&mut ConnectionSnapshot)) {
        let mut changed_to = None;
        self.snapshot.send_modify(|snap| {
            let before = snap.status;
            update(snap);
            if snap.status != before {
                changed_to = Some(snap.status);
            }
        });
        if let Some(status) = changed_to {
            let _ = self.transitions.send(status);
        }
    }

    /// Start a new generation: tear down the old transport and supervisor.
    fn begin(&self, url: &str) -> u64 {
        let mut generation = 0;
        let previous = {
            let mut state = self.state.lock();
            self.generation.send_modify(|g| {
                *g += 1;
                generation = *g;
            });
            if let Some(task) = state.supervisor.take() {
                task.abort();
            }
            self.publish(|snap| {
                snap.status = ConnectionStatus::Connecting;
                snap.last_error = None;
                snap.url = Some(url.to_string());
            });
            state.transport.take()
        };
        // Closing runs pending service callbacks; keep the state lock free.
        if let Some(old) = previous {
            debug!(transport = old.id(), "closing previous transport");
            old.close();
        }
        generation
    }

    async fn attempt(&self, generation: u64, url: &str) -> Result<TransportHandle, DeckError> {
        let timeout = self.settings.connect_timeout;
        tokio::select! {
            opened = tokio::time::timeout(timeout, self.connector.open(url)) => match opened {
                Ok(result) => result,
                Err(_) => Err(DeckError::ConnectTimeout(timeout)),
            },
            _ = self.superseded(generation) => Err(DeckError::Superseded),
        }
    }

    /// Make `transport` the live one if `generation` is still current.
    fn adopt(&self, generation: u64, transport: &TransportHandle) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            transport.close();
            return false;
        }
        state.transport = Some(transport.clone());
        self.publish(|snap| {
            snap.status = ConnectionStatus::Connected;
            snap.last_error = None;
            snap.epoch += 1;
        });
        true
    }

    fn mark_connecting(&self, generation: u64) -> bool {
        let _state = self.state.lock();
        if !self.is_current(generation) {
            return false;
        }
        self.publish(|snap| snap.status = ConnectionStatus::Connecting);
        true
    }

    fn mark_error(&self, generation: u64, err: &DeckError) {
        let _state = self.state.lock();
        if self.is_current(generation) {
            self.publish(|snap| {
                snap.status = ConnectionStatus::Error;
                snap.last_error = Some(err.to_string());
            });
        }
    }

    fn mark_idle(&self, generation: u64, transport: &TransportHandle) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return false;
        }
        if state.transport.as_ref().is_some_and(|t| t.id() == transport.id()) {
            state.transport = None;
        }
        self.publish(|snap| snap.status = ConnectionStatus::Idle);
        true
    }

    fn live_transport(&self) -> Option<TransportHandle> {
        self.state
            .lock()
            .transport
            .as_ref()
            .filter(|t| t.is_connected())
            .cloned()
    }

    fn teardown(&self) {
        let previous = {
            let mut state = self.state.lock();
            self.generation.send_modify(|g| *g += 1);
            if let Some(task) = state.supervisor.take() {
                task.abort();
            }
            self.publish(|snap| snap.status = ConnectionStatus::Idle);
            state.transport.take()
        };
        if let Some(transport) = previous {
            transport.close();
        }
    }

    // ── Supervisor ──────────────────────────────────────────────────────────

    /// Keep-alive, reconnect and retry loop for one generation.
    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        url: String,
        mut live: Option<TransportHandle>,
    ) {
        // Initial attempt failed: the first retry waits out one backoff step.
        let mut retry_from = 1;
        loop {
            let transport = match live.take() {
                Some(transport) => transport,
                None => match self.reconnect(generation, &url, retry_from).await {
                    Some(transport) if self.adopt(generation, &transport) => {
                        info!(url = %url, transport = transport.id(), "reconnected");
                        transport
                    }
                    _ => return,
                },
            };

            self.keep_alive(&transport).await;
            if !self.mark_idle(generation, &transport) {
                return;
            }
            warn!(url = %url, "connection lost, reconnecting");
            retry_from = 0;
        }
    }

    /// Attempt to reconnect, starting at retry number `attempt` (0 means an
    /// immediate attempt with no delay). Returns `None` once retries are
    /// exhausted or the generation is superseded.
    async fn reconnect(&self, generation: u64, url: &str, mut attempt: u32) -> Option<TransportHandle> {
        loop {
            if attempt > 0 {
                if attempt > self.settings.max_retries {
                    error!(url = %url, retries = self.settings.max_retries, "giving up on reconnect");
                    return None;
                }
                let delay = self.settings.backoff_delay(attempt);
                debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
                tokio::time::sleep(delay).await;
            }
            if !self.mark_connecting(generation) {
                return None;
            }
            match self.attempt(generation, url).await {
                Ok(transport) => return Some(transport),
                Err(DeckError::Superseded) => return None,
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "reconnect attempt failed");
                    self.mark_error(generation, &e);
                    attempt += 1;
                }
            }
        }
    }

    /// Probe the bridge every keep-alive interval until the transport closes.
    /// A failed or unanswered probe closes the transport.
    async fn keep_alive(&self, transport: &TransportHandle) {
        let period = self.settings.keep_alive_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let probe = Service::GetTime;
        loop {
            tokio::select! {
                _ = transport.closed() => return,
                _ = ticker.tick() => {
                    let (tx, rx) = oneshot::channel();
                    transport.call_service(
                        &probe.path(false),
                        &probe.message_type().to_string(),
                        json!({}),
                        Box::new(move |outcome| {
                            let _ = tx.send(outcome);
                        }),
                    );
                    let outcome = match tokio::time::timeout(period, rx).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(_)) => Err("keep-alive callback dropped".to_string()),
                        Err(_) => Err("keep-alive probe unanswered".to_string()),
                    };
                    match outcome {
                        Ok(_) => debug!(transport = transport.id(), "keep-alive ok"),
                        Err(reason) => {
                            warn!(transport = transport.id(), reason = %reason, "keep-alive failed, closing transport");
                            transport.close();
                            return;
                        }
                    }
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public handle
// ────────────────────────────────────────────────────────────────────────────

struct Lifecycle {
    shared: Arc<Shared>,
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

/// Shared handle to the connection lifecycle. Clones share one connection;
/// dropping the last clone tears it down.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Lifecycle>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Self {
        let (generation, _) = watch::channel(0);
        let (snapshot, _) = watch::channel(ConnectionSnapshot::default());
        let (transitions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Lifecycle {
                shared: Arc::new(Shared {
                    connector,
                    settings,
                    state: Mutex::new(State::default()),
                    generation,
                    snapshot,
                    transitions,
                }),
            }),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared().settings
    }

    /// Connect to `address` (bare IPv4 host, `ws(s)://` URL or `http(s)://`
    /// URL), replacing any existing connection.
    ///
    /// Resolves once the transport is `connected`.
    ///
    /// # Errors
    ///
    /// * [`DeckError::InvalidAddress`] – validation is enabled and the input
    ///   is malformed. No attempt is made and the status is untouched.
    /// * [`DeckError::ConnectTimeout`] / [`DeckError::Transport`] – the
    ///   attempt failed; status is `error` and background retries begin.
    /// * [`DeckError::Superseded`] – a newer `connect` or a shutdown took over.
    pub async fn connect(&self, address: &str) -> Result<(), DeckError> {
        let shared = Arc::clone(self.shared());
        if shared.settings.validate_addresses {
            address::validate(address)?;
        }
        let url = address::normalize(address, shared.settings.default_port);
        let generation = shared.begin(&url);
        info!(url = %url, generation, "connecting");

        match shared.attempt(generation, &url).await {
            Ok(transport) => {
                if !shared.adopt(generation, &transport) {
                    return Err(DeckError::Superseded);
                }
                info!(url = %url, transport = transport.id(), "connected");
                self.spawn_supervisor(generation, url, Some(transport));
                Ok(())
            }
            Err(DeckError::Superseded) => Err(DeckError::Superseded),
            Err(e) => {
                if !shared.is_current(generation) {
                    return Err(DeckError::Superseded);
                }
                warn!(url = %url, error = %e, "connection attempt failed");
                shared.mark_error(generation, &e);
                self.spawn_supervisor(generation, url, None);
                Err(e)
            }
        }
    }

    /// Connect to the configured default robot.
    pub async fn connect_default(&self) -> Result<(), DeckError> {
        let url = self.settings().default_url();
        self.connect(&url).await
    }

    fn spawn_supervisor(&self, generation: u64, url: String, live: Option<TransportHandle>) {
        let shared = Arc::clone(self.shared());
        let mut state = shared.state.lock();
        if !shared.is_current(generation) {
            return;
        }
        let task = tokio::spawn(Arc::clone(&shared).supervise(generation, url, live));
        if let Some(old) = state.supervisor.replace(task) {
            old.abort();
        }
    }

    /// Close the transport and cancel every pending timer. The manager stays
    /// usable: a later `connect` starts over.
    pub fn shutdown(&self) {
        info!("connection manager shutting down");
        self.shared().teardown();
    }

    // ── Observation ─────────────────────────────────────────────────────────

    pub fn status(&self) -> ConnectionStatus {
        self.shared().snapshot.borrow().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared().snapshot.borrow().last_error.clone()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared().snapshot.borrow().clone()
    }

    /// Latest-value view of the status projection.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared().snapshot.subscribe()
    }

    /// Every status transition, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.shared().transitions.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected && self.shared().live_transport().is_some()
    }

    // ── Topic and service operations on the current transport ───────────────

    /// Factory bound to the live transport, if connected.
    pub fn topic_factory(&self) -> Option<TopicFactory> {
        if self.status() != ConnectionStatus::Connected {
            return None;
        }
        self.shared()
            .live_transport()
            .map(|t| TopicFactory::new(t, self.settings().simulated))
    }

    /// Service factory bound to the live transport; calls fail fast when
    /// there is none.
    pub fn service_factory(&self) -> ServiceFactory {
        let transport = if self.status() == ConnectionStatus::Connected {
            self.shared().live_transport()
        } else {
            None
        };
        ServiceFactory::new(transport, self.settings().simulated)
    }

    /// Subscribe to `topic` on the current transport.
    pub fn subscribe<T, F>(&self, topic: Topic, on_message: F) -> Result<Subscription, DeckError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.topic_factory()
            .ok_or(DeckError::NotConnected)?
            .subscribe(topic, on_message)
    }

    /// Call `service`; exactly one callback runs, `on_failure` synchronously
    /// when not connected.
    pub fn call_service<R, S, F>(&self, service: Service, request: &R, on_success: S, on_failure: F)
    where
        R: Serialize + ?Sized,
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(DeckError) + Send + 'static,
    {
        self.service_factory()
            .call_service(service, request, on_success, on_failure);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
