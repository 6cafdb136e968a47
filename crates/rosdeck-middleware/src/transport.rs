//! Transport Handle – one live connection to the robot's rosbridge server.
//!
//! [`TransportHandle`] is socket-agnostic: it serialises outbound operations
//! onto an unbounded channel and routes inbound frames handed to
//! [`TransportHandle::ingest`]. A [`Connector`] owns the actual I/O and pumps
//! frames between the socket and the handle:
//!
//! * [`WsConnector`][crate::ws::WsConnector] – `tokio-tungstenite` websocket.
//! * [`LoopbackConnector`][crate::loopback::LoopbackConnector] – in-process
//!   peer used by tests and offline demos.
//!
//! A handle is never reused across connections. Reconnecting produces a
//! fresh handle; the old one is closed and all of its pending service calls
//! are failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use rosdeck_types::DeckError;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::protocol::{self, Op, SubscribeOptions};
use crate::subscription::{Gate, Subscription};

/// Callback invoked with the raw JSON payload of every delivered message.
pub type MessageCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// One-shot completion for a service call: `Ok(values)` or `Err(message)`.
pub type ServiceCallback = Box<dyn FnOnce(Result<Value, String>) + Send>;

/// Opens transports. The connection manager is generic over this seam so the
/// state machine can be driven without a network.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `url`. Resolves once the bridge accepted the
    /// connection.
    async fn open(&self, url: &str) -> Result<TransportHandle, DeckError>;
}

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

struct Route {
    id: String,
    gate: Arc<Gate>,
    callback: MessageCallback,
}

#[derive(Default)]
struct Router {
    topics: HashMap<String, Vec<Route>>,
    pending: HashMap<String, ServiceCallback>,
}

struct Inner {
    id: u64,
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    router: Mutex<Router>,
    closed: watch::Sender<bool>,
    next_op: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, callback) in self.router.get_mut().pending.drain() {
            callback(Err("transport dropped".to_string()));
        }
    }
}

/// Shared handle to a single rosbridge connection.
#[derive(Clone)]
pub struct TransportHandle {
    inner: Arc<Inner>,
}

impl TransportHandle {
    /// Create a handle for `url` together with the receiver of its outbound
    /// JSON frames. The caller owns writing those frames to the socket.
    pub fn new(url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(Inner {
                id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
                url: url.into(),
                outbound,
                router: Mutex::new(Router::default()),
                closed,
                next_op: AtomicU64::new(1),
            }),
        };
        (handle, outbound_rx)
    }

    /// Process-unique identity of this handle.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_connected(&self) -> bool {
        !*self.inner.closed.borrow()
    }

    /// Resolves once the handle is closed, locally or by the peer.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot error.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the connection. Pending service calls fail with
    /// `"transport closed"`; routes are dropped. Idempotent.
    pub fn close(&self) {
        let was_open = self.inner.closed.send_if_modified(|closed| {
            let changed = !*closed;
            *closed = true;
            changed
        });
        if !was_open {
            return;
        }
        let (pending, routes) = {
            let mut router = self.inner.router.lock();
            let pending: Vec<ServiceCallback> =
                router.pending.drain().map(|(_, cb)| cb).collect();
            let routes = router.topics.len();
            router.topics.clear();
            (pending, routes)
        };
        info!(
            transport = self.inner.id,
            url = %self.inner.url,
            pending_calls = pending.len(),
            routes,
            "transport closed"
        );
        for callback in pending {
            callback(Err("transport closed".to_string()));
        }
    }

    fn next_op_id(&self, op: &str, target: &str) -> String {
        let n = self.inner.next_op.fetch_add(1, Ordering::Relaxed);
        format!("{op}:{target}:{n}")
    }

    fn send(&self, op: &Op) -> Result<(), DeckError> {
        if !self.is_connected() {
            return Err(DeckError::NotConnected);
        }
        self.inner
            .outbound
            .send(op.to_json())
            .map_err(|_| DeckError::Transport("outbound channel closed".to_string()))
    }

    // -----------------------------------------------------------------------
    // Topics
    // -----------------------------------------------------------------------

    /// Subscribe to `topic` with the given wire type and options.
    ///
    /// # Errors
    ///
    /// [`DeckError::NotConnected`] when the handle is already closed.
    pub fn subscribe(
        &self,
        topic: &str,
        msg_type: &str,
        options: SubscribeOptions,
        callback: MessageCallback,
    ) -> Result<Subscription, DeckError> {
        let id = self.next_op_id("subscribe", topic);
        let gate = Gate::new();
        self.inner
            .router
            .lock()
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Route {
                id: id.clone(),
                gate: Arc::clone(&gate),
                callback,
            });

        let op = Op::subscribe(id.clone(), topic.to_string(), msg_type.to_string(), options);
        if let Err(e) = self.send(&op) {
            self.remove_route(topic, &id);
            return Err(e);
        }
        debug!(transport = self.inner.id, topic, id = %id, "subscribed");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let topic_owned = topic.to_string();
        Ok(Subscription::new(topic, gate, move || {
            if let Some(inner) = weak.upgrade() {
                TransportHandle { inner }.release_subscription(&topic_owned, &id);
            }
        }))
    }

    fn remove_route(&self, topic: &str, id: &str) -> bool {
        let mut router = self.inner.router.lock();
        let Some(routes) = router.topics.get_mut(topic) else {
            return false;
        };
        let before = routes.len();
        routes.retain(|r| r.id != id);
        let removed = routes.len() != before;
        if routes.is_empty() {
            router.topics.remove(topic);
        }
        removed
    }

    fn release_subscription(&self, topic: &str, id: &str) {
        if self.remove_route(topic, id) && self.is_connected() {
            let op = Op::Unsubscribe {
                id: id.to_string(),
                topic: topic.to_string(),
            };
            if let Err(e) = self.send(&op) {
                debug!(topic, error = %e, "unsubscribe not sent");
            }
        }
    }

    /// Announce that this client will publish `msg_type` on `topic`.
    pub fn advertise(&self, topic: &str, msg_type: &str) -> Result<(), DeckError> {
        self.send(&Op::Advertise {
            id: self.next_op_id("advertise", topic),
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
        })
    }

    /// Publish a JSON message on `topic`.
    pub fn publish(&self, topic: &str, msg: Value) -> Result<(), DeckError> {
        self.send(&Op::Publish {
            id: None,
            topic: topic.to_string(),
            msg,
        })
    }

    // -----------------------------------------------------------------------
    // Services
    // -----------------------------------------------------------------------

    /// Issue exactly one service request. `callback` runs exactly once: with
    /// the response, with the bridge's failure, or with `"transport closed"`
    /// if the connection goes away first. A closed handle fails immediately.
    pub fn call_service(
        &self,
        service: &str,
        service_type: &str,
        args: Value,
        callback: ServiceCallback,
    ) {
        if !self.is_connected() {
            callback(Err("transport closed".to_string()));
            return;
        }
        let id = self.next_op_id("call_service", service);
        self.inner.router.lock().pending.insert(id.clone(), callback);

        let op = Op::CallService {
            id: id.clone(),
            service: service.to_string(),
            service_type: service_type.to_string(),
            args,
        };
        if let Err(e) = self.send(&op) {
            let callback = self.inner.router.lock().pending.remove(&id);
            if let Some(callback) = callback {
                callback(Err(e.to_string()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Route one inbound JSON frame. Malformed frames are logged and skipped.
    pub fn ingest(&self, text: &str) {
        let op = match Op::parse(text) {
            Ok(op) => op,
            Err(e) => {
                warn!(transport = self.inner.id, error = %e, "skipping malformed frame");
                return;
            }
        };
        match op {
            Op::Publish { topic, msg, .. } => self.dispatch(&topic, msg),
            Op::ServiceResponse {
                id: Some(id),
                values,
                result,
                ..
            } => {
                let callback = self.inner.router.lock().pending.remove(&id);
                match callback {
                    Some(callback) if result => callback(Ok(values)),
                    Some(callback) => callback(Err(protocol::failure_message(&values))),
                    None => debug!(id = %id, "response for unknown call"),
                }
            }
            Op::ServiceResponse { id: None, service, .. } => {
                debug!(service = %service, "service response without id ignored");
            }
            Op::Status { level, msg, .. } => match level.as_str() {
                "error" | "warning" => warn!(transport = self.inner.id, level = %level, "{msg}"),
                _ => debug!(transport = self.inner.id, level = %level, "{msg}"),
            },
            other => debug!(?other, "ignoring client-side op from peer"),
        }
    }

    fn dispatch(&self, topic: &str, msg: Value) {
        let targets: Vec<(Arc<Gate>, MessageCallback)> = {
            let router = self.inner.router.lock();
            match router.topics.get(topic) {
                Some(routes) => routes
                    .iter()
                    .map(|r| (Arc::clone(&r.gate), Arc::clone(&r.callback)))
                    .collect(),
                None => return,
            }
        };
        for (gate, callback) in targets {
            gate.run(|| callback(msg.clone()));
        }
    }

    /// Number of live routes on `topic`.
    pub fn route_count(&self, topic: &str) -> usize {
        self.inner
            .router
            .lock()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.router.lock().pending.len()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (Arc<AtomicUsize>, MessageCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    #[test]
    fn subscribe_sends_frame_and_routes_messages() {
        let (handle, mut rx) = TransportHandle::new("ws://test:9090");
        let (count, cb) = counting_callback();
        let _sub = handle
            .subscribe("/odom", "nav_msgs/Odometry", SubscribeOptions::default(), cb)
            .unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["op"], "subscribe");
        assert_eq!(frames[0]["topic"], "/odom");

        handle.ingest(r#"{"op":"publish","topic":"/odom","msg":{}}"#);
        handle.ingest(r#"{"op":"publish","topic":"/scan","msg":{}}"#);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_sends_unsubscribe_and_stops_delivery() {
        let (handle, mut rx) = TransportHandle::new("ws://test:9090");
        let (count, cb) = counting_callback();
        let mut sub = handle
            .subscribe("/odom", "nav_msgs/Odometry", SubscribeOptions::default(), cb)
            .unwrap();
        drain(&mut rx);

        sub.dispose();
        handle.ingest(r#"{"op":"publish","topic":"/odom","msg":{}}"#);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(handle.route_count("/odom"), 0);
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["op"], "unsubscribe");
    }

    #[test]
    fn service_response_completes_matching_call_once() {
        let (handle, mut rx) = TransportHandle::new("ws://test:9090");
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        handle.call_service(
            "/mode",
            "custom_interfaces/Mode",
            json!({"mode": "sit"}),
            Box::new(move |r| sink.lock().push(r)),
        );
        let frames = drain(&mut rx);
        let id = frames[0]["id"].as_str().unwrap().to_string();

        let response = json!({
            "op": "service_response", "id": id, "service": "/mode",
            "values": {"success": true}, "result": true
        });
        handle.ingest(&response.to_string());
        handle.ingest(&response.to_string());

        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap()["success"], true);
        assert_eq!(handle.pending_calls(), 0);
    }

    #[test]
    fn close_fails_pending_calls() {
        let (handle, _rx) = TransportHandle::new("ws://test:9090");
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        handle.call_service(
            "/rosapi/get_time",
            "rosapi/GetTime",
            json!({}),
            Box::new(move |r| sink.lock().push(r)),
        );

        handle.close();
        handle.close();

        assert!(!handle.is_connected());
        assert_eq!(results.lock().as_slice(), &[Err("transport closed".to_string())]);
    }

    #[test]
    fn closed_handle_fails_calls_immediately_and_refuses_subscriptions() {
        let (handle, _rx) = TransportHandle::new("ws://test:9090");
        handle.close();

        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        handle.call_service("/mode", "custom_interfaces/Mode", json!({}), Box::new(move |r| {
            *sink.lock() = Some(r);
        }));
        assert!(matches!(slot.lock().take(), Some(Err(_))));

        let (_, cb) = counting_callback();
        let err = handle
            .subscribe("/odom", "nav_msgs/Odometry", SubscribeOptions::default(), cb)
            .unwrap_err();
        assert_eq!(err, DeckError::NotConnected);
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (handle, _rx) = TransportHandle::new("ws://test:9090");
        let (count, cb) = counting_callback();
        let _sub = handle
            .subscribe("/odom", "nav_msgs/Odometry", SubscribeOptions::default(), cb)
            .unwrap();

        handle.ingest("{ not json");
        handle.ingest(r#"{"op":"publish","topic":"/odom","msg":{}}"#);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (handle, _rx) = TransportHandle::new("ws://test:9090");
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.closed().await });
        handle.close();
        task.await.unwrap();
    }
}
