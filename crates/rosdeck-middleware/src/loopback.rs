//! In-process rosbridge peer.
//!
//! [`LoopbackConnector`] implements [`Connector`] without a socket. Every
//! accepted open yields a [`LoopbackPeer`] that records the frames the client
//! sent, answers `call_service` requests from a scripted reply table and can
//! inject publishes or hang up on demand. The connection state machine tests
//! and the offline CLI demo both run on it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rosdeck_types::DeckError;
use serde_json::{Value, json};
use tracing::debug;

use crate::transport::{Connector, TransportHandle};

/// How the connector answers the next `open` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    Accept,
    /// Fail immediately with a transport error.
    Refuse(String),
    /// Never resolve; the caller's timeout decides.
    Hang,
}

/// Scripted answer to a `call_service` request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply {
    /// `result: true` with these values.
    Respond(Value),
    /// `result: false` with this message.
    Fail(String),
    /// Never answer.
    Silent,
}

#[derive(Default)]
struct Script {
    default_behavior: Option<OpenBehavior>,
    queued: VecDeque<OpenBehavior>,
    replies: HashMap<String, ServiceReply>,
    peers: Vec<LoopbackPeer>,
    urls: Vec<String>,
}

/// Scriptable [`Connector`] backed by in-memory peers.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    script: Arc<Mutex<Script>>,
    opens: Arc<AtomicUsize>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour for every open not covered by [`push_behavior`](Self::push_behavior).
    /// Defaults to [`OpenBehavior::Accept`].
    pub fn set_behavior(&self, behavior: OpenBehavior) {
        self.script.lock().default_behavior = Some(behavior);
    }

    /// Queue a one-shot behaviour consumed by the next open.
    pub fn push_behavior(&self, behavior: OpenBehavior) {
        self.script.lock().queued.push_back(behavior);
    }

    /// Script the reply for calls to the service at `path`.
    pub fn set_reply(&self, path: impl Into<String>, reply: ServiceReply) {
        self.script.lock().replies.insert(path.into(), reply);
    }

    /// Total number of `open` calls, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// URLs passed to `open`, in call order.
    pub fn opened_urls(&self) -> Vec<String> {
        self.script.lock().urls.clone()
    }

    /// Every accepted peer, oldest first.
    pub fn peers(&self) -> Vec<LoopbackPeer> {
        self.script.lock().peers.clone()
    }

    pub fn last_peer(&self) -> Option<LoopbackPeer> {
        self.script.lock().peers.last().cloned()
    }

    /// Number of peers whose transport is still open.
    pub fn live_peers(&self) -> usize {
        self.script.lock().peers.iter().filter(|p| p.is_open()).count()
    }

    fn reply_for(&self, service: &str) -> ServiceReply {
        self.script
            .lock()
            .replies
            .get(service)
            .cloned()
            .unwrap_or_else(|| ServiceReply::Respond(json!({"success": true, "message": ""})))
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn open(&self, url: &str) -> Result<TransportHandle, DeckError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let behavior = {
            let mut script = self.script.lock();
            script.urls.push(url.to_string());
            script
                .queued
                .pop_front()
                .or_else(|| script.default_behavior.clone())
                .unwrap_or(OpenBehavior::Accept)
        };

        match behavior {
            OpenBehavior::Accept => {}
            OpenBehavior::Refuse(reason) => return Err(DeckError::Transport(reason)),
            OpenBehavior::Hang => std::future::pending::<()>().await,
        }

        let (handle, mut outbound) = TransportHandle::new(url);
        let peer = LoopbackPeer {
            handle: handle.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
        };
        self.script.lock().peers.push(peer.clone());

        let connector = self.clone();
        let pump = peer.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => {
                        let Some(text) = frame else { break };
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else { continue };
                        pump.sent.lock().push(frame.clone());
                        if frame["op"] == "call_service" {
                            connector.answer(&pump, &frame);
                        }
                    }
                    _ = pump.handle.closed() => break,
                }
            }
            debug!(transport = pump.handle.id(), "loopback peer stopped");
        });

        Ok(handle)
    }
}

impl LoopbackConnector {
    fn answer(&self, peer: &LoopbackPeer, request: &Value) {
        let service = request["service"].as_str().unwrap_or_default();
        let (values, result) = match self.reply_for(service) {
            ServiceReply::Respond(values) => (values, true),
            ServiceReply::Fail(message) => (Value::String(message), false),
            ServiceReply::Silent => return,
        };
        peer.inject(json!({
            "op": "service_response",
            "id": request["id"],
            "service": service,
            "values": values,
            "result": result,
        }));
    }
}

/// Server side of one accepted loopback connection.
#[derive(Clone)]
pub struct LoopbackPeer {
    handle: TransportHandle,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl LoopbackPeer {
    /// Deliver a raw frame to the client.
    pub fn inject(&self, frame: Value) {
        self.handle.ingest(&frame.to_string());
    }

    /// Deliver a `publish` on `topic`.
    pub fn publish(&self, topic: &str, msg: Value) {
        self.inject(json!({"op": "publish", "topic": topic, "msg": msg}));
    }

    /// Simulate the bridge dropping the connection.
    pub fn close_from_remote(&self) {
        self.handle.close();
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn transport_id(&self) -> u64 {
        self.handle.id()
    }

    /// Frames received from the client so far.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Received frames whose `op` equals `op`.
    pub fn sent_ops(&self, op: &str) -> Vec<Value> {
        self.sent.lock().iter().filter(|f| f["op"] == op).cloned().collect()
    }
}
