//! Topic/Service Factory.
//!
//! Binds the registry to one live [`TransportHandle`]: logical [`Topic`] and
//! [`Service`] names go in, wire paths and package-qualified types come out,
//! and payloads are decoded into the typed models of [`rosdeck_types::msgs`].
//!
//! | Operation | Behaviour |
//! |---|---|
//! | [`TopicFactory::subscribe`] | fixed wire settings, typed decode, bad frames skipped |
//! | [`TopicFactory::subscribe_high_frequency`] | same, plus a 33 ms minimum interval between callbacks |
//! | [`TopicFactory::publisher`] | advertise once, then publish typed messages |
//! | [`ServiceFactory::call_service`] | exactly one of `on_success` / `on_failure` |

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rosdeck_types::DeckError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::protocol::SubscribeOptions;
use crate::registry::{Service, Topic};
use crate::subscription::Subscription;
use crate::transport::{MessageCallback, TransportHandle};

/// Minimum spacing between callbacks on a high-frequency subscription
/// (about 30 frames per second).
pub const HIGH_FREQUENCY_INTERVAL: Duration = Duration::from_millis(33);

/// Admission gate for high-frequency topics. A delivery is processed only if
/// at least `min_interval` has passed since the last processed one; the rest
/// are dropped, never queued.
#[derive(Debug)]
pub struct FrameGate {
    min_interval: Duration,
    last: Option<Instant>,
}

impl FrameGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    pub fn admit_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for FrameGate {
    fn default() -> Self {
        Self::new(HIGH_FREQUENCY_INTERVAL)
    }
}

fn decoding_callback<T, F>(topic: Topic, on_message: F) -> impl Fn(Value) + Send + Sync + 'static
where
    T: DeserializeOwned + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    move |value: Value| match serde_json::from_value::<T>(value) {
        Ok(msg) => on_message(msg),
        Err(e) => warn!(topic = %topic, error = %e, "skipping undecodable message"),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topics
// ────────────────────────────────────────────────────────────────────────────

/// Creates subscriptions and publishers on one transport.
#[derive(Debug, Clone)]
pub struct TopicFactory {
    transport: TransportHandle,
    simulated: bool,
}

impl TopicFactory {
    pub fn new(transport: TransportHandle, simulated: bool) -> Self {
        Self {
            transport,
            simulated,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn transport_id(&self) -> u64 {
        self.transport.id()
    }

    /// Subscribe to `topic`, decoding every delivery into `T`.
    ///
    /// # Errors
    ///
    /// [`DeckError::NotConnected`] when the transport has already closed.
    pub fn subscribe<T, F>(&self, topic: Topic, on_message: F) -> Result<Subscription, DeckError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_raw(topic, Arc::new(decoding_callback(topic, on_message)))
    }

    /// Subscribe to `topic` and receive the undecoded JSON payload.
    pub fn subscribe_raw(
        &self,
        topic: Topic,
        on_message: MessageCallback,
    ) -> Result<Subscription, DeckError> {
        let path = topic.path(self.simulated);
        let msg_type = topic.message_type().to_string();
        debug!(topic = %topic, path = %path, msg_type = %msg_type, "subscribing");
        self.transport
            .subscribe(&path, &msg_type, SubscribeOptions::default(), on_message)
    }

    /// Like [`subscribe`](Self::subscribe), but drops deliveries arriving
    /// sooner than [`HIGH_FREQUENCY_INTERVAL`] after the last processed one.
    pub fn subscribe_high_frequency<T, F>(
        &self,
        topic: Topic,
        on_message: F,
    ) -> Result<Subscription, DeckError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let gate = Mutex::new(FrameGate::default());
        let decode = decoding_callback(topic, on_message);
        self.subscribe_raw(
            topic,
            Arc::new(move |value| {
                if gate.lock().admit() {
                    decode(value);
                }
            }),
        )
    }

    /// Advertise `topic` and return a handle for publishing on it.
    pub fn publisher(&self, topic: Topic) -> Result<Publisher, DeckError> {
        let path = topic.path(self.simulated);
        self.transport
            .advertise(&path, &topic.message_type().to_string())?;
        Ok(Publisher {
            transport: self.transport.clone(),
            topic,
            path,
        })
    }
}

/// Typed publishing handle for one advertised topic.
#[derive(Debug, Clone)]
pub struct Publisher {
    transport: TransportHandle,
    topic: Topic,
    path: String,
}

impl Publisher {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn publish<T: Serialize>(&self, msg: &T) -> Result<(), DeckError> {
        let value = serde_json::to_value(msg).map_err(|e| DeckError::Decode(e.to_string()))?;
        self.transport.publish(&self.path, value)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Services
// ────────────────────────────────────────────────────────────────────────────

/// Issues service calls on the current transport, if any.
#[derive(Debug, Clone)]
pub struct ServiceFactory {
    transport: Option<TransportHandle>,
    simulated: bool,
}

impl ServiceFactory {
    pub fn new(transport: Option<TransportHandle>, simulated: bool) -> Self {
        Self {
            transport,
            simulated,
        }
    }

    /// Call `service` with `request`.
    ///
    /// Exactly one of the callbacks runs. Without a connected transport
    /// `on_failure` runs before this function returns, with
    /// [`DeckError::NotConnected`]. Calls are never retried.
    pub fn call_service<R, S, F>(&self, service: Service, request: &R, on_success: S, on_failure: F)
    where
        R: Serialize + ?Sized,
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(DeckError) + Send + 'static,
    {
        let Some(transport) = self.transport.as_ref().filter(|t| t.is_connected()) else {
            on_failure(DeckError::NotConnected);
            return;
        };
        let args = match serde_json::to_value(request) {
            Ok(args) => args,
            Err(e) => {
                on_failure(DeckError::Decode(e.to_string()));
                return;
            }
        };
        let path = service.path(self.simulated);
        debug!(service = %service, path = %path, "calling service");
        transport.call_service(
            &path,
            &service.message_type().to_string(),
            args,
            Box::new(move |outcome| match outcome {
                Ok(values) => on_success(values),
                Err(message) => on_failure(DeckError::ServiceFailed(message)),
            }),
        );
    }

    /// Awaitable form of [`call_service`](Self::call_service).
    pub async fn call<R: Serialize + ?Sized>(
        &self,
        service: Service,
        request: &R,
    ) -> Result<Value, DeckError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let fail_tx = Arc::clone(&tx);
        self.call_service(
            service,
            request,
            move |values| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Ok(values));
                }
            },
            move |err| {
                if let Some(tx) = fail_tx.lock().take() {
                    let _ = tx.send(Err(err));
                }
            },
        );
        rx.await
            .map_err(|_| DeckError::Channel("service callback dropped".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_types::msgs::{BatteryState, CompressedImage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn make_factory(simulated: bool) -> (TopicFactory, TransportHandle, mpsc::UnboundedReceiver<String>) {
        let (handle, rx) = TransportHandle::new("ws://test:9090");
        (TopicFactory::new(handle.clone(), simulated), handle, rx)
    }

    fn publish(handle: &TransportHandle, topic: &str, msg: Value) {
        handle.ingest(&json!({"op": "publish", "topic": topic, "msg": msg}).to_string());
    }

    #[test]
    fn subscribe_resolves_simulated_path_and_type() {
        let (factory, _handle, mut rx) = make_factory(true);
        let _sub = factory.subscribe(Topic::Battery, |_: BatteryState| {}).unwrap();

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["topic"], "/dummy/battery");
        assert_eq!(frame["type"], "sensor_msgs/BatteryState");
        assert_eq!(frame["queue_length"], 1);
    }

    #[test]
    fn typed_decode_skips_bad_frames() {
        let (factory, handle, _rx) = make_factory(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = factory
            .subscribe(Topic::Battery, move |b: BatteryState| sink.lock().push(b.percentage))
            .unwrap();

        publish(&handle, "/battery", json!({"percentage": "not a number"}));
        publish(&handle, "/battery", json!({"percentage": 0.5}));

        assert_eq!(seen.lock().as_slice(), &[0.5]);
    }

    #[test]
    fn dispose_before_delivery_yields_zero_callbacks() {
        let (factory, handle, _rx) = make_factory(false);
        for topic in Topic::ALL {
            let count = Arc::new(AtomicUsize::new(0));
            let c = Arc::clone(&count);
            let mut sub = factory
                .subscribe_raw(topic, Arc::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            sub.dispose();
            publish(&handle, &topic.path(false), json!({}));
            assert_eq!(count.load(Ordering::SeqCst), 0, "{topic}");
        }
    }

    #[test]
    fn dispose_from_another_callback_stops_in_flight_delivery() {
        let (factory, handle, _rx) = make_factory(false);
        let count = Arc::new(AtomicUsize::new(0));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        // First subscriber disposes the second while the same message is being dispatched.
        let target = Arc::clone(&victim);
        let _killer = factory
            .subscribe_raw(Topic::Odometry, Arc::new(move |_| {
                if let Some(mut sub) = target.lock().take() {
                    sub.dispose();
                }
            }))
            .unwrap();
        let c = Arc::clone(&count);
        *victim.lock() = Some(
            factory
                .subscribe_raw(Topic::Odometry, Arc::new(move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap(),
        );

        publish(&handle, "/odom", json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn high_frequency_gate_caps_rate_and_keeps_latest() {
        let (factory, handle, _rx) = make_factory(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = factory
            .subscribe_high_frequency(Topic::Camera, move |img: CompressedImage| {
                sink.lock().push(img.header.seq);
            })
            .unwrap();

        // One second of frames at 100 Hz.
        for seq in 0..100u32 {
            publish(&handle, "/compressed_camera", json!({"header": {"seq": seq}, "format": "jpeg", "data": ""}));
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        let seen = seen.lock();
        assert!(seen.len() <= 31, "processed {}", seen.len());
        assert!(seen.len() >= 20);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen[0], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_gate_admits_after_interval() {
        let mut gate = FrameGate::default();
        let t0 = Instant::now();
        assert!(gate.admit_at(t0));
        assert!(!gate.admit_at(t0 + Duration::from_millis(32)));
        assert!(gate.admit_at(t0 + Duration::from_millis(33)));
    }

    #[test]
    fn publisher_advertises_then_publishes() {
        let (factory, _handle, mut rx) = make_factory(false);
        let publisher = factory.publisher(Topic::VelocityNipple).unwrap();
        publisher.publish(&json!({"linear": {"x": 0.2}})).unwrap();

        let advertise: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        let publish: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(advertise["op"], "advertise");
        assert_eq!(advertise["type"], "geometry_msgs/Twist");
        assert_eq!(publish["topic"], "/cmd_vel_nipple");
    }

    #[test]
    fn call_without_transport_fails_synchronously() {
        let services = ServiceFactory::new(None, false);
        let failed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&failed);
        let succeeded = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&succeeded);

        services.call_service(
            Service::Light,
            &json!({"data": true}),
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move |e| *sink.lock() = Some(e),
        );

        assert_eq!(*failed.lock(), Some(DeckError::NotConnected));
        assert_eq!(succeeded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn call_on_closed_transport_fails_synchronously() {
        let (handle, _rx) = TransportHandle::new("ws://test:9090");
        handle.close();
        let services = ServiceFactory::new(Some(handle), false);
        let failed = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failed);
        services.call_service(Service::Stop, &json!({"data": true}), |_| {}, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn awaitable_call_maps_bridge_failure() {
        let (handle, mut rx) = TransportHandle::new("ws://test:9090");
        let services = ServiceFactory::new(Some(handle.clone()), true);

        let call = tokio::spawn(async move { services.call(Service::Mode, &json!({"mode": "sit"})).await });
        let text = loop {
            if let Ok(text) = rx.try_recv() {
                break text;
            }
            tokio::task::yield_now().await;
        };
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["service"], "/dummy/mode");
        handle.ingest(
            &json!({"op": "service_response", "id": frame["id"], "service": "/dummy/mode",
                    "values": "robot busy", "result": false})
            .to_string(),
        );

        let result = call.await.unwrap();
        assert_eq!(result, Err(DeckError::ServiceFailed("robot busy".into())));
    }
}
