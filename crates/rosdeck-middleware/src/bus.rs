//! In-process signal bus for locally produced topic traffic.
//!
//! Uses [`tokio::sync::broadcast`] channels, one lane per registry
//! [`Topic`], so every subscriber receives every message without a slow
//! subscriber blocking the others. The local [`Simulator`][crate::simulator::Simulator]
//! publishes here; consumers subscribe through the same [`Subscription`]
//! handle they get from the robot transport, so they cannot tell the two
//! sources apart.

use std::collections::HashMap;
use std::sync::Arc;

use rosdeck_types::DeckError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::registry::Topic;
use crate::subscription::{Gate, Subscription};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Shared signal bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct SignalBus {
    lanes: Arc<HashMap<Topic, broadcast::Sender<Value>>>,
}

impl SignalBus {
    /// Create a new bus; `capacity` applies to every lane independently.
    pub fn new(capacity: usize) -> Self {
        let lanes = Topic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity).0))
            .collect();
        Self {
            lanes: Arc::new(lanes),
        }
    }

    fn lane(&self, topic: Topic) -> Result<&broadcast::Sender<Value>, DeckError> {
        self.lanes
            .get(&topic)
            .ok_or_else(|| DeckError::UnknownTopic(topic.name().to_string()))
    }

    /// Publish `msg` on `topic`.
    ///
    /// Returns the number of receivers handed the message; `Ok(0)` when no
    /// one is listening.
    pub fn publish<T: Serialize>(&self, topic: Topic, msg: &T) -> Result<usize, DeckError> {
        let value = serde_json::to_value(msg).map_err(|e| DeckError::Decode(e.to_string()))?;
        Ok(self.lane(topic)?.send(value).unwrap_or(0))
    }

    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.lane(topic).map_or(0, broadcast::Sender::receiver_count)
    }

    /// Subscribe to `topic` with a raw JSON callback.
    ///
    /// Delivery runs on a spawned task, so this must be called inside a
    /// Tokio runtime. Disposing the returned handle stops the callback
    /// immediately and aborts the task.
    pub fn subscribe_raw(
        &self,
        topic: Topic,
        on_message: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<Subscription, DeckError> {
        let mut rx = self.lane(topic)?.subscribe();
        let gate = Gate::new();
        let task_gate = Arc::clone(&gate);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => {
                        if !task_gate.run(|| on_message(value)) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %topic, lagged_by = n, "bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(topic = %topic, "bus subscriber stopped");
        });
        Ok(Subscription::new(topic.name(), gate, move || task.abort()))
    }

    /// Subscribe to `topic`, decoding every message into `T`. Undecodable
    /// messages are logged and skipped.
    pub fn subscribe<T, F>(&self, topic: Topic, on_message: F) -> Result<Subscription, DeckError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_raw(topic, move |value| match serde_json::from_value::<T>(value) {
            Ok(msg) => on_message(msg),
            Err(e) => warn!(topic = %topic, error = %e, "skipping undecodable bus message"),
        })
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_types::msgs::Float32;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = SignalBus::default();
        assert_eq!(bus.publish(Topic::Battery, &json!({"percentage": 50.0})).unwrap(), 0);
    }

    #[tokio::test]
    async fn typed_subscriber_receives_only_its_topic() {
        let bus = SignalBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe(Topic::Temperature, move |t: Float32| {
                let _ = tx.send(t.data);
            })
            .unwrap();

        bus.publish(Topic::Battery, &json!({"percentage": 50.0})).unwrap();
        bus.publish(Topic::Temperature, &Float32 { data: 36.6 }).unwrap();

        assert_eq!(rx.recv().await, Some(36.6));
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_subscriber_sees_nothing_more() {
        let bus = SignalBus::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = bus
            .subscribe_raw(Topic::Odometry, move |v| {
                let _ = tx.send(v);
            })
            .unwrap();
        assert_eq!(bus.receiver_count(Topic::Odometry), 1);

        bus.publish(Topic::Odometry, &json!({})).unwrap();
        sub.dispose();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The message queued before dispose must not be delivered either.
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.receiver_count(Topic::Odometry), 0);
    }
}
