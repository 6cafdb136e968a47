//! rosbridge v2 wire protocol.
//!
//! Every frame on the websocket is a JSON object tagged by `"op"`. Only the
//! operations the client side needs are modelled; anything else fails to
//! parse and is skipped by the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed subscription settings: no compression, no server-side throttling,
/// and a queue of one so the bridge always prefers the newest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub compression: &'static str,
    pub throttle_rate: u32,
    pub queue_length: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            compression: "none",
            throttle_rate: 0,
            queue_length: 1,
        }
    }
}

/// A single rosbridge operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Subscribe {
        id: String,
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
        compression: String,
        throttle_rate: u32,
        queue_length: u32,
    },
    Unsubscribe {
        id: String,
        topic: String,
    },
    Advertise {
        id: String,
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Publish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
        msg: Value,
    },
    CallService {
        id: String,
        service: String,
        #[serde(rename = "type")]
        service_type: String,
        args: Value,
    },
    ServiceResponse {
        #[serde(default)]
        id: Option<String>,
        service: String,
        #[serde(default)]
        values: Value,
        result: bool,
    },
    Status {
        #[serde(default)]
        id: Option<String>,
        level: String,
        msg: String,
    },
}

impl Op {
    pub fn subscribe(id: String, topic: String, msg_type: String, options: SubscribeOptions) -> Self {
        Op::Subscribe {
            id,
            topic,
            msg_type,
            compression: options.compression.to_string(),
            throttle_rate: options.throttle_rate,
            queue_length: options.queue_length,
        }
    }

    pub fn to_json(&self) -> String {
        // Serialising these plain data variants cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Human-readable failure carried by a `service_response` with
/// `result: false`. rosbridge puts the error string directly in `values`.
pub fn failure_message(values: &Value) -> String {
    match values {
        Value::String(s) => s.clone(),
        Value::Null => "service call failed".to_string(),
        other => other.to_string(),
    }
}
