//! `rosdeck-types` – shared vocabulary for the rosdeck teleoperation core.
//!
//! Every other crate speaks in terms of the types defined here: the
//! connection status projection, the data-source tag used by arbitration,
//! the global [`DeckError`], and the serde models of the ROS messages the
//! core decodes ([`msgs`]).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod msgs;

/// Lifecycle state of the single transport connection to the robot bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Origin of a value feeding consumer-visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// No producer owns the slot yet.
    #[default]
    None,
    /// Live robot topic.
    Real,
    /// Local in-process simulator.
    Simulated,
}

/// Global error type spanning transport failures, rejected robot actions and
/// wiring mistakes between consumers and the message registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeckError {
    #[error("Invalid robot address: {0}")]
    InvalidAddress(String),

    #[error("Connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Not connected to the robot bridge")]
    NotConnected,

    #[error("Connection attempt superseded by a newer connect call")]
    Superseded,

    #[error("Service call failed: {0}")]
    ServiceFailed(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown robot action: {0}")]
    UnknownAction(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}
