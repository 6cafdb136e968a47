//! `rosdeck-middleware` – the wire between the deck and the robot.
//!
//! Owns everything that touches the rosbridge connection, without caring
//! what the data means to the operator.
//!
//! # Modules
//!
//! - [`registry`] – logical topic/service names → wire types and paths.
//! - [`address`] – robot address normalisation and validation.
//! - [`protocol`] – rosbridge v2 JSON operations.
//! - [`transport`] – one live connection: routing, service calls, close.
//! - [`ws`] / [`loopback`] – websocket and in-process [`Connector`]s.
//! - [`factory`] – typed subscriptions, publishers and service calls.
//! - [`connection`] – the connect / keep-alive / reconnect state machine.
//! - [`bus`] / [`simulator`] – local signal bus and the simulated robot.

pub mod address;
pub mod bus;
pub mod connection;
pub mod factory;
pub mod loopback;
pub mod protocol;
pub mod registry;
pub mod simulator;
pub mod subscription;
pub mod transport;
pub mod ws;

pub use bus::SignalBus;
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionSnapshot};
pub use factory::{Publisher, ServiceFactory, TopicFactory};
pub use loopback::{LoopbackConnector, LoopbackPeer, OpenBehavior, ServiceReply};
pub use registry::{MessageType, RosType, Service, Topic};
pub use simulator::Simulator;
pub use subscription::Subscription;
pub use transport::{Connector, TransportHandle};
pub use ws::WsConnector;
