//! `rosdeck-runtime` – what the deck does with the data.
//!
//! Sits on top of `rosdeck-middleware` and turns raw topics and services
//! into operator-facing state.
//!
//! # Modules
//!
//! - [`arbitration`] – [`SourceArbiter`][arbitration::SourceArbiter]:
//!   a single-writer slot for signals both the live robot and the simulator
//!   can produce, plus the [`Fraction`][arbitration::Fraction] percentage
//!   boundary.
//! - [`mount`] – [`Mount`][mount::Mount]: the consumer contract. Setup runs
//!   on mount and again on every transport or online change, disposing the
//!   previous subscriptions first.
//! - [`battery`], [`signals`], [`status`] – the consumers. Battery is
//!   arbitrated; robot status carries the emergency and obstacle-avoidance
//!   lockout.
//! - [`actions`] – [`RobotAction`][actions::RobotAction] and the
//!   mode-dependent transition table, dispatched as one-shot service calls.
//! - [`chart`] – rolling numeric series per topic.
//! - [`deck`] – [`Deck`][deck::Deck]: every consumer wired to one
//!   connection manager, with the simulator running only while offline.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod actions;
pub mod arbitration;
pub mod battery;
pub mod chart;
pub mod deck;
pub mod mount;
pub mod signals;
pub mod status;
pub mod telemetry;

pub use actions::{ActionDispatcher, RobotAction, allowed_actions};
pub use arbitration::{Fraction, PercentScale, SourceArbiter};
pub use battery::{BatteryMonitor, BatteryReading};
pub use chart::{ChartMetric, ChartPoint, ChartSampler, ChartSeries};
pub use deck::{Deck, SimulatorSwitch, TelemetrySnapshot};
pub use mount::{Mount, MountKey};
pub use signals::{Signal, SignalOptions, VelocityMonitor, VelocitySource};
pub use status::{RobotMode, RobotStatusMonitor, RobotStatusState, SharedStatus};
pub use telemetry::{TracerProviderGuard, init_tracing};
