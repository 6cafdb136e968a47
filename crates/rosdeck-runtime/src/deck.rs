//! The operator deck: one owned object wiring the connection manager, the
//! local simulator and every consumer together.
//!
//! Construct it once at startup and pass it by reference; tests build
//! isolated instances on a [`LoopbackConnector`](rosdeck_middleware::LoopbackConnector).

use rosdeck_middleware::{ConnectionManager, SignalBus, Simulator, Topic};
use rosdeck_types::{ConnectionStatus, DataSource};
use rosdeck_types::msgs::{CompressedImage, JointState, LaserScan, Odometry, Twist};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::actions::ActionDispatcher;
use crate::battery::{BatteryMonitor, BatteryReading};
use crate::signals::{Signal, VelocityMonitor, VelocitySource};
use crate::status::{RobotMode, RobotStatusMonitor};

/// Runs the simulator exactly while the robot is offline.
pub struct SimulatorSwitch {
    simulator: Simulator,
    watcher: JoinHandle<()>,
}

impl SimulatorSwitch {
    pub fn mount(manager: &ConnectionManager, simulator: Simulator, robot_id: impl Into<String>) -> Self {
        let robot_id = robot_id.into();
        let mut snapshots = manager.watch();
        let mut online = snapshots.borrow_and_update().status == ConnectionStatus::Connected;
        if !online {
            simulator.start(robot_id.clone());
        }

        let watcher = {
            let simulator = simulator.clone();
            tokio::spawn(async move {
                while snapshots.changed().await.is_ok() {
                    let now_online = snapshots.borrow_and_update().status == ConnectionStatus::Connected;
                    if now_online == online {
                        continue;
                    }
                    online = now_online;
                    if online {
                        info!("live robot connected, simulator paused");
                        simulator.stop();
                    } else {
                        simulator.start(robot_id.clone());
                    }
                }
            })
        };

        Self { simulator, watcher }
    }

    pub fn is_simulating(&self) -> bool {
        self.simulator.is_running()
    }
}

impl Drop for SimulatorSwitch {
    fn drop(&mut self) {
        self.watcher.abort();
        self.simulator.stop();
    }
}

/// Point-in-time view of every telemetry consumer.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub status: ConnectionStatus,
    pub simulated: bool,
    pub battery_percent: Option<u8>,
    pub battery_source: DataSource,
    pub mode: String,
    pub speed: Option<f64>,
    pub temperature: Option<f64>,
    pub position: Option<(f64, f64)>,
    pub joints: usize,
    pub nearest_obstacle: Option<f64>,
}

/// Every consumer of the deck, mounted against one connection manager.
pub struct Deck {
    manager: ConnectionManager,
    bus: SignalBus,
    switch: SimulatorSwitch,
    battery: BatteryMonitor,
    status: RobotStatusMonitor,
    odometry: Signal<Odometry>,
    joints: Signal<JointState>,
    laser: Signal<LaserScan>,
    temperature: Signal<f64>,
    speed: Signal<f64>,
    velocity: VelocityMonitor,
    camera: Signal<CompressedImage>,
    actions: ActionDispatcher,
}

impl Deck {
    /// Mount every consumer. Must be called inside a Tokio runtime.
    pub fn new(manager: ConnectionManager, robot_id: impl Into<String>) -> Self {
        let bus = SignalBus::default();
        let switch = SimulatorSwitch::mount(&manager, Simulator::new(bus.clone()), robot_id);
        let status = RobotStatusMonitor::mount(&manager);
        let actions = ActionDispatcher::new(manager.clone(), status.shared());
        Self {
            battery: BatteryMonitor::mount(&manager, &bus),
            odometry: Signal::odometry(&manager, &bus),
            joints: Signal::joint_state(&manager, &bus),
            laser: Signal::laser_scan(&manager, &bus),
            temperature: Signal::temperature(&manager, &bus),
            speed: Signal::speed(&manager),
            velocity: VelocityMonitor::mount(&manager),
            camera: Signal::camera(&manager, Topic::Camera),
            status,
            actions,
            switch,
            bus,
            manager,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn actions(&self) -> &ActionDispatcher {
        &self.actions
    }

    pub fn is_simulating(&self) -> bool {
        self.switch.is_simulating()
    }

    pub fn battery(&self) -> Option<BatteryReading> {
        self.battery.reading()
    }

    pub fn mode(&self) -> RobotMode {
        self.status.mode()
    }

    pub fn status(&self) -> &RobotStatusMonitor {
        &self.status
    }

    pub fn velocity(&self) -> Option<(VelocitySource, Twist)> {
        self.velocity.latest()
    }

    /// Camera frames received so far.
    pub fn camera_frames(&self) -> u64 {
        self.camera.updates()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            status: self.manager.status(),
            simulated: self.is_simulating(),
            battery_percent: self.battery.percent(),
            battery_source: self.battery.source(),
            mode: self.status.mode().to_string(),
            speed: self.speed.latest(),
            temperature: self.temperature.latest(),
            position: self
                .odometry
                .latest()
                .map(|o| (o.pose.pose.position.x, o.pose.pose.position.y)),
            joints: self.joints.latest().map_or(0, |j| j.name.len()),
            nearest_obstacle: self
                .laser
                .latest()
                .and_then(|scan| {
                    scan.ranges
                        .iter()
                        .copied()
                        .filter(|r| *r >= scan.range_min && *r <= scan.range_max)
                        .reduce(f64::min)
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_middleware::{ConnectionSettings, LoopbackConnector};
    use std::sync::Arc;
    use std::time::Duration;

    fn make_deck() -> (LoopbackConnector, Deck) {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), ConnectionSettings::default());
        (connector, Deck::new(manager, "go2"))
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn offline_deck_runs_on_simulator() {
        let (_connector, deck) = make_deck();
        assert!(deck.is_simulating());

        tokio::time::sleep(Duration::from_millis(350)).await;
        settle().await;

        let telemetry = deck.telemetry();
        assert_eq!(telemetry.status, ConnectionStatus::Idle);
        assert_eq!(telemetry.battery_source, DataSource::Simulated);
        assert!(telemetry.battery_percent.is_some());
        assert_eq!(telemetry.joints, 6);
        assert!(telemetry.temperature.is_some());
        assert_eq!(telemetry.speed, None);
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_pauses_simulator() {
        let (_connector, deck) = make_deck();
        deck.manager().connect("10.0.0.1").await.unwrap();
        settle().await;

        assert!(!deck.is_simulating());
        assert_eq!(deck.telemetry().battery_source, DataSource::Real);

        deck.manager().shutdown();
        settle().await;
        assert!(deck.is_simulating());
    }
}
