//! Local robot simulator.
//!
//! Publishes plausible robot telemetry on the [`SignalBus`] at 10 Hz while
//! no live robot is connected:
//!
//! | Topic | Content |
//! |---|---|
//! | `battery` | percentage in 0–100, drifting between 20 and 98 |
//! | `odometry` | slow circular drift around the origin |
//! | `jointStates` | six joints following a sinusoid |
//! | `laserScan` | 360 rays with four obstacle sectors |
//! | `temperature` | IMU temperature random walk in 20–60 °C |
//!
//! Battery percentage is published on the 0–100 scale on purpose; the
//! arbitration boundary in the runtime normalises it.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rosdeck_types::msgs::{
    BatteryState, Float32, Header, JointState, LaserScan, Odometry, Quaternion, Time, Vector3,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::SignalBus;
use crate::registry::Topic;

/// Publishing period of the simulator (10 Hz).
pub const SIMULATION_PERIOD: Duration = Duration::from_millis(100);

const JOINT_COUNT: usize = 6;
const SCAN_POINTS: usize = 360;

/// Mutable model behind the simulated robot.
#[derive(Debug)]
pub struct SimulatedRobot {
    rng: StdRng,
    battery_level: f64,
    battery_direction: f64,
    joint_positions: [f64; JOINT_COUNT],
    joint_velocities: [f64; JOINT_COUNT],
    temperature: f64,
    seq: u32,
}

impl SimulatedRobot {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic model for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            battery_level: 100.0,
            battery_direction: -1.0,
            joint_positions: [0.0; JOINT_COUNT],
            joint_velocities: [0.0; JOINT_COUNT],
            temperature: 35.0,
            seq: 0,
        }
    }

    pub fn battery_level(&self) -> f64 {
        self.battery_level
    }

    fn header(&mut self, frame_id: &str, elapsed: f64) -> Header {
        self.seq = self.seq.wrapping_add(1);
        Header {
            seq: self.seq,
            stamp: Time {
                sec: elapsed.trunc() as i64,
                nanosec: (elapsed.fract() * 1e9) as u32,
            },
            frame_id: frame_id.to_string(),
        }
    }

    pub fn battery(&mut self, elapsed: f64) -> BatteryState {
        let step = 0.01 + self.rng.gen_range(0.0..0.02);
        self.battery_level += self.battery_direction * step;
        if self.battery_level <= 20.0 {
            self.battery_direction = 1.0;
        } else if self.battery_level >= 98.0 {
            self.battery_direction = -1.0;
        }
        self.battery_level = self.battery_level.clamp(10.0, 100.0);

        let charging = self.battery_direction > 0.0;
        BatteryState {
            header: self.header("battery", elapsed),
            voltage: 12.0 + self.rng.gen_range(-0.25..0.25),
            current: if charging {
                1.5 + self.rng.gen_range(0.0..0.3)
            } else {
                -2.5 + self.rng.gen_range(0.0..0.5)
            },
            charge: self.battery_level * 0.01 * 5000.0,
            capacity: 5000.0,
            percentage: self.battery_level,
            temperature: 25.0 + self.rng.gen_range(0.0..5.0),
            power_supply_status: if charging { 1 } else { 2 },
            power_supply_health: 1,
            present: true,
            ..Default::default()
        }
    }

    pub fn odometry(&mut self, elapsed: f64) -> Odometry {
        let theta = (elapsed / 10.0) % (2.0 * PI);
        let mut odom = Odometry {
            header: self.header("odom", elapsed),
            child_frame_id: "base_link".to_string(),
            ..Default::default()
        };
        odom.pose.pose.position = Vector3::new((elapsed / 5.0).sin() * 0.1, (elapsed / 5.0).cos() * 0.1, 0.0);
        odom.pose.pose.orientation = Quaternion {
            x: 0.0,
            y: 0.0,
            z: (theta / 2.0).sin(),
            w: (theta / 2.0).cos(),
        };
        odom.pose.covariance = vec![0.0; 36];
        odom.twist.twist.linear = Vector3::new(0.1, 0.0, 0.0);
        odom.twist.twist.angular = Vector3::new(0.0, 0.0, 0.01);
        odom.twist.covariance = vec![0.0; 36];
        odom
    }

    pub fn joint_states(&mut self, elapsed: f64) -> JointState {
        for i in 0..JOINT_COUNT {
            self.joint_positions[i] =
                (self.joint_positions[i] + self.joint_velocities[i] * 0.1).clamp(-PI, PI);
            self.joint_velocities[i] = 0.1 * (elapsed + i as f64).sin();
        }
        let effort = (0..JOINT_COUNT).map(|_| self.rng.gen_range(0.0..10.0)).collect();
        JointState {
            header: self.header("base_link", elapsed),
            name: (1..=JOINT_COUNT).map(|i| format!("joint{i}")).collect(),
            position: self.joint_positions.to_vec(),
            velocity: self.joint_velocities.to_vec(),
            effort,
        }
    }

    pub fn laser_scan(&mut self, elapsed: f64) -> LaserScan {
        let increment = 2.0 * PI / SCAN_POINTS as f64;
        let mut ranges = Vec::with_capacity(SCAN_POINTS);
        let mut intensities = Vec::with_capacity(SCAN_POINTS);
        for i in 0..SCAN_POINTS {
            let angle = i as f64 * increment;
            let range = match i {
                46..=64 => 2.0 + self.rng.gen_range(0.0..0.3),
                121..=149 => 3.0 + self.rng.gen_range(0.0..0.3),
                181..=199 => 2.5 + self.rng.gen_range(0.0..0.3),
                271..=299 => 4.0 + self.rng.gen_range(0.0..0.3),
                _ => 5.0 + (angle * 3.0).sin() * 2.0 + self.rng.gen_range(0.0..0.5),
            };
            ranges.push(range);
            intensities.push(100.0 + self.rng.gen_range(0.0..155.0));
        }
        LaserScan {
            header: self.header("base_scan", elapsed),
            angle_min: 0.0,
            angle_max: 2.0 * PI,
            angle_increment: increment,
            time_increment: 0.0,
            scan_time: 0.1,
            range_min: 0.1,
            range_max: 10.0,
            ranges,
            intensities,
        }
    }

    pub fn temperature(&mut self) -> Float32 {
        self.temperature = (self.temperature + self.rng.gen_range(-0.1..0.1)).clamp(20.0, 60.0);
        Float32 {
            data: self.temperature,
        }
    }

    /// Publish one frame of every simulated topic.
    pub fn publish_frame(&mut self, bus: &SignalBus, elapsed: f64) {
        let battery = self.battery(elapsed);
        let odometry = self.odometry(elapsed);
        let joints = self.joint_states(elapsed);
        let scan = self.laser_scan(elapsed);
        let temperature = self.temperature();
        let results = [
            bus.publish(Topic::Battery, &battery),
            bus.publish(Topic::Odometry, &odometry),
            bus.publish(Topic::JointStates, &joints),
            bus.publish(Topic::LaserScan, &scan),
            bus.publish(Topic::Temperature, &temperature),
        ];
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "simulator publish failed");
            }
        }
    }
}

impl Default for SimulatedRobot {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulator task
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Running {
    robot_id: String,
    task: Option<JoinHandle<()>>,
}

/// Owns the 10 Hz publishing task.
#[derive(Clone)]
pub struct Simulator {
    bus: SignalBus,
    running: Arc<Mutex<Running>>,
}

impl Simulator {
    pub fn new(bus: SignalBus) -> Self {
        Self {
            bus,
            running: Arc::new(Mutex::new(Running::default())),
        }
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    /// Start publishing as `robot_id`. Restarts the task if already running.
    pub fn start(&self, robot_id: impl Into<String>) {
        let robot_id = robot_id.into();
        let bus = self.bus.clone();
        let mut running = self.running.lock();
        if let Some(task) = running.task.take() {
            task.abort();
        }
        info!(robot_id = %robot_id, "simulator started");
        running.robot_id = robot_id;
        running.task = Some(tokio::spawn(async move {
            let mut robot = SimulatedRobot::new();
            let started = Instant::now();
            let mut ticker = tokio::time::interval(SIMULATION_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                robot.publish_frame(&bus, started.elapsed().as_secs_f64());
            }
        }));
    }

    /// Stop publishing. Idempotent.
    pub fn stop(&self) {
        let mut running = self.running.lock();
        if let Some(task) = running.task.take() {
            task.abort();
            debug!(robot_id = %running.robot_id, "simulator stopped");
        }
        running.robot_id.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().task.is_some()
    }

    pub fn robot_id(&self) -> Option<String> {
        let running = self.running.lock();
        running.task.as_ref().map(|_| running.robot_id.clone())
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
