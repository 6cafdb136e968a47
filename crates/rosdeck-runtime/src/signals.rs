//! Single-value consumers.
//!
//! Each consumer keeps the latest decoded value of one topic. Telemetry
//! signals the simulator also produces fall back to the local bus while
//! offline; robot-only signals (sport mode speed, commanded velocity, camera)
//! simply go quiet.
//!
//! | Consumer | Topic | Value |
//! |---|---|---|
//! | [`Signal::odometry`] | `odometry` | [`Odometry`] |
//! | [`Signal::joint_state`] | `jointStates` | [`JointState`] |
//! | [`Signal::laser_scan`] | `laserScan` | [`LaserScan`] |
//! | [`Signal::temperature`] | `temperature` | °C as `f64` |
//! | [`Signal::speed`] | `sportModeState` | velocity magnitude, m/s, 1 decimal |
//! | [`Signal::camera`] | `camera` / `thermal` / `rgb` | [`CompressedImage`], ≤ 30 fps |
//! | [`VelocityMonitor`] | `velocity` + `velocityNipple` | commanded [`Twist`] |

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rosdeck_middleware::{ConnectionManager, SignalBus, Topic};
use rosdeck_types::msgs::{
    CompressedImage, Float32, JointState, LaserScan, Odometry, SportModeState, Twist, Vector3,
};
use serde::de::DeserializeOwned;

use crate::mount::Mount;

/// Top speed of the robot in m/s; speed gauges are scaled against it.
pub const MAX_SPEED: f64 = 2.0;

/// Velocity magnitude rounded to one decimal.
pub fn speed_of(state: &SportModeState) -> f64 {
    let v = &state.velocity;
    let magnitude = Vector3::new(
        v.first().copied().unwrap_or_default(),
        v.get(1).copied().unwrap_or_default(),
        v.get(2).copied().unwrap_or_default(),
    )
    .magnitude();
    (magnitude * 10.0).round() / 10.0
}

/// Rotate a virtual-joystick command into the robot frame: linear
/// `(-y, x, 0)`, angular `(0, 0, -z)`.
pub fn nipple_to_robot_frame(twist: &Twist) -> Twist {
    Twist {
        linear: Vector3::new(-twist.linear.y, twist.linear.x, 0.0),
        angular: Vector3::new(0.0, 0.0, -twist.angular.z),
    }
}

/// How a [`Signal`] subscribes.
#[derive(Debug, Clone, Default)]
pub struct SignalOptions {
    /// Gate deliveries to about 30 per second.
    pub high_frequency: bool,
    /// Follow this bus while offline.
    pub offline_source: Option<SignalBus>,
}

struct Latest<T> {
    value: Mutex<Option<T>>,
    updates: AtomicU64,
}

impl<T> Latest<T> {
    fn store(&self, value: T) {
        *self.value.lock() = Some(value);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }
}

/// Latest value of one topic.
pub struct Signal<T> {
    latest: Arc<Latest<T>>,
    _mount: Mount,
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Mount a consumer of `topic`, decoding messages as `M` and storing
    /// `map(msg)`.
    pub fn mount_map<M, F>(
        manager: &ConnectionManager,
        topic: Topic,
        options: SignalOptions,
        map: F,
    ) -> Self
    where
        M: DeserializeOwned + 'static,
        F: Fn(M) -> T + Send + Sync + 'static,
    {
        let latest = Arc::new(Latest {
            value: Mutex::new(None),
            updates: AtomicU64::new(0),
        });
        let map = Arc::new(map);
        let mount = {
            let latest = Arc::clone(&latest);
            Mount::new(manager, topic.name(), move |factory| {
                let sink = Arc::clone(&latest);
                let map = Arc::clone(&map);
                let deliver = move |msg: M| sink.store(map(msg));
                let sub = match (factory, &options.offline_source) {
                    (Some(factory), _) if options.high_frequency => {
                        factory.subscribe_high_frequency(topic, deliver)?
                    }
                    (Some(factory), _) => factory.subscribe(topic, deliver)?,
                    (None, Some(bus)) => bus.subscribe(topic, deliver)?,
                    (None, None) => return Ok(Vec::new()),
                };
                Ok(vec![sub])
            })
        };
        Self {
            latest,
            _mount: mount,
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.value.lock().clone()
    }

    /// Number of values stored so far.
    pub fn updates(&self) -> u64 {
        self.latest.updates.load(Ordering::Relaxed)
    }
}

impl<T: DeserializeOwned + Clone + Send + 'static> Signal<T> {
    pub fn mount(manager: &ConnectionManager, topic: Topic, options: SignalOptions) -> Self {
        Self::mount_map(manager, topic, options, |msg: T| msg)
    }
}

fn with_bus(bus: &SignalBus) -> SignalOptions {
    SignalOptions {
        offline_source: Some(bus.clone()),
        ..Default::default()
    }
}

impl Signal<Odometry> {
    pub fn odometry(manager: &ConnectionManager, bus: &SignalBus) -> Self {
        Self::mount(manager, Topic::Odometry, with_bus(bus))
    }
}

impl Signal<JointState> {
    pub fn joint_state(manager: &ConnectionManager, bus: &SignalBus) -> Self {
        Self::mount(manager, Topic::JointStates, with_bus(bus))
    }
}

impl Signal<LaserScan> {
    pub fn laser_scan(manager: &ConnectionManager, bus: &SignalBus) -> Self {
        Self::mount(manager, Topic::LaserScan, with_bus(bus))
    }
}

impl Signal<f64> {
    /// IMU temperature in °C.
    pub fn temperature(manager: &ConnectionManager, bus: &SignalBus) -> Self {
        Self::mount_map(manager, Topic::Temperature, with_bus(bus), |msg: Float32| msg.data)
    }

    /// Ground speed from the sport mode state.
    pub fn speed(manager: &ConnectionManager) -> Self {
        Self::mount_map(manager, Topic::SportModeState, SignalOptions::default(), |msg: SportModeState| {
            speed_of(&msg)
        })
    }
}

impl Signal<CompressedImage> {
    /// Gated camera stream; `topic` is one of the image topics.
    pub fn camera(manager: &ConnectionManager, topic: Topic) -> Self {
        let options = SignalOptions {
            high_frequency: true,
            offline_source: None,
        };
        Self::mount(manager, topic, options)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Commanded velocity
// ────────────────────────────────────────────────────────────────────────────

/// Which control surface produced the last velocity command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelocitySource {
    Joystick,
    Nipple,
}

/// Last commanded velocity from either control surface, in the robot frame.
pub struct VelocityMonitor {
    latest: Arc<Mutex<Option<(VelocitySource, Twist)>>>,
    _mount: Mount,
}

impl VelocityMonitor {
    pub fn mount(manager: &ConnectionManager) -> Self {
        let latest = Arc::new(Mutex::new(None));
        let mount = {
            let latest = Arc::clone(&latest);
            Mount::new(manager, "velocity", move |factory| {
                let Some(factory) = factory else {
                    return Ok(Vec::new());
                };
                let joystick = Arc::clone(&latest);
                let nipple = Arc::clone(&latest);
                Ok(vec![
                    factory.subscribe(Topic::Velocity, move |twist: Twist| {
                        *joystick.lock() = Some((VelocitySource::Joystick, twist));
                    })?,
                    factory.subscribe(Topic::VelocityNipple, move |twist: Twist| {
                        *nipple.lock() = Some((VelocitySource::Nipple, nipple_to_robot_frame(&twist)));
                    })?,
                ])
            })
        };
        Self {
            latest,
            _mount: mount,
        }
    }

    pub fn latest(&self) -> Option<(VelocitySource, Twist)> {
        self.latest.lock().clone()
    }
}
