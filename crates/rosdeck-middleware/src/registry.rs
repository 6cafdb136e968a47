//! Message Type Registry.
//!
//! Static mapping from logical topic and service names to their wire-level
//! ROS type strings and default path segments. Topics and services live in
//! two separate enums: `mode` exists on both sides of the robot API and the
//! two namespaces must never be conflated.
//!
//! Because the logical names are enum variants, "key not found" cannot
//! happen for code wired at compile time. Names arriving as strings (operator
//! input, config) go through [`FromStr`] and fail with
//! [`DeckError::UnknownTopic`] / [`DeckError::UnknownService`].

use std::fmt;
use std::str::FromStr;

use rosdeck_types::DeckError;

/// Path prefix applied to every topic and service in simulated mode.
pub const SIMULATED_PREFIX: &str = "/dummy";

/// Package-qualified ROS message or service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub package: &'static str,
    pub type_name: &'static str,
}

impl MessageType {
    const fn new(package: &'static str, type_name: &'static str) -> Self {
        Self { package, type_name }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.type_name)
    }
}

mod packages {
    pub const STD: &str = "std_msgs";
    pub const GEOMETRY: &str = "geometry_msgs";
    pub const SENSOR: &str = "sensor_msgs";
    pub const NAV: &str = "nav_msgs";
    pub const STD_SERVICES: &str = "std_srvs";
    pub const CUSTOM_SERVICE: &str = "custom_interfaces/srv";
    pub const CUSTOM_INTERFACES: &str = "custom_interfaces";
    pub const CUSTOM_MESSAGES: &str = "custom_msgs";
    pub const UNITREE: &str = "unitree_go/msg";
    pub const ROSAPI: &str = "rosapi";
}

/// Logical wire types shared by topics and services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RosType {
    String,
    Bool,
    Float32,
    Odometry,
    LaserScan,
    Twist,
    OccupancyGrid,
    JointState,
    Image,
    Temperature,
    Battery,
    LlmPrompt,
    SportModeState,
    Mode,
    Pose,
    Light,
    RobotStatus,
    AntiCollision,
    GetTime,
}

impl RosType {
    pub const fn message_type(self) -> MessageType {
        use packages::*;
        match self {
            RosType::String => MessageType::new(STD, "String"),
            RosType::Bool => MessageType::new(STD_SERVICES, "SetBool"),
            RosType::Float32 => MessageType::new(STD, "Float32"),
            RosType::Odometry => MessageType::new(NAV, "Odometry"),
            RosType::LaserScan => MessageType::new(SENSOR, "LaserScan"),
            RosType::Twist => MessageType::new(GEOMETRY, "Twist"),
            RosType::OccupancyGrid => MessageType::new(NAV, "OccupancyGrid"),
            RosType::JointState => MessageType::new(SENSOR, "JointState"),
            RosType::Image => MessageType::new(SENSOR, "CompressedImage"),
            RosType::Temperature => MessageType::new(STD, "Float32"),
            RosType::Battery => MessageType::new(SENSOR, "BatteryState"),
            RosType::LlmPrompt => MessageType::new(CUSTOM_SERVICE, "LLMPrompt"),
            RosType::SportModeState => MessageType::new(UNITREE, "SportModeState"),
            RosType::Mode => MessageType::new(CUSTOM_INTERFACES, "Mode"),
            RosType::Pose => MessageType::new(CUSTOM_INTERFACES, "Pose"),
            RosType::Light => MessageType::new(CUSTOM_MESSAGES, "LightControl"),
            RosType::RobotStatus => MessageType::new(CUSTOM_INTERFACES, "RobotStatus"),
            RosType::AntiCollision => {
                MessageType::new(CUSTOM_INTERFACES, "ObstacleAvoidance")
            }
            RosType::GetTime => MessageType::new(ROSAPI, "GetTime"),
        }
    }
}

/// Build the wire path for `segment`, prefixed in simulated mode.
fn wire_path(segment: &str, simulated: bool) -> String {
    if simulated {
        format!("{SIMULATED_PREFIX}/{segment}")
    } else {
        format!("/{segment}")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topics
// ────────────────────────────────────────────────────────────────────────────

/// Logical publish/subscribe signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Velocity,
    VelocityNipple,
    Temperature,
    Battery,
    LaserScan,
    Odometry,
    Listener,
    Map,
    JointStates,
    Camera,
    SportModeState,
    RobotStatus,
    Thermal,
    Rgb,
}

impl Topic {
    pub const ALL: [Topic; 14] = [
        Topic::Velocity,
        Topic::VelocityNipple,
        Topic::Temperature,
        Topic::Battery,
        Topic::LaserScan,
        Topic::Odometry,
        Topic::Listener,
        Topic::Map,
        Topic::JointStates,
        Topic::Camera,
        Topic::SportModeState,
        Topic::RobotStatus,
        Topic::Thermal,
        Topic::Rgb,
    ];

    /// Logical name as used by consumers and operator input.
    pub const fn name(self) -> &'static str {
        match self {
            Topic::Velocity => "velocity",
            Topic::VelocityNipple => "velocityNipple",
            Topic::Temperature => "temperature",
            Topic::Battery => "battery",
            Topic::LaserScan => "laserScan",
            Topic::Odometry => "odometry",
            Topic::Listener => "listener",
            Topic::Map => "map",
            Topic::JointStates => "jointStates",
            Topic::Camera => "camera",
            Topic::SportModeState => "sportModeState",
            Topic::RobotStatus => "robotStatus",
            Topic::Thermal => "thermal",
            Topic::Rgb => "rgb",
        }
    }

    /// Default path segment (without leading slash).
    pub const fn segment(self) -> &'static str {
        match self {
            Topic::Velocity => "cmd_vel_joy",
            Topic::VelocityNipple => "cmd_vel_nipple",
            Topic::Temperature => "imu_temp",
            Topic::Battery => "battery",
            Topic::LaserScan => "scan",
            Topic::Odometry => "odom",
            Topic::Listener => "listener",
            Topic::Map => "map",
            Topic::JointStates => "joint_states",
            Topic::Camera => "compressed_camera",
            Topic::SportModeState => "lf/sportmodestate",
            Topic::RobotStatus => "robot_status",
            Topic::Thermal => "camcam/thermal/compressed_image",
            Topic::Rgb => "camcam/rgb/compressed_image",
        }
    }

    pub const fn ros_type(self) -> RosType {
        match self {
            Topic::Velocity | Topic::VelocityNipple => RosType::Twist,
            Topic::Temperature => RosType::Temperature,
            Topic::Battery => RosType::Battery,
            Topic::LaserScan => RosType::LaserScan,
            Topic::Odometry => RosType::Odometry,
            Topic::Listener => RosType::String,
            Topic::Map => RosType::OccupancyGrid,
            Topic::JointStates => RosType::JointState,
            Topic::Camera | Topic::Thermal | Topic::Rgb => RosType::Image,
            Topic::SportModeState => RosType::SportModeState,
            Topic::RobotStatus => RosType::RobotStatus,
        }
    }

    pub const fn message_type(self) -> MessageType {
        self.ros_type().message_type()
    }

    /// Resolved wire path, e.g. `/battery` or `/dummy/battery`.
    pub fn path(self, simulated: bool) -> String {
        wire_path(self.segment(), simulated)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topic {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| DeckError::UnknownTopic(s.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Services
// ────────────────────────────────────────────────────────────────────────────

/// Logical request/response actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Prompt,
    AntiCollision,
    Light,
    Stop,
    Pose,
    Mode,
    /// `rosapi` clock query used as the keep-alive probe.
    GetTime,
}

impl Service {
    pub const ALL: [Service; 7] = [
        Service::Prompt,
        Service::AntiCollision,
        Service::Light,
        Service::Stop,
        Service::Pose,
        Service::Mode,
        Service::GetTime,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Service::Prompt => "prompt",
            Service::AntiCollision => "antiCollision",
            Service::Light => "light",
            Service::Stop => "stop",
            Service::Pose => "pose",
            Service::Mode => "mode",
            Service::GetTime => "getTime",
        }
    }

    pub const fn segment(self) -> &'static str {
        match self {
            Service::Prompt => "rosa_prompt",
            Service::AntiCollision => "obstacle_avoidance",
            Service::Light => "light_control",
            Service::Stop => "emergency_stop",
            Service::Pose => "pose",
            Service::Mode => "mode",
            Service::GetTime => "rosapi/get_time",
        }
    }

    pub const fn ros_type(self) -> RosType {
        match self {
            Service::Prompt => RosType::LlmPrompt,
            Service::AntiCollision => RosType::AntiCollision,
            Service::Light | Service::Stop => RosType::Bool,
            Service::Pose => RosType::Pose,
            Service::Mode => RosType::Mode,
            Service::GetTime => RosType::GetTime,
        }
    }

    pub const fn message_type(self) -> MessageType {
        self.ros_type().message_type()
    }

    /// Resolved wire path. The keep-alive probe targets the bridge itself and
    /// is never prefixed.
    pub fn path(self, simulated: bool) -> String {
        wire_path(self.segment(), simulated && self != Service::GetTime)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.name() == s)
            .ok_or_else(|| DeckError::UnknownService(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_topic_resolves_type_and_path() {
        assert_eq!(Topic::Battery.message_type().to_string(), "sensor_msgs/BatteryState");
        assert_eq!(Topic::Battery.path(false), "/battery");
        assert_eq!(Topic::Battery.path(true), "/dummy/battery");
    }

    #[test]
    fn nested_segments_keep_their_slashes() {
        assert_eq!(Topic::SportModeState.path(false), "/lf/sportmodestate");
        assert_eq!(
            Topic::SportModeState.message_type().to_string(),
            "unitree_go/msg/SportModeState"
        );
    }

    #[test]
    fn mode_is_distinct_in_both_namespaces() {
        let topic: Result<Topic, _> = "mode".parse();
        assert!(matches!(topic, Err(DeckError::UnknownTopic(_))));
        let service: Service = "mode".parse().unwrap();
        assert_eq!(service.path(false), "/mode");
        assert_eq!(service.message_type().to_string(), "custom_interfaces/Mode");
    }

    #[test]
    fn every_name_round_trips_through_from_str() {
        for topic in Topic::ALL {
            assert_eq!(topic.name().parse::<Topic>().unwrap(), topic);
        }
        for service in Service::ALL {
            assert_eq!(service.name().parse::<Service>().unwrap(), service);
        }
    }

    #[test]
    fn unknown_service_name_is_rejected() {
        let err = "teleport".parse::<Service>().unwrap_err();
        assert_eq!(err, DeckError::UnknownService("teleport".to_string()));
    }

    #[test]
    fn keep_alive_probe_is_never_prefixed() {
        assert_eq!(Service::GetTime.path(true), "/rosapi/get_time");
        assert_eq!(Service::Stop.path(true), "/dummy/emergency_stop");
        assert_eq!(Service::Stop.message_type().to_string(), "std_srvs/SetBool");
    }
}
