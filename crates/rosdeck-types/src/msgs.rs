//! Serde models of the ROS messages decoded by the core.
//!
//! Field names follow the ROS message definitions exactly so the rosbridge
//! JSON payloads deserialise without renaming. Every struct tolerates missing
//! fields (`#[serde(default)]`); bridges differ in which optional fields they
//! fill in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Time {
    pub sec: i64,
    pub nanosec: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub seq: u32,
    pub stamp: Time,
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseWithCovariance {
    pub pose: Pose,
    pub covariance: Vec<f64>,
}

/// `geometry_msgs/Twist`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwistWithCovariance {
    pub twist: Twist,
    pub covariance: Vec<f64>,
}

/// `nav_msgs/Odometry`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

/// `sensor_msgs/BatteryState`.
///
/// `percentage` is a 0–1 fraction on the live robot; the simulator reports
/// 0–100. The arbitration boundary normalises both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryState {
    pub header: Header,
    pub voltage: f64,
    pub temperature: f64,
    pub current: f64,
    pub charge: f64,
    pub capacity: f64,
    pub design_capacity: f64,
    pub percentage: f64,
    pub power_supply_status: u8,
    pub power_supply_health: u8,
    pub power_supply_technology: u8,
    pub present: bool,
    pub cell_voltage: Vec<f64>,
    pub cell_temperature: Vec<f64>,
    pub location: String,
    pub serial_number: String,
}

/// `sensor_msgs/JointState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointState {
    pub header: Header,
    pub name: Vec<String>,
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub effort: Vec<f64>,
}

/// `sensor_msgs/LaserScan`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserScan {
    pub header: Header,
    pub angle_min: f64,
    pub angle_max: f64,
    pub angle_increment: f64,
    pub time_increment: f64,
    pub scan_time: f64,
    pub range_min: f64,
    pub range_max: f64,
    pub ranges: Vec<f64>,
    pub intensities: Vec<f64>,
}

impl LaserScan {
    /// Mean of the readings inside `[range_min, range_max]`, or `0.0` when
    /// none are valid.
    pub fn mean_valid_range(&self) -> f64 {
        let valid: Vec<f64> = self
            .ranges
            .iter()
            .copied()
            .filter(|r| *r >= self.range_min && *r <= self.range_max)
            .collect();
        if valid.is_empty() {
            0.0
        } else {
            valid.iter().sum::<f64>() / valid.len() as f64
        }
    }
}

/// `sensor_msgs/CompressedImage`; `data` stays base64 as delivered by the
/// bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressedImage {
    pub header: Header,
    pub format: String,
    pub data: String,
}

/// `std_msgs/Float32`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Float32 {
    pub data: f64,
}

/// `unitree_go/msg/SportModeState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SportModeState {
    pub header: Header,
    pub gait_type: u8,
    pub foot_raise_height: f64,
    /// x, y, z in the odometry frame.
    pub position: Vec<f64>,
    pub body_height: f64,
    /// vx, vy, vz in the odometry frame.
    pub velocity: Vec<f64>,
    pub yaw_speed: f64,
    pub mode: i32,
}

/// `custom_interfaces/RobotStatus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotStatusReport {
    pub emergency_stop: bool,
    pub light_state: bool,
    pub obstacle_avoidance_state: bool,
    pub rpm: Vec<f64>,
}

/// Common shape of the custom robot-action service responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_state_tolerates_partial_payload() {
        let msg: BatteryState =
            serde_json::from_str(r#"{"percentage":0.73,"voltage":12.1}"#).unwrap();
        assert!((msg.percentage - 0.73).abs() < f64::EPSILON);
        assert!(msg.cell_voltage.is_empty());
    }

    #[test]
    fn vector_magnitude() {
        assert!((Vector3::new(3.0, 4.0, 0.0).magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn laser_scan_mean_ignores_out_of_range_readings() {
        let scan = LaserScan {
            range_min: 0.1,
            range_max: 10.0,
            ranges: vec![1.0, 3.0, 50.0, 0.0],
            ..Default::default()
        };
        assert!((scan.mean_valid_range() - 2.0).abs() < 1e-12);
        assert_eq!(LaserScan::default().mean_valid_range(), 0.0);
    }

    #[test]
    fn quaternion_defaults_to_identity() {
        assert_eq!(Pose::default().orientation.w, 1.0);
    }
}
