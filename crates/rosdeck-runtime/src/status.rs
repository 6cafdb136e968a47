//! Robot operating status.
//!
//! Two topics feed one state: `sportModeState` carries the locomotion mode
//! code, `robotStatus` carries the emergency stop and the light and
//! anti-collision flags. Emergency and obstacle avoidance are lockout modes:
//! once entered, ordinary mode codes no longer overwrite them. Only a
//! `robotStatus` report with the emergency stop released, or an explicit
//! [`RobotStatusState::clear_lockout`], leaves them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use rosdeck_middleware::{ConnectionManager, Topic};
use rosdeck_types::DeckError;
use rosdeck_types::msgs::{RobotStatusReport, SportModeState};
use tracing::{debug, info};

use crate::mount::Mount;

/// Operating mode reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RobotMode {
    #[default]
    Idle,
    BalanceStand,
    Pose,
    Locomotion,
    LieDown,
    JointLock,
    Damping,
    Sit,
    ObstacleAvoidance,
    Emergency,
}

impl RobotMode {
    pub const ALL: [RobotMode; 10] = [
        RobotMode::Idle,
        RobotMode::BalanceStand,
        RobotMode::Pose,
        RobotMode::Locomotion,
        RobotMode::LieDown,
        RobotMode::JointLock,
        RobotMode::Damping,
        RobotMode::Sit,
        RobotMode::ObstacleAvoidance,
        RobotMode::Emergency,
    ];

    /// `SportModeState.mode` code.
    pub const fn code(self) -> i32 {
        match self {
            RobotMode::Idle => 0,
            RobotMode::BalanceStand => 1,
            RobotMode::Pose => 2,
            RobotMode::Locomotion => 3,
            RobotMode::LieDown => 5,
            RobotMode::JointLock => 6,
            RobotMode::Damping => 7,
            RobotMode::Sit => 10,
            RobotMode::ObstacleAvoidance => 98,
            RobotMode::Emergency => 99,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    pub const fn name(self) -> &'static str {
        match self {
            RobotMode::Idle => "idle",
            RobotMode::BalanceStand => "balanceStand",
            RobotMode::Pose => "pose",
            RobotMode::Locomotion => "locomotion",
            RobotMode::LieDown => "lieDown",
            RobotMode::JointLock => "jointLock",
            RobotMode::Damping => "damping",
            RobotMode::Sit => "sit",
            RobotMode::ObstacleAvoidance => "obstacleAvoidance",
            RobotMode::Emergency => "emergency",
        }
    }

    /// Whether ordinary mode codes are ignored while in this mode.
    pub const fn is_lockout(self) -> bool {
        matches!(self, RobotMode::Emergency | RobotMode::ObstacleAvoidance)
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RobotMode {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| DeckError::Decode(format!("unknown robot mode: {s}")))
    }
}

/// Consumer-visible robot status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotStatusState {
    pub mode: RobotMode,
    pub is_pose: bool,
    pub light: bool,
    pub anti_collision: bool,
    /// Mode the robot was in when the emergency stop engaged.
    pub before_emergency: Option<RobotMode>,
}

impl RobotStatusState {
    pub fn is_locked(&self) -> bool {
        self.mode.is_lockout()
    }

    /// Apply a `sportModeState` message. Returns whether the mode changed.
    pub fn apply_sport_mode(&mut self, msg: &SportModeState) -> bool {
        self.is_pose = msg.mode == RobotMode::Pose.code();
        if self.is_locked() {
            return false;
        }
        let Some(mode) = RobotMode::from_code(msg.mode) else {
            debug!(code = msg.mode, "ignoring unknown sport mode code");
            return false;
        };
        let changed = mode != self.mode;
        self.mode = mode;
        changed
    }

    /// Apply a `robotStatus` report. Returns whether the mode changed.
    pub fn apply_robot_status(&mut self, msg: &RobotStatusReport) -> bool {
        self.light = msg.light_state;
        self.anti_collision = msg.obstacle_avoidance_state;

        if msg.emergency_stop && self.mode != RobotMode::Emergency {
            self.before_emergency.get_or_insert(self.mode);
            self.mode = RobotMode::Emergency;
            info!("emergency stop engaged");
            true
        } else if !msg.emergency_stop && self.mode == RobotMode::Emergency {
            self.mode = RobotMode::Idle;
            self.before_emergency = None;
            info!("emergency stop released");
            true
        } else {
            false
        }
    }

    /// Leave a lockout mode explicitly.
    pub fn clear_lockout(&mut self) {
        if self.is_locked() {
            self.mode = RobotMode::Idle;
            self.before_emergency = None;
        }
    }
}

/// Status shared between the monitor and the action dispatcher.
pub type SharedStatus = Arc<Mutex<RobotStatusState>>;

/// Mounted robot status consumer. Online only; the simulator does not
/// produce status.
pub struct RobotStatusMonitor {
    state: SharedStatus,
    _mount: Mount,
}

impl RobotStatusMonitor {
    pub fn mount(manager: &ConnectionManager) -> Self {
        let state: SharedStatus = Arc::default();
        let mount = {
            let state = Arc::clone(&state);
            Mount::new(manager, "robotStatus", move |factory| {
                let Some(factory) = factory else {
                    return Ok(Vec::new());
                };
                let sport = Arc::clone(&state);
                let report = Arc::clone(&state);
                Ok(vec![
                    factory.subscribe(Topic::SportModeState, move |msg: SportModeState| {
                        sport.lock().apply_sport_mode(&msg);
                    })?,
                    factory.subscribe(Topic::RobotStatus, move |msg: RobotStatusReport| {
                        report.lock().apply_robot_status(&msg);
                    })?,
                ])
            })
        };
        Self {
            state,
            _mount: mount,
        }
    }

    pub fn state(&self) -> RobotStatusState {
        self.state.lock().clone()
    }

    pub fn mode(&self) -> RobotMode {
        self.state.lock().mode
    }

    /// Handle for writers outside the topic path (robot actions).
    pub fn shared(&self) -> SharedStatus {
        Arc::clone(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_middleware::{ConnectionSettings, LoopbackConnector};
    use serde_json::json;

    fn sport(mode: i32) -> SportModeState {
        SportModeState {
            mode,
            ..Default::default()
        }
    }

    fn report(emergency_stop: bool) -> RobotStatusReport {
        RobotStatusReport {
            emergency_stop,
            ..Default::default()
        }
    }

    #[test]
    fn mode_table_round_trips_codes_and_names() {
        assert_eq!(RobotMode::from_code(10), Some(RobotMode::Sit));
        assert_eq!(RobotMode::from_code(4), None);
        assert_eq!("lieDown".parse::<RobotMode>().unwrap(), RobotMode::LieDown);
        assert!("flying".parse::<RobotMode>().is_err());
        assert_eq!(RobotMode::ObstacleAvoidance.to_string(), "obstacleAvoidance");
    }

    #[test]
    fn sport_mode_updates_mode_and_pose_flag() {
        let mut state = RobotStatusState::default();
        assert!(state.apply_sport_mode(&sport(2)));
        assert_eq!(state.mode, RobotMode::Pose);
        assert!(state.is_pose);

        state.apply_sport_mode(&sport(3));
        assert!(!state.is_pose);
    }

    #[test]
    fn unknown_code_keeps_previous_mode() {
        let mut state = RobotStatusState::default();
        state.apply_sport_mode(&sport(1));
        assert!(!state.apply_sport_mode(&sport(42)));
        assert_eq!(state.mode, RobotMode::BalanceStand);
    }

    #[test]
    fn emergency_is_sticky_against_sport_mode() {
        let mut state = RobotStatusState::default();
        state.apply_sport_mode(&sport(6));
        state.apply_robot_status(&report(true));
        assert_eq!(state.mode, RobotMode::Emergency);
        assert_eq!(state.before_emergency, Some(RobotMode::JointLock));

        assert!(!state.apply_sport_mode(&sport(1)));
        assert_eq!(state.mode, RobotMode::Emergency);

        assert!(state.apply_robot_status(&report(false)));
        assert_eq!(state.mode, RobotMode::Idle);
        assert_eq!(state.before_emergency, None);
    }

    #[test]
    fn obstacle_avoidance_needs_explicit_clear() {
        let mut state = RobotStatusState::default();
        state.apply_sport_mode(&sport(98));
        assert!(state.is_locked());
        state.apply_sport_mode(&sport(0));
        state.apply_robot_status(&report(false));
        assert_eq!(state.mode, RobotMode::ObstacleAvoidance);

        state.clear_lockout();
        assert_eq!(state.mode, RobotMode::Idle);
        assert!(state.apply_sport_mode(&sport(3)));
    }

    #[test]
    fn robot_status_carries_light_and_anti_collision() {
        let mut state = RobotStatusState::default();
        state.apply_robot_status(&RobotStatusReport {
            light_state: true,
            obstacle_avoidance_state: true,
            ..Default::default()
        });
        assert!(state.light);
        assert!(state.anti_collision);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_follows_both_topics() {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), ConnectionSettings::default());
        manager.connect("10.0.0.1").await.unwrap();
        let monitor = RobotStatusMonitor::mount(&manager);
        let peer = connector.last_peer().unwrap();

        peer.publish("/lf/sportmodestate", json!({"mode": 10, "velocity": [0.0, 0.0, 0.0]}));
        assert_eq!(monitor.mode(), RobotMode::Sit);

        peer.publish("/robot_status", json!({"emergency_stop": true, "light_state": true}));
        let state = monitor.state();
        assert_eq!(state.mode, RobotMode::Emergency);
        assert_eq!(state.before_emergency, Some(RobotMode::Sit));
        assert!(state.light);
    }
}
