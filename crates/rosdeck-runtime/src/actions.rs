//! Robot actions.
//!
//! Every operator action is one service call with a fixed request body.
//! Which actions make sense depends on the robot's current mode, per the
//! transition table in [`allowed_actions`].
//!
//! A service response with `success: false` is routed to the failure path
//! carrying the robot's `message`. Actions are never retried: most of them
//! are not idempotent.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use rosdeck_middleware::{ConnectionManager, Service};
use rosdeck_types::DeckError;
use rosdeck_types::msgs::ActionResponse;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::status::{RobotMode, RobotStatusState, SharedStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RobotAction {
    GetUp,
    GetDown,
    BalanceStand,
    JointLock,
    LightOn,
    LightOff,
    AntiCollisionOn,
    AntiCollisionOff,
    EmergencyOn,
    EmergencyOff,
    PoseOn,
    PoseOff,
    Hello,
    StopMove,
    Sit,
    RiseSit,
    Stretch,
    Dance,
    Prompt,
}

impl RobotAction {
    pub const ALL: [RobotAction; 19] = [
        RobotAction::GetUp,
        RobotAction::GetDown,
        RobotAction::BalanceStand,
        RobotAction::JointLock,
        RobotAction::LightOn,
        RobotAction::LightOff,
        RobotAction::AntiCollisionOn,
        RobotAction::AntiCollisionOff,
        RobotAction::EmergencyOn,
        RobotAction::EmergencyOff,
        RobotAction::PoseOn,
        RobotAction::PoseOff,
        RobotAction::Hello,
        RobotAction::StopMove,
        RobotAction::Sit,
        RobotAction::RiseSit,
        RobotAction::Stretch,
        RobotAction::Dance,
        RobotAction::Prompt,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            RobotAction::GetUp => "getUp",
            RobotAction::GetDown => "getDown",
            RobotAction::BalanceStand => "balanceStand",
            RobotAction::JointLock => "jointLock",
            RobotAction::LightOn => "lightOn",
            RobotAction::LightOff => "lightOff",
            RobotAction::AntiCollisionOn => "antiCollisionOn",
            RobotAction::AntiCollisionOff => "antiCollisionOff",
            RobotAction::EmergencyOn => "emergencyOn",
            RobotAction::EmergencyOff => "emergencyOff",
            RobotAction::PoseOn => "poseOn",
            RobotAction::PoseOff => "poseOff",
            RobotAction::Hello => "hello",
            RobotAction::StopMove => "stopMove",
            RobotAction::Sit => "sit",
            RobotAction::RiseSit => "riseSit",
            RobotAction::Stretch => "stretch",
            RobotAction::Dance => "dance",
            RobotAction::Prompt => "prompt",
        }
    }

    pub const fn service(self) -> Service {
        match self {
            RobotAction::LightOn | RobotAction::LightOff => Service::Light,
            RobotAction::AntiCollisionOn | RobotAction::AntiCollisionOff => Service::AntiCollision,
            RobotAction::EmergencyOn | RobotAction::EmergencyOff => Service::Stop,
            RobotAction::PoseOn | RobotAction::PoseOff => Service::Pose,
            RobotAction::Prompt => Service::Prompt,
            _ => Service::Mode,
        }
    }

    /// Request body. `input` is only used by [`RobotAction::Prompt`].
    pub fn request(self, input: Option<&str>) -> Value {
        let mode = |name: &str| json!({ "mode": name });
        match self {
            // The robot has no dedicated lock command; standing up locks the joints.
            RobotAction::GetUp | RobotAction::JointLock => mode("stand_up"),
            RobotAction::GetDown => mode("stand_down"),
            RobotAction::BalanceStand => mode("balance_stand"),
            RobotAction::Hello => mode("hello"),
            RobotAction::StopMove => mode("stop_move"),
            RobotAction::Sit => mode("sit"),
            RobotAction::RiseSit => mode("rise_sit"),
            RobotAction::Stretch => mode("stretch"),
            RobotAction::Dance => mode("dance1"),
            RobotAction::LightOn => json!({ "control": true, "brightness": 10 }),
            RobotAction::LightOff => json!({ "control": false }),
            RobotAction::AntiCollisionOn => json!({ "control": true }),
            RobotAction::AntiCollisionOff => json!({ "control": false }),
            RobotAction::EmergencyOn => json!({ "data": true }),
            RobotAction::EmergencyOff => json!({ "data": false }),
            RobotAction::PoseOn => json!({ "flag": true }),
            RobotAction::PoseOff => json!({ "flag": false }),
            RobotAction::Prompt => json!({ "input": input }),
        }
    }

    /// Local status update once the call settles. `outcome` is the robot's
    /// `success` flag, or `None` when the call itself failed.
    fn settle(self, status: &mut RobotStatusState, outcome: Option<bool>) {
        match (self, outcome) {
            (RobotAction::LightOn, Some(ok)) => status.light = ok,
            (RobotAction::LightOn, None) => status.light = false,
            (RobotAction::LightOff, Some(ok)) => status.light = !ok,
            (RobotAction::LightOff, None) => status.light = true,
            (RobotAction::AntiCollisionOn, Some(ok)) => status.anti_collision = ok,
            (RobotAction::AntiCollisionOn, None) => status.anti_collision = false,
            (RobotAction::AntiCollisionOff, Some(ok)) => status.anti_collision = !ok,
            (RobotAction::AntiCollisionOff, None) => status.anti_collision = true,
            (RobotAction::EmergencyOn, Some(true)) => status.before_emergency = Some(status.mode),
            (RobotAction::EmergencyOff, Some(true)) => status.before_emergency = None,
            _ => {}
        }
    }
}

impl fmt::Display for RobotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RobotAction {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| DeckError::UnknownAction(s.to_string()))
    }
}

/// Actions offered while the robot is in `mode`. Modes without an entry
/// (including the lockout modes) offer nothing.
pub fn allowed_actions(mode: RobotMode) -> &'static [RobotAction] {
    use RobotAction::*;
    match mode {
        RobotMode::Idle => &[GetDown, AntiCollisionOn, Sit, LightOn, BalanceStand, PoseOn, JointLock],
        RobotMode::JointLock => &[GetDown, BalanceStand, Hello, Sit, Dance, LightOn, AntiCollisionOn],
        RobotMode::LieDown => &[GetUp, LightOn],
        RobotMode::BalanceStand | RobotMode::Locomotion => {
            &[GetDown, JointLock, PoseOn, Hello, Sit, LightOn, Stretch, Dance]
        }
        RobotMode::Pose => &[GetDown, JointLock, PoseOff, LightOn],
        RobotMode::Sit => &[GetUp, GetDown, LightOn],
        RobotMode::Damping => &[GetUp, LightOn, AntiCollisionOn],
        RobotMode::ObstacleAvoidance | RobotMode::Emergency => &[],
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatch
// ────────────────────────────────────────────────────────────────────────────

fn fail<F: FnOnce(DeckError)>(slot: &Mutex<Option<F>>, err: DeckError) {
    let on_failure = slot.lock().take();
    if let Some(on_failure) = on_failure {
        on_failure(err);
    }
}

/// Runs robot actions against the current connection.
#[derive(Clone)]
pub struct ActionDispatcher {
    manager: ConnectionManager,
    status: SharedStatus,
}

impl ActionDispatcher {
    pub fn new(manager: ConnectionManager, status: SharedStatus) -> Self {
        Self { manager, status }
    }

    /// Dispatch `action`. Exactly one callback runs; `on_failure` runs before
    /// this returns when there is no connection.
    pub fn dispatch<S, F>(&self, action: RobotAction, input: Option<&str>, on_success: S, on_failure: F)
    where
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(DeckError) + Send + 'static,
    {
        debug!(action = %action, "dispatching robot action");
        let request = action.request(input);
        // The failure path is reachable from both callbacks.
        let failure = Arc::new(Mutex::new(Some(on_failure)));
        let rejected = Arc::clone(&failure);
        let ok_status = Arc::clone(&self.status);
        let err_status = Arc::clone(&self.status);
        self.manager.call_service(
            action.service(),
            &request,
            move |response| {
                if action == RobotAction::Prompt {
                    on_success(response);
                    return;
                }
                let outcome = match serde_json::from_value::<ActionResponse>(response.clone()) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        action.settle(&mut ok_status.lock(), None);
                        fail(&rejected, DeckError::Decode(e.to_string()));
                        return;
                    }
                };
                action.settle(&mut ok_status.lock(), Some(outcome.success));
                if outcome.success {
                    on_success(response);
                } else {
                    warn!(action = %action, message = %outcome.message, "robot rejected action");
                    fail(&rejected, DeckError::ServiceFailed(outcome.message));
                }
            },
            move |err| {
                action.settle(&mut err_status.lock(), None);
                fail(&failure, err);
            },
        );
    }

    /// Awaitable form of [`dispatch`](Self::dispatch).
    pub async fn run(&self, action: RobotAction, input: Option<&str>) -> Result<Value, DeckError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let fail_tx = Arc::clone(&tx);
        self.dispatch(
            action,
            input,
            move |values| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(Ok(values));
                }
            },
            move |err| {
                if let Some(tx) = fail_tx.lock().take() {
                    let _ = tx.send(Err(err));
                }
            },
        );
        rx.await.map_err(|_| DeckError::Channel("action dropped without a reply".to_string()))?
    }

    /// Actions offered in the robot's current mode.
    pub fn available(&self) -> &'static [RobotAction] {
        allowed_actions(self.status.lock().mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_middleware::{ConnectionSettings, LoopbackConnector, ServiceReply};

    async fn make_dispatcher() -> (LoopbackConnector, ActionDispatcher, SharedStatus) {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), ConnectionSettings::default());
        manager.connect("10.0.0.1").await.unwrap();
        let status = SharedStatus::default();
        (connector, ActionDispatcher::new(manager, Arc::clone(&status)), status)
    }

    #[test]
    fn names_parse_back_to_actions() {
        for action in RobotAction::ALL {
            assert_eq!(action.name().parse::<RobotAction>().unwrap(), action);
        }
        assert_eq!(
            "fly".parse::<RobotAction>(),
            Err(DeckError::UnknownAction("fly".to_string()))
        );
    }

    #[test]
    fn request_bodies_match_robot_api() {
        assert_eq!(RobotAction::JointLock.request(None), json!({"mode": "stand_up"}));
        assert_eq!(RobotAction::Dance.request(None), json!({"mode": "dance1"}));
        assert_eq!(RobotAction::LightOn.request(None), json!({"control": true, "brightness": 10}));
        assert_eq!(RobotAction::Prompt.request(Some("hi")), json!({"input": "hi"}));
        assert_eq!(RobotAction::EmergencyOn.service(), Service::Stop);
    }

    #[test]
    fn transition_table() {
        assert_eq!(allowed_actions(RobotMode::LieDown), &[RobotAction::GetUp, RobotAction::LightOn]);
        assert!(allowed_actions(RobotMode::Pose).contains(&RobotAction::PoseOff));
        assert!(!allowed_actions(RobotMode::Idle).contains(&RobotAction::PoseOff));
        assert!(allowed_actions(RobotMode::Emergency).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_action_reports_robot_message() {
        let (connector, dispatcher, _) = make_dispatcher().await;
        connector.set_reply(
            "/mode",
            ServiceReply::Respond(json!({"success": false, "message": "motors hot"})),
        );

        let outcome = dispatcher.run(RobotAction::Sit, None).await;

        assert_eq!(outcome, Err(DeckError::ServiceFailed("motors hot".to_string())));
        let sent = connector.last_peer().unwrap().sent_ops("call_service");
        assert_eq!(sent.last().unwrap()["args"], json!({"mode": "sit"}));
    }

    #[tokio::test(start_paused = true)]
    async fn light_on_updates_local_flag() {
        let (_connector, dispatcher, status) = make_dispatcher().await;
        dispatcher.run(RobotAction::LightOn, None).await.unwrap();
        assert!(status.lock().light);

        dispatcher.run(RobotAction::LightOff, None).await.unwrap();
        assert!(!status.lock().light);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_light_off_assumes_light_still_on() {
        let (connector, dispatcher, status) = make_dispatcher().await;
        connector.set_reply("/light_control", ServiceReply::Fail("bridge error".into()));
        assert!(dispatcher.run(RobotAction::LightOff, None).await.is_err());
        assert!(status.lock().light);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_on_remembers_mode() {
        let (_connector, dispatcher, status) = make_dispatcher().await;
        status.lock().mode = RobotMode::BalanceStand;

        dispatcher.run(RobotAction::EmergencyOn, None).await.unwrap();
        assert_eq!(status.lock().before_emergency, Some(RobotMode::BalanceStand));

        dispatcher.run(RobotAction::EmergencyOff, None).await.unwrap();
        assert_eq!(status.lock().before_emergency, None);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_passes_raw_response_through() {
        let (connector, dispatcher, _) = make_dispatcher().await;
        connector.set_reply("/rosa_prompt", ServiceReply::Respond(json!({"response": "hello"})));

        let reply = dispatcher.run(RobotAction::Prompt, Some("say hi")).await.unwrap();
        assert_eq!(reply, json!({"response": "hello"}));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_dispatch_fails_synchronously() {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector), ConnectionSettings::default());
        let dispatcher = ActionDispatcher::new(manager, SharedStatus::default());
        let failed = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failed);

        dispatcher.dispatch(
            RobotAction::Hello,
            None,
            |_| panic!("no connection, no success"),
            move |err| *slot.lock() = Some(err),
        );

        assert_eq!(*failed.lock(), Some(DeckError::NotConnected));
    }
}
