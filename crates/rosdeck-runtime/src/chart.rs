//! Chart sampling.
//!
//! A [`ChartSampler`] turns every message on one topic into a timestamped
//! number and keeps the newest [`DEFAULT_MAX_POINTS`] of them. Online it
//! samples the robot; offline it samples the local simulator bus.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rosdeck_middleware::{ConnectionManager, SignalBus, Topic};
use rosdeck_types::DeckError;
use rosdeck_types::msgs::{BatteryState, Float32, JointState, LaserScan, Odometry, RobotStatusReport, SportModeState};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::arbitration::{Fraction, PercentScale};
use crate::mount::Mount;

pub const DEFAULT_MAX_POINTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Bounded series; pushing past capacity drops the oldest point.
#[derive(Debug, Clone)]
pub struct ChartSeries {
    points: VecDeque<ChartPoint>,
    capacity: usize,
}

impl ChartSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: ChartPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn points(&self) -> Vec<ChartPoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<ChartPoint> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl Default for ChartSeries {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS)
    }
}

/// Number plotted for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartMetric {
    /// Battery charge, 0–100.
    BatteryPercent,
    /// IMU temperature.
    Temperature,
    /// Position of the first joint, radians.
    FirstJointPosition,
    /// RPM of the first motor.
    FirstMotorRpm,
    /// Forward velocity, m/s.
    LinearVelocityX,
    /// Raw sport mode code.
    SportMode,
    /// Mean of in-range laser readings.
    MeanLaserRange,
}

fn decode<T: DeserializeOwned>(msg: Value) -> Result<T, DeckError> {
    serde_json::from_value(msg).map_err(|e| DeckError::Decode(e.to_string()))
}

impl ChartMetric {
    pub const ALL: [ChartMetric; 7] = [
        ChartMetric::BatteryPercent,
        ChartMetric::Temperature,
        ChartMetric::FirstJointPosition,
        ChartMetric::FirstMotorRpm,
        ChartMetric::LinearVelocityX,
        ChartMetric::SportMode,
        ChartMetric::MeanLaserRange,
    ];

    pub const fn topic(self) -> Topic {
        match self {
            ChartMetric::BatteryPercent => Topic::Battery,
            ChartMetric::Temperature => Topic::Temperature,
            ChartMetric::FirstJointPosition => Topic::JointStates,
            ChartMetric::FirstMotorRpm => Topic::RobotStatus,
            ChartMetric::LinearVelocityX => Topic::Odometry,
            ChartMetric::SportMode => Topic::SportModeState,
            ChartMetric::MeanLaserRange => Topic::LaserScan,
        }
    }

    pub fn for_topic(topic: Topic) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.topic() == topic)
    }

    /// Extract the plotted value. `scale` says how the producer reports
    /// percentages; only the battery metric uses it.
    pub fn extract(self, msg: Value, scale: PercentScale) -> Result<f64, DeckError> {
        let value = match self {
            ChartMetric::BatteryPercent => {
                let msg: BatteryState = decode(msg)?;
                Fraction::from_scaled(msg.percentage, scale).value() * 100.0
            }
            ChartMetric::Temperature => decode::<Float32>(msg)?.data,
            ChartMetric::FirstJointPosition => {
                decode::<JointState>(msg)?.position.first().copied().unwrap_or_default()
            }
            ChartMetric::FirstMotorRpm => {
                decode::<RobotStatusReport>(msg)?.rpm.first().copied().unwrap_or_default()
            }
            ChartMetric::LinearVelocityX => decode::<Odometry>(msg)?.twist.twist.linear.x,
            ChartMetric::SportMode => f64::from(decode::<SportModeState>(msg)?.mode),
            ChartMetric::MeanLaserRange => decode::<LaserScan>(msg)?.mean_valid_range(),
        };
        Ok(value)
    }
}

/// Mounted sampler for one metric.
pub struct ChartSampler {
    metric: ChartMetric,
    series: Arc<Mutex<ChartSeries>>,
    _mount: Mount,
}

impl ChartSampler {
    pub fn mount(manager: &ConnectionManager, bus: &SignalBus, metric: ChartMetric, max_points: usize) -> Self {
        let series = Arc::new(Mutex::new(ChartSeries::new(max_points)));
        let bus = bus.clone();
        let topic = metric.topic();
        let mount = {
            let series = Arc::clone(&series);
            Mount::new(manager, format!("chart:{topic}"), move |factory| {
                let sink = Arc::clone(&series);
                let sample = move |msg: Value, scale: PercentScale| match metric.extract(msg, scale) {
                    Ok(value) => sink.lock().push(ChartPoint {
                        timestamp: Utc::now(),
                        value,
                    }),
                    Err(e) => trace!(metric = ?metric, error = %e, "sample skipped"),
                };
                let sub = match factory {
                    Some(factory) => {
                        factory.subscribe_raw(topic, Arc::new(move |msg| sample(msg, PercentScale::Fraction)))?
                    }
                    None => bus.subscribe_raw(topic, move |msg| sample(msg, PercentScale::Percent))?,
                };
                Ok(vec![sub])
            })
        };
        Self {
            metric,
            series,
            _mount: mount,
        }
    }

    pub fn metric(&self) -> ChartMetric {
        self.metric
    }

    pub fn points(&self) -> Vec<ChartPoint> {
        self.series.lock().points()
    }

    pub fn latest(&self) -> Option<ChartPoint> {
        self.series.lock().latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosdeck_middleware::{ConnectionSettings, LoopbackConnector};
    use serde_json::json;

    fn point(value: f64) -> ChartPoint {
        ChartPoint {
            timestamp: Utc::now(),
            value,
        }
    }

    #[test]
    fn series_keeps_newest_points() {
        let mut series = ChartSeries::default();
        for i in 0..25 {
            series.push(point(f64::from(i)));
        }
        assert_eq!(series.len(), DEFAULT_MAX_POINTS);
        assert_eq!(series.points()[0].value, 5.0);
        assert_eq!(series.latest().map(|p| p.value), Some(24.0));
    }

    #[test]
    fn battery_metric_is_scale_aware() {
        let robot = ChartMetric::BatteryPercent
            .extract(json!({"percentage": 0.5}), PercentScale::Fraction)
            .unwrap();
        let sim = ChartMetric::BatteryPercent
            .extract(json!({"percentage": 50.0}), PercentScale::Percent)
            .unwrap();
        assert_eq!(robot, 50.0);
        assert_eq!(sim, 50.0);
    }

    #[test]
    fn metrics_extract_their_field() {
        let scale = PercentScale::Fraction;
        assert_eq!(
            ChartMetric::FirstMotorRpm.extract(json!({"rpm": [1200.0, 900.0]}), scale).unwrap(),
            1200.0
        );
        assert_eq!(ChartMetric::FirstJointPosition.extract(json!({}), scale).unwrap(), 0.0);
        assert_eq!(
            ChartMetric::LinearVelocityX
                .extract(json!({"twist": {"twist": {"linear": {"x": 0.8}}}}), scale)
                .unwrap(),
            0.8
        );
        assert_eq!(
            ChartMetric::MeanLaserRange
                .extract(json!({"range_min": 0.1, "range_max": 5.0, "ranges": [1.0, 3.0, 9.0]}), scale)
                .unwrap(),
            2.0
        );
        assert_eq!(ChartMetric::for_topic(Topic::SportModeState), Some(ChartMetric::SportMode));
        assert_eq!(ChartMetric::for_topic(Topic::Map), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_records_live_messages() {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), ConnectionSettings::default());
        manager.connect("10.0.0.1").await.unwrap();
        let sampler = ChartSampler::mount(&manager, &SignalBus::default(), ChartMetric::Temperature, 3);
        let peer = connector.last_peer().unwrap();

        for t in [30.0, 31.0, 32.0, 33.0] {
            peer.publish("/imu_temp", json!({"data": t}));
        }

        let values: Vec<f64> = sampler.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![31.0, 32.0, 33.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_uses_bus_offline() {
        let connector = LoopbackConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector), ConnectionSettings::default());
        let bus = SignalBus::default();
        let sampler = ChartSampler::mount(&manager, &bus, ChartMetric::BatteryPercent, DEFAULT_MAX_POINTS);

        bus.publish(Topic::Battery, &BatteryState { percentage: 64.0, ..Default::default() })
            .unwrap();
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }

        assert_eq!(sampler.latest().map(|p| p.value), Some(64.0));
    }
}
