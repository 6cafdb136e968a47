//! Data-source arbitration.
//!
//! A signal that both the live robot and the local simulator can produce is
//! guarded by a [`SourceArbiter`]: a `{tag, value}` pair with one acceptance
//! predicate.
//!
//! | Current tag | Incoming source | Outcome |
//! |---|---|---|
//! | `none` | any | accepted, tag becomes the source |
//! | `real` | `real` | accepted |
//! | `real` | `simulated` | rejected until a disconnect resets the tag |
//! | `simulated` | `simulated` | accepted |
//! | `simulated` | `real` | rejected unless the live path [`claim`](SourceArbiter::claim)s the slot |
//!
//! Percentage-like values cross this boundary exactly once, through
//! [`Fraction::from_scaled`], and are stored as a 0–1 fraction.

use rosdeck_types::DataSource;
use tracing::trace;

/// Scale an upstream producer reports a percentage-like value in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentScale {
    /// 0.0 – 1.0 (the robot's `sensor_msgs/BatteryState`).
    Fraction,
    /// 0 – 100 (the local simulator).
    Percent,
}

/// A value normalised to `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Fraction(f64);

impl Fraction {
    /// Normalise `raw` from `scale`. Non-finite input maps to zero; the
    /// result is clamped to `0.0..=1.0`.
    pub fn from_scaled(raw: f64, scale: PercentScale) -> Self {
        if !raw.is_finite() {
            return Fraction(0.0);
        }
        let fraction = match scale {
            PercentScale::Fraction => raw,
            PercentScale::Percent => raw / 100.0,
        };
        Fraction(fraction.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Display convention: whole percent, rounded.
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round() as u8
    }
}

/// Single-writer slot for a signal with two possible producers.
#[derive(Debug, Clone)]
pub struct SourceArbiter<T> {
    tag: DataSource,
    value: Option<T>,
}

impl<T> Default for SourceArbiter<T> {
    fn default() -> Self {
        Self {
            tag: DataSource::None,
            value: None,
        }
    }
}

impl<T> SourceArbiter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(&self) -> DataSource {
        self.tag
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Offer `value` from `source`. Returns whether it was accepted.
    pub fn offer(&mut self, source: DataSource, value: T) -> bool {
        let accepted = source != DataSource::None
            && (self.tag == DataSource::None || self.tag == source);
        if accepted {
            self.tag = source;
            self.value = Some(value);
        } else {
            trace!(current = ?self.tag, offered = ?source, "value rejected by arbitration");
        }
        accepted
    }

    /// Hand the slot to `source` unconditionally. The live path calls this
    /// when it starts, so simulator output stops winning immediately.
    pub fn claim(&mut self, source: DataSource) {
        self.tag = source;
    }

    /// Disconnect event: release the slot only if the live robot held it, so
    /// a simulator session in progress is not interrupted. Returns whether
    /// the tag was reset.
    pub fn on_disconnect(&mut self) -> bool {
        if self.tag == DataSource::Real {
            self.tag = DataSource::None;
            true
        } else {
            false
        }
    }

    /// Forget both tag and value.
    pub fn reset(&mut self) {
        self.tag = DataSource::None;
        self.value = None;
    }
}
