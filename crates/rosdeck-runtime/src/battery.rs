//! Battery consumer.
//!
//! The one signal fed by two producers: the robot's `battery` topic
//! (percentage as a 0–1 fraction) while online, and the local simulator's
//! `battery` lane (0–100) while offline. Both write through a single
//! [`SourceArbiter`]; the live path claims the slot the moment its
//! subscription starts, and going offline releases it only if it was held by
//! the live path.

use std::sync::Arc;

use parking_lot::Mutex;
use rosdeck_middleware::{ConnectionManager, SignalBus, Topic};
use rosdeck_types::DataSource;
use rosdeck_types::msgs::BatteryState;
use tracing::debug;

use crate::arbitration::{Fraction, PercentScale, SourceArbiter};
use crate::mount::Mount;

/// Consumer-visible battery state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub level: Fraction,
    pub voltage: f64,
    pub source: DataSource,
}

impl BatteryReading {
    pub fn percent(&self) -> u8 {
        self.level.percent()
    }
}

type Slot = Arc<Mutex<SourceArbiter<BatteryReading>>>;

fn offer(slot: &Slot, source: DataSource, msg: &BatteryState, scale: PercentScale) {
    let reading = BatteryReading {
        level: Fraction::from_scaled(msg.percentage, scale),
        voltage: msg.voltage,
        source,
    };
    slot.lock().offer(source, reading);
}

/// Mounted battery consumer.
pub struct BatteryMonitor {
    slot: Slot,
    _mount: Mount,
}

impl BatteryMonitor {
    pub fn mount(manager: &ConnectionManager, bus: &SignalBus) -> Self {
        let slot: Slot = Arc::new(Mutex::new(SourceArbiter::new()));
        let bus = bus.clone();
        let mount = {
            let slot = Arc::clone(&slot);
            Mount::new(manager, "battery", move |factory| match factory {
                Some(factory) => {
                    slot.lock().claim(DataSource::Real);
                    let live = Arc::clone(&slot);
                    let sub = factory.subscribe(Topic::Battery, move |msg: BatteryState| {
                        offer(&live, DataSource::Real, &msg, PercentScale::Fraction);
                    })?;
                    Ok(vec![sub])
                }
                None => {
                    if slot.lock().on_disconnect() {
                        debug!("battery slot released by live path");
                    }
                    let simulated = Arc::clone(&slot);
                    let sub = bus.subscribe(Topic::Battery, move |msg: BatteryState| {
                        offer(&simulated, DataSource::Simulated, &msg, PercentScale::Percent);
                    })?;
                    Ok(vec![sub])
                }
            })
        };
        Self {
            slot,
            _mount: mount,
        }
    }

    pub fn reading(&self) -> Option<BatteryReading> {
        self.slot.lock().value().copied()
    }

    /// Whole-percent display value.
    pub fn percent(&self) -> Option<u8> {
        self.reading().map(|r| r.percent())
    }

    /// Producer currently owning the slot.
    pub fn source(&self) -> DataSource {
        self.slot.lock().tag()
    }
}
