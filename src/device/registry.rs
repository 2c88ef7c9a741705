//! The local rider's device context.
//!
//! Holds which device supplies each metric for the local rider and wires
//! those devices to the rider's `TelemetryRecorder`. One device may fill
//! several slots (a trainer supplying both power and cadence).

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::telemetry::{MetricKind, TelemetryRecipient, TelemetryRecorder};
use super::{ConnectedDevice, DeviceState};

/// Which metrics a device should supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFlags(u8);

impl DeviceFlags {
    pub const POWER: DeviceFlags = DeviceFlags(1);
    pub const CADENCE: DeviceFlags = DeviceFlags(2);
    pub const HRM: DeviceFlags = DeviceFlags(4);
    pub const ALL: DeviceFlags = DeviceFlags(1 | 2 | 4);
    pub const ALL_BUT_HRM: DeviceFlags = DeviceFlags(1 | 2);

    pub fn contains(self, other: DeviceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn metrics(self) -> Vec<MetricKind> {
        [
            (Self::POWER, MetricKind::Power),
            (Self::CADENCE, MetricKind::Cadence),
            (Self::HRM, MetricKind::HeartRate),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, metric)| metric)
        .collect()
    }
}

impl BitOr for DeviceFlags {
    type Output = DeviceFlags;

    fn bitor(self, rhs: DeviceFlags) -> DeviceFlags {
        DeviceFlags(self.0 | rhs.0)
    }
}

/// Forwards one metric from a device to the rider's recorder. The registry
/// owns the only strong reference; dropping the slot detaches it.
struct SlotLink {
    recorder: Arc<TelemetryRecorder>,
    metric: MetricKind,
}

impl TelemetryRecipient for SlotLink {
    fn notify_power(&self, timestamp: DateTime<Utc>, watts: f64) {
        if self.metric == MetricKind::Power {
            self.recorder.notify_power(timestamp, watts);
        }
    }

    fn notify_cadence(&self, timestamp: DateTime<Utc>, rpm: f64) {
        if self.metric == MetricKind::Cadence {
            self.recorder.notify_cadence(timestamp, rpm);
        }
    }

    fn notify_hrm(&self, timestamp: DateTime<Utc>, bpm: f64) {
        if self.metric == MetricKind::HeartRate {
            self.recorder.notify_hrm(timestamp, bpm);
        }
    }
}

struct DeviceSlot {
    device: Arc<dyn ConnectedDevice>,
    _link: Arc<SlotLink>,
}

/// Devices feeding the local rider.
pub struct LocalDevices {
    recorder: Arc<TelemetryRecorder>,
    slots: HashMap<MetricKind, DeviceSlot>,
}

impl LocalDevices {
    pub fn new(recorder: Arc<TelemetryRecorder>) -> Self {
        Self {
            recorder,
            slots: HashMap::new(),
        }
    }

    pub fn recorder(&self) -> &Arc<TelemetryRecorder> {
        &self.recorder
    }

    /// Make `device` the source of every metric in `flags`. Devices that
    /// lose their last slot are disconnected.
    pub async fn set_local_user_device(
        &mut self,
        device: Arc<dyn ConnectedDevice>,
        flags: DeviceFlags,
    ) {
        let mut displaced: Vec<Arc<dyn ConnectedDevice>> = Vec::new();
        for metric in flags.metrics() {
            let link = Arc::new(SlotLink {
                recorder: Arc::clone(&self.recorder),
                metric,
            });
            device.telemetry().add_recipient(&link);

            let previous = self.slots.insert(
                metric,
                DeviceSlot {
                    device: Arc::clone(&device),
                    _link: link,
                },
            );
            if let Some(previous) = previous {
                let already_listed = displaced
                    .iter()
                    .any(|d| Arc::ptr_eq(d, &previous.device));
                if !Arc::ptr_eq(&previous.device, &device) && !already_listed {
                    displaced.push(previous.device);
                }
            }
        }

        for old in displaced {
            if self.holds(&old) {
                continue;
            }
            log::info!("Replacing {} ({})", old.name(), old.device_id());
            if let Err(e) = old.disconnect().await {
                log::warn!("Failed to disconnect replaced device {}: {}", old.name(), e);
            }
        }
    }

    /// The device currently supplying `metric`.
    pub fn local_user_device(&self, metric: MetricKind) -> Option<&Arc<dyn ConnectedDevice>> {
        self.slots.get(&metric).map(|slot| &slot.device)
    }

    /// True when a power source is connected and ready.
    pub fn is_local_user_device_valid(&self) -> bool {
        self.slots
            .get(&MetricKind::Power)
            .map(|slot| slot.device.state() == DeviceState::Ok)
            .unwrap_or(false)
    }

    /// Disconnect everything and clear all slots.
    pub async fn disconnect_all(&mut self) {
        let mut devices: Vec<Arc<dyn ConnectedDevice>> = Vec::new();
        for (_, slot) in self.slots.drain() {
            if !devices.iter().any(|d| Arc::ptr_eq(d, &slot.device)) {
                devices.push(slot.device);
            }
        }
        for device in devices {
            if let Err(e) = device.disconnect().await {
                log::warn!("Failed to disconnect {}: {}", device.name(), e);
            }
        }
    }

    fn holds(&self, device: &Arc<dyn ConnectedDevice>) -> bool {
        self.slots
            .values()
            .any(|slot| Arc::ptr_eq(&slot.device, device))
    }
}
