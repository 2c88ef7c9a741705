//! Normalized telemetry: events, recipients and the per-device hub.
//!
//! Drivers publish through a `TelemetryHub`. The hub fans each event out to
//! two kinds of listener:
//!
//! - synchronous recipients, held weakly so a device never keeps its
//!   consumers alive; dead ones are pruned on the next dispatch
//! - a `broadcast` channel for async consumers (CLI, UI bridges)

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Power,
    Cadence,
    HeartRate,
}

impl MetricKind {
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Power => "W",
            MetricKind::Cadence => "rpm",
            MetricKind::HeartRate => "bpm",
        }
    }
}

/// One decoded reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: MetricKind,
    pub value: f64,
}

impl TelemetryEvent {
    pub fn power(timestamp: DateTime<Utc>, watts: f64) -> Self {
        Self {
            timestamp,
            kind: MetricKind::Power,
            value: watts,
        }
    }

    pub fn cadence(timestamp: DateTime<Utc>, rpm: f64) -> Self {
        Self {
            timestamp,
            kind: MetricKind::Cadence,
            value: rpm,
        }
    }

    pub fn heart_rate(timestamp: DateTime<Utc>, bpm: f64) -> Self {
        Self {
            timestamp,
            kind: MetricKind::HeartRate,
            value: bpm,
        }
    }
}

/// Receives telemetry synchronously, on the task that decoded it.
/// Implementations must not block.
pub trait TelemetryRecipient: Send + Sync {
    fn notify_power(&self, _timestamp: DateTime<Utc>, _watts: f64) {}

    fn notify_cadence(&self, _timestamp: DateTime<Utc>, _rpm: f64) {}

    fn notify_hrm(&self, _timestamp: DateTime<Utc>, _bpm: f64) {}
}

/// Fan-out point for one device's telemetry.
pub struct TelemetryHub {
    recipients: Mutex<Vec<Weak<dyn TelemetryRecipient>>>,
    events_tx: broadcast::Sender<TelemetryEvent>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            recipients: Mutex::new(Vec::new()),
            events_tx,
        }
    }

    /// Register a recipient. The hub only keeps a weak reference; drop the
    /// last `Arc` to unregister implicitly.
    pub fn add_recipient<R: TelemetryRecipient + 'static>(&self, recipient: &Arc<R>) {
        let weak = Arc::downgrade(recipient);
        let weak: Weak<dyn TelemetryRecipient> = weak;
        lock(&self.recipients).push(weak);
    }

    /// Remove a recipient explicitly.
    pub fn remove_recipient<R: TelemetryRecipient + 'static>(&self, recipient: &Arc<R>) {
        let target = Arc::as_ptr(recipient) as *const ();
        lock(&self.recipients).retain(|weak| weak.as_ptr() as *const () != target);
    }

    /// Number of recipients that are still alive.
    pub fn recipient_count(&self) -> usize {
        lock(&self.recipients)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Async view of every event dispatched from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.events_tx.subscribe()
    }

    /// Deliver one event to every live recipient and broadcast subscriber.
    pub fn dispatch(&self, event: TelemetryEvent) {
        // Upgrade under the lock, call outside it: a recipient may register
        // or remove recipients from inside its callback.
        let live: Vec<Arc<dyn TelemetryRecipient>> = {
            let mut recipients = lock(&self.recipients);
            recipients.retain(|weak| weak.strong_count() > 0);
            recipients.iter().filter_map(Weak::upgrade).collect()
        };

        for recipient in &live {
            match event.kind {
                MetricKind::Power => recipient.notify_power(event.timestamp, event.value),
                MetricKind::Cadence => recipient.notify_cadence(event.timestamp, event.value),
                MetricKind::HeartRate => recipient.notify_hrm(event.timestamp, event.value),
            }
        }

        // No receivers is the normal case outside the CLI.
        let _ = self.events_tx.send(event);
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LastReadings {
    power: Option<f64>,
    cadence: Option<f64>,
    heart_rate: Option<f64>,
    last_update: Option<DateTime<Utc>>,
}

/// A recipient that remembers the latest value of each metric. One per
/// rider; the physics tick reads `last_power` from here.
#[derive(Debug, Default)]
pub struct TelemetryRecorder {
    readings: Mutex<LastReadings>,
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest power in watts, 0 before the first reading.
    pub fn last_power(&self) -> f64 {
        lock(&self.readings).power.unwrap_or(0.0)
    }

    pub fn last_cadence(&self) -> Option<f64> {
        lock(&self.readings).cadence
    }

    pub fn last_hrm(&self) -> Option<f64> {
        lock(&self.readings).heart_rate
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        lock(&self.readings).last_update
    }

    fn record(&self, timestamp: DateTime<Utc>, apply: impl FnOnce(&mut LastReadings)) {
        let mut readings = lock(&self.readings);
        apply(&mut readings);
        readings.last_update = Some(timestamp);
    }
}

impl TelemetryRecipient for TelemetryRecorder {
    fn notify_power(&self, timestamp: DateTime<Utc>, watts: f64) {
        self.record(timestamp, |r| r.power = Some(watts));
    }

    fn notify_cadence(&self, timestamp: DateTime<Utc>, rpm: f64) {
        self.record(timestamp, |r| r.cadence = Some(rpm));
    }

    fn notify_hrm(&self, timestamp: DateTime<Utc>, bpm: f64) {
        self.record(timestamp, |r| r.heart_rate = Some(bpm));
    }
}
