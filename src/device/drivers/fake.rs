//! A device that makes up its own numbers, for riding without hardware.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::device::telemetry::{TelemetryEvent, TelemetryHub};
use crate::device::{ConnectedDevice, DeviceError, DeviceState, StateCell};

/// Tokio intervals cannot tick at zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct FakeDeviceConfig {
    pub interval: Duration,
    pub base_watts: f64,
    /// Uniform noise added on top of the base, 0..jitter.
    pub jitter_watts: f64,
    /// Also emit a heart rate alongside every power sample.
    pub emit_hrm: bool,
    /// Fixed seed for reproducible output.
    pub seed: Option<u64>,
}

impl Default for FakeDeviceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            base_watts: 200.0,
            jitter_watts: 50.0,
            emit_hrm: false,
            seed: None,
        }
    }
}

struct FakeShared {
    hub: TelemetryHub,
    next_power: Mutex<Option<f64>>,
}

/// Emits power (and optionally heart rate) on a timer. All trainer
/// commands resolve `false`.
pub struct FakeDevice {
    id: Uuid,
    config: FakeDeviceConfig,
    shared: Arc<FakeShared>,
    state: StateCell,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl FakeDevice {
    /// Start emitting immediately. Must be called from within a Tokio
    /// runtime.
    pub fn spawn(config: FakeDeviceConfig) -> Arc<Self> {
        let shared = Arc::new(FakeShared {
            hub: TelemetryHub::new(),
            next_power: Mutex::new(None),
        });
        let ticker = tokio::spawn(run_ticker(Arc::clone(&shared), config.clone()));

        Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            shared,
            state: StateCell::new(DeviceState::Ok),
            ticker: Mutex::new(Some(ticker)),
        })
    }

    /// Override the next emitted power sample.
    pub fn set_next_power(&self, watts: f64) {
        *self
            .shared
            .next_power
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(watts);
    }

    fn stop(&self) {
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(ticker) = ticker {
            ticker.abort();
        }
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticker(shared: Arc<FakeShared>, config: FakeDeviceConfig) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut interval = tokio::time::interval(config.interval.max(MIN_INTERVAL));
    // The first tick of a tokio interval completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let now = Utc::now();

        let override_power = shared
            .next_power
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let watts = override_power.unwrap_or_else(|| {
            config.base_watts + rng.gen::<f64>() * config.jitter_watts.max(0.0)
        });
        shared.hub.dispatch(TelemetryEvent::power(now, watts));

        if config.emit_hrm {
            let bpm = 120.0 + (watts - config.base_watts) / 5.0 + rng.gen_range(-2.0..=2.0);
            shared.hub.dispatch(TelemetryEvent::heart_rate(now, bpm.round()));
        }
    }
}

#[async_trait]
impl ConnectedDevice for FakeDevice {
    fn device_id(&self) -> String {
        format!("fake-{}", self.id)
    }

    fn state(&self) -> DeviceState {
        self.state.get()
    }

    fn name(&self) -> String {
        "Test Powermeter".to_string()
    }

    fn type_description(&self) -> &'static str {
        "Fake Device"
    }

    fn has_power(&self) -> bool {
        true
    }

    fn has_cadence(&self) -> bool {
        false
    }

    fn has_hrm(&self) -> bool {
        self.config.emit_hrm
    }

    fn telemetry(&self) -> &TelemetryHub {
        &self.shared.hub
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.stop();
        self.state.set(DeviceState::Disconnected);
        Ok(())
    }
}
