//! The single entry point for acquiring a device.

use std::sync::Arc;

use uuid::Uuid;

use super::classifier::{classify, DriverKind};
use super::drivers::{
    CyclingPowerDevice, DriverOptions, FtmsDevice, HeartRateDevice, KickrDevice,
};
use super::{ConnectedDevice, DeviceError};

use crate::ble::gatt::{hrm_filters, powermeter_filters, DeviceFilter, HEART_RATE_SERVICE};
use crate::ble::session::{GattSession, SessionConfig};
use crate::ble::transport::BleCentral;
use crate::ble::BleError;

/// Discovers, connects and classifies peripherals. No automatic retry: a
/// failure is reported to the caller, which decides whether to try again
/// (see `DeviceError::is_retryable`).
pub struct DeviceFactory {
    central: Arc<dyn BleCentral>,
    session_config: SessionConfig,
    options: DriverOptions,
}

impl DeviceFactory {
    pub fn new(
        central: Arc<dyn BleCentral>,
        session_config: SessionConfig,
        options: DriverOptions,
    ) -> Self {
        Self {
            central,
            session_config,
            options,
        }
    }

    /// Find a power source: FTMS trainer, Kickr or plain power meter.
    pub async fn find_powermeter(&self) -> Result<Arc<dyn ConnectedDevice>, DeviceError> {
        let (session, name, services) = self.acquire(&powermeter_filters()).await?;
        match self.start_powermeter(&session, &name, &services).await {
            Ok(device) => {
                log::info!("Connected {} ({})", name, device.type_description());
                Ok(device)
            }
            Err(e) => {
                disconnect_quietly(&session).await;
                Err(e)
            }
        }
    }

    async fn start_powermeter(
        &self,
        session: &Arc<GattSession>,
        name: &str,
        services: &[Uuid],
    ) -> Result<Arc<dyn ConnectedDevice>, DeviceError> {
        let session = Arc::clone(session);
        let options = self.options.clone();
        let device: Arc<dyn ConnectedDevice> = match classify(services) {
            Ok(DriverKind::Ftms) => Arc::new(FtmsDevice::connect(session, name, options).await?),
            Ok(DriverKind::Kickr) => Arc::new(KickrDevice::connect(session, name, options).await?),
            Ok(DriverKind::CyclingPower) => {
                Arc::new(CyclingPowerDevice::connect(session, name).await?)
            }
            Ok(DriverKind::HeartRate) | Err(_) => {
                log::warn!(
                    "{} exposes no supported power service ({} services)",
                    name,
                    services.len()
                );
                return Err(DeviceError::UnrecognizedDevice);
            }
        };
        Ok(device)
    }

    /// Find a heart-rate strap.
    pub async fn find_hrm(&self) -> Result<Arc<dyn ConnectedDevice>, DeviceError> {
        let (session, name, services) = self.acquire(&hrm_filters()).await?;
        if !services.contains(&HEART_RATE_SERVICE) {
            log::warn!("{} exposes no heart rate service", name);
            disconnect_quietly(&session).await;
            return Err(DeviceError::UnrecognizedDevice);
        }
        match HeartRateDevice::connect(Arc::clone(&session), &name).await {
            Ok(device) => Ok(Arc::new(device)),
            Err(e) => {
                disconnect_quietly(&session).await;
                Err(e)
            }
        }
    }

    /// Request → connect → fresh session → enumerate primary services.
    /// Once connected, any failure disconnects before returning.
    async fn acquire(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<(Arc<GattSession>, String, Vec<Uuid>), DeviceError> {
        let discovered = self.central.request_device(filters).await?;
        if !discovered.connectable {
            return Err(DeviceError::NoGatt);
        }

        let server = match self.central.connect(&discovered).await {
            Ok(server) => server,
            Err(BleError::ConnectionError(reason)) => {
                log::warn!("GATT connect to {} failed: {}", discovered.address, reason);
                return Err(DeviceError::NoGatt);
            }
            Err(e) => return Err(e.into()),
        };
        let session = GattSession::new(server, self.session_config.clone());
        let services = match session.primary_services().await {
            Ok(services) => services,
            Err(e) => {
                disconnect_quietly(&session).await;
                return Err(e.into());
            }
        };

        let name = discovered
            .name
            .unwrap_or_else(|| discovered.address.to_string());
        Ok((session, name, services))
    }
}

async fn disconnect_quietly(session: &GattSession) {
    if let Err(e) = session.disconnect().await {
        log::debug!("Disconnect after failed acquisition: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{
        sig_uuid, CYCLING_POWER_MEASUREMENT, CYCLING_POWER_SERVICE, FTMS_CONTROL_POINT,
        FTMS_SERVICE, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE, INDOOR_BIKE_DATA,
        KICKR_SERVICE, KICKR_WRITE_CHARACTERISTIC,
    };
    use crate::ble::simulated::{SimBleNetwork, SimPeripheralSpec};
    use crate::device::DeviceState;

    fn factory(network: &Arc<SimBleNetwork>) -> DeviceFactory {
        DeviceFactory::new(
            Arc::new(network.create_central()),
            SessionConfig::default(),
            DriverOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ftms_trainer_is_classified_as_ftms() {
        let network = SimBleNetwork::new();
        let trainer = network.add_peripheral(
            SimPeripheralSpec::new("Smart Trainer")
                .with_characteristic(FTMS_SERVICE, INDOOR_BIKE_DATA)
                .with_characteristic(FTMS_SERVICE, FTMS_CONTROL_POINT)
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT),
        );

        let device = factory(&network).find_powermeter().await.unwrap();
        assert_eq!(device.type_description(), "Bluetooth FTMS");
        assert_eq!(device.name(), "Smart Trainer");
        assert_eq!(device.state(), DeviceState::Ok);
        assert_eq!(device.device_id(), trainer.address().to_string());

        // Request control went out during startup.
        assert_eq!(trainer.writes()[0].payload, vec![0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kickr_is_unlocked_at_startup() {
        let network = SimBleNetwork::new();
        let kickr = network.add_peripheral(
            SimPeripheralSpec::new("KICKR")
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
                .with_characteristic(KICKR_SERVICE, KICKR_WRITE_CHARACTERISTIC),
        );

        let device = factory(&network).find_powermeter().await.unwrap();
        assert_eq!(device.type_description(), "Wahoo Kickr");
        assert_eq!(kickr.writes()[0].payload, vec![0x20, 0xEE, 0xFC]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_power_meter() {
        let network = SimBleNetwork::new();
        network.add_peripheral(
            SimPeripheralSpec::new("Crank")
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT),
        );

        let device = factory(&network).find_powermeter().await.unwrap();
        assert_eq!(device.type_description(), "Bluetooth CPS");
        assert!(!device.update_erg(200.0).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_connectable_device_reports_no_gatt() {
        let network = SimBleNetwork::new();
        network.add_peripheral(
            SimPeripheralSpec::new("Beacon")
                .with_characteristic(CYCLING_POWER_SERVICE, CYCLING_POWER_MEASUREMENT)
                .without_gatt(),
        );

        let err = factory(&network).find_powermeter().await.err().unwrap();
        assert!(matches!(err, DeviceError::NoGatt));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_advertised_but_unsupported_services() {
        let network = SimBleNetwork::new();
        // Advertises CPS so discovery matches, but the GATT table only has
        // device information.
        let odd = network.add_peripheral(
            SimPeripheralSpec::new("Odd")
                .with_characteristic(sig_uuid(0x180a), sig_uuid(0x2a29))
                .advertising(&[CYCLING_POWER_SERVICE]),
        );

        let err = factory(&network).find_powermeter().await.err().unwrap();
        assert!(matches!(err, DeviceError::UnrecognizedDevice));
        assert!(!odd.is_connected());
    }

    #[tokio::test]
    async fn test_driver_startup_failure_disconnects() {
        let network = SimBleNetwork::new();
        // The power service is there but its measurement characteristic
        // is missing, so the driver cannot subscribe.
        let meter = network.add_peripheral(
            SimPeripheralSpec::new("Broken")
                .with_characteristic(CYCLING_POWER_SERVICE, sig_uuid(0x2a65)),
        );

        let err = factory(&network).find_powermeter().await.err().unwrap();
        assert!(matches!(
            err,
            DeviceError::Transport(BleError::CharacteristicNotFound { .. })
        ));
        assert!(!meter.is_connected());

        let strap = network.add_peripheral(
            SimPeripheralSpec::new("Broken Strap")
                .with_characteristic(HEART_RATE_SERVICE, sig_uuid(0x2a38)),
        );
        let err = factory(&network).find_hrm().await.err().unwrap();
        assert!(matches!(err, DeviceError::Transport(_)));
        assert!(!strap.is_connected());
    }

    #[tokio::test]
    async fn test_find_hrm() {
        let network = SimBleNetwork::new();
        network.add_peripheral(
            SimPeripheralSpec::new("Strap")
                .with_characteristic(HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT),
        );

        let device = factory(&network).find_hrm().await.unwrap();
        assert!(device.has_hrm());
        assert!(!device.has_power());
        assert_eq!(device.type_description(), "Bluetooth HRM");
    }

    #[tokio::test]
    async fn test_nothing_in_range() {
        let network = SimBleNetwork::new();
        let err = factory(&network).find_hrm().await.err().unwrap();
        assert!(matches!(
            err,
            DeviceError::Transport(BleError::NoDeviceFound)
        ));
    }
}
