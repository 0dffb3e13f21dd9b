//! The Bluetooth side of the bridge.

use async_trait::async_trait;
use eyre::Report;
use futures::Stream;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use xiao_imu::{DeviceId, DeviceInfo, ImuEvent, ImuEvents, ImuSession, MacAddress, Profile};

/// A BLE central which can find, connect to and subscribe to an IMU.
#[async_trait]
pub trait Central: Send + Sync {
    type Device: Display + Send + Sync;
    type Events: Stream<Item = ImuEvent> + Send + Unpin;

    /// Scan for a device advertising the given name, giving up after `timeout`.
    async fn find_device(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Self::Device>, Report>;

    async fn connect(&self, device: &Self::Device) -> Result<(), Report>;

    /// Start notifications of readings from the device, which must already be connected.
    async fn subscribe(&self, device: &Self::Device) -> Result<Self::Events, Report>;

    async fn is_connected(&self, device: &Self::Device) -> Result<bool, Report>;

    async fn disconnect(&self, device: &Self::Device) -> Result<(), Report>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImuDevice {
    pub id: DeviceId,
    pub name: String,
    pub mac_address: MacAddress,
}

impl ImuDevice {
    fn from_info(info: DeviceInfo, name: &str) -> Self {
        ImuDevice {
            id: info.id,
            name: info.name.unwrap_or_else(|| name.to_owned()),
            mac_address: info.mac_address,
        }
    }
}

impl Display for ImuDevice {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mac_address)
    }
}

/// The real thing, talking to BlueZ over D-Bus.
#[derive(Clone, Debug)]
pub struct BluezCentral {
    session: ImuSession,
    profile: Profile,
}

impl BluezCentral {
    pub fn new(session: ImuSession, profile: Profile) -> Self {
        BluezCentral { session, profile }
    }
}

#[async_trait]
impl Central for BluezCentral {
    type Device = ImuDevice;
    type Events = ImuEvents;

    async fn find_device(&self, name: &str, timeout: Duration) -> Result<Option<ImuDevice>, Report> {
        let device = self.session.find_device_by_name(name, timeout).await?;
        Ok(device.map(|info| ImuDevice::from_info(info, name)))
    }

    async fn connect(&self, device: &ImuDevice) -> Result<(), Report> {
        Ok(self.session.connect(&device.id).await?)
    }

    async fn subscribe(&self, device: &ImuDevice) -> Result<ImuEvents, Report> {
        log::debug!("Subscribing to {} on {} profile", device, self.profile);
        Ok(self.session.subscribe(&device.id, self.profile).await?)
    }

    async fn is_connected(&self, device: &ImuDevice) -> Result<bool, Report> {
        Ok(self.session.is_connected(&device.id).await?)
    }

    async fn disconnect(&self, device: &ImuDevice) -> Result<(), Report> {
        Ok(self.session.disconnect(&device.id).await?)
    }
}
