//! A library for connecting to a Seeed XIAO nRF52840 running IMU telemetry firmware over Bluetooth,
//! and decoding the orientation/acceleration readings it sends as GATT notifications.

pub mod decode;
mod profile;

pub use bluez_async::{
    BluetoothError, BluetoothSession, CharacteristicId, DeviceId, DeviceInfo, MacAddress,
    SpawnError,
};
pub use decode::{DecodeError, Field, FieldOrder, FieldOrderError, Frame, ImuSample};
pub use profile::{ParseProfileError, Profile};

use bluez_async::{BluetoothEvent, CharacteristicEvent, DeviceEvent};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant};

/// The name which the IMU firmware advertises.
pub const DEFAULT_DEVICE_NAME: &str = "XIAO_IMU";
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const EVENT_BUFFER: usize = 64;

/// An error talking to the IMU.
#[derive(Debug, Error)]
pub enum ImuError {
    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),
    #[error("Event stream task for {0} ended before it was ready")]
    EventStreamLost(DeviceId),
}

/// An event from a connected IMU.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImuEvent {
    /// The transmit characteristic has notified a new value.
    Notification { value: Vec<u8> },
    /// The Bluetooth connection to the IMU has been lost.
    Disconnected,
}

impl ImuEvent {
    fn from(
        event: BluetoothEvent,
        device: &DeviceId,
        characteristic: &CharacteristicId,
    ) -> Option<Self> {
        match event {
            BluetoothEvent::Characteristic {
                id,
                event: CharacteristicEvent::Value { value, .. },
                ..
            } if id == *characteristic => Some(ImuEvent::Notification { value }),
            BluetoothEvent::Device {
                id,
                event: DeviceEvent::Connected {
                    connected: false, ..
                },
                ..
            } if id == *device => Some(ImuEvent::Disconnected),
            _ => None,
        }
    }
}

/// A stream of events from one subscribed IMU. Dropping it stops listening for events.
#[derive(Debug)]
pub struct ImuEvents {
    events: mpsc::Receiver<ImuEvent>,
    handle: JoinHandle<()>,
}

impl Stream for ImuEvents {
    type Item = ImuEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ImuEvent>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for ImuEvents {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A wrapper around a Bluetooth session which adds some methods for dealing with the IMU.
/// The underlying Bluetooth session may still be accessed.
#[derive(Clone, Debug)]
pub struct ImuSession {
    pub bt_session: BluetoothSession,
}

impl ImuSession {
    /// Returns a tuple of (join handle, Self).
    /// If the join handle ever completes then you're in trouble and should
    /// probably restart the process.
    pub async fn new(
    ) -> Result<(impl Future<Output = Result<(), SpawnError>>, Self), BluetoothError> {
        let (handle, bt_session) = BluetoothSession::new().await?;
        Ok((handle, ImuSession { bt_session }))
    }

    /// Get the device with the given name from the list of devices BlueZ currently knows about,
    /// preferring one which is already connected.
    pub async fn get_device_by_name(
        &self,
        name: &str,
    ) -> Result<Option<DeviceInfo>, BluetoothError> {
        let devices = self.bt_session.get_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|device| {
                log::trace!("{} ({:?})", device.mac_address, device.name);
                device.name.as_deref() == Some(name)
            })
            .max_by_key(|device| device.connected))
    }

    /// Scan until a device advertising the given name is found, or the timeout expires.
    ///
    /// Only devices which are connected or have been heard since discovery started count, so a
    /// peripheral which BlueZ merely remembers from earlier is not found.
    pub async fn find_device_by_name(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<DeviceInfo>, BluetoothError> {
        let deadline = Instant::now() + timeout;
        self.bt_session.start_discovery().await?;

        let result = poll_until(deadline, move || async move {
            let devices = self.bt_session.get_devices().await?;
            Ok::<_, BluetoothError>(
                devices
                    .into_iter()
                    .filter(|device| {
                        device.name.as_deref() == Some(name)
                            && (device.connected || device.rssi.is_some())
                    })
                    .max_by_key(|device| device.connected),
            )
        })
        .await;

        // BlueZ may refuse if discovery was started by somebody else, which doesn't matter here.
        if let Err(e) = self.bt_session.stop_discovery().await {
            log::debug!("Failed to stop discovery: {}", e);
        }
        result
    }

    pub async fn connect(&self, id: &DeviceId) -> Result<(), BluetoothError> {
        self.bt_session.connect(id).await
    }

    pub async fn disconnect(&self, id: &DeviceId) -> Result<(), BluetoothError> {
        self.bt_session.disconnect(id).await
    }

    /// Whether BlueZ currently considers the given device to be connected.
    pub async fn is_connected(&self, id: &DeviceId) -> Result<bool, BluetoothError> {
        Ok(self.bt_session.get_device_info(id).await?.connected)
    }

    /// Assuming that the given device ID refers to an IMU and that it has already been connected,
    /// subscribe to notifications on the transmit characteristic of the given profile.
    ///
    /// The returned stream carries the notified values and the disconnection of the device.
    pub async fn subscribe(&self, id: &DeviceId, profile: Profile) -> Result<ImuEvents, ImuError> {
        let characteristic = self
            .bt_session
            .get_service_characteristic_by_uuid(
                id,
                profile.service_uuid(),
                profile.tx_characteristic_uuid(),
            )
            .await?;

        // Listen for events before starting notifications, so that none are missed.
        let (sender, events) = mpsc::channel(EVENT_BUFFER);
        let (ready_sender, ready) = oneshot::channel();
        let handle = task::spawn(forward_events(
            self.bt_session.clone(),
            id.to_owned(),
            characteristic.id.clone(),
            sender,
            ready_sender,
        ));
        let events = ImuEvents { events, handle };
        ready
            .await
            .map_err(|_| ImuError::EventStreamLost(id.to_owned()))??;

        self.bt_session.start_notify(&characteristic.id).await?;
        Ok(events)
    }
}

/// Call `poll` every `DISCOVERY_POLL_INTERVAL` until it finds something, fails, or the deadline
/// passes.
async fn poll_until<T, E, F, Fut>(deadline: Instant, mut poll: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    loop {
        if let Some(found) = poll().await? {
            return Ok(Some(found));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        time::sleep(DISCOVERY_POLL_INTERVAL.min(deadline - now)).await;
    }
}

async fn forward_events(
    session: BluetoothSession,
    device: DeviceId,
    characteristic: CharacteristicId,
    sender: mpsc::Sender<ImuEvent>,
    ready: oneshot::Sender<Result<(), BluetoothError>>,
) {
    let events = match session.device_event_stream(&device).await {
        Ok(events) => {
            let _ = ready.send(Ok(()));
            events
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut events = Box::pin(events);

    while let Some(event) = events.next().await {
        if let Some(event) = ImuEvent::from(event, &device, &characteristic) {
            if sender.send(event).await.is_err() {
                break;
            }
        }
    }
    log::trace!("Stopped forwarding events for {}", device);
}
