//! The reconnect-and-forward loops which keep readings flowing from the IMU to the listener.

use crate::central::Central;
use crate::downstream::{Connector, Downstream};
use crate::notification::NotificationHandler;
use eyre::Report;
use futures::{FutureExt, StreamExt};
use log::{debug, error, info, warn};
use stable_eyre::eyre::WrapErr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use xiao_imu::{FieldOrder, ImuEvent};

/// How long the bridge waits in its various states.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timings {
    /// Between failed attempts to connect to the listener.
    pub network_retry: Duration,
    /// The longest a single scan for the IMU may take.
    pub scan_timeout: Duration,
    /// Between scans which didn't find the IMU.
    pub scan_retry: Duration,
    /// After any other Bluetooth error.
    pub error_retry: Duration,
    pub health_check_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct BridgeSettings {
    /// The advertised name of the IMU.
    pub target: String,
    pub field_order: FieldOrder,
    pub debug: bool,
    pub timings: Timings,
}

/// Why forwarding from a connected IMU stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LinkLost {
    /// The IMU disconnected, so it should be scanned for again.
    Device,
    /// The listener went away, so the network connection must be re-established first.
    Network,
}

pub struct Bridge<C, N> {
    central: C,
    connector: N,
    settings: BridgeSettings,
}

impl<C: Central, N: Connector> Bridge<C, N> {
    pub fn new(central: C, connector: N, settings: BridgeSettings) -> Self {
        Bridge {
            central,
            connector,
            settings,
        }
    }

    /// Keep the listener connected and readings flowing to it. This never returns.
    pub async fn run(&self) {
        let timings = self.settings.timings;
        loop {
            info!("Connecting to {}", self.connector);
            let downstream = match self.connector.connect().await {
                Ok(downstream) => downstream,
                Err(e) => {
                    error!(
                        "Failed to connect to {}: {}. Retrying in {:?}.",
                        self.connector, e, timings.network_retry
                    );
                    time::sleep(timings.network_retry).await;
                    continue;
                }
            };
            info!("Connected to {}", self.connector);

            match AssertUnwindSafe(self.device_loop(&downstream))
                .catch_unwind()
                .await
            {
                // The listener went away, so reconnect straight away.
                Ok(()) => info!("Reconnecting to {}", self.connector),
                Err(_) => {
                    error!(
                        "Bridge to {} panicked. Retrying in {:?}.",
                        self.connector, timings.network_retry
                    );
                    time::sleep(timings.network_retry).await;
                }
            }
        }
    }

    /// Scan for and serve the IMU until the given connection to the listener is closed.
    async fn device_loop(&self, downstream: &Downstream) {
        let target = &self.settings.target;
        let timings = self.settings.timings;
        loop {
            if downstream.is_closed() {
                warn!("Connection to {} is closed", downstream.peer());
                return;
            }

            info!("Scanning for {}", target);
            let device = match self.central.find_device(target, timings.scan_timeout).await {
                Ok(Some(device)) => device,
                Ok(None) => {
                    warn!(
                        "{} not found. Scanning again in {:?}.",
                        target, timings.scan_retry
                    );
                    time::sleep(timings.scan_retry).await;
                    continue;
                }
                Err(e) => {
                    error!("Scanning for {} failed: {:?}", target, e);
                    time::sleep(timings.error_retry).await;
                    continue;
                }
            };
            info!("Found {}", device);

            let result = self.serve_device(&device, downstream).await;
            if let Err(e) = self.central.disconnect(&device).await {
                debug!("Disconnecting from {} failed: {:?}", device, e);
            }
            match result {
                Ok(LinkLost::Network) => {
                    warn!("Lost connection to {}", downstream.peer());
                    return;
                }
                Ok(LinkLost::Device) => warn!("Lost connection to {}", device),
                Err(e) => {
                    error!("{:?}", e);
                    time::sleep(timings.error_retry).await;
                }
            }
        }
    }

    /// Connect to the IMU and forward its readings until either side goes away.
    async fn serve_device(
        &self,
        device: &C::Device,
        downstream: &Downstream,
    ) -> Result<LinkLost, Report> {
        self.central
            .connect(device)
            .await
            .wrap_err_with(|| format!("Connecting to {}", device))?;
        info!("Connected to {}", device);
        let mut events = self
            .central
            .subscribe(device)
            .await
            .wrap_err_with(|| format!("Starting notifications on {}", device))?;
        info!("Forwarding readings from {} to {}", device, downstream.peer());

        let period = self.settings.timings.health_check_interval;
        let mut health_check = time::interval_at(Instant::now() + period, period);
        health_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut handler = NotificationHandler::new(self.settings.field_order, self.settings.debug);

        let lost = loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(ImuEvent::Notification { value }) => {
                        if let Some(payload) = handler.handle(&value) {
                            downstream.forward(payload);
                        }
                    }
                    Some(ImuEvent::Disconnected) => {
                        info!("{} disconnected", device);
                        break LinkLost::Device;
                    }
                    None => {
                        warn!("Event stream for {} ended", device);
                        break LinkLost::Device;
                    }
                },
                () = downstream.closed() => break LinkLost::Network,
                _ = health_check.tick() => {
                    let connected = self
                        .central
                        .is_connected(device)
                        .await
                        .wrap_err_with(|| format!("Checking connection to {}", device))?;
                    if !connected {
                        info!("{} is no longer connected", device);
                        break LinkLost::Device;
                    }
                }
            }
        };

        info!("Stopped forwarding from {}: {}", device, handler.stats());
        Ok(lost)
    }
}
