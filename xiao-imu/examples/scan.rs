//! Scan for a few seconds and list every Bluetooth device found, highlighting the IMU.

use std::time::Duration;
use tokio::time;
use xiao_imu::{ImuSession, DEFAULT_DEVICE_NAME};

const SCAN_DURATION: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), eyre::Report> {
    pretty_env_logger::init();

    let (_, session) = ImuSession::new().await?;

    // Start scanning for Bluetooth devices, and wait a while for some to be discovered.
    println!("Scanning for {:?}...", SCAN_DURATION);
    session.bt_session.start_discovery().await?;
    time::sleep(SCAN_DURATION).await;
    session.bt_session.stop_discovery().await?;

    let devices = session.bt_session.get_devices().await?;
    println!("Devices:");
    for device in &devices {
        println!(
            "- {} ({}) RSSI: {:?}{}",
            device.name.as_deref().unwrap_or("<unnamed>"),
            device.mac_address,
            device.rssi,
            if device.connected { " [connected]" } else { "" }
        );
    }

    if !devices
        .iter()
        .any(|device| device.name.as_deref() == Some(DEFAULT_DEVICE_NAME))
    {
        println!("{} not found.", DEFAULT_DEVICE_NAME);
    }

    Ok(())
}
