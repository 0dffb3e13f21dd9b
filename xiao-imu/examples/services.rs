//! Connect to the IMU and list its GATT services and characteristics.
//!
//! Usage: `cargo run --example services [DEVICE_NAME]`

use bluez_async::BleUuid;
use eyre::eyre;
use std::env;
use std::time::Duration;
use xiao_imu::{ImuSession, Profile, DEFAULT_DEVICE_NAME};

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), eyre::Report> {
    pretty_env_logger::init();

    let name = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_owned());

    let (_, session) = ImuSession::new().await?;

    println!("Scanning for {}...", name);
    let device = session
        .find_device_by_name(&name, SCAN_TIMEOUT)
        .await?
        .ok_or_else(|| eyre!("{} not found", name))?;
    session.connect(&device.id).await?;
    println!("Connected to {} ({})", name, device.mac_address);

    let known_services = [Profile::Xiao, Profile::Nordic];
    for service in session.bt_session.get_services(&device.id).await? {
        let profile = known_services
            .iter()
            .find(|profile| profile.service_uuid() == service.uuid);
        println!(
            "[Service] {} ({}){}",
            service.uuid.succinctly(),
            if service.primary {
                "primary"
            } else {
                "secondary"
            },
            profile.map_or(String::new(), |profile| format!(" <- {} profile", profile))
        );
        let characteristics = session.bt_session.get_characteristics(&service.id).await?;
        for characteristic in characteristics {
            println!(
                "  - [Char] {} ({:?})",
                characteristic.uuid.succinctly(),
                characteristic.flags
            );
        }
    }

    session.disconnect(&device.id).await?;
    Ok(())
}
