//! Connect to the IMU, subscribe to its transmit characteristic and print every notification.
//!
//! Usage: `cargo run --example terminal [DEVICE_NAME] [xiao|nordic]`

use eyre::eyre;
use futures::stream::StreamExt;
use std::env;
use std::time::Duration;
use tokio::signal;
use xiao_imu::{FieldOrder, Frame, ImuEvent, ImuSession, Profile, DEFAULT_DEVICE_NAME};

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), eyre::Report> {
    pretty_env_logger::init();

    let mut args = env::args().skip(1);
    let name = args
        .next()
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_owned());
    let profile: Profile = args.next().as_deref().unwrap_or("xiao").parse()?;

    let (_, session) = ImuSession::new().await?;

    println!("Scanning for {}...", name);
    let device = session
        .find_device_by_name(&name, SCAN_TIMEOUT)
        .await?
        .ok_or_else(|| eyre!("{} not found", name))?;
    session.connect(&device.id).await?;
    println!("Connected to {} ({})", name, device.mac_address);

    let mut events = session.subscribe(&device.id, profile).await?;
    println!("Listening for notifications. Press Ctrl+C to stop.");

    let order = FieldOrder::default();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(ImuEvent::Notification { value }) => match Frame::decode(&value, &order) {
                    Ok(frame) => println!("{}", frame),
                    Err(e) => println!("{:?} ({})", value, e),
                },
                Some(ImuEvent::Disconnected) | None => {
                    println!("Disconnected.");
                    return Ok(());
                }
            },
            _ = signal::ctrl_c() => break,
        }
    }

    session.disconnect(&device.id).await?;
    Ok(())
}
