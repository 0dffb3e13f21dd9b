mod bridge;
mod central;
mod config;
mod downstream;
mod notification;

use crate::bridge::Bridge;
use crate::central::BluezCentral;
use crate::config::{Args, Config};
use clap::Parser;
use eyre::{eyre, Report};
use log::{info, LevelFilter};
use stable_eyre::eyre::WrapErr;
use std::env;
use tokio::signal;
use xiao_imu::ImuSession;

#[tokio::main]
async fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    let args = Args::parse();
    init_logging(args.debug);
    color_backtrace::install();

    let config = Config::load(&args)?;
    let settings = config.bridge_settings(args.debug);
    let endpoint = config.network.endpoint();
    info!(
        "Bridging {} ({} profile) to {}",
        settings.target, config.device.profile, endpoint
    );

    // Connect a Bluetooth session.
    let (dbus_handle, session) = ImuSession::new()
        .await
        .wrap_err("Connecting to BlueZ")?;

    let central = BluezCentral::new(session, config.device.profile);
    let bridge = Bridge::new(central, endpoint, settings);

    tokio::select! {
        () = bridge.run() => Ok(()),
        // If this ever finishes, we lost connection to D-Bus.
        result = dbus_handle => {
            result?;
            Err(eyre!("Lost connection to D-Bus"))
        }
        result = signal::ctrl_c() => {
            result.wrap_err("Waiting for Ctrl+C")?;
            info!("Stopping bridge...");
            Ok(())
        }
    }
}

/// Log at info level by default, or debug with `--debug`. `RUST_LOG` may override either.
fn init_logging(debug: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}
