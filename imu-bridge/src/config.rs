//! Command line and config file settings for the bridge.

use crate::bridge::{BridgeSettings, Timings};
use crate::downstream::Endpoint;
use clap::{Parser, ValueEnum};
use eyre::Report;
use serde::de::Error as _;
use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use stable_eyre::eyre::WrapErr;
use std::fmt::{self, Display, Formatter};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xiao_imu::{FieldOrder, Profile, DEFAULT_DEVICE_NAME};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8765;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_NETWORK_RETRY: Duration = Duration::from_secs(5);
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SCAN_RETRY: Duration = Duration::from_secs(2);
const DEFAULT_ERROR_RETRY: Duration = Duration::from_secs(2);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Forward IMU readings from a Bluetooth LE peripheral to a WebSocket or TCP listener.
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "imu-bridge", version)]
pub struct Args {
    /// BLE device name to scan for [default: XIAO_IMU]
    #[arg(long)]
    pub target: Option<String>,
    /// Host to forward readings to [default: localhost]
    #[arg(long)]
    pub host: Option<String>,
    /// Port to forward readings to [default: 8765]
    #[arg(long)]
    pub port: Option<u16>,
    /// Transmission protocol [default: ws]
    #[arg(long, value_enum)]
    pub protocol: Option<Protocol>,
    /// GATT profile the peripheral sends readings on, 'xiao' or 'nordic' [default: xiao]
    #[arg(long)]
    pub profile: Option<Profile>,
    /// Order of the six floats in a binary sample [default: r,p,y,ax,ay,az]
    #[arg(long)]
    pub field_order: Option<FieldOrder>,
    /// Enable verbose output
    #[arg(long)]
    pub debug: bool,
    /// TOML file to read settings from. Command line options take precedence over it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// The transport used to forward readings.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// WebSocket text frames.
    #[default]
    Ws,
    /// Newline-delimited JSON over plain TCP.
    Tcp,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Ws => "ws",
            Self::Tcp => "tcp",
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
}

impl Config {
    /// Read the config file given on the command line, if any, and apply command line overrides.
    pub fn load(args: &Args) -> Result<Config, Report> {
        let mut config = match &args.config {
            Some(filename) => Config::read(filename)?,
            None => Config::default(),
        };
        config.apply_args(args);
        Ok(config)
    }

    fn read(filename: &Path) -> Result<Config, Report> {
        let config_file = read_to_string(filename)
            .wrap_err_with(|| format!("Reading {}", filename.display()))?;
        toml::from_str(&config_file).wrap_err_with(|| format!("Parsing {}", filename.display()))
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(target) = &args.target {
            self.device.name = target.to_owned();
        }
        if let Some(profile) = args.profile {
            self.device.profile = profile;
        }
        if let Some(field_order) = args.field_order {
            self.device.field_order = field_order;
        }
        if let Some(host) = &args.host {
            self.network.host = host.to_owned();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(protocol) = args.protocol {
            self.network.protocol = protocol;
        }
    }

    pub fn bridge_settings(&self, debug: bool) -> BridgeSettings {
        BridgeSettings {
            target: self.device.name.clone(),
            field_order: self.device.field_order,
            debug,
            timings: Timings {
                network_retry: self.network.retry_interval,
                scan_timeout: self.device.scan_timeout,
                scan_retry: self.device.scan_retry_interval,
                error_retry: self.device.error_retry_interval,
                health_check_interval: self.device.health_check_interval,
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// The advertised name of the peripheral.
    pub name: String,
    pub profile: Profile,
    pub field_order: FieldOrder,
    /// How long to scan for the peripheral before giving up and waiting to try again.
    #[serde(
        deserialize_with = "de_duration_seconds",
        rename = "scan_timeout_seconds"
    )]
    pub scan_timeout: Duration,
    #[serde(
        deserialize_with = "de_duration_seconds",
        rename = "scan_retry_interval_seconds"
    )]
    pub scan_retry_interval: Duration,
    /// How long to wait after a Bluetooth error before scanning again.
    #[serde(
        deserialize_with = "de_duration_seconds",
        rename = "error_retry_interval_seconds"
    )]
    pub error_retry_interval: Duration,
    /// How often to check that the IMU is still connected. Must not be zero.
    #[serde(
        deserialize_with = "de_duration_millis_nonzero",
        rename = "health_check_interval_ms"
    )]
    pub health_check_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            name: DEFAULT_DEVICE_NAME.to_owned(),
            profile: Profile::default(),
            field_order: FieldOrder::default(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            scan_retry_interval: DEFAULT_SCAN_RETRY,
            error_retry_interval: DEFAULT_ERROR_RETRY,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// How long to wait after failing to connect before trying again.
    #[serde(
        deserialize_with = "de_duration_seconds",
        rename = "retry_interval_seconds"
    )]
    pub retry_interval: Duration,
    /// The maximum number of readings waiting to be sent. Further readings are dropped.
    pub queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            protocol: Protocol::default(),
            retry_interval: DEFAULT_NETWORK_RETRY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl NetworkConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            protocol: self.protocol,
            host: self.host.clone(),
            port: self.port,
            queue_capacity: self.queue_capacity,
        }
    }
}

pub fn de_duration_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let seconds = u64::deserialize(d)?;
    Ok(Duration::from_secs(seconds))
}

pub fn de_duration_millis_nonzero<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Duration, D::Error> {
    match u64::deserialize(d)? {
        0 => Err(D::Error::custom("interval must be greater than zero")),
        millis => Ok(Duration::from_millis(millis)),
    }
}
