use serde_derive::Deserialize;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

const XIAO_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);
const XIAO_TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00002101_0000_1000_8000_00805f9b34fb);
const NORDIC_UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
const NORDIC_UART_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// The GATT service and transmit characteristic which the IMU firmware sends its readings on.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// The UART-like service used by the XIAO IMU firmware.
    #[default]
    Xiao,
    /// The Nordic UART Service.
    Nordic,
}

impl Profile {
    pub fn service_uuid(self) -> Uuid {
        match self {
            Self::Xiao => XIAO_SERVICE_UUID,
            Self::Nordic => NORDIC_UART_SERVICE_UUID,
        }
    }

    /// The characteristic on which the peripheral notifies its data.
    pub fn tx_characteristic_uuid(self) -> Uuid {
        match self {
            Self::Xiao => XIAO_TX_CHARACTERISTIC_UUID,
            Self::Nordic => NORDIC_UART_TX_CHARACTERISTIC_UUID,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Xiao => "xiao",
            Self::Nordic => "nordic",
        }
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("Unknown profile '{0}', expected 'xiao' or 'nordic'")]
pub struct ParseProfileError(String);

impl FromStr for Profile {
    type Err = ParseProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xiao" => Ok(Self::Xiao),
            "nordic" => Ok(Self::Nordic),
            _ => Err(ParseProfileError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xiao_uuids() {
        assert_eq!(
            Profile::Xiao.service_uuid().to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            Profile::Xiao.tx_characteristic_uuid().to_string(),
            "00002101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn nordic_uuids() {
        assert_eq!(
            Profile::Nordic.service_uuid().to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            Profile::Nordic.tx_characteristic_uuid().to_string(),
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
        );
    }

    #[test]
    fn parse_round_trip() {
        for profile in [Profile::Xiao, Profile::Nordic] {
            assert_eq!(profile.to_string().parse(), Ok(profile));
        }
        assert_eq!(
            "uart".parse::<Profile>(),
            Err(ParseProfileError("uart".to_string()))
        );
    }
}
