use crate::decode::{check_length, DecodeError};
use serde_derive::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The length in bytes of a binary sample: six little-endian `f32`s.
pub const SAMPLE_LENGTH: usize = 24;

/// One of the six values carried by a binary sample.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Field {
    #[serde(rename = "r")]
    Roll,
    #[serde(rename = "p")]
    Pitch,
    #[serde(rename = "y")]
    Yaw,
    #[serde(rename = "ax")]
    AccelX,
    #[serde(rename = "ay")]
    AccelY,
    #[serde(rename = "az")]
    AccelZ,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Roll,
        Field::Pitch,
        Field::Yaw,
        Field::AccelX,
        Field::AccelY,
        Field::AccelZ,
    ];

    /// The key used for this field in the JSON object sent downstream.
    pub fn key(self) -> &'static str {
        match self {
            Self::Roll => "r",
            Self::Pitch => "p",
            Self::Yaw => "y",
            Self::AccelX => "ax",
            Self::AccelY => "ay",
            Self::AccelZ => "az",
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = FieldOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.key() == s)
            .ok_or_else(|| FieldOrderError::UnknownField(s.to_owned()))
    }
}

/// An error constructing a `FieldOrder`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FieldOrderError {
    #[error("Unknown field '{0}', expected one of r, p, y, ax, ay, az")]
    UnknownField(String),
    #[error("Expected 6 fields but got {0}")]
    WrongCount(usize),
    #[error("Field '{0}' appears more than once")]
    Duplicate(Field),
}

/// Which field each of the six floats in a binary sample carries, in wire order.
///
/// The default is roll, pitch, yaw followed by the X, Y and Z acceleration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "Vec<Field>")]
pub struct FieldOrder([Field; 6]);

impl FieldOrder {
    /// Construct a field order, checking that every field appears exactly once.
    pub fn new(fields: [Field; 6]) -> Result<Self, FieldOrderError> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].contains(field) {
                return Err(FieldOrderError::Duplicate(*field));
            }
        }
        Ok(Self(fields))
    }

    pub fn fields(&self) -> &[Field; 6] {
        &self.0
    }
}

impl Default for FieldOrder {
    fn default() -> Self {
        Self(Field::ALL)
    }
}

impl TryFrom<Vec<Field>> for FieldOrder {
    type Error = FieldOrderError;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        let count = fields.len();
        let fields: [Field; 6] = fields
            .try_into()
            .map_err(|_| FieldOrderError::WrongCount(count))?;
        Self::new(fields)
    }
}

/// Parses a comma-separated list such as `"r,p,y,ax,ay,az"`.
impl FromStr for FieldOrder {
    type Err = FieldOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|key| key.trim().parse())
            .collect::<Result<Vec<Field>, _>>()?
            .try_into()
    }
}

impl Display for FieldOrder {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

/// One orientation/acceleration reading from the IMU.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ImuSample {
    /// Roll in degrees.
    #[serde(rename = "r")]
    pub roll: f32,
    /// Pitch in degrees.
    #[serde(rename = "p")]
    pub pitch: f32,
    /// Yaw in degrees.
    #[serde(rename = "y")]
    pub yaw: f32,
    /// Acceleration along the X axis, in g.
    #[serde(rename = "ax")]
    pub accel_x: f32,
    #[serde(rename = "ay")]
    pub accel_y: f32,
    #[serde(rename = "az")]
    pub accel_z: f32,
}

impl Display for ImuSample {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Roll: {:.2} Pitch: {:.2} Yaw: {:.2} Accel: ({:.3}, {:.3}, {:.3})",
            self.roll, self.pitch, self.yaw, self.accel_x, self.accel_y, self.accel_z
        )
    }
}

impl ImuSample {
    /// Decode a sample from the raw bytes of a notification, assigning the six floats to fields in
    /// the given order.
    ///
    /// NaN and infinite values are rejected, as they can't be represented in JSON.
    pub fn decode(value: &[u8], order: &FieldOrder) -> Result<ImuSample, DecodeError> {
        check_length(value.len(), SAMPLE_LENGTH)?;

        let mut sample = ImuSample::default();
        for (field, bytes) in order.fields().iter().zip(value.chunks_exact(4)) {
            let value = f32::from_le_bytes(bytes.try_into().unwrap());
            if !value.is_finite() {
                return Err(DecodeError::NotFinite {
                    field: *field,
                    value,
                });
            }
            *sample.field_mut(*field) = value;
        }
        Ok(sample)
    }

    /// Encode the sample the way the firmware sends it.
    pub fn encode(&self, order: &FieldOrder) -> [u8; SAMPLE_LENGTH] {
        let mut value = [0; SAMPLE_LENGTH];
        for (field, bytes) in order.fields().iter().zip(value.chunks_exact_mut(4)) {
            bytes.copy_from_slice(&self.get(*field).to_le_bytes());
        }
        value
    }

    pub fn get(&self, field: Field) -> f32 {
        match field {
            Field::Roll => self.roll,
            Field::Pitch => self.pitch,
            Field::Yaw => self.yaw,
            Field::AccelX => self.accel_x,
            Field::AccelY => self.accel_y,
            Field::AccelZ => self.accel_z,
        }
    }

    fn field_mut(&mut self, field: Field) -> &mut f32 {
        match field {
            Field::Roll => &mut self.roll,
            Field::Pitch => &mut self.pitch,
            Field::Yaw => &mut self.yaw,
            Field::AccelX => &mut self.accel_x,
            Field::AccelY => &mut self.accel_y,
            Field::AccelZ => &mut self.accel_z,
        }
    }

    /// Serialise as a JSON object with the keys `r`, `p`, `y`, `ax`, `ay` and `az`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
