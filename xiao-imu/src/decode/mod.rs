//! Decoding of the notification payloads sent by the IMU firmware.

pub mod frame;
pub mod sample;

pub use frame::Frame;
pub use sample::{Field, FieldOrder, FieldOrderError, ImuSample, SAMPLE_LENGTH};

use std::str::Utf8Error;
use thiserror::Error;

/// An error decoding a notification payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Wrong length {length}, expected {expected_length}")]
    WrongLength {
        length: usize,
        expected_length: usize,
    },
    #[error("{field} is not finite: {value}")]
    NotFinite { field: Field, value: f32 },
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

fn check_length(length: usize, expected_length: usize) -> Result<(), DecodeError> {
    if length != expected_length {
        Err(DecodeError::WrongLength {
            length,
            expected_length,
        })
    } else {
        Ok(())
    }
}
