use crate::decode::{DecodeError, FieldOrder, ImuSample, SAMPLE_LENGTH};
use serde::de::IgnoredAny;
use std::fmt::{self, Display, Formatter};
use std::str;

/// A decoded notification from the IMU's transmit characteristic.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A 24-byte binary sample.
    Sample(ImuSample),
    /// Any other payload, which must be a UTF-8 JSON document. Surrounding whitespace is trimmed.
    Text(String),
}

impl Frame {
    /// Decode a notification value.
    ///
    /// A value of exactly `SAMPLE_LENGTH` bytes is always treated as a binary sample, even if it
    /// happens to be valid text.
    pub fn decode(value: &[u8], order: &FieldOrder) -> Result<Frame, DecodeError> {
        if value.len() == SAMPLE_LENGTH {
            return Ok(Frame::Sample(ImuSample::decode(value, order)?));
        }

        let text = str::from_utf8(value)?.trim();
        serde_json::from_str::<IgnoredAny>(text)?;
        Ok(Frame::Text(text.to_owned()))
    }

    /// The JSON text to forward downstream for this frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Frame::Sample(sample) => sample.to_json(),
            Frame::Text(text) => Ok(text.clone()),
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Frame::Sample(sample) => write!(f, "{}", sample),
            Frame::Text(text) => write!(f, "Text: {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_binary_sample() {
        let sample = ImuSample {
            roll: 10.5,
            pitch: -4.25,
            yaw: 270.0,
            accel_x: 0.0,
            accel_y: 0.0,
            accel_z: 1.0,
        };
        let order = FieldOrder::default();
        assert_eq!(
            Frame::decode(&sample.encode(&order), &order).unwrap(),
            Frame::Sample(sample)
        );
    }

    #[test]
    fn decode_json_text_is_trimmed() {
        assert_eq!(
            Frame::decode(b"  {\"r\": 1.5, \"p\": 0}\r\n", &FieldOrder::default()).unwrap(),
            Frame::Text("{\"r\": 1.5, \"p\": 0}".to_string())
        );
    }

    #[test]
    fn decode_json_scalar() {
        assert_eq!(
            Frame::decode(b"42", &FieldOrder::default()).unwrap(),
            Frame::Text("42".to_string())
        );
    }

    #[test]
    fn decode_malformed_binary() {
        let value = [0xff, 0xfe, 0x00, 0x80, 0x3f, 0x00, 0x00, 0x00, 0xc0, 0x41];
        assert!(matches!(
            Frame::decode(&value, &FieldOrder::default()),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn decode_text_not_json() {
        assert!(matches!(
            Frame::decode(b"hello imu", &FieldOrder::default()),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn decode_truncated_json() {
        assert!(matches!(
            Frame::decode(b"{\"r\": 1.0,", &FieldOrder::default()),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn decode_empty() {
        assert!(matches!(
            Frame::decode(b"", &FieldOrder::default()),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn text_of_sample_length_is_decoded_as_sample() {
        let value = b"{\"r\":1,\"p\":2,\"y\":333333}";
        assert_eq!(value.len(), SAMPLE_LENGTH);
        assert!(matches!(
            Frame::decode(value, &FieldOrder::default()),
            Ok(Frame::Sample(_))
        ));
    }

    #[test]
    fn text_frame_forwarded_verbatim() {
        let frame = Frame::Text("{\"battery\": 87}".to_string());
        assert_eq!(frame.to_json().unwrap(), "{\"battery\": 87}");
    }
}
