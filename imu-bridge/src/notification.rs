//! Decoding of notifications from the IMU into the payloads forwarded to the listener.

use log::{debug, trace, warn};
use std::fmt::{self, Display, Formatter};
use xiao_imu::{DecodeError, FieldOrder, Frame};

/// Counts of what has been received from the IMU since subscribing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecodeStats {
    pub samples: u64,
    pub texts: u64,
    pub dropped: u64,
}

impl Display for DecodeStats {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} samples, {} text frames, {} dropped",
            self.samples, self.texts, self.dropped
        )
    }
}

/// Turns notification values into the JSON payloads to forward.
#[derive(Clone, Debug)]
pub struct NotificationHandler {
    field_order: FieldOrder,
    debug: bool,
    stats: DecodeStats,
}

impl NotificationHandler {
    pub fn new(field_order: FieldOrder, debug: bool) -> Self {
        NotificationHandler {
            field_order,
            debug,
            stats: DecodeStats::default(),
        }
    }

    /// Decode one notification value, returning the payload to forward if it was valid.
    pub fn handle(&mut self, value: &[u8]) -> Option<String> {
        match self.decode(value) {
            Ok((frame, payload)) => {
                match frame {
                    Frame::Sample(_) => self.stats.samples += 1,
                    Frame::Text(_) => self.stats.texts += 1,
                }
                debug!("RX {}", frame);
                Some(payload)
            }
            Err(e) => {
                self.stats.dropped += 1;
                if self.debug {
                    warn!("Dropping {} byte notification {:?}: {}", value.len(), value, e);
                } else {
                    debug!("Dropping {} byte notification: {}", value.len(), e);
                }
                None
            }
        }
    }

    fn decode(&self, value: &[u8]) -> Result<(Frame, String), DecodeError> {
        trace!("Notification {:?}", value);
        let frame = Frame::decode(value, &self.field_order)?;
        let payload = frame.to_json()?;
        Ok((frame, payload))
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xiao_imu::{Field, ImuSample};

    fn sample() -> ImuSample {
        ImuSample {
            roll: 1.0,
            pitch: 2.0,
            yaw: 3.0,
            accel_x: 0.1,
            accel_y: 0.2,
            accel_z: 0.3,
        }
    }

    #[test]
    fn binary_sample_to_json() {
        let mut handler = NotificationHandler::new(FieldOrder::default(), false);
        let payload = handler
            .handle(&sample().encode(&FieldOrder::default()))
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 6);
        for key in ["r", "p", "y", "ax", "ay", "az"] {
            assert!(keys.contains(&key));
        }
        assert_eq!(json["r"], 1.0);
        assert_eq!(json["y"], 3.0);
        assert_eq!(json["ax"].as_f64().unwrap() as f32, 0.1);
        assert_eq!(json["az"].as_f64().unwrap() as f32, 0.3);
        assert_eq!(
            handler.stats(),
            DecodeStats {
                samples: 1,
                ..DecodeStats::default()
            }
        );
    }

    #[test]
    fn custom_field_order() {
        let order = FieldOrder::new([
            Field::AccelX,
            Field::AccelY,
            Field::AccelZ,
            Field::Roll,
            Field::Pitch,
            Field::Yaw,
        ])
        .unwrap();
        let mut handler = NotificationHandler::new(order, false);
        let payload = handler.handle(&sample().encode(&order)).unwrap();

        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["r"], 1.0);
        assert_eq!(json["p"], 2.0);
    }

    #[test]
    fn text_frame_forwarded_trimmed() {
        let mut handler = NotificationHandler::new(FieldOrder::default(), true);
        assert_eq!(
            handler.handle(b"  {\"status\": \"calibrating\"}\r\n").as_deref(),
            Some("{\"status\": \"calibrating\"}")
        );
        assert_eq!(handler.stats().texts, 1);
    }

    #[test]
    fn malformed_frames_dropped_and_counted() {
        let mut handler = NotificationHandler::new(FieldOrder::default(), true);
        assert_eq!(handler.handle(&[0xff; 10]), None);
        assert_eq!(handler.handle(b"not json"), None);
        assert_eq!(handler.handle(&[]), None);
        // A NaN reading would otherwise be forwarded as null.
        let mut nan_sample = sample().encode(&FieldOrder::default());
        nan_sample[0..4].copy_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(handler.handle(&nan_sample), None);
        assert!(handler
            .handle(&sample().encode(&FieldOrder::default()))
            .is_some());
        assert_eq!(
            handler.stats(),
            DecodeStats {
                samples: 1,
                texts: 0,
                dropped: 4,
            }
        );
    }

    #[test]
    fn stats_display() {
        let stats = DecodeStats {
            samples: 10,
            texts: 2,
            dropped: 1,
        };
        assert_eq!(stats.to_string(), "10 samples, 2 text frames, 1 dropped");
    }
}
