//! # Heart Rate Measurement Decoding
//!
//! Decodes notifications from the standard GATT Heart Rate Measurement
//! characteristic (0x2A37).
//!
//! ## Wire Format
//! ```text
//! byte 0      flags (bit 0: 0 = u8 value, 1 = u16 little-endian value)
//! byte 1..    heart rate value, then optional fields
//! ```
//! Sensor contact, energy expended and RR intervals may follow the value.
//! They are not interpreted here and never cause a decode failure; only a
//! payload too short for the value itself does.

use crate::error::DecodeError;
use uuid::Uuid;

/// Standard Heart Rate service (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Standard Heart Rate Measurement characteristic (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

const FLAG_VALUE_FORMAT_U16: u8 = 0x01;

/// Decode the heart rate value (bpm) from a raw notification payload.
pub fn decode(bytes: &[u8]) -> Result<u16, DecodeError> {
    let flags = *bytes.first().ok_or(DecodeError::Truncated {
        required: 1,
        actual: 0,
    })?;

    if flags & FLAG_VALUE_FORMAT_U16 == 0 {
        match bytes.get(1) {
            Some(&value) => Ok(u16::from(value)),
            None => Err(DecodeError::Truncated {
                required: 2,
                actual: bytes.len(),
            }),
        }
    } else {
        match bytes.get(1..3) {
            Some(&[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(DecodeError::Truncated {
                required: 3,
                actual: bytes.len(),
            }),
        }
    }
}
