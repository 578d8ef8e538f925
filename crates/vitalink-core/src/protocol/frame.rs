//! Reading frame decoding
//!
//! Frame layout (one stored reading):
//! - Byte 0: Systolic pressure - 25 mmHg
//! - Byte 1: Diastolic pressure - 25 mmHg
//! - Byte 2: Pulse rate (bpm)
//! - Byte 3: Month, high bit = resting indicator
//! - Byte 4: Day, high bit = user slot B
//! - Byte 5: Hour (24h)
//! - Byte 6: Minute
//! - Byte 7: Year - 2000, high bit = arrhythmia indicator
//!
//! Month, day and year never need more than 7 bits, so the firmware reuses
//! bit 7 of those bytes as a flag. The value is always the low 7 bits.

use chrono::NaiveDate;

use crate::reading::{BloodPressureReading, UserSlot};

use super::{FrameDecodeError, FRAME_LEN};

/// Offset the meter subtracts from both pressures before storing them
pub const PRESSURE_OFFSET: u16 = 25;

/// Two-digit years are relative to this
pub const YEAR_BASE: u16 = 2000;

const FLAG_BIT: u8 = 0x80;

/// One 8-byte frame received from the meter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame([u8; FRAME_LEN]);

impl RawFrame {
    /// Wrap received bytes
    pub fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a frame out of a buffer that must be exactly [`FRAME_LEN`] long
    pub fn from_slice(data: &[u8]) -> Result<Self, FrameDecodeError> {
        let bytes: [u8; FRAME_LEN] = data
            .try_into()
            .map_err(|_| FrameDecodeError::WrongLength { actual: data.len() })?;
        Ok(Self(bytes))
    }

    /// Raw bytes as received
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Number of stored reading slots, when this frame answers a count query.
    pub fn reading_count(&self) -> u8 {
        self.0[0]
    }

    /// Interpret the frame as a stored reading
    pub fn decode(&self) -> Result<BloodPressureReading, FrameDecodeError> {
        let data = &self.0;

        let systolic = u16::from(data[0]) + PRESSURE_OFFSET;
        let diastolic = u16::from(data[1]) + PRESSURE_OFFSET;
        let pulse = data[2];

        let (month, resting) = split_flag(data[3]);
        let (day, slot_b) = split_flag(data[4]);
        let hour = data[5];
        let minute = data[6];
        let (year, arrhythmia) = split_flag(data[7]);
        let year = u16::from(year) + YEAR_BASE;

        let user = if slot_b { UserSlot::B } else { UserSlot::A };

        let measured_at = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
            .and_then(|date| date.and_hms_opt(u32::from(hour), u32::from(minute), 0))
            .ok_or(FrameDecodeError::InvalidTimestamp {
                year,
                month,
                day,
                hour,
                minute,
            })?;

        Ok(BloodPressureReading::new(
            systolic,
            diastolic,
            pulse,
            user,
            resting,
            arrhythmia,
            measured_at,
        ))
    }
}

impl From<[u8; FRAME_LEN]> for RawFrame {
    fn from(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }
}

/// Decode a reading from a raw buffer
pub fn decode_reading(data: &[u8]) -> Result<BloodPressureReading, FrameDecodeError> {
    RawFrame::from_slice(data)?.decode()
}

/// Split a byte into its low 7 bits and the high-bit flag
fn split_flag(byte: u8) -> (u8, bool) {
    (byte & !FLAG_BIT, byte & FLAG_BIT != 0)
}

/// Set the high-bit flag on a 7-bit value
pub(crate) fn join_flag(value: u8, flag: bool) -> u8 {
    let value = value & !FLAG_BIT;
    if flag {
        value | FLAG_BIT
    } else {
        value
    }
}
