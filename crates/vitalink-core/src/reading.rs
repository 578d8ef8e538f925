//! Blood pressure readings
//!
//! The decoded form of a reading stored on the meter, plus the provenance
//! fields the caller stamps on it afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Timestamp layout used in exported rows
pub const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Column names of an exported reading, in order
pub const COLUMNS: [&str; 6] = [
    "iso8601time",
    "systol",
    "diastol",
    "pulserate",
    "rest",
    "arrhythmia",
];

/// Column formats, matching [`COLUMNS`]
pub const FORMATS: [&str; 6] = ["DATE", "INTEGER", "INTEGER", "INTEGER", "BOOLEAN", "BOOLEAN"];

/// Column units, matching [`COLUMNS`]
pub const UNITS: [&str; 6] = ["NONE", "mmHg", "mmHg", "BPM", "NONE", "NONE"];

/// One of the two user profiles the meter keeps readings for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum UserSlot {
    /// First user (the meter default)
    #[default]
    A,
    /// Second user
    B,
}

impl fmt::Display for UserSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserSlot::A => write!(f, "A"),
            UserSlot::B => write!(f, "B"),
        }
    }
}

/// Returned when a user slot name is neither `A` nor `B`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown user slot '{0}' (expected A or B)")]
pub struct UnknownUserSlot(
    /// The rejected name
    pub String,
);

impl FromStr for UserSlot {
    type Err = UnknownUserSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(UserSlot::A),
            "B" => Ok(UserSlot::B),
            _ => Err(UnknownUserSlot(s.to_string())),
        }
    }
}

// Accepts any case, like the slot names printed on the meter
impl<'de> Deserialize<'de> for UserSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a reading was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Optional postal address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoLocation {
    /// A location without an address
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    /// Attach a postal address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Errors raised when stamping provenance on a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadingError {
    /// The reading already carries a device ID
    #[error("Device ID already set to '{0}'")]
    DeviceIdAlreadySet(String),

    /// The reading already carries a location
    #[error("Location already set")]
    LocationAlreadySet,
}

/// A decoded blood pressure reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureReading {
    systolic_pressure: u16,
    diastolic_pressure: u16,
    pulse_rate: u8,
    user_slot: UserSlot,
    resting_indicator: bool,
    arrhythmia_indicator: bool,
    measured_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<GeoLocation>,
}

impl BloodPressureReading {
    /// Create a reading without provenance
    pub fn new(
        systolic_pressure: u16,
        diastolic_pressure: u16,
        pulse_rate: u8,
        user_slot: UserSlot,
        resting_indicator: bool,
        arrhythmia_indicator: bool,
        measured_at: NaiveDateTime,
    ) -> Self {
        Self {
            systolic_pressure,
            diastolic_pressure,
            pulse_rate,
            user_slot,
            resting_indicator,
            arrhythmia_indicator,
            measured_at,
            device_id: None,
            location: None,
        }
    }

    /// Systolic pressure in mmHg
    pub fn systolic_pressure(&self) -> u16 {
        self.systolic_pressure
    }

    /// Diastolic pressure in mmHg
    pub fn diastolic_pressure(&self) -> u16 {
        self.diastolic_pressure
    }

    /// Pulse rate in beats per minute
    pub fn pulse_rate(&self) -> u8 {
        self.pulse_rate
    }

    /// User slot the reading was stored under
    pub fn user_slot(&self) -> UserSlot {
        self.user_slot
    }

    /// Reading was taken at rest
    pub fn resting_indicator(&self) -> bool {
        self.resting_indicator
    }

    /// Irregular heartbeat detected during the measurement
    pub fn arrhythmia_indicator(&self) -> bool {
        self.arrhythmia_indicator
    }

    /// When the meter took the reading (meter local time)
    pub fn measured_at(&self) -> NaiveDateTime {
        self.measured_at
    }

    /// Collecting device, if stamped
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Collection location, if stamped
    pub fn location(&self) -> Option<&GeoLocation> {
        self.location.as_ref()
    }

    /// Record which device collected the reading. Can only be done once.
    pub fn set_device_id(&mut self, device_id: impl Into<String>) -> Result<(), ReadingError> {
        if let Some(existing) = &self.device_id {
            return Err(ReadingError::DeviceIdAlreadySet(existing.clone()));
        }
        self.device_id = Some(device_id.into());
        Ok(())
    }

    /// Record where the reading was collected. Can only be done once.
    pub fn set_location(&mut self, location: GeoLocation) -> Result<(), ReadingError> {
        if self.location.is_some() {
            return Err(ReadingError::LocationAlreadySet);
        }
        self.location = Some(location);
        Ok(())
    }

    /// Values in [`COLUMNS`] order, formatted for export
    pub fn values(&self) -> Vec<String> {
        vec![
            self.measured_at.format(ISO8601_FORMAT).to_string(),
            self.systolic_pressure.to_string(),
            self.diastolic_pressure.to_string(),
            self.pulse_rate.to_string(),
            self.resting_indicator.to_string(),
            self.arrhythmia_indicator.to_string(),
        ]
    }
}

impl fmt::Display for BloodPressureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} user {}: {}/{} mmHg, pulse {} bpm",
            self.measured_at.format("%Y-%m-%d %H:%M"),
            self.user_slot,
            self.systolic_pressure,
            self.diastolic_pressure,
            self.pulse_rate
        )?;
        if self.resting_indicator {
            write!(f, " [resting]")?;
        }
        if self.arrhythmia_indicator {
            write!(f, " [arrhythmia]")?;
        }
        Ok(())
    }
}
