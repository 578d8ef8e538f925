//! Device configuration
//!
//! Settings are stored as JSON. Every field has a default, so an empty
//! object (or no file at all) selects the BM55 on its usual endpoint with
//! user slot A.
//!
//! ```json
//! {
//!   "usb": { "vendor_id": 3141, "product_id": 29702, "in_endpoint": 129 },
//!   "user": "B",
//!   "decode_failure_policy": "skip",
//!   "device_id": "tablet-0042"
//! }
//! ```

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{BM55_PRODUCT_ID, BM55_VENDOR_ID, DEFAULT_IN_ENDPOINT, DEFAULT_TIMEOUT_MS};
use crate::reading::{GeoLocation, UserSlot};

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Not valid JSON, or a field has the wrong type or an unknown value
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Values parse but cannot be used
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when a stored reading cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Leave the reading out and report it as skipped
    #[default]
    Skip,
    /// Stop the collection
    Abort,
}

/// USB addressing and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbSettings {
    /// USB vendor ID of the meter
    pub vendor_id: u16,
    /// USB product ID of the meter
    pub product_id: u16,
    /// Interface to claim
    pub interface_number: u8,
    /// Bulk IN endpoint address (direction bit set)
    pub in_endpoint: u8,
    /// Per-transfer timeout in milliseconds
    pub timeout_ms: u64,
}

impl UsbSettings {
    /// Per-transfer timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            vendor_id: BM55_VENDOR_ID,
            product_id: BM55_PRODUCT_ID,
            interface_number: 0,
            in_endpoint: DEFAULT_IN_ENDPOINT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Everything needed to run a collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB settings
    pub usb: UsbSettings,
    /// User slot to collect
    pub user: UserSlot,
    /// Handling of undecodable readings
    pub decode_failure_policy: DecodeFailurePolicy,
    /// Identifier of the collecting device, stamped on readings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Location of the collecting device, stamped on readings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
}

impl DeviceConfig {
    /// Parse and validate a JSON document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Write as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check values the device cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.usb.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "usb.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.usb.in_endpoint & 0x80 == 0 {
            return Err(ConfigError::Invalid(format!(
                "usb.in_endpoint {:#04x} is not an IN endpoint",
                self.usb.in_endpoint
            )));
        }
        if let Some(id) = &self.device_id {
            if id.trim().is_empty() {
                return Err(ConfigError::Invalid("device_id must not be blank".to_string()));
            }
        }
        Ok(())
    }
}
