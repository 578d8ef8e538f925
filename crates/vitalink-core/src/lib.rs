//! # Vitalink Core Library
//!
//! Core functionality for collecting readings from USB blood pressure meters.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Decoding of the BM55 8-byte reading frame
//! - Padded command frame construction
//! - A session state machine for the initialize/count/fetch/terminate exchange
//! - USB transport over `nusb` and a simulated meter for demos and tests
//! - JSON configuration and CSV/JSON export
//!
//! ## Supported Meters
//!
//! - Beurer BM55
//!
//! ## Example
//!
//! ```rust,no_run
//! use vitalink_core::prelude::*;
//!
//! let config = DeviceConfig::from_file("device.json")?;
//! let report = Bm55Driver::new().get_measurements(
//!     &UsbConnectionProvider,
//!     &config,
//!     &CancelToken::new(),
//! )?;
//! for reading in &report.readings {
//!     println!("{}", reading);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod demo;
pub mod device;
pub mod export;
pub mod filter;
pub mod protocol;
pub mod reading;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, DecodeFailurePolicy, DeviceConfig, UsbSettings};
    pub use crate::demo::{DemoProvider, SimulatedBm55};
    pub use crate::device::{Bm55Driver, DeviceDescriptor, DeviceDriver, Measurement};
    pub use crate::export::{export_to_file, write_csv, write_json, write_report, ExportFormat};
    pub use crate::filter::filter_by_user;
    pub use crate::protocol::{
        CancelToken, CollectOptions, CollectionReport, ConnectionProvider, FrameDecodeError,
        ProtocolError, Session, SessionState, SkippedReading, Transport,
    };
    #[cfg(feature = "usb")]
    pub use crate::protocol::{UsbConnectionProvider, UsbTransport};
    pub use crate::reading::{BloodPressureReading, GeoLocation, UserSlot};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
