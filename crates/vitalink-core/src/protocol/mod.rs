//! USB Protocol Communication
//!
//! Implements the Beurer BM55 command/response protocol.
//!
//! Commands go out as 8-byte HID `SET_REPORT` control transfers and every
//! response comes back as a fixed 8-byte bulk IN transfer.

pub mod command_builder;
pub mod commands;
mod error;
pub mod frame;
mod session;
pub mod transport;
#[cfg(feature = "usb")]
pub mod usb;

pub use command_builder::CommandBuilder;
pub use commands::Command;
pub use error::{FrameDecodeError, ProtocolError};
pub use frame::{decode_reading, RawFrame};
pub use session::{
    CancelToken, CollectOptions, CollectionReport, FrameExchange, Session, SessionState,
    SkippedReading,
};
pub use transport::{ConnectionProvider, ControlSetup, Transport};
#[cfg(feature = "usb")]
pub use usb::{UsbConnectionProvider, UsbTransport};

/// Size of every frame exchanged with the meter
pub const FRAME_LEN: usize = 8;

/// Byte used to pad command frames up to [`FRAME_LEN`]
pub const PADDING_BYTE: u8 = 0xF4;

/// Default timeout for a single transfer in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// USB vendor ID of the BM55 meter
pub const BM55_VENDOR_ID: u16 = 0x0c45;

/// USB product ID of the BM55 meter
pub const BM55_PRODUCT_ID: u16 = 0x7406;

/// Default bulk IN endpoint address (endpoint 1, device-to-host)
pub const DEFAULT_IN_ENDPOINT: u8 = 0x81;
