//! Protocol errors

use thiserror::Error;

/// Errors that can occur during a device session
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No attached device matches the configured IDs
    #[error("Device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound {
        /// USB vendor ID searched for
        vendor_id: u16,
        /// USB product ID searched for
        product_id: u16,
    },

    /// Device could not be opened or its interface claimed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transfer did not complete in time
    #[error("Transfer timeout")]
    Timeout,

    /// Fewer bytes than a full frame came back
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes requested
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// The device accepted only part of a command frame
    #[error("Short write: expected {expected} bytes, sent {actual}")]
    ShortWrite {
        /// Bytes in the frame
        expected: usize,
        /// Bytes accepted
        actual: usize,
    },

    /// Any other USB transfer failure
    #[error("USB transfer error: {0}")]
    Transfer(String),

    /// Opcode and arguments exceed the frame length
    #[error("Command too long: {len} bytes do not fit in a {capacity}-byte frame")]
    FrameTooLong {
        /// Opcode plus argument bytes
        len: usize,
        /// Frame length
        capacity: usize,
    },

    /// Operation not allowed in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State the session was in
        state: String,
    },

    /// Reading index is reserved, out of range or already passed
    #[error("Invalid reading index {index} (device reports {count} slots)")]
    InvalidReadingIndex {
        /// Index requested
        index: u8,
        /// Slot count reported by the meter
        count: u8,
    },

    /// A reading failed to decode under the abort policy
    #[error("Failed to decode reading {index}: {source}")]
    Decode {
        /// Device slot index
        index: u8,
        /// Why decoding failed
        #[source]
        source: FrameDecodeError,
    },

    /// Collection stopped by its cancel token
    #[error("Session cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error ends the session (as opposed to a single reading)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Decode { .. })
    }
}

/// Errors raised while interpreting a single reading frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// Buffer is not exactly one frame long
    #[error("Reading frame must be 8 bytes, got {actual}")]
    WrongLength {
        /// Length of the buffer
        actual: usize,
    },

    /// Date or time fields do not form a valid 24-hour timestamp
    #[error("Invalid timestamp {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}")]
    InvalidTimestamp {
        /// Full year (flag bit removed)
        year: u16,
        /// Month (flag bit removed)
        month: u8,
        /// Day (flag bit removed)
        day: u8,
        /// Hour
        hour: u8,
        /// Minute
        minute: u8,
    },
}
