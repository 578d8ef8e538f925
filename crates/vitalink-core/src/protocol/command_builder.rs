//! Command Builder
//!
//! Builds fixed-length command frames.
//!
//! A command frame is the opcode, followed by any argument bytes, followed by
//! padding up to the frame length:
//!
//! ```text
//! A3 05 F4 F4 F4 F4 F4 F4
//! ^^ ^^ ^^^^^^^^^^^^^^^^^
//! |  |  padding
//! |  argument (reading index)
//! opcode
//! ```

use super::{ProtocolError, FRAME_LEN, PADDING_BYTE};

/// Build padded command frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBuilder {
    /// Total frame length
    frame_len: usize,
    /// Byte used to fill the unused tail of a frame
    padding: u8,
}

impl CommandBuilder {
    /// Builder for `frame_len`-byte frames padded with `padding`
    pub fn new(frame_len: usize, padding: u8) -> Self {
        Self { frame_len, padding }
    }

    /// Build a frame from an opcode and its argument bytes
    pub fn build(&self, opcode: u8, extra: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        pad_command(opcode, extra, self.frame_len, self.padding)
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(FRAME_LEN, PADDING_BYTE)
    }
}

/// Lay out `opcode` and `extra` at the start of a `total_len` frame and fill
/// the rest with `padding`.
///
/// Fails with [`ProtocolError::FrameTooLong`] if the opcode and arguments do
/// not fit.
pub fn pad_command(
    opcode: u8,
    extra: &[u8],
    total_len: usize,
    padding: u8,
) -> Result<Vec<u8>, ProtocolError> {
    let len = 1 + extra.len();
    if len > total_len {
        return Err(ProtocolError::FrameTooLong {
            len,
            capacity: total_len,
        });
    }

    let mut frame = Vec::with_capacity(total_len);
    frame.push(opcode);
    frame.extend_from_slice(extra);
    frame.resize(total_len, padding);
    Ok(frame)
}
