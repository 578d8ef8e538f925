//! Protocol commands
//!
//! Defines the commands understood by the BM55 meter.

use serde::{Deserialize, Serialize};

use super::{CommandBuilder, ProtocolError};

/// Protocol commands for meter communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Wake the meter and start a session (0xAA)
    Initialize,

    /// Ask how many reading slots are stored (0xA2)
    QueryCount,

    /// Fetch the reading stored in the given slot (0xA3)
    FetchReading(u8),

    /// First step of the shutdown handshake (0xF7)
    TerminateBegin,

    /// Second step of the shutdown handshake (0xF6)
    TerminateEnd,
}

impl Command {
    /// Get the opcode byte
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Initialize => 0xAA,
            Command::QueryCount => 0xA2,
            Command::FetchReading(_) => 0xA3,
            Command::TerminateBegin => 0xF7,
            Command::TerminateEnd => 0xF6,
        }
    }

    /// Argument bytes that follow the opcode
    pub fn arguments(&self) -> Vec<u8> {
        match self {
            Command::FetchReading(index) => vec![*index],
            _ => Vec::new(),
        }
    }

    /// Encode into a padded frame
    pub fn encode(&self, builder: &CommandBuilder) -> Result<Vec<u8>, ProtocolError> {
        builder.build(self.opcode(), &self.arguments())
    }

    /// Decode an outbound frame back into a command (used by the simulator)
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        match frame.first()? {
            0xAA => Some(Command::Initialize),
            0xA2 => Some(Command::QueryCount),
            0xA3 => frame.get(1).map(|&index| Command::FetchReading(index)),
            0xF7 => Some(Command::TerminateBegin),
            0xF6 => Some(Command::TerminateEnd),
            _ => None,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Initialize => "initialize",
            Command::QueryCount => "query count",
            Command::FetchReading(_) => "fetch reading",
            Command::TerminateBegin => "terminate (step 1)",
            Command::TerminateEnd => "terminate (step 2)",
        }
    }
}
