use thiserror::Error;

use crate::v5::meta::V5ControllerChannel;

/// Errors raised while taking a host-bound frame apart
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of packet: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Invalid packet header")]
    BadHeader,
    #[error("Invalid packet length: declared {declared} bytes, {available} available")]
    BadLength { declared: usize, available: usize },
    #[error("Reply for command {command:#04x}/{extended:?} registered twice")]
    DuplicateRegistration { command: u8, extended: Option<u8> },
}

/// Errors raised by the connection and its transport
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("Serialport Error")]
    SerialportError(#[from] serialport::Error),
    #[error("Not connected to a device")]
    NotConnected,
    #[error("Already connected to a device")]
    AlreadyConnected,
    #[error("No V5 device found")]
    NoDevice,
    #[error("Invalid configuration")]
    ConfigError(#[from] toml::de::Error),
}

/// Steps of a file transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    Init,
    Link,
    Chunk,
    Exit,
}

impl std::fmt::Display for TransferStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferStep::Init => "init",
            TransferStep::Link => "link",
            TransferStep::Chunk => "chunk",
            TransferStep::Exit => "exit",
        };
        f.write_str(name)
    }
}

/// Errors raised by a file transfer
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("File transfer failed during {step}: {outcome:?}")]
    StepFailed {
        step: TransferStep,
        outcome: VexAckType,
    },
    #[error("Device error")]
    Device(#[from] DeviceError),
    #[error("The controller did not switch to the {0:?} channel")]
    ChannelSwitch(V5ControllerChannel),
}

/// A V5 device can respond with various different acknowledgements.
/// Some, known as NACKs, are errors that the device cannot handle.
/// This list contains all known NACKs as well as ACK, plus the outcomes
/// that the host itself produces when a request never gets a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VexAckType {
    Ack,
    Nack,
    NackPacketCrc,
    NackCmdLength,
    NackSize,
    NackCrc,
    NackFile,
    NackInit,
    NackFunc,
    NackAlign,
    NackAddr,
    NackIncomplete,
    NackDirIndex,
    NackMaxUserFiles,
    NackFileExists,
    NackFileSysFull,
    /// No reply arrived before the request's deadline
    Timeout,
    /// The request could not be written to the device
    WriteError,
    /// The connection went away while the request was queued
    ConnectionClosed,
    /// A byte that is not a known ack code
    Unknown(u8),
}

impl VexAckType {
    /// Returns true for the outcomes produced on the host side
    pub fn is_host_side(&self) -> bool {
        matches!(
            self,
            VexAckType::Timeout | VexAckType::WriteError | VexAckType::ConnectionClosed
        )
    }

    /// The wire byte of a device ack code, if there is one
    pub fn to_byte(&self) -> Option<u8> {
        Some(match self {
            VexAckType::Ack => 0x76,
            VexAckType::Nack => 0xFF,
            VexAckType::NackPacketCrc => 0xCE,
            VexAckType::NackCmdLength => 0xD0,
            VexAckType::NackSize => 0xD1,
            VexAckType::NackCrc => 0xD2,
            VexAckType::NackFile => 0xD3,
            VexAckType::NackInit => 0xD4,
            VexAckType::NackFunc => 0xD5,
            VexAckType::NackAlign => 0xD6,
            VexAckType::NackAddr => 0xD7,
            VexAckType::NackIncomplete => 0xD8,
            VexAckType::NackDirIndex => 0xD9,
            VexAckType::NackMaxUserFiles => 0xDA,
            VexAckType::NackFileExists => 0xDB,
            VexAckType::NackFileSysFull => 0xDC,
            VexAckType::Unknown(v) => *v,
            VexAckType::Timeout | VexAckType::WriteError | VexAckType::ConnectionClosed => {
                return None
            }
        })
    }
}

impl From<u8> for VexAckType {
    fn from(value: u8) -> Self {
        match value {
            0x76 => VexAckType::Ack,
            0xFF => VexAckType::Nack,
            0xCE => VexAckType::NackPacketCrc,
            0xD0 => VexAckType::NackCmdLength,
            0xD1 => VexAckType::NackSize,
            0xD2 => VexAckType::NackCrc,
            0xD3 => VexAckType::NackFile,
            0xD4 => VexAckType::NackInit,
            0xD5 => VexAckType::NackFunc,
            0xD6 => VexAckType::NackAlign,
            0xD7 => VexAckType::NackAddr,
            0xD8 => VexAckType::NackIncomplete,
            0xD9 => VexAckType::NackDirIndex,
            0xDA => VexAckType::NackMaxUserFiles,
            0xDB => VexAckType::NackFileExists,
            0xDC => VexAckType::NackFileSysFull,
            v => VexAckType::Unknown(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_codes_map_both_ways() {
        for byte in [0x76u8, 0xFF, 0xCE, 0xD0, 0xD4, 0xD8, 0xDC] {
            assert_eq!(VexAckType::from(byte).to_byte(), Some(byte));
        }
        assert_eq!(VexAckType::from(0x76), VexAckType::Ack);
        assert_eq!(VexAckType::from(0xDB), VexAckType::NackFileExists);
        assert_eq!(VexAckType::from(0x12), VexAckType::Unknown(0x12));
    }

    #[test]
    fn host_side_outcomes_have_no_wire_byte() {
        assert!(VexAckType::Timeout.is_host_side());
        assert_eq!(VexAckType::ConnectionClosed.to_byte(), None);
        assert!(!VexAckType::NackCrc.is_host_side());
    }
}
