//! Implements encoding for simple commands, and the two simple
//! commands the V5 answers.

use super::Command;
use crate::errors::DecodeError;
use crate::responses::{DecodeReply, HostFrame};
use crate::v5::HEADER_TO_DEVICE;
use crate::version::VexFirmwareVersion;

/// Encodes a simple command.
///
/// # Arguments
///
/// * `command` - The simple command id of the command to send
/// * `payload` - The payload of the command. Without one, the packet ends
///   right after the command id. With one, a single length byte precedes it.
pub fn encode(command: u8, payload: Option<&[u8]>) -> Vec<u8> {
    // Create the simple packet with magic number and command type
    let mut packet = HEADER_TO_DEVICE.to_vec();
    packet.push(command);

    // Append the length and the payload, if there is one
    if let Some(payload) = payload {
        packet.push(payload.len() as u8);
        packet.extend_from_slice(payload);
    }

    packet
}

/// Asks the device what it is. Used to probe freshly opened ports.
#[derive(Copy, Clone, Debug, Default)]
pub struct Query1;

impl Command for Query1 {
    const COMMAND_ID: u8 = 0x21;
    type Reply = Query1Reply;
}

/// The response to [`Query1`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Query1Reply {
    pub joystick_flag1: u8,
    pub joystick_flag2: u8,
    /// Also known as the vex version
    pub brain_flag1: u8,
    pub brain_flag2: u8,
    pub bootload_flag1: u8,
    pub bootload_flag2: u8,
}

impl DecodeReply for Query1Reply {
    const COMMAND_ID: u8 = 0x21;

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let flags = frame.bytes_at(4, 8)?;

        Ok(Query1Reply {
            joystick_flag1: flags[0],
            joystick_flag2: flags[1],
            brain_flag1: flags[2],
            brain_flag2: flags[3],
            bootload_flag1: flags[6],
            bootload_flag2: flags[7],
        })
    }
}

/// Asks the device for its VEXos version
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemVersion;

impl Command for SystemVersion {
    const COMMAND_ID: u8 = 0xA4;
    type Reply = SystemVersionReply;
}

/// The response to [`SystemVersion`]
///
/// # Members
///
/// * `version` - The VEXos version
/// * `hardware` - The hardware revision byte
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemVersionReply {
    pub version: VexFirmwareVersion,
    pub hardware: u8,
}

impl DecodeReply for SystemVersionReply {
    const COMMAND_ID: u8 = 0xA4;

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        // The hardware byte sits between the build and the beta
        let v = frame.bytes_at(4, 5)?;

        Ok(SystemVersionReply {
            version: VexFirmwareVersion::new(v[0], v[1], v[2], v[4]),
            hardware: v[3],
        })
    }
}
