//! Constants and metadata of the V5 protocol

pub mod meta;

/// Header on every packet sent to the device
pub const HEADER_TO_DEVICE: [u8; 4] = [0xC9, 0x36, 0xB8, 0x47];

/// Header on every packet sent by the device
pub const HEADER_TO_HOST: [u8; 2] = [0xAA, 0x55];

/// Unix time of 2000-01-01T00:00:00Z. File timestamps count from here.
pub const J2000_EPOCH: u32 = 946684800;

/// Largest chunk moved by a single read or write
pub const MAX_CHUNK_SIZE: u32 = 4096;

/// Where user programs are loaded by default
pub const USER_FLASH_USR_CODE_START: u32 = 0x03800000;

/// Load address of a program that is linked against a library
pub const USER_PROG_CHUNK_START: u32 = 0x07800000;

/// USB vendor id of every VEX device
pub const VEX_VID: u16 = 0x2888;
pub const VEX_V5_BRAIN_PID: u16 = 0x0501;
pub const VEX_V5_BRAIN_DFU_PID: u16 = 0x0502;
pub const VEX_V5_CONTROLLER_PID: u16 = 0x0503;

/// Simple command id that wraps every CDC2 (extended) command
pub const CDC2_COMMAND: u8 = 0x56;

/// Simple command id of the match / radio CDC2 family
pub const CDC2_MATCH_COMMAND: u8 = 0x58;

/// Returns true when `command` carries an extended id and a CRC
pub fn is_cdc2_command(command: u8) -> bool {
    command == CDC2_COMMAND || command == CDC2_MATCH_COMMAND
}

/// Seconds since the J2000 epoch, right now
pub fn j2000_timestamp() -> u32 {
    let now = chrono::Utc::now().timestamp() - J2000_EPOCH as i64;
    now.clamp(0, u32::MAX as i64) as u32
}
