//! Implements commands that deal directly with the V5 system

use byteorder::{ByteOrder, LittleEndian};

use super::Command;
use crate::cursor::PacketCursor;
use crate::errors::DecodeError;
use crate::responses::{DecodeReply, HostFrame};
use crate::v5::meta::{SmartDeviceType, SystemStatusFlags};
use crate::v5::CDC2_COMMAND;
use crate::version::VexFirmwareVersion;

/// Declares a CDC2 command without payload
macro_rules! bare_command {
    ($(#[$meta:meta])* $name:ident, $extended:expr, $reply:ty) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default)]
        pub struct $name;

        impl Command for $name {
            const COMMAND_ID: u8 = CDC2_COMMAND;
            const EXTENDED_ID: Option<u8> = Some($extended);
            type Reply = $reply;
        }
    };
}

bare_command!(
    /// Asks for the brain's status flags, battery and radio summary
    GetSystemFlags,
    0x20,
    SystemFlagsReply
);

/// Status flags of the brain. The percentages are only known when the
/// brain sends the long form of the reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemFlagsReply {
    pub flags: u32,
    pub radio_searching: bool,
    pub radio_quality: Option<u8>,
    pub battery_percent: Option<u8>,
    pub controller_battery_percent: Option<u8>,
    pub partner_controller_battery_percent: Option<u8>,
    pub current_program: u8,
}

impl DecodeReply for SystemFlagsReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x20);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();

        let flags = cursor.next_u32()?;
        let has_partner = flags & 0x2000 != 0;
        let has_radio = flags & 0x600 == 0x600;

        let byte1 = cursor.next_u8()?;
        let byte2 = cursor.next_u8()?;

        let mut reply = SystemFlagsReply {
            flags,
            radio_searching: false,
            radio_quality: None,
            battery_percent: None,
            controller_battery_percent: None,
            partner_controller_battery_percent: None,
            current_program: 0,
        };

        if frame.payload_size() == 11 {
            // Each nibble is in steps of 8%
            let percent = |nibble: u8| (nibble & 0x0F).saturating_mul(8).min(100);

            reply.battery_percent = Some(percent(byte1));
            if flags & 0x100 != 0 || has_radio {
                reply.controller_battery_percent = Some(percent(byte1 >> 4));
            }
            if has_radio {
                reply.radio_quality = Some(percent(byte2));
            }
            reply.radio_searching = flags & 0x600 == 0x200;
            if has_partner {
                reply.partner_controller_battery_percent = Some(percent(byte2 >> 4));
            }
            reply.current_program = cursor.next_u8()?;
        }

        Ok(reply)
    }
}

bare_command!(
    /// Lists the smart devices plugged into the brain
    GetDeviceStatus,
    0x21,
    DeviceStatusReply
);

/// A smart device on one of the brain's ports
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmartDeviceInfo {
    pub port: u8,
    pub device_type: SmartDeviceType,
    pub status: u8,
    pub beta_version: u8,
    pub version: u16,
    pub boot_version: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceStatusReply {
    pub devices: Vec<SmartDeviceInfo>,
}

impl DecodeReply for DeviceStatusReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x21);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        let count = cursor.next_u8()?;

        let mut devices = Vec::with_capacity(count as usize);
        for _ in 0..count {
            devices.push(SmartDeviceInfo {
                port: cursor.next_u8()?,
                device_type: cursor.next_u8()?.into(),
                status: cursor.next_u8()?,
                beta_version: cursor.next_u8()?,
                version: cursor.next_u16()?,
                boot_version: cursor.next_u16()?,
            });
        }

        Ok(DeviceStatusReply { devices })
    }
}

bare_command!(
    /// Asks for the firmware versions and identity of the brain
    GetSystemStatus,
    0x22,
    SystemStatusReply
);

/// Firmware versions and identity of the brain.
///
/// The short form of the reply carries only the first four versions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemStatusReply {
    pub system_version: VexFirmwareVersion,
    pub cpu0_version: VexFirmwareVersion,
    pub cpu1_version: VexFirmwareVersion,
    pub touch_version: VexFirmwareVersion,
    pub unique_id: Option<u32>,
    pub sys_flags: [u8; 7],
    pub flags: SystemStatusFlags,
    pub golden_version: VexFirmwareVersion,
    pub nxp_version: VexFirmwareVersion,
}

impl DecodeReply for SystemStatusReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x22);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        cursor.skip(1)?;

        let mut reply = SystemStatusReply {
            system_version: cursor.next_version(false)?,
            cpu0_version: cursor.next_version(false)?,
            cpu1_version: cursor.next_version(false)?,
            touch_version: cursor.next_version(true)?,
            unique_id: None,
            sys_flags: [0; 7],
            flags: SystemStatusFlags::NONE,
            golden_version: VexFirmwareVersion::all_zero(),
            nxp_version: VexFirmwareVersion::all_zero(),
        };

        if frame.payload_size() > 25 {
            reply.unique_id = Some(cursor.next_u32()?);

            // The sixth flag byte is not sent
            for i in [0, 1, 2, 3, 4, 6] {
                reply.sys_flags[i] = cursor.next_u8()?;
            }
            reply.flags = SystemStatusFlags::from_bits_truncate(reply.sys_flags[6]);

            cursor.skip(2)?;
            reply.golden_version = cursor.next_version(false)?;
        }

        if frame.payload_size() > 37 {
            reply.nxp_version = cursor.next_version(false)?;
        }

        Ok(reply)
    }
}

bare_command!(GetFdtStatus, 0x23, FdtStatusReply);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FdtStatusEntry {
    pub index: u8,
    pub entry_type: u8,
    pub status: u8,
    pub beta_version: u8,
    pub version: u16,
    pub boot_version: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FdtStatusReply {
    pub entries: Vec<FdtStatusEntry>,
}

impl DecodeReply for FdtStatusReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x23);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        let count = cursor.next_u8()?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(FdtStatusEntry {
                index: cursor.next_u8()?,
                entry_type: cursor.next_u8()?,
                status: cursor.next_u8()?,
                beta_version: cursor.next_u8()?,
                version: cursor.next_u16()?,
                boot_version: cursor.next_u16()?,
            });
        }

        Ok(FdtStatusReply { entries })
    }
}

bare_command!(
    /// Asks how many entries the event log holds
    GetLogCount,
    0x24,
    LogCountReply
);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LogCountReply {
    pub count: u32,
}

impl DecodeReply for LogCountReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x24);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        cursor.skip(1)?;
        Ok(LogCountReply {
            count: cursor.next_u32()?,
        })
    }
}

/// Reads `count` event log entries starting at `offset`
#[derive(Copy, Clone, Debug)]
pub struct ReadLogPage {
    pub offset: u32,
    pub count: u32,
}

impl Command for ReadLogPage {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x25);
    type Reply = ReadLogPageReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 8];
        LittleEndian::write_u32(&mut payload[0..4], self.offset);
        LittleEndian::write_u32(&mut payload[4..8], self.count);
        Some(payload)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub code: u8,
    pub log_type: u8,
    pub description: u8,
    pub spare: u8,
    pub time: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadLogPageReply {
    pub offset: u32,
    pub entries: Vec<LogEntry>,
}

impl DecodeReply for ReadLogPageReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x25);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();

        let stride = cursor.next_u8()? as usize;
        let offset = cursor.next_u32()?;
        let count = cursor.next_u16()?;

        // Entries are `stride` bytes apart, of which the first eight are known
        let start = cursor.position();
        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let mut entry = PacketCursor::at(frame.body(), start + i * stride);
            entries.push(LogEntry {
                code: entry.next_u8()?,
                log_type: entry.next_u8()?,
                description: entry.next_u8()?,
                spare: entry.next_u8()?,
                time: entry.next_u32()?,
            });
        }

        Ok(ReadLogPageReply { offset, entries })
    }
}

bare_command!(GetRadioStatus, 0x26, RadioStatusReply);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RadioStatusReply {
    pub device: u8,
    pub quality: u16,
    pub strength: i16,
    pub channel: u8,
    pub timeslot: u8,
}

impl DecodeReply for RadioStatusReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x26);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        Ok(RadioStatusReply {
            device: cursor.next_u8()?,
            quality: cursor.next_u16()?,
            strength: cursor.next_i16()?,
            channel: cursor.next_u8()?,
            timeslot: cursor.next_u8()?,
        })
    }
}

/// Sends user data to the brain. At most 244 bytes are sent.
#[derive(Clone, Debug, Default)]
pub struct GetUserData<'a>(pub &'a [u8]);

impl<'a> Command for GetUserData<'a> {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x27);
    type Reply = UserDataReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let data = &self.0[..self.0.len().min(244)];

        let mut payload = vec![1, data.len() as u8];
        payload.extend_from_slice(data);
        Some(payload)
    }
}

ack_reply!(UserDataReply, CDC2_COMMAND, 0x27);

/// Captures a layer of the brain's screen
#[derive(Copy, Clone, Debug)]
pub struct ScreenCapture(pub u8);

impl Command for ScreenCapture {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x28);
    type Reply = ScreenCaptureReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0])
    }
}

ack_reply!(ScreenCaptureReply, CDC2_COMMAND, 0x28);

bare_command!(GetSlot1to4Info, 0x31, Slot1to4InfoReply);
bare_command!(GetSlot5to8Info, 0x32, Slot5to8InfoReply);

/// A program occupying a slot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramSlot {
    pub slot: u8,
    pub icon: u16,
    pub name: String,
}

/// Reads the slots flagged in the first byte. Slot `first + i` is
/// present when bit `first - 1 + i` is set.
fn decode_slots(frame: &HostFrame, first: u8) -> Result<(u8, Vec<ProgramSlot>), DecodeError> {
    let mut cursor = frame.cursor();
    let flags = cursor.next_u8()?;

    let mut slots = Vec::new();
    for i in 0..4u8 {
        let bit = 1u32 << (first - 1 + i);
        if flags as u32 & bit == 0 {
            continue;
        }

        let icon = cursor.next_u16()?;
        let name_len = cursor.next_u8()? as usize;
        let name = cursor.next_string(name_len)?;

        slots.push(ProgramSlot {
            slot: first + i,
            icon,
            name,
        });
    }

    Ok((flags, slots))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot1to4InfoReply {
    pub flags: u8,
    pub slots: Vec<ProgramSlot>,
}

impl DecodeReply for Slot1to4InfoReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x31);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let (flags, slots) = decode_slots(frame, 1)?;
        Ok(Slot1to4InfoReply { flags, slots })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot5to8InfoReply {
    pub flags: u8,
    pub slots: Vec<ProgramSlot>,
}

impl DecodeReply for Slot5to8InfoReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x32);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let (flags, slots) = decode_slots(frame, 5)?;
        Ok(Slot5to8InfoReply { flags, slots })
    }
}

bare_command!(GetFactoryStatus, 0xF1, FactoryStatusReply);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FactoryStatusReply {
    pub status: u8,
    pub percent: u8,
}

impl DecodeReply for FactoryStatusReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0xF1);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let mut cursor = frame.cursor();
        Ok(FactoryStatusReply {
            status: cursor.next_u8()?,
            percent: cursor.next_u8()?,
        })
    }
}

/// Unlocks the factory commands
#[derive(Copy, Clone, Debug)]
pub struct FactoryEnable;

impl Command for FactoryEnable {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0xFF);
    type Reply = FactoryEnableReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![0x4D, 0x4C, 0x4B, 0x4A])
    }
}

ack_reply!(FactoryEnableReply, CDC2_COMMAND, 0xFF);
