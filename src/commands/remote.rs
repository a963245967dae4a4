//! Implements commands for match control, the radio, and remote
//! control of the brain's screen

use byteorder::{ByteOrder, LittleEndian};

use super::Command;
use crate::errors::DecodeError;
use crate::responses::{DecodeReply, HostFrame, RawReply};
use crate::v5::meta::{MatchMode, V5ControllerChannel};
use crate::v5::{CDC2_COMMAND, CDC2_MATCH_COMMAND};

/// Switches the controller's channel
///
/// # Members
///
/// * `0` - The controller channel to switch to
///
/// # Examples
///
/// ```rust
/// use vexv5_link::commands::remote::SwitchChannel;
/// use vexv5_link::v5::meta::V5ControllerChannel;
///
/// // Create a SwitchChannel instance that will switch to the download channel
/// let download = SwitchChannel(V5ControllerChannel::Download);
///
/// // Create a SwitchChannel instance that will switch to the pit channel
/// let pit = SwitchChannel(V5ControllerChannel::Pit);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct SwitchChannel(pub V5ControllerChannel);

impl Command for SwitchChannel {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x10);
    type Reply = super::file::FileControlReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        // A file control with function 1 and the channel encoded as a u8
        Some(vec![1, self.0 as u8])
    }
}

/// Puts the brain into a competition mode
#[derive(Copy, Clone, Debug)]
pub struct UpdateMatchMode {
    pub mode: MatchMode,
    pub match_clock: u32,
}

impl Command for UpdateMatchMode {
    const COMMAND_ID: u8 = CDC2_MATCH_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0xC1);
    type Reply = MatchModeReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 5];
        payload[0] = self.mode.bits() & 0x0F;
        LittleEndian::write_u32(&mut payload[1..5], self.match_clock);
        Some(payload)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MatchModeReply {
    pub mode_bits: u8,
}

impl DecodeReply for MatchModeReply {
    const COMMAND_ID: u8 = CDC2_MATCH_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0xC1);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        Ok(MatchModeReply {
            mode_bits: frame.cursor().next_u8()?,
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct GetMatchStatus;

impl Command for GetMatchStatus {
    const COMMAND_ID: u8 = CDC2_MATCH_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0xC2);
    type Reply = MatchStatusReply;
}

/// Radio and competition state, as seen by a controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchStatusReply {
    /// Also known as the signal strength
    pub rssi: i8,
    pub system_status_bits: u16,
    /// Also known as the data quality
    pub radio_status_bits: u16,
    pub field_status_bits: u8,
    pub match_clock: u8,
    pub brain_battery_percent: u8,
    pub controller_battery_percent: u8,
    pub partner_controller_battery_percent: u8,
    pub pad: u8,
    pub buttons: u16,
    pub active_program: u8,
    pub radio_type: u8,
    pub radio_channel: u8,
    pub radio_slot: u8,
    pub robot_name: String,
    pub controller_flags: u8,
    pub rx_signal_quality: u8,
}

impl DecodeReply for MatchStatusReply {
    const COMMAND_ID: u8 = CDC2_MATCH_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0xC2);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        let n = frame.ack_index();
        let mut cursor = frame.cursor();

        let rssi = cursor.next_i8()?;
        let system_status_bits = cursor.next_u16()?;
        let radio_status_bits = cursor.next_u16()?;
        let field_status_bits = cursor.next_u8()?;
        let match_clock = cursor.next_u8()?;
        let brain_battery_percent = cursor.next_u8()?;
        let controller_battery_percent = cursor.next_u8()?;
        let partner_controller_battery_percent = cursor.next_u8()?;
        let pad = cursor.next_u8()?;
        let buttons = cursor.next_u16()?;
        let active_program = cursor.next_u8()?;
        let radio_type = cursor.next_u8()?;
        let radio_channel = cursor.next_u8()?;
        let radio_slot = cursor.next_u8()?;

        let flags = frame.bytes_at(n + 28, 2)?;

        // The name runs up to the CRC and is cut at the first NUL
        let body = frame.body();
        let raw_name = body.get(n + 18..).unwrap_or(&[]);
        let raw_name = match raw_name.iter().position(|b| *b == 0) {
            Some(end) => &raw_name[..end],
            None => raw_name,
        };

        Ok(MatchStatusReply {
            rssi,
            system_status_bits,
            radio_status_bits,
            field_status_bits,
            match_clock,
            brain_battery_percent,
            controller_battery_percent,
            partner_controller_battery_percent,
            pad,
            buttons,
            active_program,
            radio_type,
            radio_channel,
            radio_slot,
            robot_name: String::from_utf8_lossy(raw_name).into_owned(),
            controller_flags: flags[0],
            rx_signal_quality: flags[1],
        })
    }
}

/// Sets the radio mode. The brain's answer is not decoded.
#[derive(Copy, Clone, Debug)]
pub struct GetRadioMode(pub u8);

impl Command for GetRadioMode {
    const COMMAND_ID: u8 = CDC2_MATCH_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x41);
    type Reply = RawReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.0])
    }
}

/// Touches the brain's screen
#[derive(Copy, Clone, Debug)]
pub struct SendDashTouch {
    pub x: u16,
    pub y: u16,
    pub pressed: bool,
}

impl Command for SendDashTouch {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2A);
    type Reply = SendDashTouchReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let mut payload = vec![0u8; 6];
        LittleEndian::write_u16(&mut payload[0..2], self.x);
        LittleEndian::write_u16(&mut payload[2..4], self.y);
        LittleEndian::write_u16(&mut payload[4..6], self.pressed as u16);
        Some(payload)
    }
}

ack_reply!(SendDashTouchReply, CDC2_COMMAND, 0x2A);

/// Opens a dashboard screen for a port
#[derive(Copy, Clone, Debug)]
pub struct SelectDash {
    pub screen: u8,
    pub port: u8,
}

impl Command for SelectDash {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2B);
    type Reply = SelectDashReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        Some(vec![self.screen, self.port])
    }
}

ack_reply!(SelectDashReply, CDC2_COMMAND, 0x2B);

#[derive(Copy, Clone, Debug, Default)]
pub struct EnableDash(pub Option<u8>);

impl Command for EnableDash {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2C);
    type Reply = EnableDashReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        self.0.map(|b| vec![b])
    }
}

ack_reply!(EnableDashReply, CDC2_COMMAND, 0x2C);

#[derive(Copy, Clone, Debug)]
pub struct DisableDash;

impl Command for DisableDash {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2D);
    type Reply = DisableDashReply;
}

ack_reply!(DisableDashReply, CDC2_COMMAND, 0x2D);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_mode_payload() {
        let payload = UpdateMatchMode {
            mode: MatchMode::Autonomous,
            match_clock: 15,
        }
        .encode_payload()
        .unwrap();
        assert_eq!(payload, vec![10, 15, 0, 0, 0]);
    }

    #[test]
    fn switch_channel_request() {
        let request = SwitchChannel(V5ControllerChannel::Download).encode_request();
        assert_eq!(&request[4..9], &[0x56, 0x10, 0x02, 0x01, 0x01]);
    }

    #[test]
    fn touch_payload() {
        let payload = SendDashTouch {
            x: 240,
            y: 0x0110,
            pressed: true,
        }
        .encode_payload()
        .unwrap();
        assert_eq!(payload, vec![240, 0, 0x10, 0x01, 1, 0]);
    }

    #[test]
    fn enable_dash_optional_byte() {
        assert_eq!(EnableDash(None).encode_payload(), None);
        assert_eq!(EnableDash(Some(3)).encode_payload(), Some(vec![3]));
    }

    #[test]
    fn decode_match_status() {
        let mut body = vec![0xC2, 0xA7];
        body.push(0xF0); // rssi
        body.extend(0x0102u16.to_le_bytes());
        body.extend(0x0304u16.to_le_bytes());
        body.extend([5, 6, 70, 80, 90, 0]);
        body.extend(0x0A0Bu16.to_le_bytes());
        body.extend([2, 1, 7, 3]);
        body.extend(b"ROBOT\0\0\0\0\0");
        body.extend([0x11, 0x22]);

        let mut data = vec![0xAA, 0x55, 0x58, (body.len() + 2) as u8];
        data.extend(&body);
        let crc = crate::checks::crc16(&data, 0);
        data.extend(crc.to_be_bytes());

        let frame = HostFrame::parse(data).unwrap();
        let reply = MatchStatusReply::decode(&frame).unwrap();

        assert_eq!(reply.rssi, -16);
        assert_eq!(reply.system_status_bits, 0x0102);
        assert_eq!(reply.brain_battery_percent, 70);
        assert_eq!(reply.buttons, 0x0A0B);
        assert_eq!(reply.radio_channel, 7);
        assert_eq!(reply.robot_name, "ROBOT");
        assert_eq!(reply.controller_flags, 0x11);
        assert_eq!(reply.rx_signal_quality, 0x22);
    }
}
