use super::{put_name, Command};
use crate::errors::DecodeError;
use crate::responses::{DecodeReply, HostFrame};
use crate::v5::CDC2_COMMAND;

/// Reads in a key-value entry from the brain.
///
/// # Examples
///
/// ```rust
/// use vexv5_link::commands::kv::ReadKeyValue;
///
/// // Read the team number stored on the brain
/// let read = ReadKeyValue("teamnumber");
/// ```
#[derive(Copy, Clone, Debug)]
pub struct ReadKeyValue<'a>(pub &'a str);

impl<'a> Command for ReadKeyValue<'a> {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2e);
    type Reply = ReadKeyValueReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        // The key in a zero padded 32 byte field
        let mut payload = vec![0u8; 32];
        put_name(&mut payload, self.0, 31);
        Some(payload)
    }
}

/// The value stored under the requested key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadKeyValueReply {
    pub value: String,
}

impl DecodeReply for ReadKeyValueReply {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2e);

    fn decode(frame: &HostFrame) -> Result<Self, DecodeError> {
        Ok(ReadKeyValueReply {
            value: frame.cursor().next_var_ntbs(255)?,
        })
    }
}

/// Writes a key-value entry to the brain.
///
/// # Members
///
/// * `0` - The key. Only the first 31 bytes are sent.
/// * `1` - The value
#[derive(Copy, Clone, Debug)]
pub struct WriteKeyValue<'a>(pub &'a str, pub &'a str);

impl<'a> Command for WriteKeyValue<'a> {
    const COMMAND_ID: u8 = CDC2_COMMAND;
    const EXTENDED_ID: Option<u8> = Some(0x2f);
    type Reply = WriteKeyValueReply;

    fn encode_payload(&self) -> Option<Vec<u8>> {
        let key = &self.0.as_bytes()[..self.0.len().min(31)];
        let value = self.1.as_bytes();

        // key, NUL, value, then zeros
        let mut payload = vec![0u8; key.len() + value.len() + 20];
        payload[..key.len()].copy_from_slice(key);
        payload[key.len() + 1..key.len() + 1 + value.len()].copy_from_slice(value);
        Some(payload)
    }
}

ack_reply!(WriteKeyValueReply, CDC2_COMMAND, 0x2f);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_key_payload() {
        let payload = ReadKeyValue("teamnumber").encode_payload().unwrap();
        assert_eq!(payload.len(), 32);
        assert_eq!(&payload[..10], b"teamnumber");
        assert!(payload[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn write_key_payload() {
        let payload = WriteKeyValue("teamnumber", "123A").encode_payload().unwrap();

        assert_eq!(payload.len(), 10 + 4 + 20);
        assert_eq!(&payload[..10], b"teamnumber");
        assert_eq!(payload[10], 0);
        assert_eq!(&payload[11..15], b"123A");
        assert!(payload[15..].iter().all(|b| *b == 0));
    }

    #[test]
    fn long_keys_are_cut() {
        let key = "k".repeat(40);
        let payload = WriteKeyValue(&key, "v").encode_payload().unwrap();
        assert_eq!(payload.len(), 31 + 1 + 20);
        assert_eq!(payload[31], 0);
        assert_eq!(payload[32], b'v');
    }

    #[test]
    fn decode_value() {
        let mut data = vec![0xAA, 0x55, 0x56, 0x0A, 0x2e, 0x76];
        data.extend_from_slice(b"1234A\0");
        let crc = crate::checks::crc16(&data, 0);
        data.extend(crc.to_be_bytes());

        let frame = HostFrame::parse(data).unwrap();
        assert_eq!(ReadKeyValueReply::decode(&frame).unwrap().value, "1234A");
    }
}
