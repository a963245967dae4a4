//! Framing of CDC2 (extended) packets
use crate::checks::crc16;
use crate::errors::DecodeError;
use crate::v5::{is_cdc2_command, HEADER_TO_DEVICE, HEADER_TO_HOST};

/// Encodes an extended command.
///
/// The packet is the device header, the command id, the extended command
/// id, a length field, the payload and a big endian CRC16 over all of it.
/// A command without payload still carries a single zero length byte.
pub fn encode(command: u8, extended: u8, payload: Option<&[u8]>) -> Vec<u8> {
    let payload = payload.unwrap_or(&[]);

    // Create the empty extended packet
    let mut packet = HEADER_TO_DEVICE.to_vec();
    packet.push(command);
    packet.push(extended);

    // If the payload is longer than 127 bytes, then we need to push the high byte
    // separately with the continuation bit set. This is a two byte varint at most.
    let payload_length = payload.len() as u16;
    if payload_length > 0x7F {
        packet.push(((payload_length >> 8) | 0x80) as u8);
    }

    // Push the lower byte
    packet.push((payload_length & 0xff) as u8);

    // Add the payload to the packet
    packet.extend_from_slice(payload);

    // Now we need to add the CRC. It covers the header too.
    let checksum = crc16(&packet, 0);

    // First the upper byte, then the lower byte (big endian)
    packet.extend(checksum.to_be_bytes());

    packet
}

/// Where the payload of a host-bound frame starts, and how long it is.
///
/// Returns `Ok(None)` while `buf` is still too short to tell.
pub fn host_payload_info(buf: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    if buf[0..2] != HEADER_TO_HOST {
        return Err(DecodeError::BadHeader);
    }

    let command = buf[2];
    let first = buf[3];

    // CDC2 replies may use a two byte length with the continuation bit set
    if is_cdc2_command(command) && first & 0x80 == 0x80 {
        match buf.get(4) {
            Some(second) => {
                let size = (((first & 0x7f) as usize) << 8) | *second as usize;
                Ok(Some((5, size)))
            }
            None => Ok(None),
        }
    } else {
        Ok(Some((4, first as usize)))
    }
}

/// Total length of the host-bound frame at the front of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed to know it.
pub fn host_frame_length(buf: &[u8]) -> Result<Option<usize>, DecodeError> {
    Ok(host_payload_info(buf)?.map(|(header_len, payload_size)| header_len + payload_size))
}

/// Checks the trailing big endian CRC16 of a complete CDC2 frame
pub fn validate_crc(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }

    let (message, checksum) = frame.split_at(frame.len() - 2);
    crc16(message, 0) == u16::from_be_bytes([checksum[0], checksum[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_without_payload() {
        let packet = encode(0x56, 0x22, None);

        assert_eq!(&packet[..7], &[0xC9, 0x36, 0xB8, 0x47, 0x56, 0x22, 0x00]);
        assert_eq!(packet.len(), 9);
        assert_eq!(crc16(&packet, 0), 0);
    }

    #[test]
    fn encode_short_payload() {
        let packet = encode(0x56, 0x12, Some(&[0x03]));

        assert_eq!(&packet[4..8], &[0x56, 0x12, 0x01, 0x03]);
        assert!(validate_crc(&packet));
    }

    #[test]
    fn encode_long_payload_uses_two_length_bytes() {
        let payload = vec![0x5A; 300];
        let packet = encode(0x56, 0x13, Some(&payload));

        // 300 = 0x012C
        assert_eq!(&packet[6..8], &[0x81, 0x2C]);
        assert_eq!(packet.len(), 4 + 2 + 2 + 300 + 2);
        assert!(validate_crc(&packet));
    }

    #[test]
    fn boundary_at_128_bytes() {
        assert_eq!(encode(0x56, 0x13, Some(&[0; 127]))[6], 127);
        assert_eq!(&encode(0x56, 0x13, Some(&[0; 128]))[6..8], &[0x80, 0x80]);
    }

    #[test]
    fn host_lengths() {
        // Not enough to tell yet
        assert_eq!(host_frame_length(&[0xAA, 0x55, 0x56]).unwrap(), None);
        assert_eq!(host_frame_length(&[0xAA, 0x55, 0x56, 0x81]).unwrap(), None);

        assert_eq!(host_frame_length(&[0xAA, 0x55, 0x56, 0x05]).unwrap(), Some(9));
        assert_eq!(host_frame_length(&[0xAA, 0x55, 0x56, 0x81, 0x02]).unwrap(), Some(5 + 258));

        // Simple replies never use the continuation bit
        assert_eq!(host_frame_length(&[0xAA, 0x55, 0xA4, 0x85]).unwrap(), Some(4 + 0x85));
    }

    #[test]
    fn bad_header() {
        assert_eq!(
            host_frame_length(&[0xAA, 0x56, 0x56, 0x05]),
            Err(DecodeError::BadHeader)
        );
    }

    #[test]
    fn corrupted_crc() {
        let mut packet = encode(0x56, 0x2E, Some(b"teamnumber"));
        assert!(validate_crc(&packet));

        packet[8] ^= 0x01;
        assert!(!validate_crc(&packet));
    }
}
