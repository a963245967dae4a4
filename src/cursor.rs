//! A position tracking reader over the bytes of a packet
use byteorder::{ByteOrder, LittleEndian};

use crate::errors::DecodeError;
use crate::version::VexFirmwareVersion;

/// Reads values out of a packet one after the other.
///
/// Every read checks the remaining length and returns
/// [`DecodeError::UnexpectedEnd`] instead of panicking when the
/// packet is too short. Integers default to little endian, which is
/// what the V5 uses for everything but the packet CRC.
#[derive(Debug, Clone)]
pub struct PacketCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PacketCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PacketCursor { data, position: 0 }
    }

    /// Creates a cursor that starts reading at `position`
    pub fn at(data: &'a [u8], position: usize) -> Self {
        PacketCursor { data, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Moves the cursor to an absolute offset
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    /// Borrows the next `n` bytes and advances past them
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.position.checked_add(n);
        match end.and_then(|end| self.data.get(self.position..end)) {
            Some(slice) => {
                self.position += n;
                Ok(slice)
            }
            None => Err(DecodeError::UnexpectedEnd {
                offset: self.position,
                needed: n,
                available: self.remaining(),
            }),
        }
    }

    /// Borrows `n` bytes at an absolute offset without moving the cursor
    pub fn peek_at(&self, offset: usize, n: usize) -> Result<&'a [u8], DecodeError> {
        offset
            .checked_add(n)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(DecodeError::UnexpectedEnd {
                offset,
                needed: n,
                available: self.data.len().saturating_sub(offset),
            })
    }

    pub fn next_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn next_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.next_u8()? as i8)
    }

    pub fn next_u16_with<B: ByteOrder>(&mut self) -> Result<u16, DecodeError> {
        Ok(B::read_u16(self.take(2)?))
    }

    pub fn next_i16_with<B: ByteOrder>(&mut self) -> Result<i16, DecodeError> {
        Ok(B::read_i16(self.take(2)?))
    }

    pub fn next_u32_with<B: ByteOrder>(&mut self) -> Result<u32, DecodeError> {
        Ok(B::read_u32(self.take(4)?))
    }

    pub fn next_i32_with<B: ByteOrder>(&mut self) -> Result<i32, DecodeError> {
        Ok(B::read_i32(self.take(4)?))
    }

    pub fn next_u16(&mut self) -> Result<u16, DecodeError> {
        self.next_u16_with::<LittleEndian>()
    }

    pub fn next_i16(&mut self) -> Result<i16, DecodeError> {
        self.next_i16_with::<LittleEndian>()
    }

    pub fn next_u32(&mut self) -> Result<u32, DecodeError> {
        self.next_u32_with::<LittleEndian>()
    }

    pub fn next_i32(&mut self) -> Result<i32, DecodeError> {
        self.next_i32_with::<LittleEndian>()
    }

    /// Reads exactly `len` bytes as a Latin-1 string
    pub fn next_string(&mut self, len: usize) -> Result<String, DecodeError> {
        Ok(self.take(len)?.iter().map(|b| *b as char).collect())
    }

    /// Reads a NUL terminated string out of a fixed `len` byte field.
    ///
    /// The cursor always ends up `len` bytes further along, no matter
    /// where the terminator was. A field cut short by the end of the
    /// packet yields what was there.
    pub fn next_ntbs(&mut self, len: usize) -> Result<String, DecodeError> {
        let start = self.position;
        let end = start.saturating_add(len).min(self.data.len());
        let field = self.data.get(start..end).unwrap_or(&[]);

        let value = field
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();

        self.position = start.saturating_add(len);
        Ok(value)
    }

    /// Reads a NUL terminated string of at most `max` bytes.
    ///
    /// The cursor stops right after the terminator, or at the end of the
    /// packet.
    pub fn next_var_ntbs(&mut self, max: usize) -> Result<String, DecodeError> {
        let mut value = String::new();
        for _ in 0..max {
            if self.remaining() == 0 {
                break;
            }
            let b = self.next_u8()?;
            if b == 0 {
                break;
            }
            value.push(b as char);
        }
        Ok(value)
    }

    /// Reads a four byte firmware version
    pub fn next_version(&mut self, reverse: bool) -> Result<VexFirmwareVersion, DecodeError> {
        let bytes = self.take(4)?;
        Ok(VexFirmwareVersion::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]], reverse))
    }
}
