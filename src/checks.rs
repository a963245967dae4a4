//! CRC checks used by the V5 protocol
use crc::{Algorithm, Crc};

/// Vex uses CRC16/XMODEM as the CRC16.
pub const VEX_CRC16: Algorithm<u16> = crc::CRC_16_XMODEM;

/// Vex uses a CRC32 that I found on page
/// 6 of this document:
/// <https://www.matec-conferences.org/articles/matecconf/pdf/2016/11/matecconf_tomsk2016_04001.pdf>
pub const VEX_CRC32: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04C11DB7,
    init: 0x00000000,
    refin: false,
    refout: false,
    xorout: 0x00000000,
    check: 0x89A1897F,
    residue: 0x00000000,
};

// Tables are generated at compile time
const CRC16: Crc<u16> = Crc::<u16>::new(&VEX_CRC16);
const CRC32: Crc<u32> = Crc::<u32>::new(&VEX_CRC32);

/// Computes the packet CRC16 of `data`, starting from `seed`.
///
/// With a seed of zero this is plain CRC16/XMODEM. A frame with its
/// big endian checksum appended checks to zero.
pub fn crc16(data: &[u8], seed: u16) -> u16 {
    let mut digest = CRC16.digest_with_initial(seed);
    digest.update(data);
    digest.finalize()
}

/// Computes the file CRC32 of `data`, starting from `seed`.
pub fn crc32(data: &[u8], seed: u32) -> u32 {
    let mut digest = CRC32.digest_with_initial(seed);
    digest.update(data);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Straight shift register versions to check the tables against
    fn crc16_bitwise(data: &[u8], seed: u16) -> u16 {
        let mut crc = seed;
        for byte in data {
            crc ^= (*byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x1021
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    fn crc32_bitwise(data: &[u8], seed: u32) -> u32 {
        let mut crc = seed;
        for byte in data {
            crc ^= (*byte as u32) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04C11DB7
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    #[test]
    fn check_values() {
        assert_eq!(crc16(b"123456789", 0), 0x31C3);
        assert_eq!(crc32(b"123456789", 0), 0x89A1897F);
        assert_eq!(crc16(&[], 0), 0);
        assert_eq!(crc32(&[], 0), 0);
    }

    #[test]
    fn matches_shift_register() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for seed in [0u16, 0x1234, 0xFFFF] {
            assert_eq!(crc16(&data, seed), crc16_bitwise(&data, seed));
        }
        for seed in [0u32, 0xDEADBEEF] {
            assert_eq!(crc32(&data, seed), crc32_bitwise(&data, seed));
        }
    }

    #[test]
    fn appended_checksum_checks_to_zero() {
        let mut frame = vec![0xAA, 0x55, 0x56, 0x02, 0x22, 0x76];
        let crc = crc16(&frame, 0);
        frame.extend(crc.to_be_bytes());
        assert_eq!(crc16(&frame, 0), 0);
    }
}
