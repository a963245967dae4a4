//! VEXos firmware versions
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A VEXos version in the form `major.minor.build.bBETA`.
///
/// Versions order lexicographically over (major, minor, build, beta).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VexFirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub beta: u8,
}

impl VexFirmwareVersion {
    pub const fn new(major: u8, minor: u8, build: u8, beta: u8) -> Self {
        VexFirmwareVersion {
            major,
            minor,
            build,
            beta,
        }
    }

    pub const fn all_zero() -> Self {
        VexFirmwareVersion::new(0, 0, 0, 0)
    }

    pub fn is_beta(&self) -> bool {
        self.beta != 0
    }

    /// Signed difference of the first field that differs, zero when equal
    pub fn compare(&self, other: &VexFirmwareVersion) -> i32 {
        let fields = [
            (self.major, other.major),
            (self.minor, other.minor),
            (self.build, other.build),
            (self.beta, other.beta),
        ];

        fields
            .iter()
            .map(|(a, b)| *a as i32 - *b as i32)
            .find(|diff| *diff != 0)
            .unwrap_or(0)
    }

    /// Encodes the version in wire order, or reversed
    pub fn to_bytes(&self, reverse: bool) -> [u8; 4] {
        let bytes = [self.major, self.minor, self.build, self.beta];
        if reverse {
            [bytes[3], bytes[2], bytes[1], bytes[0]]
        } else {
            bytes
        }
    }

    pub fn from_bytes(bytes: [u8; 4], reverse: bool) -> Self {
        if reverse {
            VexFirmwareVersion::new(bytes[3], bytes[2], bytes[1], bytes[0])
        } else {
            VexFirmwareVersion::new(bytes[0], bytes[1], bytes[2], bytes[3])
        }
    }

    /// The `major.minor.build` form shown to users
    pub fn to_user_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.build)
    }

    /// Parses the `M_m_b_bB` form used by the firmware catalog
    pub fn from_catalog_str(s: &str) -> Result<Self, std::num::ParseIntError> {
        s.replace('_', ".").parse()
    }
}

impl std::fmt::Display for VexFirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.b{}", self.to_user_string(), self.beta)
    }
}

impl FromStr for VexFirmwareVersion {
    type Err = std::num::ParseIntError;

    /// Parses `M.m.b.bB`. Missing trailing parts are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.to_lowercase().replace('b', "");

        let mut parts = [0u8; 4];
        for (slot, part) in parts.iter_mut().zip(cleaned.split('.')) {
            *slot = part.trim().parse()?;
        }

        Ok(VexFirmwareVersion::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms() {
        let v = VexFirmwareVersion::new(1, 1, 2, 4);
        assert_eq!(v.to_string(), "1.1.2.b4");
        assert_eq!(v.to_user_string(), "1.1.2");
        assert_eq!("1.1.2.b4".parse::<VexFirmwareVersion>().unwrap(), v);
        assert_eq!(VexFirmwareVersion::from_catalog_str("1_1_2_b4").unwrap(), v);
    }

    #[test]
    fn short_strings_are_zero_padded() {
        assert_eq!(
            "1.2".parse::<VexFirmwareVersion>().unwrap(),
            VexFirmwareVersion::new(1, 2, 0, 0)
        );
        assert!("1.x".parse::<VexFirmwareVersion>().is_err());
    }

    #[test]
    fn ordering_and_compare() {
        let a = VexFirmwareVersion::new(1, 1, 2, 0);
        let b = VexFirmwareVersion::new(1, 1, 3, 0);
        let beta = VexFirmwareVersion::new(1, 1, 2, 7);

        assert!(a < b);
        assert!(a < beta);
        assert!(a.compare(&b) < 0);
        assert!(b.compare(&a) > 0);
        assert_eq!(beta.compare(&a), 7);
        assert_eq!(a.compare(&a), 0);
        assert!(beta.is_beta());
        assert!(!a.is_beta());
    }

    #[test]
    fn reversed_bytes() {
        let v = VexFirmwareVersion::new(1, 2, 3, 4);
        assert_eq!(v.to_bytes(false), [1, 2, 3, 4]);
        assert_eq!(v.to_bytes(true), [4, 3, 2, 1]);
        assert_eq!(VexFirmwareVersion::from_bytes([4, 3, 2, 1], true), v);
    }
}
