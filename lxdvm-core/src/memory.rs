use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// A memory or disk size in bytes.
///
/// Parses the suffixed forms users type on the command line: `512M`,
/// `2G`, `10GiB`, `1048576`, `4KB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySize(u64);

impl MemorySize {
    /// Creates a size from a raw byte count.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Creates a size from mebibytes.
    #[must_use]
    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * MIB)
    }

    /// Creates a size from gibibytes.
    #[must_use]
    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * GIB)
    }

    /// Returns the size in bytes.
    #[must_use]
    pub const fn in_bytes(self) -> u64 {
        self.0
    }
}

impl FromStr for MemorySize {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidMemorySize { value: s.to_owned() };

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        if digits.is_empty() {
            return Err(invalid());
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;

        let multiplier = match unit.to_ascii_uppercase().as_str() {
            "" | "B" => 1,
            "K" | "KB" | "KIB" => KIB,
            "M" | "MB" | "MIB" => MIB,
            "G" | "GB" | "GIB" => GIB,
            _ => return Err(invalid()),
        };

        value.checked_mul(multiplier).map(Self).ok_or_else(invalid)
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_bytes() {
        let size: MemorySize = match "1048576".parse() {
            Ok(s) => s,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(size.in_bytes(), 1_048_576);
    }

    #[test]
    fn parse_suffixes_are_binary_and_case_insensitive() {
        let cases = [
            ("4K", 4 * KIB),
            ("512M", 512 * MIB),
            ("512mb", 512 * MIB),
            ("2G", 2 * GIB),
            ("10GiB", 10 * GIB),
        ];
        for (input, expected) in cases {
            let size: MemorySize = match input.parse() {
                Ok(s) => s,
                Err(e) => panic!("{input}: unexpected error: {e}"),
            };
            assert_eq!(size.in_bytes(), expected, "wrong byte count for {input}");
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", "G", "12X", "1.5G", "-3M"] {
            assert!(
                input.parse::<MemorySize>().is_err(),
                "{input:?} must not parse"
            );
        }
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!("18446744073709551615G".parse::<MemorySize>().is_err());
    }

    #[test]
    fn constructors_agree() {
        assert_eq!(MemorySize::from_gib(2), MemorySize::from_mib(2048));
        assert_eq!(MemorySize::from_mib(1).in_bytes(), MIB);
    }
}
