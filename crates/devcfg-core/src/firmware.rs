//! Firmware versions and the version ranges records declare
//!
//! Versions are compared component-wise, so `1.10` is newer than `1.9`.
//! Record ranges use the strict `major.minor` form; device-reported versions
//! may carry an additional patch component.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const MIN: FirmwareVersion = FirmwareVersion::new(0, 0);
    pub const MAX: FirmwareVersion = FirmwareVersion::new(255, 255);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self {
            major,
            minor,
            patch: 0,
        }
    }

    pub const fn with_patch(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the strict two-component `major.minor` form used in records
    pub fn parse_strict(s: &str) -> Result<Self, FirmwareParseError> {
        let parts = split_components(s)?;
        match parts.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor)),
            _ => Err(FirmwareParseError::Format(s.to_string())),
        }
    }

    /// Single integer preserving the component ordering
    pub fn ordinal(&self) -> i64 {
        ((self.major as i64) << 16) | ((self.minor as i64) << 8) | self.patch as i64
    }
}

impl FromStr for FirmwareVersion {
    type Err = FirmwareParseError;

    /// Accepts `major.minor` or `major.minor.patch`, with an optional `v` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let parts = split_components(trimmed)?;
        match parts.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor)),
            [major, minor, patch] => Ok(Self::with_patch(*major, *minor, *patch)),
            _ => Err(FirmwareParseError::Format(s.to_string())),
        }
    }
}

fn split_components(s: &str) -> Result<Vec<u8>, FirmwareParseError> {
    s.split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FirmwareParseError::Format(s.to_string()));
            }
            // Digits only, so the only failure left is overflow
            part.parse::<u8>()
                .map_err(|_| FirmwareParseError::OutOfRange(s.to_string()))
        })
        .collect()
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl Serialize for FirmwareVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FirmwareVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FirmwareParseError {
    #[error("\"{0}\" is not a valid firmware version, expected major.minor")]
    Format(String),
    #[error("\"{0}\" has a version component outside 0..=255")]
    OutOfRange(String),
}

/// Inclusive firmware range a record applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareRange {
    pub min: FirmwareVersion,
    pub max: FirmwareVersion,
}

impl FirmwareRange {
    pub const fn new(min: FirmwareVersion, max: FirmwareVersion) -> Self {
        Self { min, max }
    }

    /// Whether `version` lies within the range.
    ///
    /// Bounds have no patch component, so a patch release of the max version
    /// still matches.
    pub fn contains(&self, version: &FirmwareVersion) -> bool {
        let v = (version.major, version.minor);
        (self.min.major, self.min.minor) <= v && v <= (self.max.major, self.max.minor)
    }
}

impl Default for FirmwareRange {
    fn default() -> Self {
        Self::new(FirmwareVersion::MIN, FirmwareVersion::MAX)
    }
}

impl fmt::Display for FirmwareRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.min, self.max)
    }
}
