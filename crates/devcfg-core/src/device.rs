//! Device identity used to select configuration variants

use serde::{Deserialize, Serialize};

use crate::firmware::FirmwareVersion;

/// Concrete identity of a physical device, as reported during interview
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub manufacturer_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<FirmwareVersion>,
}

impl DeviceIdentity {
    pub fn new(manufacturer_id: u16, product_type: u16, product_id: u16) -> Self {
        Self {
            manufacturer_id,
            product_type,
            product_id,
            firmware_version: None,
        }
    }

    pub fn with_firmware(mut self, version: FirmwareVersion) -> Self {
        self.firmware_version = Some(version);
        self
    }

    /// Product type and id of this identity
    pub fn product(&self) -> ProductIds {
        ProductIds {
            product_type: self.product_type,
            product_id: self.product_id,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            format_hex_id(self.manufacturer_id),
            format_hex_id(self.product_type),
            format_hex_id(self.product_id)
        )?;
        if let Some(fw) = &self.firmware_version {
            write!(f, " (firmware {})", fw)?;
        }
        Ok(())
    }
}

/// One `{productType, productId}` pair a record applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductIds {
    #[serde(serialize_with = "serialize_hex_id")]
    pub product_type: u16,
    #[serde(serialize_with = "serialize_hex_id")]
    pub product_id: u16,
}

/// Parse a 16-bit id written as `0x` followed by exactly four hex digits
pub fn parse_hex_id(s: &str) -> Option<u16> {
    let digits = s.strip_prefix("0x")?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Canonical `0x%04x` form used in the index
pub fn format_hex_id(id: u16) -> String {
    format!("0x{:04x}", id)
}

pub(crate) fn serialize_hex_id<S: serde::Serializer>(id: &u16, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("0x{:04x}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0x0086"), Some(0x0086));
        assert_eq!(parse_hex_id("0x000E"), Some(0x000e));
        assert_eq!(parse_hex_id("0xffff"), Some(0xffff));
    }

    #[test]
    fn test_parse_hex_id_rejects_malformed() {
        assert_eq!(parse_hex_id("086"), None);
        assert_eq!(parse_hex_id("0x86"), None);
        assert_eq!(parse_hex_id("AEON"), None);
        assert_eq!(parse_hex_id("0x00860"), None);
        assert_eq!(parse_hex_id("0X0086"), None);
        assert_eq!(parse_hex_id("0x+086"), None);
    }

    #[test]
    fn test_identity_display() {
        let id = DeviceIdentity::new(0x86, 0x2, 0x64).with_firmware(FirmwareVersion::new(1, 4));
        assert_eq!(id.to_string(), "0x0086:0x0002:0x0064 (firmware 1.4)");
    }
}
