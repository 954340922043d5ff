//! Flat index over the record corpus
//!
//! One [`IndexEntry`] exists per (record, device) pair, so a record listing
//! three product type/id pairs contributes three entries sharing the same
//! filename, manufacturer, label and firmware range.

use serde::{Deserialize, Deserializer, Serialize};

use crate::device::{parse_hex_id, serialize_hex_id, DeviceIdentity};
use crate::firmware::FirmwareRange;
use crate::record::DeviceRecord;

/// Default file name of the persisted index inside the corpus root
pub const INDEX_FILE_NAME: &str = "index.json";

/// Marks the persisted index as derived data
pub const INDEX_HEADER: &str = "\
// This file is auto-generated by devcfg. DO NOT edit it by hand!
// Changes to the device records regenerate it automatically.
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    #[serde(serialize_with = "serialize_hex_id", deserialize_with = "deserialize_hex_id")]
    pub manufacturer_id: u16,
    pub manufacturer: String,
    pub label: String,
    #[serde(serialize_with = "serialize_hex_id", deserialize_with = "deserialize_hex_id")]
    pub product_type: u16,
    #[serde(serialize_with = "serialize_hex_id", deserialize_with = "deserialize_hex_id")]
    pub product_id: u16,
    pub firmware_version: FirmwareRange,
    /// Path of the record relative to the corpus root, `/`-separated
    pub filename: String,
}

impl IndexEntry {
    /// Flatten a record into one entry per listed device
    pub fn from_record(record: &DeviceRecord, filename: &str) -> Vec<Self> {
        record
            .devices()
            .iter()
            .map(|device| Self {
                manufacturer_id: record.manufacturer_id(),
                manufacturer: record.manufacturer().to_string(),
                label: record.label().to_string(),
                product_type: device.product_type,
                product_id: device.product_id,
                firmware_version: *record.firmware_version(),
                filename: filename.to_string(),
            })
            .collect()
    }

    /// Ids must match exactly; the firmware range is only checked when the
    /// identity carries a version.
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        self.manufacturer_id == identity.manufacturer_id
            && self.product_type == identity.product_type
            && self.product_id == identity.product_id
            && identity
                .firmware_version
                .as_ref()
                .map_or(true, |fw| self.firmware_version.contains(fw))
    }
}

fn deserialize_hex_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_hex_id(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("\"{}\" is not a 4-digit hex id", s)))
}

/// Render the index file: header comment followed by pretty-printed entries
pub fn render_index(entries: &[IndexEntry]) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string_pretty(entries)?;
    Ok(format!("{}{}\n", INDEX_HEADER, body))
}

/// Parse a persisted index; an empty list counts as malformed
pub fn parse_index(content: &str) -> Result<Vec<IndexEntry>, String> {
    let stripped = crate::reader::strip_line_comments(content);
    let entries: Vec<IndexEntry> = serde_json::from_str(&stripped).map_err(|e| e.to_string())?;
    if entries.is_empty() {
        return Err("index contains no entries".to_string());
    }
    Ok(entries)
}
