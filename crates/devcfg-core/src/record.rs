//! Validated device configuration records
//!
//! A [`DeviceRecord`] is produced by the [`Validator`](crate::Validator) and
//! is immutable afterwards: conditional entries have already been resolved
//! against the identity the record was loaded for.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::device::{format_hex_id, serialize_hex_id, ProductIds};
use crate::firmware::FirmwareRange;

/// A validated configuration record for one device model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub(crate) manufacturer: String,
    #[serde(serialize_with = "serialize_hex_id")]
    pub(crate) manufacturer_id: u16,
    pub(crate) label: String,
    pub(crate) description: String,
    pub(crate) devices: Vec<ProductIds>,
    pub(crate) firmware_version: FirmwareRange,
    pub(crate) associations: BTreeMap<u32, AssociationGroup>,
    pub(crate) params: BTreeMap<ParamKey, ParamInfo>,
    pub(crate) proprietary: Map<String, Value>,
    pub(crate) compat: Option<CompatConfig>,
    pub(crate) metadata: Option<DeviceMetadata>,
}

impl DeviceRecord {
    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Product type/id pairs this record applies to, in source order
    pub fn devices(&self) -> &[ProductIds] {
        &self.devices
    }

    pub fn firmware_version(&self) -> &FirmwareRange {
        &self.firmware_version
    }

    pub fn associations(&self) -> &BTreeMap<u32, AssociationGroup> {
        &self.associations
    }

    pub fn association(&self, group_id: u32) -> Option<&AssociationGroup> {
        self.associations.get(&group_id)
    }

    /// The group reporting device status to the controller, if any
    pub fn lifeline(&self) -> Option<&AssociationGroup> {
        self.associations.values().find(|g| g.is_lifeline)
    }

    pub fn params(&self) -> &BTreeMap<ParamKey, ParamInfo> {
        &self.params
    }

    pub fn param(&self, number: u32, bit_mask: Option<u32>) -> Option<&ParamInfo> {
        self.params.get(&ParamKey::new(number, bit_mask))
    }

    /// All entries sharing a parameter number: the whole value and its partials
    pub fn params_for_number(&self, number: u32) -> impl Iterator<Item = &ParamInfo> + '_ {
        self.params
            .range(ParamKey::new(number, None)..=ParamKey::new(number, Some(u32::MAX)))
            .map(|(_, p)| p)
    }

    pub fn proprietary(&self) -> &Map<String, Value> {
        &self.proprietary
    }

    pub fn compat(&self) -> Option<&CompatConfig> {
        self.compat.as_ref()
    }

    pub fn metadata(&self) -> Option<&DeviceMetadata> {
        self.metadata.as_ref()
    }

    /// Whether this record lists the given product type/id
    pub fn supports(&self, product: ProductIds) -> bool {
        self.devices.contains(&product)
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.manufacturer,
            self.label,
            format_hex_id(self.manufacturer_id)
        )
    }
}

/// An association group of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationGroup {
    pub group_id: u32,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub max_nodes: u32,
    /// Reports device status to the controlling hub
    pub is_lifeline: bool,
    /// Must be addressed node-only, without an endpoint
    pub no_endpoint: bool,
}

/// Parameter number plus optional partial-value bitmask
///
/// `1` and `1[0x01]` are distinct keys. Ordering sorts by number first, with
/// the whole-value entry before its partials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey {
    pub number: u32,
    pub bit_mask: Option<u32>,
}

impl ParamKey {
    pub fn new(number: u32, bit_mask: Option<u32>) -> Self {
        Self { number, bit_mask }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bit_mask {
            Some(mask) => write!(f, "{}[{:#x}]", self.number, mask),
            None => write!(f, "{}", self.number),
        }
    }
}

impl Serialize for ParamKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A configuration parameter definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamInfo {
    pub parameter_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_mask: Option<u32>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Size in bytes
    pub value_size: u32,
    pub min_value: i64,
    pub max_value: i64,
    pub default_value: i64,
    pub unsigned: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub allow_manual_entry: bool,
    pub options: Vec<ParamOption>,
}

impl ParamInfo {
    pub fn key(&self) -> ParamKey {
        ParamKey::new(self.parameter_number, self.bit_mask)
    }

    pub fn option_label(&self, value: i64) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.value == value)
            .map(|o| o.label.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamOption {
    pub value: i64,
    pub label: String,
}

/// Compatibility flags; passed through to consumers untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompatConfig(pub Map<String, Value>);

impl CompatConfig {
    pub fn get(&self, flag: &str) -> Option<&Value> {
        self.0.get(flag)
    }
}

/// Human-readable instructions attached to a record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wakeup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<DeviceComment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceComment {
    pub level: CommentLevel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentLevel {
    Info,
    Warning,
    Error,
}

impl CommentLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_key_ordering() {
        let mut keys = vec![
            ParamKey::new(2, None),
            ParamKey::new(1, Some(0xff00)),
            ParamKey::new(1, None),
            ParamKey::new(1, Some(0x00ff)),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ParamKey::new(1, None),
                ParamKey::new(1, Some(0x00ff)),
                ParamKey::new(1, Some(0xff00)),
                ParamKey::new(2, None),
            ]
        );
    }

    #[test]
    fn test_param_key_display() {
        assert_eq!(ParamKey::new(80, None).to_string(), "80");
        assert_eq!(ParamKey::new(3, Some(0xff00)).to_string(), "3[0xff00]");
    }

    #[test]
    fn test_comment_level_parse() {
        assert_eq!(CommentLevel::parse("warning"), Some(CommentLevel::Warning));
        assert_eq!(CommentLevel::parse("fatal"), None);
    }
}
