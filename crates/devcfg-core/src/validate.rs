//! Record validation: untyped JSON tree in, [`DeviceRecord`] out
//!
//! Validation runs top-down and stops at the first violated constraint:
//!
//! 1. `manufacturerId` format
//! 2. `manufacturer`, `label`, `description`
//! 3. `devices` shape and hex ids
//! 4. `firmwareVersion` range
//! 5. `associations`
//! 6. `paramInformation`
//! 7. `proprietary`, `compat`, `metadata`
//!
//! Conditional entries are resolved here, against the identity the validator
//! was built with, so the returned record never holds alternatives. The whole
//! record is parsed and every guard list checked before the first guard is
//! evaluated.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::conditional::{condition_of, split_variants, value_kind, Conditional, Variant};
use crate::device::{parse_hex_id, DeviceIdentity, ProductIds};
use crate::error::{ConfigError, ValidationError};
use crate::firmware::{FirmwareRange, FirmwareVersion};
use crate::predicate::PredicateEvaluator;
use crate::record::{
    AssociationGroup, CommentLevel, CompatConfig, DeviceComment, DeviceMetadata, DeviceRecord,
    ParamInfo, ParamKey, ParamOption,
};

static ASSOCIATION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*$").expect("valid regex"));

static PARAM_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\[0x([0-9a-fA-F]+)\])?$").expect("valid regex")
});

/// Property naming the parameter key in the array form of `paramInformation`
const PARAM_KEY_PROPERTY: &str = "#";

/// Validates raw record trees for one source
pub struct Validator<'a> {
    locator: String,
    identity: Option<DeviceIdentity>,
    evaluator: &'a dyn PredicateEvaluator,
}

impl<'a> Validator<'a> {
    /// `locator` identifies the source in diagnostics, usually its relative path
    pub fn new(locator: impl Into<String>, evaluator: &'a dyn PredicateEvaluator) -> Self {
        Self {
            locator: locator.into(),
            identity: None,
            evaluator,
        }
    }

    /// Resolve conditional entries for this device instead of generically
    pub fn with_identity(mut self, identity: Option<&DeviceIdentity>) -> Self {
        self.identity = identity.cloned();
        self
    }

    pub fn validate(&self, raw: &Value) -> Result<DeviceRecord, ConfigError> {
        let root = raw
            .as_object()
            .ok_or_else(|| self.error("<root>", format!("must be an object, found {}", value_kind(raw))))?;
        let fields = self.fields(root, "");

        let manufacturer_id = fields.required_hex_id("manufacturerId")?;
        let manufacturer = fields.required_str("manufacturer")?;
        let label = fields.required_str("label")?;
        let description = fields.required_str("description")?;
        let devices = self.devices(&fields)?;
        let firmware_version = self.firmware_range(&fields)?;

        let associations = match root.get("associations") {
            Some(value) => self.associations(value)?,
            None => Vec::new(),
        };
        let params = match root.get("paramInformation") {
            Some(value) => self.params(value)?,
            None => Vec::new(),
        };

        let proprietary = fields.optional_object("proprietary")?.cloned().unwrap_or_default();
        let compat = fields
            .optional_object("compat")?
            .map(|obj| CompatConfig(obj.clone()));
        let metadata = match fields.optional_object("metadata")? {
            Some(obj) => Some(self.metadata(obj)?),
            None => None,
        };

        let associations = self.resolve_associations(associations)?;
        let params = self.resolve_params(params)?;

        Ok(DeviceRecord {
            manufacturer,
            manufacturer_id,
            label,
            description,
            devices,
            firmware_version,
            associations,
            params,
            proprietary,
            compat,
            metadata,
        })
    }

    fn devices(&self, fields: &Fields<'_, '_>) -> Result<Vec<ProductIds>, ValidationError> {
        let items = fields.required_array("devices")?;
        if items.is_empty() {
            return Err(self.error("devices", "must list at least one device"));
        }
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let path = format!("devices[{}]", i);
                let obj = self.as_object(item, &path)?;
                let device = self.fields(obj, &path);
                Ok(ProductIds {
                    product_type: device.required_hex_id("productType")?,
                    product_id: device.required_hex_id("productId")?,
                })
            })
            .collect()
    }

    fn firmware_range(&self, fields: &Fields<'_, '_>) -> Result<FirmwareRange, ValidationError> {
        let obj = fields.required_object("firmwareVersion")?;
        let range = self.fields(obj, "firmwareVersion");
        let bound = |key: &str| -> Result<FirmwareVersion, ValidationError> {
            let s = range.required_str(key)?;
            FirmwareVersion::parse_strict(&s).map_err(|e| self.error(&range.path(key), e.to_string()))
        };
        Ok(FirmwareRange::new(bound("min")?, bound("max")?))
    }

    fn associations(
        &self,
        value: &Value,
    ) -> Result<Vec<(u32, Conditional<AssociationGroup>)>, ValidationError> {
        let obj = self.as_object(value, "associations")?;

        // Keys first, so no guard is evaluated for a record with a bad key
        let mut keyed = Vec::with_capacity(obj.len());
        for (key, entry) in obj {
            let path = format!("associations[\"{}\"]", key);
            let group_id = ASSOCIATION_KEY
                .is_match(key)
                .then(|| key.parse::<u32>().ok())
                .flatten()
                .ok_or_else(|| {
                    self.error(&path, "invalid key, expected a positive group number without leading zeros")
                })?;
            keyed.push((group_id, path, entry));
        }

        keyed
            .into_iter()
            .map(|(group_id, path, entry)| {
                let variants = split_variants(entry, &self.locator, &path, self.evaluator)?
                    .try_map(|obj, variant_path| self.association(group_id, obj, variant_path))?;
                Ok((group_id, variants))
            })
            .collect()
    }

    fn resolve_associations(
        &self,
        parsed: Vec<(u32, Conditional<AssociationGroup>)>,
    ) -> Result<BTreeMap<u32, AssociationGroup>, ConfigError> {
        let mut groups = BTreeMap::new();
        for (group_id, variants) in parsed {
            if let Some(group) = self.resolve(variants)? {
                groups.insert(group_id, group);
            }
        }
        Ok(groups)
    }

    fn association(
        &self,
        group_id: u32,
        obj: &Map<String, Value>,
        path: &str,
    ) -> Result<AssociationGroup, ValidationError> {
        let fields = self.fields(obj, path);
        Ok(AssociationGroup {
            group_id,
            label: fields.required_str("label")?,
            description: fields.optional_str("description")?,
            max_nodes: fields.required_positive_u32("maxNodes")?,
            is_lifeline: fields.optional_bool("isLifeline")?.unwrap_or(false),
            no_endpoint: fields.optional_bool("noEndpoint")?.unwrap_or(false),
        })
    }

    fn params(&self, value: &Value) -> Result<Vec<(ParamKey, Conditional<PendingParam>)>, ValidationError> {
        let entries = match value {
            Value::Object(obj) => self.keyed_params(obj)?,
            Value::Array(items) => self.listed_params(items)?,
            other => {
                return Err(self.error(
                    "paramInformation",
                    format!("must be an object or an array, found {}", value_kind(other)),
                ))
            }
        };

        entries
            .into_iter()
            .map(|(key, variants)| Ok((key, variants.try_map(|obj, path| self.param(key, obj, path))?)))
            .collect()
    }

    fn resolve_params(
        &self,
        parsed: Vec<(ParamKey, Conditional<PendingParam>)>,
    ) -> Result<BTreeMap<ParamKey, ParamInfo>, ConfigError> {
        let mut params = BTreeMap::new();
        for (key, variants) in parsed {
            let Some(pending) = self.resolve(variants)? else {
                continue;
            };
            let mut param = pending.info;
            for option in pending.options {
                if let Some(option) = self.resolve(option)? {
                    param.options.push(option);
                }
            }
            params.insert(key, param);
        }
        Ok(params)
    }

    /// `{"1": {...}, "2[0xff]": [...]}`
    fn keyed_params<'v>(
        &self,
        obj: &'v Map<String, Value>,
    ) -> Result<Vec<(ParamKey, Conditional<&'v Map<String, Value>>)>, ValidationError> {
        let mut keyed = Vec::with_capacity(obj.len());
        for (key, entry) in obj {
            let path = format!("paramInformation[\"{}\"]", key);
            keyed.push((self.param_key(key, &path)?, path, entry));
        }
        keyed
            .into_iter()
            .map(|(key, path, entry)| {
                Ok((key, split_variants(entry, &self.locator, &path, self.evaluator)?))
            })
            .collect()
    }

    /// `[{"#": "1", ...}, {"#": "2[0xff]", "$if": ..., ...}, ...]`
    ///
    /// Entries sharing a key form that key's alternatives, in list order.
    fn listed_params<'v>(
        &self,
        items: &'v [Value],
    ) -> Result<Vec<(ParamKey, Conditional<&'v Map<String, Value>>)>, ValidationError> {
        let mut grouped: Vec<(ParamKey, String, Vec<Variant<&'v Map<String, Value>>>)> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let path = format!("paramInformation[{}]", i);
            let obj = self.as_object(item, &path)?;
            let raw_key = self.fields(obj, &path).required_str(PARAM_KEY_PROPERTY)?;
            let key = self.param_key(&raw_key, &path)?;
            let condition = condition_of(obj, &self.locator, &path, self.evaluator)?;
            let variant = Variant::new(condition, path, obj);
            match grouped.iter_mut().find(|(k, _, _)| *k == key) {
                Some((_, _, variants)) => variants.push(variant),
                None => grouped.push((key, format!("paramInformation[\"{}\"]", raw_key), vec![variant])),
            }
        }
        grouped
            .into_iter()
            .map(|(key, path, variants)| Ok((key, Conditional::new(variants, &self.locator, &path)?)))
            .collect()
    }

    fn param_key(&self, key: &str, path: &str) -> Result<ParamKey, ValidationError> {
        let invalid = || {
            self.error(
                path,
                "invalid key, expected a parameter number optionally followed by a bitmask like \"3[0xff00]\"",
            )
        };
        let caps = PARAM_KEY.captures(key).ok_or_else(invalid)?;
        let number = caps[1].parse::<u32>().map_err(|_| invalid())?;
        let bit_mask = match caps.get(2) {
            Some(mask) => {
                let mask = u32::from_str_radix(mask.as_str(), 16).map_err(|_| invalid())?;
                if mask == 0 {
                    return Err(self.error(path, "bitmask must not be zero"));
                }
                Some(mask)
            }
            None => None,
        };
        Ok(ParamKey::new(number, bit_mask))
    }

    fn param(
        &self,
        key: ParamKey,
        obj: &Map<String, Value>,
        path: &str,
    ) -> Result<PendingParam, ValidationError> {
        let fields = self.fields(obj, path);

        let label = fields.required_str("label")?;
        let description = fields.optional_str("description")?;
        let value_size = fields.required_positive_u32("valueSize")?;
        let min_value = fields.required_int("minValue")?;
        let max_value = fields.required_int("maxValue")?;
        let default_value = fields.required_int("defaultValue")?;
        let unsigned = fields.optional_bool("unsigned")?.unwrap_or(false);
        let read_only = fields.optional_bool("readOnly")?.unwrap_or(false);
        let write_only = fields.optional_bool("writeOnly")?.unwrap_or(false);
        let allow_manual_entry = fields.optional_bool("allowManualEntry")?;

        if min_value > max_value {
            return Err(self.error(
                &fields.path("minValue"),
                format!("{} is greater than maxValue {}", min_value, max_value),
            ));
        }
        if default_value < min_value || default_value > max_value {
            return Err(self.error(
                &fields.path("defaultValue"),
                format!("{} is outside {}..={}", default_value, min_value, max_value),
            ));
        }
        if read_only && write_only {
            return Err(self.error(path, "readOnly and writeOnly are mutually exclusive"));
        }

        let options = match obj.get("options") {
            Some(value) => self.options(value, &fields.path("options"))?,
            None => Vec::new(),
        };

        let allow_manual_entry = allow_manual_entry.unwrap_or(!read_only);
        if !allow_manual_entry && !read_only && options.is_empty() {
            return Err(self.error(
                &fields.path("allowManualEntry"),
                "is false, so at least one option must be defined",
            ));
        }

        let info = ParamInfo {
            parameter_number: key.number,
            bit_mask: key.bit_mask,
            label,
            description,
            value_size,
            min_value,
            max_value,
            default_value,
            unsigned,
            read_only,
            write_only,
            allow_manual_entry,
            options: Vec::new(),
        };
        Ok(PendingParam { info, options })
    }

    /// Options sharing a value are alternatives of one another, first match wins
    fn options(&self, value: &Value, path: &str) -> Result<Vec<Conditional<ParamOption>>, ValidationError> {
        let items = value
            .as_array()
            .ok_or_else(|| self.error(path, format!("must be an array, found {}", value_kind(value))))?;

        let mut grouped: Vec<(i64, Vec<Variant<ParamOption>>)> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let option_path = format!("{}[{}]", path, i);
            let obj = self.as_object(item, &option_path)?;
            let fields = self.fields(obj, &option_path);
            let option = ParamOption {
                value: fields.required_int("value")?,
                label: fields.required_str("label")?,
            };
            let condition = condition_of(obj, &self.locator, &option_path, self.evaluator)?;
            let variant = Variant::new(condition, option_path, option);
            match grouped.iter_mut().find(|(v, _)| *v == variant.value.value) {
                Some((_, variants)) => variants.push(variant),
                None => grouped.push((variant.value.value, vec![variant])),
            }
        }

        grouped
            .into_iter()
            .map(|(value, variants)| {
                let group_path = format!("{}(value {})", path, value);
                Conditional::new(variants, &self.locator, &group_path)
            })
            .collect()
    }

    fn metadata(&self, obj: &Map<String, Value>) -> Result<DeviceMetadata, ValidationError> {
        let fields = self.fields(obj, "metadata");
        let comments = match obj.get("comments") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.comment(item, &format!("metadata.comments[{}]", i)))
                .collect::<Result<_, _>>()?,
            Some(item) => vec![self.comment(item, "metadata.comments")?],
        };
        Ok(DeviceMetadata {
            wakeup: fields.optional_str("wakeup")?,
            inclusion: fields.optional_str("inclusion")?,
            exclusion: fields.optional_str("exclusion")?,
            reset: fields.optional_str("reset")?,
            manual: fields.optional_str("manual")?,
            comments,
        })
    }

    fn comment(&self, value: &Value, path: &str) -> Result<DeviceComment, ValidationError> {
        let obj = self.as_object(value, path)?;
        let fields = self.fields(obj, path);
        let level = fields.required_str("level")?;
        let level = CommentLevel::parse(&level).ok_or_else(|| {
            self.error(
                &fields.path("level"),
                format!("\"{}\" is not one of info, warning, error", level),
            )
        })?;
        Ok(DeviceComment {
            level,
            text: fields.required_str("text")?,
        })
    }

    fn resolve<T>(&self, variants: Conditional<T>) -> Result<Option<T>, ConfigError> {
        Ok(variants.resolve(&self.locator, self.identity.as_ref(), self.evaluator)?)
    }

    fn as_object<'v>(&self, value: &'v Value, path: &str) -> Result<&'v Map<String, Value>, ValidationError> {
        value
            .as_object()
            .ok_or_else(|| self.error(path, format!("must be an object, found {}", value_kind(value))))
    }

    fn fields<'v, 's>(&'s self, obj: &'v Map<String, Value>, path: &str) -> Fields<'v, 's> {
        Fields {
            obj,
            path: path.to_string(),
            locator: &self.locator,
        }
    }

    fn error(&self, path: &str, message: impl Into<String>) -> ValidationError {
        ValidationError {
            locator: self.locator.clone(),
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// A parameter whose option lists are checked but not yet resolved
struct PendingParam {
    info: ParamInfo,
    options: Vec<Conditional<ParamOption>>,
}

/// Validate a raw record tree; see [`Validator`]
pub fn validate(
    raw: &Value,
    locator: &str,
    identity: Option<&DeviceIdentity>,
    evaluator: &dyn PredicateEvaluator,
) -> Result<DeviceRecord, ConfigError> {
    Validator::new(locator, evaluator)
        .with_identity(identity)
        .validate(raw)
}

/// Typed accessors over one JSON object
struct Fields<'v, 's> {
    obj: &'v Map<String, Value>,
    path: String,
    locator: &'s str,
}

impl<'v> Fields<'v, '_> {
    fn path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    fn error(&self, key: &str, message: impl Into<String>) -> ValidationError {
        ValidationError {
            locator: self.locator.to_string(),
            path: self.path(key),
            message: message.into(),
        }
    }

    fn required(&self, key: &str) -> Result<&'v Value, ValidationError> {
        self.obj
            .get(key)
            .ok_or_else(|| self.error(key, "is required"))
    }

    fn mismatch(&self, key: &str, expected: &str, found: &Value) -> ValidationError {
        self.error(key, format!("must be {}, found {}", expected, value_kind(found)))
    }

    fn required_str(&self, key: &str) -> Result<String, ValidationError> {
        let value = self.required(key)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(key, "a string", value))
    }

    fn optional_str(&self, key: &str) -> Result<Option<String>, ValidationError> {
        match self.obj.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.mismatch(key, "a string", other)),
        }
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        match self.obj.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(key, "a boolean", other)),
        }
    }

    fn required_int(&self, key: &str) -> Result<i64, ValidationError> {
        let value = self.required(key)?;
        value
            .as_i64()
            .ok_or_else(|| self.mismatch(key, "an integer", value))
    }

    fn required_positive_u32(&self, key: &str) -> Result<u32, ValidationError> {
        let n = self.required_int(key)?;
        if n <= 0 {
            return Err(self.error(key, format!("must be a positive integer, found {}", n)));
        }
        u32::try_from(n).map_err(|_| self.error(key, format!("{} is too large", n)))
    }

    fn required_hex_id(&self, key: &str) -> Result<u16, ValidationError> {
        let s = self.required_str(key)?;
        parse_hex_id(&s).ok_or_else(|| {
            self.error(
                key,
                format!("\"{}\" is not a 4-digit hex id like \"0x0086\"", s),
            )
        })
    }

    fn required_array(&self, key: &str) -> Result<&'v Vec<Value>, ValidationError> {
        let value = self.required(key)?;
        value
            .as_array()
            .ok_or_else(|| self.mismatch(key, "an array", value))
    }

    fn required_object(&self, key: &str) -> Result<&'v Map<String, Value>, ValidationError> {
        let value = self.required(key)?;
        value
            .as_object()
            .ok_or_else(|| self.mismatch(key, "an object", value))
    }

    fn optional_object(&self, key: &str) -> Result<Option<&'v Map<String, Value>>, ValidationError> {
        match self.obj.get(key) {
            None => Ok(None),
            Some(Value::Object(obj)) => Ok(Some(obj)),
            Some(other) => Err(self.mismatch(key, "an object", other)),
        }
    }
}
