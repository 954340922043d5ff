//! First-match resolution of conditional record entries
//!
//! Association groups, parameters and parameter options may be written either
//! as one object or as an ordered list of objects. In a list every entry but
//! the last must carry a `$if` guard. Resolution walks the list in order and
//! keeps the first entry whose guard holds (or that has no guard); the rest
//! are discarded. Without a device identity only unguarded entries match.

use serde_json::{Map, Value};

use crate::device::DeviceIdentity;
use crate::error::{PredicateError, ValidationError};
use crate::predicate::PredicateEvaluator;

/// Property holding the guard expression of a conditional entry
pub const CONDITION_KEY: &str = "$if";

/// One alternative of a conditional entry
#[derive(Debug, Clone, PartialEq)]
pub struct Variant<T> {
    pub condition: Option<String>,
    /// Field path of this alternative, for diagnostics
    pub path: String,
    pub value: T,
}

impl<T> Variant<T> {
    pub fn new(condition: Option<String>, path: impl Into<String>, value: T) -> Self {
        Self {
            condition,
            path: path.into(),
            value,
        }
    }
}

/// Ordered alternatives of one logical entry
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional<T> {
    variants: Vec<Variant<T>>,
}

impl<T> Conditional<T> {
    /// Build from an ordered list, enforcing that all but the last entry are guarded
    pub fn new(
        variants: Vec<Variant<T>>,
        locator: &str,
        path: &str,
    ) -> Result<Self, ValidationError> {
        if variants.is_empty() {
            return Err(ValidationError {
                locator: locator.to_string(),
                path: path.to_string(),
                message: "must not be an empty list".to_string(),
            });
        }
        let last = variants.len() - 1;
        if let Some(unguarded) = variants[..last].iter().find(|v| v.condition.is_none()) {
            return Err(ValidationError {
                locator: locator.to_string(),
                path: unguarded.path.clone(),
                message: format!(
                    "is missing a \"{}\" condition, only the last of {} alternatives may omit one",
                    CONDITION_KEY,
                    variants.len()
                ),
            });
        }
        Ok(Self { variants })
    }

    /// Convert every alternative, stopping at the first error
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(T, &str) -> Result<U, E>,
    ) -> Result<Conditional<U>, E> {
        let variants = self
            .variants
            .into_iter()
            .map(|v| {
                let value = f(v.value, &v.path)?;
                Ok(Variant {
                    condition: v.condition,
                    path: v.path,
                    value,
                })
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Conditional { variants })
    }

    /// Pick the first alternative that applies to `identity`
    pub fn resolve(
        self,
        locator: &str,
        identity: Option<&DeviceIdentity>,
        evaluator: &dyn PredicateEvaluator,
    ) -> Result<Option<T>, PredicateError> {
        for variant in self.variants {
            let Some(condition) = &variant.condition else {
                return Ok(Some(variant.value));
            };
            let Some(identity) = identity else {
                continue;
            };
            let applies = evaluator
                .evaluate(condition, identity)
                .map_err(|e| PredicateError {
                    locator: locator.to_string(),
                    path: variant.path.clone(),
                    predicate: condition.clone(),
                    reason: e.to_string(),
                })?;
            if applies {
                return Ok(Some(variant.value));
            }
        }
        Ok(None)
    }
}

/// Split a raw entry (object or list of objects) into guarded alternatives.
///
/// Guards are syntax-checked here so malformed conditions are rejected even
/// when no identity is available to evaluate them.
pub fn split_variants<'v>(
    value: &'v Value,
    locator: &str,
    path: &str,
    evaluator: &dyn PredicateEvaluator,
) -> Result<Conditional<&'v Map<String, Value>>, ValidationError> {
    let items: Vec<(String, &Value)> = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (format!("{}[{}]", path, i), item))
            .collect(),
        other => vec![(path.to_string(), other)],
    };

    let variants = items
        .into_iter()
        .map(|(item_path, item)| {
            let obj = item.as_object().ok_or_else(|| ValidationError {
                locator: locator.to_string(),
                path: item_path.clone(),
                message: format!("must be an object, found {}", value_kind(item)),
            })?;
            let condition = condition_of(obj, locator, &item_path, evaluator)?;
            Ok(Variant::new(condition, item_path, obj))
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    Conditional::new(variants, locator, path)
}

/// Read and syntax-check the `$if` property of an object, if present
pub fn condition_of(
    obj: &Map<String, Value>,
    locator: &str,
    path: &str,
    evaluator: &dyn PredicateEvaluator,
) -> Result<Option<String>, ValidationError> {
    let Some(raw) = obj.get(CONDITION_KEY) else {
        return Ok(None);
    };
    let condition_path = format!("{}.{}", path, CONDITION_KEY);
    let condition = raw.as_str().ok_or_else(|| ValidationError {
        locator: locator.to_string(),
        path: condition_path.clone(),
        message: format!("must be a string, found {}", value_kind(raw)),
    })?;
    evaluator.check(condition).map_err(|e| ValidationError {
        locator: locator.to_string(),
        path: condition_path,
        message: format!("invalid condition \"{}\": {}", condition, e),
    })?;
    Ok(Some(condition.to_string()))
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::ExprEvaluator;
    use serde_json::json;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(0x0086, 0x0002, 0x0064)
    }

    fn labels(value: &Value, identity: Option<&DeviceIdentity>) -> Option<String> {
        let eval = ExprEvaluator::new();
        split_variants(value, "test.json", "entry", &eval)
            .unwrap()
            .resolve("test.json", identity, &eval)
            .unwrap()
            .map(|obj| obj["label"].as_str().unwrap().to_string())
    }

    #[test]
    fn test_first_match_wins() {
        let value = json!([
            { "$if": "productId == 0x0064", "label": "A" },
            { "$if": "productType == 0x0002", "label": "B" },
            { "label": "C" }
        ]);
        assert_eq!(labels(&value, Some(&identity())), Some("A".to_string()));
    }

    #[test]
    fn test_falls_through_to_default() {
        let value = json!([
            { "$if": "productId == 0x0001", "label": "A" },
            { "label": "C" }
        ]);
        assert_eq!(labels(&value, Some(&identity())), Some("C".to_string()));
    }

    #[test]
    fn test_without_identity_only_default_matches() {
        let value = json!([
            { "$if": "productId == 0x0064", "label": "A" },
            { "label": "C" }
        ]);
        assert_eq!(labels(&value, None), Some("C".to_string()));
    }

    #[test]
    fn test_guarded_last_entry_may_match_nothing() {
        let value = json!({ "$if": "productId == 0x0001", "label": "A" });
        assert_eq!(labels(&value, Some(&identity())), None);
        assert_eq!(labels(&value, None), None);
    }

    #[test]
    fn test_unguarded_non_last_entry_is_rejected() {
        let eval = ExprEvaluator::new();
        let value = json!([
            { "label": "A" },
            { "$if": "productId == 0x0064", "label": "B" },
            { "label": "C" }
        ]);
        let err = split_variants(&value, "test.json", "entry", &eval).unwrap_err();
        assert_eq!(err.path, "entry[0]");
        assert!(err.message.contains("$if"));
    }

    #[test]
    fn test_non_string_condition_is_rejected() {
        let eval = ExprEvaluator::new();
        let value = json!([{ "$if": true, "label": "A" }, { "label": "B" }]);
        let err = split_variants(&value, "test.json", "entry", &eval).unwrap_err();
        assert_eq!(err.path, "entry[0].$if");
    }

    #[test]
    fn test_malformed_condition_rejected_without_identity() {
        let eval = ExprEvaluator::new();
        let value = json!([{ "$if": "productId ==", "label": "A" }, { "label": "B" }]);
        let err = split_variants(&value, "test.json", "entry", &eval).unwrap_err();
        assert!(err.message.starts_with("invalid condition"));
    }

    #[test]
    fn test_evaluation_failure_is_fatal() {
        let eval = ExprEvaluator::new();
        let value = json!([{ "$if": "unknownField == 1", "label": "A" }, { "label": "B" }]);
        let err = split_variants(&value, "test.json", "entry", &eval)
            .unwrap()
            .resolve("test.json", Some(&identity()), &eval)
            .unwrap_err();
        assert_eq!(err.path, "entry[0]");
        assert_eq!(err.predicate, "unknownField == 1");
    }

    #[test]
    fn test_empty_list_is_rejected() {
        let eval = ExprEvaluator::new();
        assert!(split_variants(&json!([]), "test.json", "entry", &eval).is_err());
    }
}
