//! Guard expressions attached to conditional record entries
//!
//! A guard is the `$if` string of a record entry, e.g.
//! `productId === 0x0064 && firmwareVersion >= 1.5`. Evaluation is delegated
//! to a [`PredicateEvaluator`]; [`ExprEvaluator`] is the default backed by
//! `evalexpr`.

use evalexpr::{ContextWithMutableVariables, EvalexprError, HashMapContext, Value};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;

use crate::device::DeviceIdentity;

/// Failure reported by a guard evaluator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EvalFailure(pub String);

/// Evaluates guard expressions against a device identity
pub trait PredicateEvaluator {
    /// Syntax check performed at parse time, before any identity is known
    fn check(&self, _predicate: &str) -> Result<(), EvalFailure> {
        Ok(())
    }

    fn evaluate(&self, predicate: &str, identity: &DeviceIdentity) -> Result<bool, EvalFailure>;
}

impl<T: PredicateEvaluator + ?Sized> PredicateEvaluator for &T {
    fn check(&self, predicate: &str) -> Result<(), EvalFailure> {
        (**self).check(predicate)
    }

    fn evaluate(&self, predicate: &str, identity: &DeviceIdentity) -> Result<bool, EvalFailure> {
        (**self).evaluate(predicate, identity)
    }
}

const FIRMWARE_VERSION: &str = "firmwareVersion";

static HEX_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x([0-9a-fA-F]+)\b").expect("valid regex"));

/// Any dotted number; only `major.minor` and `major.minor.patch` with
/// components up to 255 are accepted
static VERSION_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)+\b").expect("valid regex"));

/// `firmwareVersion <op> <ordinal>` in either order, after literal rewriting
static FIRMWARE_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bfirmwareVersion\s*(?:==|!=|>=|<=|>|<)\s*\d+\b|\b\d+\s*(?:==|!=|>=|<=|>|<)\s*firmwareVersion\b",
    )
    .expect("valid regex")
});

/// Default evaluator built on `evalexpr`.
///
/// Guards are rewritten before evaluation: `===`/`!==` become `==`/`!=`, hex
/// literals become decimal and version literals (`1.5`, `1.5.2`) become the
/// same ordinal as [`FirmwareVersion::ordinal`](crate::FirmwareVersion::ordinal),
/// so `firmwareVersion >= 1.10` compares component-wise.
///
/// Bound variables: `manufacturerId`, `productType`, `productId` and,
/// when known, `firmwareVersion`. For a device without a reported version
/// every comparison against `firmwareVersion` is false; the rest of the guard
/// is evaluated normally, so `productId == 0x0064 || firmwareVersion >= 2.0`
/// still holds for product `0x0064`.
#[derive(Debug, Clone, Default)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn rewrite(predicate: &str) -> Result<String, EvalFailure> {
        let s = predicate.replace("===", "==").replace("!==", "!=");

        let mut failure = None;
        let s = HEX_LITERAL.replace_all(&s, |caps: &Captures<'_>| {
            match i64::from_str_radix(&caps[1], 16) {
                Ok(n) => n.to_string(),
                Err(e) => {
                    failure.get_or_insert_with(|| EvalFailure(format!("bad hex literal {}: {}", &caps[0], e)));
                    String::new()
                }
            }
        });
        let s = VERSION_LITERAL.replace_all(&s, |caps: &Captures<'_>| {
            let components: Option<Vec<u8>> = caps[0].split('.').map(|c| c.parse().ok()).collect();
            let version = match components.as_deref() {
                Some(&[major, minor]) => Some(crate::FirmwareVersion::new(major, minor)),
                Some(&[major, minor, patch]) => {
                    Some(crate::FirmwareVersion::with_patch(major, minor, patch))
                }
                _ => None,
            };
            match version {
                Some(version) => version.ordinal().to_string(),
                None => {
                    failure.get_or_insert_with(|| {
                        EvalFailure(format!(
                            "version literal {} must be major.minor[.patch] with components up to 255",
                            &caps[0]
                        ))
                    });
                    String::new()
                }
            }
        });

        match failure {
            Some(f) => Err(f),
            None => Ok(s.into_owned()),
        }
    }

    fn context(identity: &DeviceIdentity) -> Result<HashMapContext, EvalFailure> {
        let mut ctx = HashMapContext::new();
        let mut set = |name: &str, value: i64| {
            ctx.set_value(name.to_string(), Value::Int(value))
                .map_err(|e| EvalFailure(e.to_string()))
        };
        set("manufacturerId", identity.manufacturer_id as i64)?;
        set("productType", identity.product_type as i64)?;
        set("productId", identity.product_id as i64)?;
        if let Some(fw) = &identity.firmware_version {
            set(FIRMWARE_VERSION, fw.ordinal())?;
        }
        Ok(ctx)
    }
}

impl PredicateEvaluator for ExprEvaluator {
    fn check(&self, predicate: &str) -> Result<(), EvalFailure> {
        if predicate.trim().is_empty() {
            return Err(EvalFailure("condition is empty".to_string()));
        }
        let rewritten = Self::rewrite(predicate)?;
        evalexpr::build_operator_tree(&rewritten)
            .map(|_| ())
            .map_err(|e| EvalFailure(e.to_string()))
    }

    fn evaluate(&self, predicate: &str, identity: &DeviceIdentity) -> Result<bool, EvalFailure> {
        let mut rewritten = Self::rewrite(predicate)?;
        if identity.firmware_version.is_none() {
            rewritten = FIRMWARE_COMPARISON
                .replace_all(&rewritten, "false")
                .into_owned();
        }
        let tree =
            evalexpr::build_operator_tree(&rewritten).map_err(|e| EvalFailure(e.to_string()))?;
        let ctx = Self::context(identity)?;

        match tree.eval_boolean_with_context(&ctx) {
            Ok(result) => Ok(result),
            Err(EvalexprError::VariableIdentifierNotFound(name))
                if name == FIRMWARE_VERSION && identity.firmware_version.is_none() =>
            {
                Ok(false)
            }
            Err(e) => Err(EvalFailure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FirmwareVersion;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(0x0086, 0x0002, 0x0064).with_firmware(FirmwareVersion::new(1, 10))
    }

    #[test]
    fn test_identity_fields() {
        let eval = ExprEvaluator::new();
        assert!(eval.evaluate("manufacturerId === 0x0086", &identity()).unwrap());
        assert!(eval.evaluate("productType == 2 && productId == 100", &identity()).unwrap());
        assert!(!eval.evaluate("productId !== 0x0064", &identity()).unwrap());
    }

    #[test]
    fn test_firmware_comparison_is_component_wise() {
        let eval = ExprEvaluator::new();
        assert!(eval.evaluate("firmwareVersion > 1.9", &identity()).unwrap());
        assert!(eval.evaluate("firmwareVersion >= 1.10", &identity()).unwrap());
        assert!(!eval.evaluate("firmwareVersion < 1.2", &identity()).unwrap());
        assert!(eval.evaluate("firmwareVersion < 1.10.1", &identity()).unwrap());
    }

    #[test]
    fn test_unknown_firmware_never_matches() {
        let eval = ExprEvaluator::new();
        let id = DeviceIdentity::new(0x0086, 0x0002, 0x0064);
        assert!(!eval.evaluate("firmwareVersion >= 0.0", &id).unwrap());
        assert!(eval.evaluate("productId == 0x0064", &id).unwrap());
    }

    #[test]
    fn test_unknown_firmware_only_falsifies_its_comparison() {
        let eval = ExprEvaluator::new();
        let id = DeviceIdentity::new(0x0086, 0x0002, 0x0064);
        assert!(eval.evaluate("productId == 0x0064 || firmwareVersion >= 2.0", &id).unwrap());
        assert!(eval.evaluate("firmwareVersion >= 2.0 || productId == 0x0064", &id).unwrap());
        assert!(!eval.evaluate("productId == 0x0064 && firmwareVersion < 2.0", &id).unwrap());
        assert!(eval.evaluate("!(firmwareVersion >= 2.0) && productId == 0x0064", &id).unwrap());
        assert!(!eval.evaluate("1.5 <= firmwareVersion", &id).unwrap());
    }

    #[test]
    fn test_overlong_version_literal_is_rejected_at_check() {
        let eval = ExprEvaluator::new();
        assert!(eval.check("firmwareVersion >= 1.2345").is_err());
        assert!(eval.check("firmwareVersion >= 256.0").is_err());
        assert!(eval.check("firmwareVersion >= 1.2.3.4").is_err());
        assert!(eval.check("firmwareVersion >= 1.2.3").is_ok());
        assert!(eval.check("firmwareVersion >= 255.255").is_ok());
    }

    #[test]
    fn test_malformed_condition_is_an_error() {
        let eval = ExprEvaluator::new();
        assert!(eval.check("productId == ").is_err());
        assert!(eval.check("   ").is_err());
        assert!(eval.evaluate("productId == ", &identity()).is_err());
        assert!(eval.evaluate("firmwareVersion >= 1.300", &identity()).is_err());
    }

    #[test]
    fn test_unknown_variable_is_an_error() {
        let eval = ExprEvaluator::new();
        assert!(eval.evaluate("hardwareVersion == 1", &identity()).is_err());
    }

    #[test]
    fn test_non_boolean_result_is_an_error() {
        let eval = ExprEvaluator::new();
        assert!(eval.evaluate("productId + 1", &identity()).is_err());
    }
}
