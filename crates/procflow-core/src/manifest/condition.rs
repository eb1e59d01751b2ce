//! Phase and breakpoint conditions.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Result;
use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    Truthy,
}

/// `{path, op, value}` evaluated against a template scope.
///
/// A missing path reads as null. `value` may itself be a placeholder such as
/// `"{{inputs.threshold}}"`; a placeholder that does not resolve is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(path: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }

    pub fn evaluate(&self, scope: &Value) -> Result<bool> {
        let actual = template::lookup(scope, &self.path);
        let expected = template::render(&self.value, scope)?;
        let actual_or_null = actual.unwrap_or(&Value::Null);
        Ok(match self.op {
            ConditionOp::Exists => actual.is_some_and(|v| !v.is_null()),
            ConditionOp::Truthy => is_truthy(actual_or_null),
            ConditionOp::Eq => loosely_equal(actual_or_null, &expected),
            ConditionOp::Ne => !loosely_equal(actual_or_null, &expected),
            ConditionOp::Gt => compare(actual_or_null, &expected) == Some(Ordering::Greater),
            ConditionOp::Gte => matches!(
                compare(actual_or_null, &expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOp::Lt => compare(actual_or_null, &expected) == Some(Ordering::Less),
            ConditionOp::Lte => matches!(
                compare(actual_or_null, &expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numbers compare by value, so `3` equals `3.0`.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "inputs": {"threshold": 3, "env": "prod"},
            "results": {"scan": {"count": 5, "hosts": [], "note": ""}}
        })
    }

    #[test]
    fn test_numeric_comparisons_with_placeholder_value() {
        let gt = Condition::new("results.scan.count", ConditionOp::Gt, json!("{{inputs.threshold}}"));
        assert!(gt.evaluate(&scope()).unwrap());
        let lte = Condition::new("results.scan.count", ConditionOp::Lte, json!(5.0));
        assert!(lte.evaluate(&scope()).unwrap());
        let lt = Condition::new("results.scan.count", ConditionOp::Lt, json!(5));
        assert!(!lt.evaluate(&scope()).unwrap());
    }

    #[test]
    fn test_missing_path_reads_as_null() {
        let s = scope();
        assert!(!Condition::new("results.nope", ConditionOp::Exists, Value::Null).evaluate(&s).unwrap());
        assert!(Condition::new("results.nope", ConditionOp::Eq, Value::Null).evaluate(&s).unwrap());
        assert!(!Condition::new("results.nope", ConditionOp::Gt, json!(0)).evaluate(&s).unwrap());
        assert!(!Condition::new("results.nope", ConditionOp::Truthy, Value::Null).evaluate(&s).unwrap());
    }

    #[test]
    fn test_truthiness_and_equality() {
        let s = scope();
        assert!(!Condition::new("results.scan.hosts", ConditionOp::Truthy, Value::Null).evaluate(&s).unwrap());
        assert!(!Condition::new("results.scan.note", ConditionOp::Truthy, Value::Null).evaluate(&s).unwrap());
        assert!(Condition::new("inputs.env", ConditionOp::Eq, json!("prod")).evaluate(&s).unwrap());
        assert!(Condition::new("inputs.env", ConditionOp::Ne, json!("dev")).evaluate(&s).unwrap());
        assert!(Condition::new("results.scan.count", ConditionOp::Exists, Value::Null).evaluate(&s).unwrap());
    }

    #[test]
    fn test_unresolved_value_placeholder_is_an_error() {
        let typo = Condition::new("results.scan.count", ConditionOp::Gt, json!("{{inputs.treshold}}"));
        assert!(matches!(
            typo.evaluate(&scope()),
            Err(crate::domain::ProcflowError::Template(msg)) if msg.contains("inputs.treshold")
        ));
    }

    #[test]
    fn test_wire_format() {
        let c: Condition =
            serde_json::from_value(json!({"path": "a", "op": "gte", "value": 1})).unwrap();
        assert_eq!(c.op, ConditionOp::Gte);
    }
}
