//! Runtime predicates for `Conditional` mode.
//!
//! A [`StepCondition`] is evaluated against the execution's accumulated data
//! (initial input plus completed step payloads, keyed by step id) just before
//! the step would be dispatched. Selectors use dotted paths to descend into
//! nested objects, e.g. `load.record.kind`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Exists,
    NotExists,
    GreaterThan,
    LessThan,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCondition {
    pub selector: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl StepCondition {
    pub fn new(
        selector: impl Into<String>,
        operator: ConditionOperator,
        value: Option<Value>,
    ) -> Self {
        Self {
            selector: selector.into(),
            operator,
            value,
        }
    }

    /// Evaluate against the accumulated execution data.
    pub fn evaluate(&self, data: &Map<String, Value>) -> bool {
        let actual = lookup(data, &self.selector);
        match self.operator {
            ConditionOperator::Exists => actual.is_some(),
            ConditionOperator::NotExists => actual.is_none(),
            ConditionOperator::Equals => match (actual, &self.value) {
                (Some(a), Some(e)) => a == e,
                _ => false,
            },
            ConditionOperator::NotEquals => match (actual, &self.value) {
                (Some(a), Some(e)) => a != e,
                _ => true,
            },
            ConditionOperator::GreaterThan => match (as_f64(actual), self.value.as_ref().and_then(Value::as_f64)) {
                (Some(a), Some(e)) => a > e,
                _ => false,
            },
            ConditionOperator::LessThan => match (as_f64(actual), self.value.as_ref().and_then(Value::as_f64)) {
                (Some(a), Some(e)) => a < e,
                _ => false,
            },
            ConditionOperator::Contains => eval_contains(actual, self.value.as_ref()),
        }
    }
}

fn lookup<'a>(data: &'a Map<String, Value>, selector: &str) -> Option<&'a Value> {
    let mut parts = selector.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn eval_contains(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let (Some(actual), Some(expected)) = (actual, expected) else {
        return false;
    };
    match actual {
        Value::String(s) => expected.as_str().is_some_and(|e| s.contains(e)),
        Value::Array(items) => items.contains(expected),
        Value::Object(map) => expected.as_str().is_some_and(|e| map.contains_key(e)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(
            "load".to_string(),
            json!({"record": {"kind": "invoice", "amount": 120.5}, "tags": ["a", "b"]}),
        );
        data.insert("mode".to_string(), json!("fast"));
        data
    }

    #[test]
    fn test_equals_on_nested_selector() {
        let cond = StepCondition::new(
            "load.record.kind",
            ConditionOperator::Equals,
            Some(json!("invoice")),
        );
        assert!(cond.evaluate(&data()));

        let cond = StepCondition::new(
            "load.record.kind",
            ConditionOperator::Equals,
            Some(json!("receipt")),
        );
        assert!(!cond.evaluate(&data()));
    }

    #[test]
    fn test_exists_and_not_exists() {
        assert!(StepCondition::new("mode", ConditionOperator::Exists, None).evaluate(&data()));
        assert!(!StepCondition::new("missing", ConditionOperator::Exists, None).evaluate(&data()));
        assert!(StepCondition::new("missing", ConditionOperator::NotExists, None).evaluate(&data()));
    }

    #[test]
    fn test_numeric_comparisons() {
        let gt = StepCondition::new(
            "load.record.amount",
            ConditionOperator::GreaterThan,
            Some(json!(100)),
        );
        assert!(gt.evaluate(&data()));

        let lt = StepCondition::new(
            "load.record.amount",
            ConditionOperator::LessThan,
            Some(json!(100)),
        );
        assert!(!lt.evaluate(&data()));
    }

    #[test]
    fn test_contains_on_string_and_array() {
        let s = StepCondition::new("mode", ConditionOperator::Contains, Some(json!("fas")));
        assert!(s.evaluate(&data()));

        let arr = StepCondition::new("load.tags", ConditionOperator::Contains, Some(json!("b")));
        assert!(arr.evaluate(&data()));

        let absent = StepCondition::new("load.tags", ConditionOperator::Contains, Some(json!("z")));
        assert!(!absent.evaluate(&data()));
    }

    #[test]
    fn test_not_equals_on_missing_value_is_true() {
        let cond = StepCondition::new("missing", ConditionOperator::NotEquals, Some(json!(1)));
        assert!(cond.evaluate(&data()));
    }
}
