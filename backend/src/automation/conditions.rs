// Workflow Conditions - targeting predicates evaluated against lead records

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    Exists,
}

/// How a condition joins the running result of the conditions before it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

/// A single targeting condition. `field` supports dot notation for nested
/// payload fields; `logical_operator` is ignored on the first condition of
/// a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
            logical_operator: None,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Value::String(value.to_string()))
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn exists(field: &str) -> Self {
        Self::new(field, ConditionOperator::Exists, Value::Null)
    }

    pub fn and(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::And);
        self
    }

    pub fn or(mut self) -> Self {
        self.logical_operator = Some(LogicalOperator::Or);
        self
    }
}

/// Evaluate an ordered condition list against a target record.
///
/// An empty list always matches. Conditions combine left-to-right into a
/// running result: each condition's truth value joins the accumulator with
/// the AND/OR attached to that condition. There is no operator precedence —
/// `A OR B AND C` evaluates as `(A OR B) AND C`, not `A OR (B AND C)`.
///
/// Never errors: a comparison that cannot be evaluated (missing field,
/// non-numeric operand for a numeric operator) is false.
pub fn matches(target: &Value, conditions: &[Condition]) -> bool {
    let mut iter = conditions.iter();
    let Some(first) = iter.next() else {
        return true;
    };

    let mut acc = evaluate(first, target);
    for condition in iter {
        let current = evaluate(condition, target);
        acc = match condition.logical_operator.unwrap_or(LogicalOperator::And) {
            LogicalOperator::And => acc && current,
            LogicalOperator::Or => acc || current,
        };
    }
    acc
}

fn evaluate(condition: &Condition, target: &Value) -> bool {
    let field_value = lookup_path(target, &condition.field);

    match condition.operator {
        ConditionOperator::Equals => field_value.map(|v| v == &condition.value).unwrap_or(false),
        ConditionOperator::NotEquals => field_value.map(|v| v != &condition.value).unwrap_or(true),
        ConditionOperator::Contains => match field_value {
            Some(Value::String(s)) => condition
                .value
                .as_str()
                .map(|needle| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Some(Value::Array(items)) => items.contains(&condition.value),
            _ => false,
        },
        ConditionOperator::GreaterThan => compare_numeric(field_value, &condition.value, |v, c| v > c),
        ConditionOperator::LessThan => compare_numeric(field_value, &condition.value, |v, c| v < c),
        ConditionOperator::In => field_value
            .map(|v| value_in_list(v, &condition.value))
            .unwrap_or(false),
        ConditionOperator::NotIn => field_value
            .map(|v| !value_in_list(v, &condition.value))
            .unwrap_or(true),
        ConditionOperator::Exists => matches!(field_value, Some(v) if !v.is_null()),
    }
}

fn compare_numeric(field_value: Option<&Value>, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (field_value.and_then(Value::as_f64), expected.as_f64()) {
        (Some(v), Some(c)) => cmp(v, c),
        _ => false,
    }
}

// A non-array condition value is treated as a single-element list.
fn value_in_list(value: &Value, list: &Value) -> bool {
    match list {
        Value::Array(items) => items.contains(value),
        single => single == value,
    }
}

fn lookup_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(json, |current, part| current.get(part))
}

/// Resolve `${key}` placeholders in condition values from a trigger payload.
///
/// A value that is exactly `"${key}"` is replaced with the payload value at
/// that (dot-notation) path, preserving its JSON type; an unresolvable key
/// becomes null. Array values are resolved element-wise.
pub fn resolve_values(conditions: &[Condition], payload: &Value) -> Vec<Condition> {
    conditions
        .iter()
        .map(|c| {
            let mut resolved = c.clone();
            resolved.value = resolve_value(&c.value, payload);
            resolved
        })
        .collect()
}

fn resolve_value(value: &Value, payload: &Value) -> Value {
    match value {
        Value::String(s) => match s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(key) => lookup_path(payload, key).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, payload)).collect()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_condition_list_always_matches() {
        assert!(matches(&json!({}), &[]));
        assert!(matches(&json!({"status": "NEW"}), &[]));
    }

    #[test]
    fn single_equals_matches_field_value() {
        let target = json!({"status": "INTERESTED"});
        let cond = [Condition::equals("status", json!("INTERESTED"))];
        assert!(matches(&target, &cond));

        let cond = [Condition::equals("status", json!("NEW"))];
        assert!(!matches(&target, &cond));
    }

    #[test]
    fn and_chain_over_loan_fields() {
        let conditions = [
            Condition::equals("loan_type", json!("BUSINESS")),
            Condition::greater_than("loan_amount", 500_000.0).and(),
        ];

        assert!(matches(
            &json!({"loan_type": "BUSINESS", "loan_amount": 600000}),
            &conditions
        ));
        assert!(!matches(
            &json!({"loan_type": "BUSINESS", "loan_amount": 400000}),
            &conditions
        ));
    }

    #[test]
    fn chaining_is_left_associative() {
        // A OR B AND C == (A OR B) AND C
        let conditions = [
            Condition::equals("a", json!(1)),
            Condition::equals("b", json!(1)).or(),
            Condition::equals("c", json!(1)).and(),
        ];

        // A true, B false, C false: (true OR false) AND false == false
        assert!(!matches(&json!({"a": 1, "b": 0, "c": 0}), &conditions));
        // A false, B true, C true: (false OR true) AND true == true
        assert!(matches(&json!({"a": 0, "b": 1, "c": 1}), &conditions));
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        let target = json!({"name": "Ramesh Kumar", "tags": ["vip", "follow-up"]});
        assert!(matches(&target, &[Condition::contains("name", "kumar")]));
        assert!(!matches(&target, &[Condition::contains("name", "sharma")]));
        assert!(matches(&target, &[Condition::contains("tags", "vip")]));
    }

    #[test]
    fn numeric_comparison_on_non_numeric_is_false() {
        let target = json!({"loan_amount": "not a number"});
        assert!(!matches(&target, &[Condition::greater_than("loan_amount", 10.0)]));
        assert!(!matches(&target, &[Condition::less_than("loan_amount", 10.0)]));
    }

    #[test]
    fn in_and_not_in_membership() {
        let target = json!({"status": "QUALIFIED"});
        let cond = [Condition::in_list("status", vec![json!("NEW"), json!("QUALIFIED")])];
        assert!(matches(&target, &cond));

        let cond = [Condition::new(
            "status",
            ConditionOperator::NotIn,
            json!(["NEW", "QUALIFIED"]),
        )];
        assert!(!matches(&target, &cond));

        // Missing field is never in a list.
        let cond = [Condition::in_list("missing", vec![json!("x")])];
        assert!(!matches(&target, &cond));
    }

    #[test]
    fn exists_requires_present_non_null() {
        let target = json!({"phone": "+911234567890", "email": null});
        assert!(matches(&target, &[Condition::exists("phone")]));
        assert!(!matches(&target, &[Condition::exists("email")]));
        assert!(!matches(&target, &[Condition::exists("address")]));
    }

    #[test]
    fn dot_path_lookup() {
        let target = json!({"contact": {"city": "Mumbai"}});
        assert!(matches(&target, &[Condition::equals("contact.city", json!("Mumbai"))]));
    }

    #[test]
    fn payload_placeholders_resolve_with_type() {
        let payload = json!({"lead_id": "abc-123", "score": 42});
        let conditions = [
            Condition::equals("id", json!("${lead_id}")),
            Condition::greater_than("score", 0.0).and(),
        ];

        let resolved = resolve_values(&conditions, &payload);
        assert_eq!(resolved[0].value, json!("abc-123"));

        let conditions = [Condition::equals("score", json!("${score}"))];
        let resolved = resolve_values(&conditions, &payload);
        assert_eq!(resolved[0].value, json!(42));

        let conditions = [Condition::equals("x", json!("${missing}"))];
        let resolved = resolve_values(&conditions, &payload);
        assert_eq!(resolved[0].value, Value::Null);
    }
}
