// Declarative conditions and first-match branch selection
//
// Operator semantics:
// - equals: strict JSON equality, no coercion
// - greater_than / less_than: numeric; numeric strings are accepted
// - contains: substring match against the stringified field
// - in: field equals one of the listed values (array, or comma-separated string)
// - between: inclusive numeric bounds from "min-max" (or a [min, max] array)
//
// Conditions inside a branch are AND-ed. Branches are evaluated in
// declaration order and the first branch whose conditions all hold wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    In,
    Between,
}

/// One `field operator value` test against an entity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Field name; dots descend into nested objects
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against an entity. A missing field never satisfies a condition.
    pub fn evaluate(&self, entity: &Value) -> bool {
        match lookup_field(entity, &self.field) {
            Some(actual) => compare(actual, self.operator, &self.value),
            None => false,
        }
    }
}

/// A named outcome guarded by an ordered condition list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub name: String,
    /// Step to continue with when this branch is selected
    #[serde(default, alias = "nextStep")]
    pub target: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            conditions: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// True when every condition holds. A branch without conditions always matches.
    pub fn matches(&self, entity: &Value) -> bool {
        self.conditions.iter().all(|c| c.evaluate(entity))
    }
}

/// First branch (in declaration order) whose conditions all hold, with its index
pub fn select_branch<'a>(branches: &'a [Branch], entity: &Value) -> Option<(usize, &'a Branch)> {
    branches.iter().enumerate().find(|(_, b)| b.matches(entity))
}

/// Resolve a possibly dotted field path inside a JSON object
pub fn lookup_field<'a>(entity: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(direct) = entity.get(path) {
        return Some(direct);
    }
    path.split('.')
        .try_fold(entity, |current, segment| current.get(segment))
}

/// Compare an actual value against an expected one with the given operator
pub fn compare(actual: &Value, operator: Operator, expected: &Value) -> bool {
    match operator {
        Operator::Equals => actual == expected,
        Operator::GreaterThan => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a > e,
            _ => false,
        },
        Operator::LessThan => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a < e,
            _ => false,
        },
        Operator::Contains => stringify(actual).contains(&stringify(expected)),
        Operator::In => match expected {
            Value::Array(options) => options.iter().any(|o| o == actual),
            Value::String(list) => {
                let actual = stringify(actual);
                list.split(',').map(str::trim).any(|o| o == actual)
            }
            _ => false,
        },
        Operator::Between => match (as_number(actual), parse_range(expected)) {
            (Some(a), Some((min, max))) => a >= min && a <= max,
            _ => false,
        },
    }
}

/// Numeric view of a value: numbers as-is, numeric strings parsed
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String view of a value: strings unquoted, everything else as JSON text
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a `"min-max"` string or a `[min, max]` array into inclusive bounds.
///
/// A leading minus sign on either bound is kept ("-5-5" is -5..=5).
pub fn parse_range(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Array(bounds) if bounds.len() == 2 => {
            Some((as_number(&bounds[0])?, as_number(&bounds[1])?))
        }
        Value::String(s) => {
            let s = s.trim();
            // Skip the first char so a negative lower bound is not taken as the separator
            let split_at = s
                .char_indices()
                .skip(1)
                .find(|(_, c)| *c == '-')
                .map(|(i, _)| i)?;
            let min = s[..split_at].trim().parse().ok()?;
            let max = s[split_at + 1..].trim().parse().ok()?;
            Some((min, max))
        }
        _ => None,
    }
}
