//! Serializable boolean predicates over a transaction (C3).

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transaction::Transaction;
use crate::value::{get_transaction_value, ValueError};

#[derive(Error, Debug)]
pub enum ConditionError {
    #[error("unknown condition type '{0}'")]
    UnknownType(String),
    #[error("condition config is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("regex pattern '{0}' does not compile: {1}")]
    InvalidRegex(String, regex::Error),
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// One comparator/logical node in a condition tree. The comparator set
/// is fixed and pure — no side effects beyond a cached `Regex` compile
/// inside `RegexMatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Equals { key: String, value: Value },
    NotEquals { key: String, value: Value },
    LessThan { key: String, value: Value },
    LessThanOrEqual { key: String, value: Value },
    GreaterThan { key: String, value: Value },
    GreaterThanOrEqual { key: String, value: Value },
    Contains { key: String, value: Value },
    RegexMatch { key: String, value: String },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { value: Box<Condition> },
}

impl Condition {
    /// Evaluate against a transaction. Path-resolution failures (missing
    /// path, unreachable key) resolve the side to JSON `null` rather
    /// than propagating, matching the "missing-path yields null" rule.
    pub fn evaluate(&self, transaction: &Transaction) -> Result<bool, ConditionError> {
        match self {
            Condition::Equals { key, value } => {
                Ok(values_equal(&resolve_or_null(transaction, key), value))
            }
            Condition::NotEquals { key, value } => {
                Ok(!values_equal(&resolve_or_null(transaction, key), value))
            }
            Condition::LessThan { key, value } => {
                numeric_compare(transaction, key, value, |a, b| a < b)
            }
            Condition::LessThanOrEqual { key, value } => {
                numeric_compare(transaction, key, value, |a, b| a <= b)
            }
            Condition::GreaterThan { key, value } => {
                numeric_compare(transaction, key, value, |a, b| a > b)
            }
            Condition::GreaterThanOrEqual { key, value } => {
                numeric_compare(transaction, key, value, |a, b| a >= b)
            }
            Condition::Contains { key, value } => {
                let left = resolve_or_null(transaction, key);
                Ok(contains(&left, value))
            }
            Condition::RegexMatch { key, value } => {
                let left = resolve_or_null(transaction, key);
                let Some(text) = left.as_str() else {
                    return Ok(false);
                };
                let re = compiled_regex(value).map_err(|e| {
                    ConditionError::InvalidRegex(value.clone(), e)
                })?;
                Ok(re.is_match(text))
            }
            Condition::All { conditions } => {
                for c in conditions {
                    if !c.evaluate(transaction)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { conditions } => {
                for c in conditions {
                    if c.evaluate(transaction)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { value } => Ok(!value.evaluate(transaction)?),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("Condition always serializes")
    }

    pub fn from_json(value: &Value) -> Result<Self, ConditionError> {
        serde_json::from_value(value.clone()).map_err(|_| {
            let type_name = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>");
            ConditionError::UnknownType(type_name.to_string())
        })
    }
}

fn resolve_or_null(transaction: &Transaction, path: &str) -> Value {
    get_transaction_value(transaction, path).unwrap_or(Value::Null)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() && b.is_null() {
        return true;
    }
    a == b
}

fn numeric_compare(
    transaction: &Transaction,
    key: &str,
    value: &Value,
    op: impl Fn(f64, f64) -> bool,
) -> Result<bool, ConditionError> {
    let left = resolve_or_null(transaction, key);
    let (Some(l), Some(r)) = (left.as_f64(), value.as_f64()) else {
        return Ok(false);
    };
    Ok(op(l, r))
}

fn contains(left: &Value, needle: &Value) -> bool {
    match left {
        Value::Array(arr) => arr.contains(needle),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Object(map) => needle.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
        _ => false,
    }
}

/// Cache a single compiled pattern; conditions are typically evaluated
/// many times per process lifetime with the same literal pattern.
fn compiled_regex(pattern: &str) -> Result<Regex, regex::Error> {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<String, Regex>>> =
        OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(std::collections::HashMap::new()));
    let mut guard = cache.lock().expect("regex cache poisoned");
    if let Some(re) = guard.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    guard.insert(pattern.to_string(), re.clone());
    Ok(re)
}
