//! Path-addressed value resolution over a transaction (C2).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transaction::Transaction;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValueError {
    #[error("path must contain at least two components, got {0:?}")]
    TooShort(String),
    #[error("cannot access '{0}' on the value at that point in the path")]
    NotAccessible(String),
}

/// A value that is either supplied verbatim or resolved by walking a
/// dotted path into a transaction's `request`/`response`/`data` view.
///
/// `path` resolution mirrors the original's "dict access, then
/// attribute access, then index access" order: since transactions are
/// exposed here as `serde_json::Value`, dict/object access and index
/// access collapse into plain JSON indexing and there is no separate
/// attribute step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueResolver {
    Static(Value),
    TransactionPath(String),
}

impl ValueResolver {
    pub fn resolve(&self, transaction: &Transaction) -> Result<Value, ValueError> {
        match self {
            ValueResolver::Static(v) => Ok(v.clone()),
            ValueResolver::TransactionPath(path) => get_transaction_value(transaction, path),
        }
    }
}

/// Resolve a dotted path (e.g. `"request.payload.model"`,
/// `"data.user_id"`) against a transaction's JSON snapshot.
pub fn get_transaction_value(transaction: &Transaction, path: &str) -> Result<Value, ValueError> {
    let mut segments = path.split('.');
    let root_key = segments.next().filter(|_| segments.clone().next().is_some());
    let root_key = match root_key {
        Some(k) => k,
        None => return Err(ValueError::TooShort(path.to_string())),
    };

    let snapshot = transaction.snapshot();
    let mut current = snapshot
        .get(root_key)
        .cloned()
        .ok_or_else(|| ValueError::NotAccessible(root_key.to_string()))?;

    for key in segments {
        current = index_into(&current, key)?;
    }
    Ok(current)
}

fn index_into(value: &Value, key: &str) -> Result<Value, ValueError> {
    match value {
        Value::Object(map) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ValueError::NotAccessible(key.to_string())),
        Value::Array(arr) => {
            let idx: usize = key
                .parse()
                .map_err(|_| ValueError::NotAccessible(key.to_string()))?;
            arr.get(idx)
                .cloned()
                .ok_or_else(|| ValueError::NotAccessible(key.to_string()))
        }
        _ => Err(ValueError::NotAccessible(key.to_string())),
    }
}
