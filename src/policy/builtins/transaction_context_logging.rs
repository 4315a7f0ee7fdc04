use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

const SENSITIVE_KEY_SUBSTRINGS: &[&str] = &["api_key", "authorization", "password", "secret", "token"];

/// Redaction rule: 4 characters of prefix preserved, everything else
/// collapsed to `***`; strings shorter than 1 character are left as-is
/// (there is nothing to redact).
fn redact_value(value: &str) -> String {
    if value.is_empty() {
        return value.to_string();
    }
    let prefix_len = value.len().min(4);
    format!("{}***", &value[..prefix_len])
}

fn redact_recursive(value: &mut Value, parent_key: Option<&str>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                let lower = key.to_ascii_lowercase();
                if SENSITIVE_KEY_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
                    if let Value::String(s) = v {
                        *s = redact_value(s);
                        continue;
                    }
                }
                redact_recursive(v, Some(key));
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_recursive(item, parent_key);
            }
        }
        Value::String(s) => {
            if looks_like_bearer_token(s) || looks_like_openai_key(s) {
                *s = redact_value(s);
            }
        }
        _ => {}
    }
}

fn looks_like_bearer_token(s: &str) -> bool {
    s.starts_with("Bearer ")
}

fn looks_like_openai_key(s: &str) -> bool {
    s.starts_with("sk-") && s.len() > 10
}

/// Read-only policy: serializes the full transaction snapshot with deep
/// redaction of sensitive values and logs it at a configurable level.
/// Always returns the transaction unchanged.
pub struct TransactionContextLogging {
    name: String,
    level: tracing::Level,
}

impl TransactionContextLogging {
    pub fn new(name: impl Into<String>, level: tracing::Level) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("TransactionContextLogging")
            .to_string();
        let level = match config.get("level").and_then(|v| v.as_str()) {
            Some("debug") => tracing::Level::DEBUG,
            Some("warn") => tracing::Level::WARN,
            Some("error") => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        };
        Self::new(name, level)
    }
}

#[async_trait]
impl ControlPolicy for TransactionContextLogging {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let mut snapshot = transaction.snapshot();
        redact_recursive(&mut snapshot, None);

        match self.level {
            tracing::Level::DEBUG => tracing::debug!(policy = %self.name, transaction = %snapshot, "transaction snapshot"),
            tracing::Level::WARN => tracing::warn!(policy = %self.name, transaction = %snapshot, "transaction snapshot"),
            tracing::Level::ERROR => tracing::error!(policy = %self.name, transaction = %snapshot, "transaction snapshot"),
            _ => tracing::info!(policy = %self.name, transaction = %snapshot, "transaction snapshot"),
        }

        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "transaction_context_logging", "name": self.name, "level": self.level.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key_field_preserving_prefix() {
        let mut value = serde_json::json!({"api_key": "sk-abcdefghij"});
        redact_recursive(&mut value, None);
        assert_eq!(value["api_key"], "sk-a***");
    }

    #[test]
    fn redacts_bearer_tokens_found_anywhere() {
        let mut value = serde_json::json!({"headers": {"authorization": "Bearer sk-xyz123456"}});
        redact_recursive(&mut value, None);
        assert_eq!(value["headers"]["authorization"], "Bear***");
    }

    #[test]
    fn short_string_is_unchanged() {
        assert_eq!(redact_value(""), "");
        assert_eq!(redact_value("a"), "a***");
    }
}
