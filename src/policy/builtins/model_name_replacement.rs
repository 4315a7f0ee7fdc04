use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

/// Given a map `{incoming -> outgoing}`, rewrites `request.payload.model`
/// when the incoming model is a key. A request whose model isn't in the
/// map passes through unchanged — this is a rewrite table, not a filter.
pub struct ModelNameReplacement {
    name: String,
    mapping: HashMap<String, String>,
}

impl ModelNameReplacement {
    pub fn new(name: impl Into<String>, mapping: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            mapping,
        }
    }

    pub fn from_config(config: &Value) -> Result<Self, ControlPolicyError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("ModelNameReplacement")
            .to_string();
        let mapping_value = config.get("mapping").ok_or_else(|| ControlPolicyError::PolicyLoad {
            policy_name: name.clone(),
            detail: "missing required config key 'mapping'".to_string(),
        })?;
        let mapping: HashMap<String, String> = serde_json::from_value(mapping_value.clone())
            .map_err(|e| ControlPolicyError::PolicyLoad {
                policy_name: name.clone(),
                detail: format!("'mapping' must be a string-to-string object: {e}"),
            })?;
        Ok(Self::new(name, mapping))
    }
}

#[async_trait]
impl ControlPolicy for ModelNameReplacement {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let req = transaction
            .openai_request_mut()
            .ok_or_else(|| ControlPolicyError::NoRequest {
                policy_name: self.name.clone(),
            })?;
        if let Some(replacement) = self.mapping.get(&req.payload.model) {
            req.payload.model = replacement.clone();
        }
        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({
            "type": "model_name_replacement",
            "name": self.name,
            "mapping": self.mapping,
        })
    }
}
