use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

/// Overwrites `api_endpoint` (OpenAI request) or `backend_url` (raw
/// request) with a configured base URL. Never concatenates the request
/// path onto it — the orchestrator/`SendBackendRequest` is responsible
/// for combining base and path at send time.
pub struct SetBackend {
    name: String,
    base_url: String,
}

impl SetBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &Value) -> Result<Self, ControlPolicyError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("SetBackend")
            .to_string();
        let base_url = config
            .get("base_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ControlPolicyError::PolicyLoad {
                policy_name: name.clone(),
                detail: "missing required config key 'base_url'".to_string(),
            })?
            .to_string();
        Ok(Self::new(name, base_url))
    }
}

#[async_trait]
impl ControlPolicy for SetBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        if let Some(req) = transaction.openai_request_mut() {
            req.api_endpoint = self.base_url.clone();
        } else if let Some(req) = transaction.raw_request_mut() {
            req.backend_url = Some(self.base_url.clone());
        } else {
            return Err(ControlPolicyError::NoRequest {
                policy_name: self.name.clone(),
            });
        }
        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "set_backend", "name": self.name, "base_url": self.base_url })
    }
}
