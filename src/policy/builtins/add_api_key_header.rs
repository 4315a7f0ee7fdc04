use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::settings::Settings;
use crate::transaction::Transaction;

/// Sets the configured upstream API key on `transaction`'s request,
/// whichever variant (OpenAI or raw) is present.
pub struct AddApiKeyHeader {
    name: String,
}

impl AddApiKeyHeader {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("AddApiKeyHeader")
            .to_string();
        Self::new(name)
    }
}

#[async_trait]
impl ControlPolicy for AddApiKeyHeader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let api_key = container
            .settings
            .openai_api_key()
            .ok_or_else(|| ControlPolicyError::ApiKeyNotFound {
                policy_name: self.name.clone(),
            })?
            .to_string();

        if let Some(req) = transaction.openai_request_mut() {
            req.api_key = api_key;
        } else if let Some(req) = transaction.raw_request_mut() {
            req.api_key = api_key;
        } else {
            return Err(ControlPolicyError::NoRequest {
                policy_name: self.name.clone(),
            });
        }
        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "add_api_key_header", "name": self.name })
    }
}

/// As `AddApiKeyHeader`, but the key is read from a named environment
/// variable rather than `Settings::openai_api_key`.
pub struct AddApiKeyHeaderFromEnv {
    name: String,
    env_var: String,
}

impl AddApiKeyHeaderFromEnv {
    pub fn new(name: impl Into<String>, env_var: impl Into<String>) -> Result<Self, ControlPolicyError> {
        let env_var = env_var.into();
        if env_var.trim().is_empty() {
            return Err(ControlPolicyError::PolicyLoad {
                policy_name: "AddApiKeyHeaderFromEnv".to_string(),
                detail: "env_var must be a non-empty name".to_string(),
            });
        }
        Ok(Self {
            name: name.into(),
            env_var,
        })
    }

    pub fn from_config(config: &Value) -> Result<Self, ControlPolicyError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("AddApiKeyHeaderFromEnv")
            .to_string();
        let env_var = config
            .get("env_var")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ControlPolicyError::PolicyLoad {
                policy_name: name.clone(),
                detail: "missing required config key 'env_var'".to_string(),
            })?
            .to_string();
        Self::new(name, env_var)
    }
}

#[async_trait]
impl ControlPolicy for AddApiKeyHeaderFromEnv {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let api_key = Settings::env_api_key(&self.env_var).ok_or_else(|| {
            ControlPolicyError::ApiKeyNotFound {
                policy_name: self.name.clone(),
            }
        })?;

        if let Some(req) = transaction.openai_request_mut() {
            req.api_key = api_key;
        } else if let Some(req) = transaction.raw_request_mut() {
            req.api_key = api_key;
        } else {
            return Err(ControlPolicyError::NoRequest {
                policy_name: self.name.clone(),
            });
        }
        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({
            "type": "add_api_key_header_from_env",
            "name": self.name,
            "env_var": self.env_var,
        })
    }
}
