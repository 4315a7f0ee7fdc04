use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

/// Extracts a bearer token from the incoming request's `authorization`
/// header (stashed in `transaction.data` by the orchestrator under
/// `"incoming_authorization"`) and looks it up via the credential
/// repository.
pub struct ClientApiKeyAuth {
    name: String,
}

impl ClientApiKeyAuth {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("ClientApiKeyAuth")
            .to_string();
        Self::new(name)
    }
}

fn extract_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim)
}

#[async_trait]
impl ControlPolicy for ClientApiKeyAuth {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let header = transaction
            .data_get("incoming_authorization")
            .and_then(|v| v.as_str());

        let Some(header) = header else {
            return Err(ControlPolicyError::ClientAuthenticationNotFound {
                policy_name: self.name.clone(),
                detail: "missing Authorization header".to_string(),
                status_code: 401,
            });
        };

        let Some(token) = extract_bearer(header) else {
            return Err(ControlPolicyError::ClientAuthenticationNotFound {
                policy_name: self.name.clone(),
                detail: "Authorization header is not a bearer token".to_string(),
                status_code: 401,
            });
        };

        let found = container
            .api_key_repository
            .find_api_key(token)
            .await
            .map_err(|e| ControlPolicyError::PolicyLoad {
                policy_name: self.name.clone(),
                detail: e.to_string(),
            })?;

        match found {
            Some(key) if key.is_active => Ok(transaction),
            Some(_) => Err(ControlPolicyError::ClientAuthentication {
                policy_name: self.name.clone(),
                detail: "client API key is not active".to_string(),
                status_code: 401,
            }),
            None => Err(ControlPolicyError::ClientAuthentication {
                policy_name: self.name.clone(),
                detail: "client API key not recognized".to_string(),
                status_code: 401,
            }),
        }
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "client_api_key_auth", "name": self.name })
    }
}
