//! Maps a policy's serialized `{"type": "...", ...}` config to a
//! constructed `Box<dyn ControlPolicy>` (C6).

use std::sync::Arc;

use serde_json::Value;

use crate::policy::builtins::{
    AddApiKeyHeader, AddApiKeyHeaderFromEnv, BackendCall, ClientApiKeyAuth, CompoundPolicy,
    ConditionalPolicy, IncrementIntegers, LeakedApiKeyDetection, ModelNameReplacement, Noop,
    SendBackendRequest, SetBackend, TransactionContextLogging,
};
use crate::policy::{ControlPolicy, ControlPolicyError};
use crate::repository::PolicyRepository;

/// Loads and recursively instantiates policy trees from their JSON
/// configuration. Nested policy fields (`compound.policies`,
/// `conditional.then`/`conditional.else`) are resolved by calling back
/// into `load_policy`.
pub struct PolicyRegistry {
    policy_repository: Arc<dyn PolicyRepository>,
}

impl PolicyRegistry {
    pub fn new(policy_repository: Arc<dyn PolicyRepository>) -> Self {
        Self { policy_repository }
    }

    /// Instantiate a policy tree from a serialized config value shaped
    /// `{"type": "<tag>", "name": "...", ...}`.
    pub fn load_policy(&self, config: &Value) -> Result<Box<dyn ControlPolicy>, ControlPolicyError> {
        let policy_type = config
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ControlPolicyError::PolicyLoad {
                policy_name: "<unnamed>".to_string(),
                detail: "policy config is missing required field 'type'".to_string(),
            })?;

        match policy_type {
            "noop" => Ok(Box::new(Noop::from_config(config))),
            "add_api_key_header" => Ok(Box::new(AddApiKeyHeader::from_config(config))),
            "add_api_key_header_from_env" => {
                Ok(Box::new(AddApiKeyHeaderFromEnv::from_config(config)?))
            }
            "set_backend" => Ok(Box::new(SetBackend::from_config(config)?)),
            "model_name_replacement" => Ok(Box::new(ModelNameReplacement::from_config(config)?)),
            "leaked_api_key_detection" => Ok(Box::new(LeakedApiKeyDetection::from_config(config)?)),
            "client_api_key_auth" => Ok(Box::new(ClientApiKeyAuth::from_config(config))),
            "send_backend_request" => Ok(Box::new(SendBackendRequest::from_config(config))),
            "backend_call" => Ok(Box::new(BackendCall::from_config(config))),
            "increment_integers" => Ok(Box::new(IncrementIntegers::from_config(config))),
            "transaction_context_logging" => {
                Ok(Box::new(TransactionContextLogging::from_config(config)))
            }
            "compound" => self.load_compound(config),
            "conditional" => self.load_conditional(config),
            other => Err(ControlPolicyError::PolicyLoad {
                policy_name: config
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<unnamed>")
                    .to_string(),
                detail: format!("unknown policy type '{other}'"),
            }),
        }
    }

    fn load_compound(&self, config: &Value) -> Result<Box<dyn ControlPolicy>, ControlPolicyError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("CompoundPolicy")
            .to_string();
        let children = config
            .get("policies")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ControlPolicyError::PolicyLoad {
                policy_name: name.clone(),
                detail: "compound policy is missing required array field 'policies'".to_string(),
            })?;
        let loaded = children
            .iter()
            .map(|c| self.load_policy(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(CompoundPolicy::new(name, loaded)))
    }

    fn load_conditional(&self, config: &Value) -> Result<Box<dyn ControlPolicy>, ControlPolicyError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("ConditionalPolicy")
            .to_string();
        let condition_value = config.get("condition").ok_or_else(|| ControlPolicyError::PolicyLoad {
            policy_name: name.clone(),
            detail: "conditional policy is missing required field 'condition'".to_string(),
        })?;
        let condition = crate::condition::Condition::from_json(condition_value).map_err(|e| {
            ControlPolicyError::PolicyLoad {
                policy_name: name.clone(),
                detail: e.to_string(),
            }
        })?;
        let then_value = config.get("then").ok_or_else(|| ControlPolicyError::PolicyLoad {
            policy_name: name.clone(),
            detail: "conditional policy is missing required field 'then'".to_string(),
        })?;
        let then = self.load_policy(then_value)?;
        let otherwise = match config.get("else") {
            Some(Value::Null) | None => None,
            Some(v) => Some(self.load_policy(v)?),
        };
        Ok(Box::new(ConditionalPolicy::new(name, condition, then, otherwise)))
    }

    /// Loads a policy by looking up its stored config in the policy
    /// repository by name.
    pub async fn load_policy_by_name(
        &self,
        name: &str,
    ) -> Result<Box<dyn ControlPolicy>, ControlPolicyError> {
        let stored = self
            .policy_repository
            .find_policy(name)
            .await
            .map_err(|e| ControlPolicyError::PolicyLoad {
                policy_name: name.to_string(),
                detail: e.to_string(),
            })?
            .ok_or_else(|| ControlPolicyError::PolicyLoad {
                policy_name: name.to_string(),
                detail: "no active policy with that name".to_string(),
            })?;

        let mut config = stored.config.clone();
        if let Value::Object(map) = &mut config {
            map.entry("type").or_insert_with(|| Value::String(stored.policy_type.clone()));
            map.entry("name").or_insert_with(|| Value::String(stored.name.clone()));
        }
        self.load_policy(&config)
    }
}
