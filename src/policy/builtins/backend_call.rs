use async_trait::async_trait;
use serde_json::Value;

use crate::policy::builtins::send_backend_request::SendBackendRequest;
use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

/// Configuration overlay applied before delegating to `SendBackendRequest`.
#[derive(Debug, Clone, Default)]
pub struct BackendCallSpec {
    pub model: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_key_env_var: Option<String>,
    pub request_args: Value,
}

/// Variant of `SendBackendRequest` parameterized by a `BackendCallSpec`:
/// overlays `request_args` onto the payload (resolving nested typed
/// structures through JSON merge) before sending.
pub struct BackendCall {
    name: String,
    spec: BackendCallSpec,
    inner: SendBackendRequest,
}

impl BackendCall {
    pub fn new(name: impl Into<String>, spec: BackendCallSpec) -> Self {
        let name = name.into();
        Self {
            inner: SendBackendRequest::new(name.clone()),
            name,
            spec,
        }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("BackendCall")
            .to_string();
        let spec = BackendCallSpec {
            model: config
                .get("model")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            api_endpoint: config
                .get("api_endpoint")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            api_key_env_var: config
                .get("api_key_env_var")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            request_args: config.get("request_args").cloned().unwrap_or(Value::Null),
        };
        Self::new(name, spec)
    }

    fn apply_overlay(&self, transaction: &mut Transaction) -> Result<(), ControlPolicyError> {
        if let Some(req) = transaction.openai_request_mut() {
            if let Some(model) = &self.spec.model {
                req.payload.model = model.clone();
            }
            if let Some(endpoint) = &self.spec.api_endpoint {
                req.api_endpoint = endpoint.clone();
            }
            if let Some(env_var) = &self.spec.api_key_env_var {
                if let Some(key) = crate::settings::Settings::env_api_key(env_var) {
                    req.api_key = key;
                }
            }
            if !self.spec.request_args.is_null() {
                let mut payload = serde_json::to_value(&req.payload).map_err(|e| {
                    ControlPolicyError::PolicyLoad {
                        policy_name: self.name.clone(),
                        detail: format!("failed to encode payload for overlay: {e}"),
                    }
                })?;
                merge_json(&mut payload, &self.spec.request_args);
                req.payload = serde_json::from_value(payload).map_err(|e| {
                    ControlPolicyError::PolicyLoad {
                        policy_name: self.name.clone(),
                        detail: format!("request_args produced an invalid payload: {e}"),
                    }
                })?;
            }
            Ok(())
        } else {
            Err(ControlPolicyError::NoRequest {
                policy_name: self.name.clone(),
            })
        }
    }
}

fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_json(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[async_trait]
impl ControlPolicy for BackendCall {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        self.apply_overlay(&mut transaction)?;
        self.inner.apply(transaction, container).await
    }

    fn serialize(&self) -> Value {
        serde_json::json!({
            "type": "backend_call",
            "name": self.name,
            "model": self.spec.model,
            "api_endpoint": self.spec.api_endpoint,
            "api_key_env_var": self.spec.api_key_env_var,
            "request_args": self.spec.request_args,
        })
    }
}
