use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

/// Identity policy — returns the transaction unchanged. Useful as a
/// placeholder branch in a `ConditionalPolicy`.
pub struct Noop {
    name: String,
}

impl Noop {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("Noop")
            .to_string();
        Self::new(name)
    }
}

#[async_trait]
impl ControlPolicy for Noop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "noop", "name": self.name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::settings::Settings;
    use std::sync::Arc;

    fn container() -> DependencyContainer {
        std::env::set_var("BACKEND_URL", "https://upstream.example");
        DependencyContainer {
            settings: Arc::new(Settings::from_env().unwrap()),
            http_client: reqwest::Client::new(),
            api_key_repository: Arc::new(InMemoryRepository::new()),
            policy_repository: Arc::new(InMemoryRepository::new()),
        }
    }

    #[tokio::test]
    async fn returns_transaction_unchanged() {
        let txn = Transaction::from_raw_request(
            crate::transaction::RawRequest {
                method: "POST".into(),
                path: "/v1/chat/completions".into(),
                headers: Default::default(),
                body: None,
                api_key: "sk-test".into(),
                backend_url: None,
            },
            false,
        );
        let id = txn.transaction_id();
        let policy = Noop::new("noop");
        let result = policy.apply(txn, &container()).await.unwrap();
        assert_eq!(result.transaction_id(), id);
    }
}
