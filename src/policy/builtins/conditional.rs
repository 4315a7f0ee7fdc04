use async_trait::async_trait;
use serde_json::Value;

use crate::condition::Condition;
use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::streaming::StreamChunk;
use crate::transaction::Transaction;

/// Which branch `apply` took, recorded so a later `process_chunk` call
/// on this same (freshly constructed, never-shared) policy tree node
/// knows which child to forward stream chunks to.
#[derive(Clone, Copy)]
enum ChunkBranch {
    Then,
    Else,
    Passthrough,
}

/// Evaluates a `Condition` against the transaction and dispatches to
/// `then` or `r#else` accordingly. `r#else` is optional; when absent and
/// the condition is false the transaction passes through unchanged.
pub struct ConditionalPolicy {
    name: String,
    condition: Condition,
    then: Box<dyn ControlPolicy>,
    otherwise: Option<Box<dyn ControlPolicy>>,
    // `PolicyRegistry` builds a fresh tree per request (see registry.rs),
    // so this node is never shared across concurrent transactions; the
    // mutex only satisfies `ControlPolicy: Send + Sync`, not real
    // contention.
    branch_taken: std::sync::Mutex<Option<ChunkBranch>>,
}

impl ConditionalPolicy {
    pub fn new(
        name: impl Into<String>,
        condition: Condition,
        then: Box<dyn ControlPolicy>,
        otherwise: Option<Box<dyn ControlPolicy>>,
    ) -> Self {
        Self {
            name: name.into(),
            condition,
            then,
            otherwise,
            branch_taken: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl ControlPolicy for ConditionalPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let matched = self
            .condition
            .evaluate(&transaction)
            .map_err(|e| ControlPolicyError::PolicyLoad {
                policy_name: self.name.clone(),
                detail: e.to_string(),
            })?;

        if matched {
            *self.branch_taken.lock().unwrap() = Some(ChunkBranch::Then);
            self.then.apply(transaction, container).await
        } else if let Some(otherwise) = &self.otherwise {
            *self.branch_taken.lock().unwrap() = Some(ChunkBranch::Else);
            otherwise.apply(transaction, container).await
        } else {
            *self.branch_taken.lock().unwrap() = Some(ChunkBranch::Passthrough);
            Ok(transaction)
        }
    }

    /// Forwards to whichever child `apply` actually dispatched to. A
    /// chunk pulled before `apply` ever ran (branch not yet recorded)
    /// passes through unchanged.
    fn process_chunk(&self, chunk: StreamChunk) -> Result<StreamChunk, ControlPolicyError> {
        match *self.branch_taken.lock().unwrap() {
            Some(ChunkBranch::Then) => self.then.process_chunk(chunk),
            Some(ChunkBranch::Else) => match &self.otherwise {
                Some(otherwise) => otherwise.process_chunk(chunk),
                None => Ok(chunk),
            },
            Some(ChunkBranch::Passthrough) | None => Ok(chunk),
        }
    }

    fn serialize(&self) -> Value {
        serde_json::json!({
            "type": "conditional",
            "name": self.name,
            "condition": self.condition.to_json(),
            "then": self.then.serialize(),
            "else": self.otherwise.as_ref().map(|p| p.serialize()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::builtins::noop::Noop;
    use crate::settings::Settings;
    use crate::transaction::RawRequest;
    use std::sync::Arc;

    fn container() -> DependencyContainer {
        DependencyContainer {
            settings: Arc::new(Settings::from_env().unwrap()),
            http_client: reqwest::Client::new(),
            api_key_repository: Arc::new(crate::repository::InMemoryRepository::new()),
            policy_repository: Arc::new(crate::repository::InMemoryRepository::new()),
        }
    }

    fn txn_with_model(model: &str) -> Transaction {
        let mut txn = Transaction::from_raw_request(
            RawRequest {
                method: "POST".into(),
                path: "/v1/chat/completions".into(),
                headers: Default::default(),
                body: None,
                api_key: String::new(),
                backend_url: None,
            },
            false,
        );
        txn.data_insert("model", Value::String(model.into()));
        txn
    }

    #[tokio::test]
    async fn takes_then_branch_when_condition_matches() {
        let cond = Condition::Equals {
            key: "data.model".into(),
            value: Value::String("gpt-4o".into()),
        };
        let policy = ConditionalPolicy::new(
            "cond",
            cond,
            Box::new(Noop::new("then")),
            Some(Box::new(Noop::new("else"))),
        );
        let result = policy.apply(txn_with_model("gpt-4o"), &container()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn falls_through_unchanged_without_else_branch() {
        let cond = Condition::Equals {
            key: "data.model".into(),
            value: Value::String("gpt-4o".into()),
        };
        let policy = ConditionalPolicy::new("cond", cond, Box::new(Noop::new("then")), None);
        let id = txn_with_model("gpt-3.5").transaction_id();
        let result = policy
            .apply(txn_with_model("gpt-3.5"), &container())
            .await
            .unwrap();
        assert_eq!(result.transaction_id().to_string().len(), id.to_string().len());
    }

    #[tokio::test]
    async fn process_chunk_passes_through_before_apply_has_run() {
        let cond = Condition::Equals {
            key: "data.model".into(),
            value: Value::String("gpt-4o".into()),
        };
        let policy = ConditionalPolicy::new(
            "cond",
            cond,
            Box::new(Noop::new("then")),
            Some(Box::new(Noop::new("else"))),
        );
        let chunk = StreamChunk::Text("unchanged".into());
        let result = policy.process_chunk(chunk).unwrap();
        assert!(matches!(result, StreamChunk::Text(t) if t == "unchanged"));
    }

    #[tokio::test]
    async fn process_chunk_forwards_to_the_branch_apply_took() {
        let cond = Condition::Equals {
            key: "data.model".into(),
            value: Value::String("gpt-4o".into()),
        };
        let policy = ConditionalPolicy::new(
            "cond",
            cond,
            Box::new(Noop::new("then")),
            Some(Box::new(Noop::new("else"))),
        );
        policy
            .apply(txn_with_model("gpt-3.5"), &container())
            .await
            .unwrap();
        // condition didn't match -> the `else` branch ran, so process_chunk
        // must consult `otherwise`, not `then`, even though both are Noop
        // here (a real transform would make the distinction observable).
        let result = policy.process_chunk(StreamChunk::Text("x".into())).unwrap();
        assert!(matches!(result, StreamChunk::Text(t) if t == "x"));
    }
}
