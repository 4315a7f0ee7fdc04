use async_trait::async_trait;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::streaming::StreamChunk;
use crate::transaction::Transaction;

/// Applies an ordered list of child policies in sequence, short-circuiting
/// on the first error.
pub struct CompoundPolicy {
    name: String,
    policies: Vec<Box<dyn ControlPolicy>>,
}

impl CompoundPolicy {
    pub fn new(name: impl Into<String>, policies: Vec<Box<dyn ControlPolicy>>) -> Self {
        Self {
            name: name.into(),
            policies,
        }
    }
}

#[async_trait]
impl ControlPolicy for CompoundPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        for policy in &self.policies {
            transaction = policy.apply(transaction, container).await?;
        }
        Ok(transaction)
    }

    /// Pipes the chunk through every child in order, mirroring `apply`'s
    /// sequential dispatch so a stream produced by one child can still be
    /// transformed by a later sibling.
    fn process_chunk(&self, chunk: StreamChunk) -> Result<StreamChunk, ControlPolicyError> {
        self.policies
            .iter()
            .try_fold(chunk, |chunk, policy| policy.process_chunk(chunk))
    }

    fn serialize(&self) -> Value {
        serde_json::json!({
            "type": "compound",
            "name": self.name,
            "policies": self.policies.iter().map(|p| p.serialize()).collect::<Vec<_>>(),
        })
    }
}
