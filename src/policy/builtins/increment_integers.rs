use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::policy::{ControlPolicyError, DependencyContainer, StreamingControlPolicy};
use crate::streaming::StreamChunk;
use crate::transaction::Transaction;

fn integer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-?\d+").expect("literal regex always compiles"))
}

fn increment_integers_in_string(text: &str) -> String {
    integer_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let value: i64 = caps[0].parse().unwrap_or(0);
            (value + 1).to_string()
        })
        .into_owned()
}

/// Demonstration policy: adds 1 to every integer literal in assistant
/// message content. In streaming mode it transforms each delta's
/// `content` field as chunks arrive instead of waiting for the full body.
pub struct IncrementIntegers {
    name: String,
}

impl IncrementIntegers {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("IncrementIntegers")
            .to_string();
        Self::new(name)
    }
}

#[async_trait]
impl StreamingControlPolicy for IncrementIntegers {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply_non_streaming(
        &self,
        mut transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        if transaction.request_type() != crate::transaction::RequestType::OpenAiChat {
            return Ok(transaction);
        }
        if let Some(resp) = transaction.openai_response() {
            if let Some(payload) = &resp.payload {
                let mut payload = payload.clone();
                for choice in &mut payload.choices {
                    if let Some(content) = &choice.message.content {
                        choice.message.content = Some(increment_integers_in_string(content));
                    }
                }
                let mut updated = resp.clone();
                updated.payload = Some(payload);
                transaction.set_openai_response(updated);
            }
        }
        Ok(transaction)
    }

    async fn apply_streaming(
        &self,
        transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        // Per-chunk transformation is applied by the default
        // `StreamingControlPolicy::process_chunk` wrapper around the
        // response iterator; no transaction mutation is needed up front.
        Ok(transaction)
    }

    fn process_chunk(&self, chunk: StreamChunk) -> Result<StreamChunk, ControlPolicyError> {
        match chunk {
            StreamChunk::OpenAi(mut c) => {
                for choice in &mut c.choices {
                    if let Some(content) = &choice.delta.content {
                        choice.delta.content = Some(increment_integers_in_string(content));
                    }
                }
                Ok(StreamChunk::OpenAi(c))
            }
            other => Ok(other),
        }
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "increment_integers", "name": self.name })
    }
}
