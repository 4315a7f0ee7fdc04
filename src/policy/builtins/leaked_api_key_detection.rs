use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::transaction::Transaction;

fn default_patterns() -> Vec<String> {
    vec![
        r"sk-[A-Za-z0-9]{48}".to_string(),
        r"xoxb-[A-Za-z0-9-]+".to_string(),
        r"ghp_[A-Za-z0-9]{36}".to_string(),
    ]
}

/// Scans every message `content` field across the request against a
/// configurable list of regexes, raising `LeakedApiKeyError` on the
/// first match. The default set covers OpenAI, Slack bot, and GitHub
/// personal-access-token shapes.
pub struct LeakedApiKeyDetection {
    name: String,
    patterns: Vec<Regex>,
}

impl LeakedApiKeyDetection {
    pub fn new(name: impl Into<String>, patterns: Vec<String>) -> Result<Self, ControlPolicyError> {
        let name = name.into();
        let compiled = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ControlPolicyError::PolicyLoad {
                    policy_name: name.clone(),
                    detail: format!("invalid regex '{p}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name,
            patterns: compiled,
        })
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, default_patterns()).expect("default patterns always compile")
    }

    pub fn from_config(config: &Value) -> Result<Self, ControlPolicyError> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("LeakedApiKeyDetection")
            .to_string();
        let patterns = match config.get("patterns") {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| ControlPolicyError::PolicyLoad {
                policy_name: name.clone(),
                detail: format!("'patterns' must be an array of strings: {e}"),
            })?,
            None => default_patterns(),
        };
        Self::new(name, patterns)
    }
}

#[async_trait]
impl ControlPolicy for LeakedApiKeyDetection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        transaction: Transaction,
        _container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        let req = transaction
            .openai_request()
            .ok_or_else(|| ControlPolicyError::NoRequest {
                policy_name: self.name.clone(),
            })?;

        for message in &req.payload.messages {
            let Some(content) = message.content.as_ref() else {
                continue;
            };
            let text = match content {
                crate::openai::Content::Text(t) => t.clone(),
                crate::openai::Content::Parts(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        crate::openai::ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            for pattern in &self.patterns {
                if pattern.is_match(&text) {
                    return Err(ControlPolicyError::LeakedApiKey {
                        policy_name: self.name.clone(),
                        detail: format!("message content matched pattern '{}'", pattern.as_str()),
                        status_code: 403,
                    });
                }
            }
        }
        Ok(transaction)
    }

    fn serialize(&self) -> Value {
        serde_json::json!({
            "type": "leaked_api_key_detection",
            "name": self.name,
            "patterns": self.patterns.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::{ChatCompletionRequest, ChatMessage, Content};
    use crate::repository::InMemoryRepository;
    use crate::settings::Settings;
    use crate::transaction::OpenAiRequest;
    use std::sync::Arc;

    fn container() -> DependencyContainer {
        DependencyContainer {
            settings: Arc::new(Settings::from_env().unwrap()),
            http_client: reqwest::Client::new(),
            api_key_repository: Arc::new(InMemoryRepository::new()),
            policy_repository: Arc::new(InMemoryRepository::new()),
        }
    }

    fn txn_with_message(content: &str) -> Transaction {
        Transaction::from_openai_request(
            OpenAiRequest {
                payload: ChatCompletionRequest {
                    model: "gpt-4o".into(),
                    messages: vec![ChatMessage {
                        role: "user".into(),
                        content: Some(Content::Text(content.to_string())),
                        name: None,
                        tool_calls: None,
                        tool_call_id: None,
                        refusal: None,
                    }],
                    temperature: None,
                    top_p: None,
                    n: None,
                    stream: None,
                    stream_options: None,
                    max_tokens: None,
                    max_completion_tokens: None,
                    tools: None,
                    tool_choice: None,
                    parallel_tool_calls: None,
                    response_format: None,
                    logit_bias: None,
                    logprobs: None,
                    top_logprobs: None,
                    presence_penalty: None,
                    frequency_penalty: None,
                    seed: None,
                    stop: None,
                    user: None,
                    metadata: None,
                    service_tier: None,
                    store: None,
                    reasoning_effort: None,
                    extra: Default::default(),
                },
                api_endpoint: "/v1/chat/completions".into(),
                api_key: "sk-test".into(),
            },
            false,
        )
    }

    #[tokio::test]
    async fn detects_leaked_openai_key() {
        let leaked = format!("here's my key: sk-{}", "a".repeat(48));
        let policy = LeakedApiKeyDetection::with_defaults("leak-detect");
        let err = policy
            .apply(txn_with_message(&leaked), &container())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPolicyError::LeakedApiKey { .. }));
    }

    #[tokio::test]
    async fn benign_message_passes() {
        let policy = LeakedApiKeyDetection::with_defaults("leak-detect");
        let result = policy
            .apply(txn_with_message("what's the weather today?"), &container())
            .await;
        assert!(result.is_ok());
    }
}
