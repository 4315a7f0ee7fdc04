//! OpenAI chat-completions request/response/streaming types.
//!
//! Field set follows the Chat Completions API reference
//! (<https://platform.openai.com/docs/api-reference/chat>, retrieved
//! 2025-06-16): request, non-streaming response, and the streaming
//! chunk counterpart.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn is_none<T>(opt: &Option<T>) -> bool {
    opt.is_none()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default = "default_detail")]
    pub detail: String,
}

fn default_detail() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_function")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_function() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub refusal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type", default = "default_function")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Named {
        #[serde(rename = "type", default = "default_function")]
        tool_type: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type", default = "default_text_format")]
    pub format_type: String,
    #[serde(default, skip_serializing_if = "is_none")]
    pub json_schema: Option<Value>,
}

fn default_text_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "is_none")]
    pub include_usage: Option<bool>,
}

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub logit_bias: Option<HashMap<String, f64>>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub logprobs: Option<bool>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub top_logprobs: Option<u32>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub stop: Option<Stop>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub service_tier: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub reasoning_effort: Option<String>,

    /// Fields not modeled above are preserved for round-trip fidelity.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ChatCompletionRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogProbs {
    #[serde(default, skip_serializing_if = "is_none")]
    pub content: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub refusal: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponseMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub refusal: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatResponseMessage,
    #[serde(default, skip_serializing_if = "is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub logprobs: Option<LogProbs>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u32,
    #[serde(default)]
    pub audio_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionTokensDetails {
    #[serde(default)]
    pub reasoning_tokens: u32,
    #[serde(default)]
    pub audio_tokens: u32,
    #[serde(default)]
    pub accepted_prediction_tokens: u32,
    #[serde(default)]
    pub rejected_prediction_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default)]
    pub prompt_tokens_details: PromptTokensDetails,
    #[serde(default)]
    pub completion_tokens_details: CompletionTokensDetails,
}

/// `POST /v1/chat/completions` non-streaming response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub usage: Option<ChatUsage>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub system_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub service_tier: Option<String>,
}

fn default_object() -> String {
    "chat.completion".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default, skip_serializing_if = "is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default, skip_serializing_if = "is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatStreamChoice {
    pub index: u32,
    pub delta: ChatDelta,
    #[serde(default, skip_serializing_if = "is_none")]
    pub finish_reason: Option<String>,
}

/// A single `chat.completion.chunk` SSE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default = "default_chunk_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatStreamChoice>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub usage: Option<ChatUsage>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub system_fingerprint: Option<String>,
}

fn default_chunk_object() -> String {
    "chat.completion.chunk".to_string()
}
