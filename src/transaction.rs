//! The per-request state object threaded through the policy engine (C1).

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::Value;
use uuid::Uuid;

use crate::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::streaming::StreamingIterator;

/// Which wire shape a transaction's request/response pair takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    OpenAiChat,
    RawPassthrough,
}

/// The decoded OpenAI chat-completions side of a request.
#[derive(Debug, Clone)]
pub struct OpenAiRequest {
    pub payload: ChatCompletionRequest,
    pub api_endpoint: String,
    pub api_key: String,
}

/// The decoded OpenAI chat-completions side of a response. `payload` is
/// `None` until a policy or the orchestrator populates it.
#[derive(Debug, Clone, Default)]
pub struct OpenAiResponse {
    pub payload: Option<ChatCompletionResponse>,
    pub api_endpoint: Option<String>,
}

/// An undecoded HTTP request carried through verbatim.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub api_key: String,
    pub backend_url: Option<String>,
}

/// An undecoded HTTP response carried through verbatim.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
}

enum RequestSlot {
    OpenAi(OpenAiRequest),
    Raw(RawRequest),
}

enum ResponseSlot {
    OpenAi(OpenAiResponse),
    Raw(RawResponse),
}

/// A transaction between the proxy and the client: the request, its
/// (possibly not-yet-populated) response, and an arbitrary scratch
/// `data` map that policies use to pass state to one another.
///
/// Invariant I1: exactly one of the OpenAI or raw request slots is
/// populated, enforced at construction since `Transaction` has no
/// public struct literal — only `from_openai_request`/`from_raw_request`.
pub struct Transaction {
    transaction_id: Uuid,
    request: RequestSlot,
    response: Option<ResponseSlot>,
    data: HashMap<String, Value>,
    is_streaming: bool,
    generation: u64,
    response_stream: Option<Box<dyn StreamingIterator>>,
}

impl Transaction {
    pub fn from_openai_request(request: OpenAiRequest, is_streaming: bool) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            request: RequestSlot::OpenAi(request),
            response: None,
            data: HashMap::new(),
            is_streaming,
            generation: 0,
            response_stream: None,
        }
    }

    pub fn from_raw_request(request: RawRequest, is_streaming: bool) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            request: RequestSlot::Raw(request),
            response: None,
            data: HashMap::new(),
            is_streaming,
            generation: 0,
            response_stream: None,
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    pub fn request_type(&self) -> RequestType {
        match self.request {
            RequestSlot::OpenAi(_) => RequestType::OpenAiChat,
            RequestSlot::Raw(_) => RequestType::RawPassthrough,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Monotonic counter bumped by every mutation; used by
    /// `TransactionContextLogging` to snapshot-log only when something
    /// actually changed instead of subscribing to a live event stream.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn openai_request(&self) -> Option<&OpenAiRequest> {
        match &self.request {
            RequestSlot::OpenAi(r) => Some(r),
            RequestSlot::Raw(_) => None,
        }
    }

    pub fn openai_request_mut(&mut self) -> Option<&mut OpenAiRequest> {
        self.touch();
        match &mut self.request {
            RequestSlot::OpenAi(r) => Some(r),
            RequestSlot::Raw(_) => None,
        }
    }

    pub fn raw_request(&self) -> Option<&RawRequest> {
        match &self.request {
            RequestSlot::Raw(r) => Some(r),
            RequestSlot::OpenAi(_) => None,
        }
    }

    pub fn raw_request_mut(&mut self) -> Option<&mut RawRequest> {
        self.touch();
        match &mut self.request {
            RequestSlot::Raw(r) => Some(r),
            RequestSlot::OpenAi(_) => None,
        }
    }

    pub fn openai_response(&self) -> Option<&OpenAiResponse> {
        match &self.response {
            Some(ResponseSlot::OpenAi(r)) => Some(r),
            _ => None,
        }
    }

    pub fn raw_response(&self) -> Option<&RawResponse> {
        match &self.response {
            Some(ResponseSlot::Raw(r)) => Some(r),
            _ => None,
        }
    }

    pub fn set_openai_response(&mut self, response: OpenAiResponse) {
        self.response = Some(ResponseSlot::OpenAi(response));
        self.touch();
    }

    pub fn set_raw_response(&mut self, response: RawResponse) {
        self.response = Some(ResponseSlot::Raw(response));
        self.touch();
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Attaches the live upstream byte stream a policy already opened
    /// (e.g. `SendBackendRequest`) so the orchestrator can wrap it with
    /// `process_chunk` instead of re-issuing the upstream call.
    pub fn set_response_stream(&mut self, stream: Box<dyn StreamingIterator>) {
        self.response_stream = Some(stream);
        self.touch();
    }

    /// Takes the attached stream, leaving `None` behind. Does not bump
    /// `generation` — consuming the stream isn't a transaction mutation.
    pub fn take_response_stream(&mut self) -> Option<Box<dyn StreamingIterator>> {
        self.response_stream.take()
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn data_get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn data_insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
        self.touch();
    }

    /// Serializable snapshot used by logging and by `Condition`/`ValueResolver`
    /// path lookups over the `request`/`response`/`data` top-level fields.
    pub fn snapshot(&self) -> Value {
        let request = match &self.request {
            RequestSlot::OpenAi(r) => serde_json::json!({
                "kind": "openai",
                "api_endpoint": r.api_endpoint,
                "model": r.payload.model,
                "stream": r.payload.is_streaming(),
            }),
            RequestSlot::Raw(r) => serde_json::json!({
                "kind": "raw",
                "method": r.method,
                "path": r.path,
                "backend_url": r.backend_url,
            }),
        };
        let response = match &self.response {
            Some(ResponseSlot::OpenAi(r)) => serde_json::json!({
                "kind": "openai",
                "api_endpoint": r.api_endpoint,
                "has_payload": r.payload.is_some(),
            }),
            Some(ResponseSlot::Raw(r)) => serde_json::json!({
                "kind": "raw",
                "status_code": r.status_code,
            }),
            None => Value::Null,
        };
        serde_json::json!({
            "transaction_id": self.transaction_id.to_string(),
            "request": request,
            "response": response,
            "data": self.data,
            "generation": self.generation,
        })
    }
}
