//! Per-request control flow tying the policy engine to a transport (C8).
//!
//! `Orchestrator` is transport-agnostic: it receives a `HostRequest` and
//! returns a `HostResponse`, buffered or streaming. `src/server.rs` is
//! the actix-web adapter that translates to/from these shapes, grounded
//! in the teacher's handler + `ResponsesSseToChatSse` framing style in
//! `server.rs`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;
use uuid::Uuid;

use crate::openai::ChatCompletionRequest;
use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::registry::PolicyRegistry;
use crate::repository::{ApiKeyRepository, PolicyRepository};
use crate::settings::Settings;
use crate::streaming::{is_hop_by_hop, SseBody, StreamChunk, StreamingError, StreamingIterator};
use crate::transaction::{OpenAiRequest, RawRequest, Transaction};

/// The transport-agnostic inbound request shape (§6's host contract).
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body_bytes: Option<Bytes>,
    pub client_meta: Value,
}

/// The transport-agnostic outbound response shape: either a fully
/// buffered body or a stream of already-framed SSE bytes.
pub enum HostResponse {
    Buffered {
        status: u16,
        headers: HashMap<String, String>,
        body: Bytes,
    },
    Streaming {
        status: u16,
        headers: HashMap<String, String>,
        stream: Pin<Box<dyn Stream<Item = Result<Bytes, StreamingError>> + Send>>,
    },
}

fn bearer_token(headers: &HashMap<String, String>) -> String {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
        .map(|(_, v)| v.trim_start_matches("Bearer ").trim().to_string())
        .unwrap_or_default()
}

fn error_body(message: &str, transaction_id: Uuid) -> Bytes {
    let body = serde_json::json!({
        "error": { "message": message, "transaction_id": transaction_id.to_string() }
    });
    Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
}

fn error_response(status: u16, message: &str, transaction_id: Uuid) -> HostResponse {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    HostResponse::Buffered {
        status,
        headers,
        body: error_body(message, transaction_id),
    }
}

/// Wraps the upstream byte stream a policy already attached to the
/// transaction (`Transaction::set_response_stream`) and applies the root
/// policy's `process_chunk` to every chunk pulled from it. This is how a
/// policy tree's streaming transforms (e.g. `IncrementIntegers`) reach
/// the wire instead of being dead code reachable only from unit tests.
struct PolicyTransformedStream {
    inner: Box<dyn StreamingIterator>,
    policy: Box<dyn ControlPolicy>,
}

impl PolicyTransformedStream {
    fn new(inner: Box<dyn StreamingIterator>, policy: Box<dyn ControlPolicy>) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl StreamingIterator for PolicyTransformedStream {
    async fn next(&mut self) -> Result<Option<StreamChunk>, StreamingError> {
        match self.inner.next().await? {
            Some(chunk) => self
                .policy
                .process_chunk(chunk)
                .map(Some)
                .map_err(|e| StreamingError::Upstream(e.to_string())),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Ties together settings, the shared HTTP client, the repositories,
/// and the policy registry for one running process. Constructed once
/// at startup (`src/main.rs`) and shared across all in-flight requests.
pub struct Orchestrator {
    settings: Arc<Settings>,
    http_client: reqwest::Client,
    api_key_repository: Arc<dyn ApiKeyRepository>,
    policy_repository: Arc<dyn PolicyRepository>,
    registry: PolicyRegistry,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        http_client: reqwest::Client,
        api_key_repository: Arc<dyn ApiKeyRepository>,
        policy_repository: Arc<dyn PolicyRepository>,
    ) -> Self {
        let registry = PolicyRegistry::new(policy_repository.clone());
        Self {
            settings,
            http_client,
            api_key_repository,
            policy_repository,
            registry,
        }
    }

    fn decode(&self, request: &HostRequest) -> Transaction {
        let parsed_openai = request
            .body_bytes
            .as_ref()
            .and_then(|b| serde_json::from_slice::<ChatCompletionRequest>(b).ok());

        let incoming_authorization = request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .map(|(_, v)| v.clone());

        let mut transaction = if let Some(payload) = parsed_openai {
            let is_streaming = payload.is_streaming();
            let openai_request = OpenAiRequest {
                payload,
                api_endpoint: self.settings.backend_url().to_string(),
                api_key: bearer_token(&request.headers),
            };
            Transaction::from_openai_request(openai_request, is_streaming)
        } else {
            let wants_sse = request
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("accept"))
                .map(|(_, v)| v.contains("text/event-stream"))
                .unwrap_or(false);
            let raw_request = RawRequest {
                method: request.method.clone(),
                path: request.path.clone(),
                headers: request.headers.clone(),
                body: request.body_bytes.clone(),
                api_key: bearer_token(&request.headers),
                backend_url: Some(self.settings.backend_url().to_string()),
            };
            Transaction::from_raw_request(raw_request, wants_sse)
        };

        // `ClientApiKeyAuth` reads the client's own Authorization header
        // from here rather than from the request slots, since the raw
        // header (not the stripped bearer token) carries the scheme.
        if let Some(header) = incoming_authorization {
            transaction.data_insert("incoming_authorization", Value::String(header));
        }
        transaction
    }

    /// Runs one request through the policy tree and produces the final
    /// host response. Never returns an `Err`: every failure mode (policy
    /// load failure, a `ControlPolicyError` from the tree, a missing
    /// response) is converted into an error `HostResponse` per §4.8
    /// steps 5-6, carrying the transaction id but no internal detail.
    pub async fn handle(&self, request: HostRequest) -> HostResponse {
        let transaction = self.decode(&request);
        let transaction_id = transaction.transaction_id();

        let container = DependencyContainer {
            settings: self.settings.clone(),
            http_client: self.http_client.clone(),
            api_key_repository: self.api_key_repository.clone(),
            policy_repository: self.policy_repository.clone(),
        };

        let root_policy = match self
            .registry
            .load_policy_by_name(self.settings.top_level_policy_name())
            .await
        {
            Ok(policy) => policy,
            Err(e) => {
                tracing::error!(transaction_id = %transaction_id, error = %e, "failed to load root policy");
                return error_response(e.status_code(), &e.to_string(), transaction_id);
            }
        };

        let transaction = match root_policy.apply(transaction, &container).await {
            Ok(transaction) => transaction,
            Err(e) => {
                tracing::error!(transaction_id = %transaction_id, policy = e.policy_name(), error = %e, "policy chain failed");
                return error_response(e.status_code(), &e.to_string(), transaction_id);
            }
        };

        self.build_response(transaction, root_policy, transaction_id).await
    }

    async fn build_response(
        &self,
        transaction: Transaction,
        root_policy: Box<dyn ControlPolicy>,
        transaction_id: Uuid,
    ) -> HostResponse {
        if transaction.is_streaming() {
            return self
                .build_streaming_response(transaction, root_policy, transaction_id)
                .await;
        }

        if let Some(resp) = transaction.openai_response() {
            let Some(payload) = &resp.payload else {
                return error_response(500, "streaming response left unbuffered", transaction_id);
            };
            let body = match serde_json::to_vec(payload) {
                Ok(b) => Bytes::from(b),
                Err(e) => return error_response(500, &format!("failed to encode response: {e}"), transaction_id),
            };
            let mut headers = HashMap::new();
            headers.insert("content-type".to_string(), "application/json".to_string());
            return HostResponse::Buffered { status: 200, headers, body };
        }

        if let Some(resp) = transaction.raw_response() {
            let headers = resp
                .headers
                .iter()
                .filter(|(k, _)| !is_hop_by_hop(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return HostResponse::Buffered {
                status: resp.status_code,
                headers,
                body: resp.body.clone().unwrap_or_default(),
            };
        }

        error_response(500, "no response produced", transaction_id)
    }

    /// Builds the streaming response out of whatever upstream byte
    /// stream a policy already attached to the transaction — no HTTP
    /// call is made here. `SendBackendRequest` owns the single upstream
    /// `.send().await` for both the OpenAI and raw-passthrough cases;
    /// this method only wraps the resulting `StreamingIterator` with the
    /// policy tree's `process_chunk` before framing it as SSE.
    async fn build_streaming_response(
        &self,
        mut transaction: Transaction,
        root_policy: Box<dyn ControlPolicy>,
        transaction_id: Uuid,
    ) -> HostResponse {
        let raw_status_headers = transaction.raw_response().map(|r| {
            let headers: HashMap<String, String> = r
                .headers
                .iter()
                .filter(|(k, _)| !is_hop_by_hop(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (r.status_code, headers)
        });

        let Some(inner) = transaction.take_response_stream() else {
            return error_response(
                500,
                "no policy produced a response stream for the request",
                transaction_id,
            );
        };

        let body = SseBody::new(PolicyTransformedStream::new(inner, root_policy));

        let (status, mut headers) = raw_status_headers.unwrap_or_else(|| {
            let mut headers = HashMap::new();
            headers.insert("content-type".to_string(), "text/event-stream".to_string());
            (200, headers)
        });
        headers
            .entry("content-type".to_string())
            .or_insert_with(|| "text/event-stream".to_string());
        headers.insert("cache-control".to_string(), "no-cache".to_string());
        headers.insert("connection".to_string(), "keep-alive".to_string());
        headers.insert("x-accel-buffering".to_string(), "no".to_string());

        HostResponse::Streaming {
            status,
            headers,
            stream: Box::pin(body),
        }
    }
}
