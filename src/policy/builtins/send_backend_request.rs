use async_trait::async_trait;
use serde_json::Value;

use crate::openai::ChatCompletionResponse;
use crate::policy::{ControlPolicy, ControlPolicyError, DependencyContainer};
use crate::streaming::{UpstreamRawStream, UpstreamSseDecoder};
use crate::transaction::{OpenAiResponse, RawResponse, Transaction};

/// Terminal policy: validates the backend URL and upstream key are
/// present, sends the request to the configured backend, and sets the
/// transaction's response. No retries — a connection/timeout error
/// propagates to the orchestrator as-is. Exactly one upstream call is
/// made per transaction, streaming or not.
///
/// Streaming OpenAI requests attach the upstream's `bytes_stream()` to
/// the transaction as an SSE-decoding `StreamingIterator`, so the
/// orchestrator wraps it with the policy tree's `process_chunk` instead
/// of re-fetching. Non-streaming requests await the full JSON body and
/// deserialize it. Raw requests are buffered unless the caller's
/// `Accept` header requested SSE (`transaction.is_streaming()`), in
/// which case the raw bytes are attached as a stream instead.
pub struct SendBackendRequest {
    name: String,
}

impl SendBackendRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn from_config(config: &Value) -> Self {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("SendBackendRequest")
            .to_string();
        Self::new(name)
    }

    fn upstream_error(&self, detail: impl std::fmt::Display) -> ControlPolicyError {
        ControlPolicyError::Upstream {
            policy_name: self.name.clone(),
            detail: detail.to_string(),
        }
    }
}

#[async_trait]
impl ControlPolicy for SendBackendRequest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        mut transaction: Transaction,
        container: &DependencyContainer,
    ) -> Result<Transaction, ControlPolicyError> {
        if let Some(req) = transaction.openai_request() {
            if req.api_key.is_empty() {
                return Err(ControlPolicyError::ApiKeyNotFound {
                    policy_name: self.name.clone(),
                });
            }
            let url = format!(
                "{}/v1/chat/completions",
                req.api_endpoint.trim_end_matches('/')
            );
            let api_key = req.api_key.clone();
            let payload = serde_json::to_value(&req.payload)
                .map_err(|e| self.upstream_error(format!("failed to encode request: {e}")))?;

            let response = container
                .http_client
                .post(&url)
                .bearer_auth(&api_key)
                .json(&payload)
                .send()
                .await
                .map_err(|e| self.upstream_error(e))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let detail = response.text().await.unwrap_or_default();
                return Err(ControlPolicyError::Upstream {
                    policy_name: self.name.clone(),
                    detail: format!("upstream returned {status}: {detail}"),
                });
            }

            let is_streaming = req.payload.is_streaming();
            if is_streaming {
                let decoder = UpstreamSseDecoder::new(response.bytes_stream());
                transaction.set_response_stream(Box::new(decoder));
                transaction.set_openai_response(OpenAiResponse {
                    payload: None,
                    api_endpoint: Some(url),
                });
            } else {
                let body: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| self.upstream_error(format!("invalid upstream response: {e}")))?;
                transaction.set_openai_response(OpenAiResponse {
                    payload: Some(body),
                    api_endpoint: Some(url),
                });
            }
            return Ok(transaction);
        }

        let wants_streamed_raw = transaction.is_streaming();
        if let Some(req) = transaction.raw_request() {
            let backend_url = req
                .backend_url
                .clone()
                .ok_or_else(|| self.upstream_error("no backend_url configured on raw request"))?;
            let url = format!("{}{}", backend_url.trim_end_matches('/'), req.path);

            let mut builder = container.http_client.request(
                req.method
                    .parse()
                    .map_err(|e| self.upstream_error(format!("invalid method: {e}")))?,
                &url,
            );
            for (k, v) in &req.headers {
                if !crate::streaming::is_hop_by_hop(k) {
                    builder = builder.header(k, v);
                }
            }
            if !req.api_key.is_empty() {
                builder = builder.bearer_auth(&req.api_key);
            }
            if let Some(body) = &req.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await.map_err(|e| self.upstream_error(e))?;
            let status_code = response.status().as_u16();
            let headers: std::collections::HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    let k = k.as_str();
                    if crate::streaming::is_hop_by_hop(k) {
                        return None;
                    }
                    v.to_str().ok().map(|v| (k.to_string(), v.to_string()))
                })
                .collect();

            if wants_streamed_raw {
                let raw_stream = UpstreamRawStream::new(response.bytes_stream());
                transaction.set_response_stream(Box::new(raw_stream));
                transaction.set_raw_response(RawResponse {
                    status_code,
                    headers,
                    body: None,
                });
            } else {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| self.upstream_error(e))?;
                transaction.set_raw_response(RawResponse {
                    status_code,
                    headers,
                    body: Some(bytes),
                });
            }
            return Ok(transaction);
        }

        Err(ControlPolicyError::NoRequest {
            policy_name: self.name.clone(),
        })
    }

    fn serialize(&self) -> Value {
        serde_json::json!({ "type": "send_backend_request", "name": self.name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_carries_policy_name() {
        let policy = SendBackendRequest::new("send");
        let err = policy.upstream_error("boom");
        assert_eq!(err.policy_name(), "send");
        assert_eq!(err.status_code(), 502);
    }
}
