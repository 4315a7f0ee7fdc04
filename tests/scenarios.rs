//! End-to-end scenarios (spec §8, S1-S6) exercised through `Orchestrator`
//! against a mocked upstream, rather than through the policy unit tests
//! that already cover each builtin in isolation.

use std::sync::Arc;

use luthien_control::orchestrator::{HostRequest, HostResponse, Orchestrator};
use luthien_control::repository::{InMemoryRepository, PolicyConfig};
use luthien_control::settings::Settings;
use serial_test::serial;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policy_repo_with_root(config: serde_json::Value) -> Arc<InMemoryRepository> {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_policy(PolicyConfig {
        id: 1,
        name: "root".into(),
        policy_type: config
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("compound")
            .to_string(),
        config,
        is_active: true,
        description: None,
    });
    repo
}

fn settings_for(backend_url: &str) -> Arc<Settings> {
    std::env::set_var("BACKEND_URL", backend_url);
    std::env::set_var("OPENAI_API_KEY", "sk-upstream-AAAA");
    std::env::set_var("TOP_LEVEL_POLICY_NAME", "root");
    let settings = Arc::new(Settings::from_env().unwrap());
    std::env::remove_var("BACKEND_URL");
    std::env::remove_var("OPENAI_API_KEY");
    std::env::remove_var("TOP_LEVEL_POLICY_NAME");
    settings
}

fn chat_request(method: &str, path: &str, bearer: &str, body: serde_json::Value) -> HostRequest {
    let mut headers = std::collections::HashMap::new();
    headers.insert("authorization".to_string(), format!("Bearer {bearer}"));
    HostRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers,
        query_params: std::collections::HashMap::new(),
        body_bytes: Some(bytes::Bytes::from(serde_json::to_vec(&body).unwrap())),
        client_meta: serde_json::Value::Null,
    }
}

fn sample_chat_completion_response(model: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 0,
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "hello there" },
            "finish_reason": "stop",
        }],
    })
}

/// S1 — simple proxy: AddApiKeyHeader then SendBackendRequest forwards
/// the client's request upstream with the configured API key attached,
/// and relays the upstream body back unchanged.
#[tokio::test]
#[serial]
async fn s1_simple_proxy_forwards_with_api_key() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-upstream-AAAA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_chat_completion_response("gpt-3.5-turbo")))
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {"type": "add_api_key_header", "name": "key"},
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let body = serde_json::json!({
        "model": "gpt-3.5-turbo",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let response = orchestrator
        .handle(chat_request("POST", "/v1/chat/completions", "client-key", body))
        .await;

    match response {
        HostResponse::Buffered { status, body, .. } => {
            assert_eq!(status, 200);
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["choices"][0]["message"]["content"], "hello there");
        }
        HostResponse::Streaming { .. } => panic!("expected a buffered response"),
    }
}

/// S2 — conditional model rewrite: `fake` is rewritten to `gpt-4o`
/// before being sent upstream; any other model passes through.
#[tokio::test]
#[serial]
async fn s2_conditional_model_rewrite() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_chat_completion_response("gpt-4o")))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(serde_json::json!({
            "model": "gpt-3.5-turbo",
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_chat_completion_response("gpt-3.5-turbo")))
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {
                "type": "conditional",
                "name": "branch",
                "condition": {"type": "equals", "key": "request.model", "value": "fake"},
                "then": {
                    "type": "model_name_replacement",
                    "name": "rewrite",
                    "mapping": {"fake": "gpt-4o"},
                },
                "else": {"type": "noop", "name": "passthrough"},
            },
            {"type": "add_api_key_header", "name": "key"},
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let fake_body = serde_json::json!({"model": "fake", "messages": [{"role": "user", "content": "hi"}]});
    let response = orchestrator
        .handle(chat_request("POST", "/v1/chat/completions", "client-key", fake_body))
        .await;
    match response {
        HostResponse::Buffered { status, body, .. } => {
            assert_eq!(status, 200);
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["model"], "gpt-4o");
        }
        HostResponse::Streaming { .. } => panic!("expected a buffered response"),
    }

    let normal_body = serde_json::json!({"model": "gpt-3.5-turbo", "messages": [{"role": "user", "content": "hi"}]});
    let response = orchestrator
        .handle(chat_request("POST", "/v1/chat/completions", "client-key", normal_body))
        .await;
    match response {
        HostResponse::Buffered { status, body, .. } => {
            assert_eq!(status, 200);
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["model"], "gpt-3.5-turbo");
        }
        HostResponse::Streaming { .. } => panic!("expected a buffered response"),
    }
}

/// S3 — leaked key blocking: a message containing an OpenAI-key-shaped
/// string is rejected with 403 before the backend is ever contacted.
#[tokio::test]
#[serial]
async fn s3_leaked_key_blocks_before_upstream_call() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_chat_completion_response("gpt-3.5-turbo")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {"type": "leaked_api_key_detection", "name": "leak-scan"},
            {"type": "add_api_key_header", "name": "key"},
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let leaked = format!("my key is sk-{}", "a".repeat(48));
    let body = serde_json::json!({
        "model": "gpt-3.5-turbo",
        "messages": [{"role": "user", "content": leaked}],
    });
    let response = orchestrator
        .handle(chat_request("POST", "/v1/chat/completions", "client-key", body))
        .await;

    match response {
        HostResponse::Buffered { status, body, .. } => {
            assert_eq!(status, 403);
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert!(value["error"]["message"].as_str().unwrap().contains("leaked"));
        }
        HostResponse::Streaming { .. } => panic!("expected a buffered response"),
    }

    mock_server.verify().await;
}

/// S4 — streaming passthrough: three upstream SSE chunks are reframed
/// and delivered in order, with no content transform applied.
#[tokio::test]
#[serial]
async fn s4_streaming_passthrough_preserves_chunk_order() {
    let mock_server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {"type": "add_api_key_header", "name": "key"},
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let body = serde_json::json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });
    let response = orchestrator
        .handle(chat_request("POST", "/v1/chat/completions", "client-key", body))
        .await;

    match response {
        HostResponse::Streaming { status, mut stream, .. } => {
            use futures_util::StreamExt;
            assert_eq!(status, 200);
            let mut deltas = Vec::new();
            while let Some(item) = stream.next().await {
                let bytes = item.unwrap();
                let text = String::from_utf8(bytes.to_vec()).unwrap();
                for line in text.lines() {
                    if let Some(payload) = line.strip_prefix("data: ") {
                        if payload == "[DONE]" {
                            continue;
                        }
                        let chunk: serde_json::Value = serde_json::from_str(payload).unwrap();
                        if let Some(content) = chunk["choices"][0]["delta"]["content"].as_str() {
                            deltas.push(content.to_string());
                        }
                    }
                }
            }
            assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);
        }
        HostResponse::Buffered { .. } => panic!("expected a streaming response"),
    }
}

/// S5 — integer increment mid-stream: an `IncrementIntegers` node in the
/// root policy tree rewrites numeric deltas as they stream past, proving
/// `process_chunk` reaches the wire through the full policy tree rather
/// than only in `increment_integers.rs`'s own unit tests.
#[tokio::test]
#[serial]
async fn s5_integer_increment_transforms_streamed_deltas() {
    let mock_server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"5 apples\"}}]}\n\n",
        "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {"type": "add_api_key_header", "name": "key"},
            {"type": "increment_integers", "name": "increment"},
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let body = serde_json::json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });
    let response = orchestrator
        .handle(chat_request("POST", "/v1/chat/completions", "client-key", body))
        .await;

    match response {
        HostResponse::Streaming { status, mut stream, .. } => {
            use futures_util::StreamExt;
            assert_eq!(status, 200);
            let mut deltas = Vec::new();
            while let Some(item) = stream.next().await {
                let bytes = item.unwrap();
                let text = String::from_utf8(bytes.to_vec()).unwrap();
                for line in text.lines() {
                    if let Some(payload) = line.strip_prefix("data: ") {
                        if payload == "[DONE]" {
                            continue;
                        }
                        let chunk: serde_json::Value = serde_json::from_str(payload).unwrap();
                        if let Some(content) = chunk["choices"][0]["delta"]["content"].as_str() {
                            deltas.push(content.to_string());
                        }
                    }
                }
            }
            assert_eq!(deltas, vec!["6 apples".to_string()]);
        }
        HostResponse::Buffered { .. } => panic!("expected a streaming response"),
    }
}

/// Raw SSE passthrough: a raw (non-chat-completions-shaped) request sent
/// with `Accept: text/event-stream` streams the backend's bytes rather
/// than buffering them, per §4.7's raw-variant streaming rule.
#[tokio::test]
#[serial]
async fn raw_request_with_sse_accept_header_streams_instead_of_buffering() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw("data: one\n\ndata: two\n\n", "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let mut headers = std::collections::HashMap::new();
    headers.insert("accept".to_string(), "text/event-stream".to_string());
    let request = HostRequest {
        method: "GET".to_string(),
        path: "/events".to_string(),
        headers,
        query_params: std::collections::HashMap::new(),
        body_bytes: None,
        client_meta: serde_json::Value::Null,
    };
    let response = orchestrator.handle(request).await;

    match response {
        HostResponse::Streaming { status, mut stream, .. } => {
            use futures_util::StreamExt;
            assert_eq!(status, 200);
            let mut collected = Vec::new();
            while let Some(item) = stream.next().await {
                collected.extend_from_slice(&item.unwrap());
            }
            let text = String::from_utf8(collected).unwrap();
            assert!(text.contains("data: one"));
            assert!(text.contains("data: two"));
        }
        HostResponse::Buffered { .. } => panic!("expected a streaming response"),
    }
}

/// S6 — missing client key: `ClientApiKeyAuth` rejects a request with
/// no Authorization header before any later policy runs.
#[tokio::test]
#[serial]
async fn s6_missing_client_key_is_rejected_before_backend_call() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sample_chat_completion_response("gpt-3.5-turbo")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let settings = settings_for(&mock_server.uri());
    let root_config = serde_json::json!({
        "type": "compound",
        "name": "root",
        "policies": [
            {"type": "client_api_key_auth", "name": "client-auth"},
            {"type": "add_api_key_header", "name": "key"},
            {"type": "send_backend_request", "name": "send"},
        ],
    });
    let orchestrator = Orchestrator::new(
        settings,
        reqwest::Client::new(),
        Arc::new(InMemoryRepository::new()),
        policy_repo_with_root(root_config),
    );

    let mut headers = std::collections::HashMap::new();
    let body = serde_json::json!({
        "model": "gpt-3.5-turbo",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let request = HostRequest {
        method: "POST".to_string(),
        path: "/v1/chat/completions".to_string(),
        headers: std::mem::take(&mut headers),
        query_params: std::collections::HashMap::new(),
        body_bytes: Some(bytes::Bytes::from(serde_json::to_vec(&body).unwrap())),
        client_meta: serde_json::Value::Null,
    };
    let response = orchestrator.handle(request).await;

    match response {
        HostResponse::Buffered { status, .. } => assert_eq!(status, 401),
        HostResponse::Streaming { .. } => panic!("expected a buffered response"),
    }

    mock_server.verify().await;
}
