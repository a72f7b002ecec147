//! Provider adapters against stub HTTP backends
//!
//! Each test serves a small axum router on an ephemeral port and drives the
//! real adapters (and, at the end, a whole mesh) over HTTP.

mod support;

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use model_mesh_core::{
    BackendDefaults, BackendDescriptor, BackendSpec, BackendState, ErrorKind, Mesh, MeshCall,
    MeshConfig, MeshResult, OllamaAdapter, ProviderAdapter, ProbeConfig, RoutedAdapter,
};
use support::StubState;

fn ollama_role(base_url: &str, model: &str) -> BackendDescriptor {
    BackendDescriptor::from_spec(
        "guardian",
        &BackendSpec::new(model)
            .with_provider("ollama")
            .with_base_url(base_url)
            .with_option("think", json!(true))
            .with_option("temperature", json!(0)),
        &BackendDefaults::default(),
    )
    .unwrap()
}

fn proxy_role(base_url: &str, model: &str) -> BackendDescriptor {
    BackendDescriptor::from_spec(
        "summarizer",
        &BackendSpec::new(model)
            .with_provider("litellm")
            .with_base_url(base_url)
            .with_option("api_key", json!("sk-test"))
            .with_option("max_tokens", json!(256)),
        &BackendDefaults::default(),
    )
    .unwrap()
}

fn timeout() -> Duration {
    Duration::from_secs(5)
}

// =============================================================================
// Ollama
// =============================================================================

#[tokio::test]
async fn test_ollama_chat_round_trip() {
    let state = StubState::serving(&["granite3.3-guardian:8b"]);
    let url = support::serve(support::ollama_stub(state.clone())).await;
    let adapter = OllamaAdapter::new(timeout());
    let descriptor = ollama_role(&url, "granite3.3-guardian:8b");

    let result = adapter
        .invoke(
            &descriptor,
            &json!({"prompt": "Is this harmful?", "system": "Answer Yes or No."}),
        )
        .await;

    let MeshResult::Success { value } = result else {
        panic!("expected success, got {result:?}");
    };
    assert_eq!(value["role"], "guardian");
    assert_eq!(value["content"], "No");
    assert_eq!(value["thinking"], "The request is benign.");
    assert_eq!(value["finish_reason"], "stop");
    assert_eq!(value["usage"]["prompt_tokens"], 42);

    let requests = state.requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.path, "/api/chat");
    assert_eq!(sent.body["stream"], false);
    assert_eq!(sent.body["think"], true);
    assert_eq!(sent.body["options"]["temperature"], 0);
    assert_eq!(sent.body["messages"][0]["role"], "system");
    assert_eq!(sent.body["messages"][1]["content"], "Is this harmful?");
    assert!(sent.authorization.is_none());
}

#[tokio::test]
async fn test_ollama_probe_finds_latest_tag() {
    let url = support::serve(support::ollama_stub(StubState::serving(&["llama3:latest"]))).await;
    let adapter = OllamaAdapter::new(timeout());

    let status = adapter.probe(&ollama_role(&url, "llama3")).await;

    assert_eq!(status.state, BackendState::Available);
    assert_eq!(status.role, "guardian");
    assert!(status.last_checked.is_some());
    assert_eq!(status.detail.as_deref(), Some("resolved to llama3:latest"));
}

#[tokio::test]
async fn test_ollama_probe_reports_missing_model() {
    let url = support::serve(support::ollama_stub(StubState::serving(&["llama3:latest"]))).await;
    let adapter = OllamaAdapter::with_client(reqwest::Client::new());

    let status = adapter
        .probe(&ollama_role(&url, "granite3.3-guardian:8b"))
        .await;

    assert_eq!(status.state, BackendState::Unavailable);
    assert!(status.reason().contains("ollama pull granite3.3-guardian:8b"));
}

#[tokio::test]
async fn test_invalid_payload_sends_nothing() {
    let state = StubState::serving(&["granite"]);
    let url = support::serve(support::ollama_stub(state.clone())).await;
    let adapter = OllamaAdapter::new(timeout());

    let result = adapter.invoke(&ollama_role(&url, "granite"), &json!({"temperature": 1})).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::InvalidRequest));
    assert!(state.requests().is_empty());
}

// =============================================================================
// Routing proxy
// =============================================================================

#[tokio::test]
async fn test_proxy_chat_round_trip() {
    let state = StubState::serving(&["gpt-4o-mini"]);
    let url = support::serve(support::litellm_stub(state.clone())).await;
    let adapter = RoutedAdapter::new(timeout());

    let result = adapter
        .invoke(&proxy_role(&url, "gpt-4o-mini"), &json!("Summarize the log."))
        .await;

    let MeshResult::Success { value } = result else {
        panic!("expected success, got {result:?}");
    };
    assert_eq!(value["content"], "A short summary.");
    assert_eq!(value["usage"]["total_tokens"], 35);

    let sent = &state.requests()[0];
    assert_eq!(sent.path, "/v1/chat/completions");
    assert_eq!(sent.authorization.as_deref(), Some("Bearer sk-test"));
    assert_eq!(sent.body["model"], "gpt-4o-mini");
    assert_eq!(sent.body["max_tokens"], 256);
    assert_eq!(sent.body["stream"], false);
    assert!(sent.body.get("api_key").is_none());
}

#[tokio::test]
async fn test_proxy_endpoint_with_v1_suffix() {
    let state = StubState::serving(&["gpt-4o-mini"]);
    let url = support::serve(support::litellm_stub(state.clone())).await;
    let adapter = RoutedAdapter::new(timeout());
    let descriptor = proxy_role(&format!("{url}/v1"), "gpt-4o-mini");

    assert!(adapter.probe(&descriptor).await.is_available());
    assert!(adapter.invoke(&descriptor, &json!("hi")).await.is_success());
    assert_eq!(state.requests()[0].path, "/v1/chat/completions");
}

#[tokio::test]
async fn test_proxy_probe_rejected_credentials() {
    let url = support::serve(support::litellm_stub(StubState::serving(&["gpt-4o-mini"]))).await;
    let adapter = RoutedAdapter::new(timeout());
    let descriptor = BackendDescriptor::from_spec(
        "summarizer",
        &BackendSpec::new("gpt-4o-mini")
            .with_provider("litellm")
            .with_base_url(&url),
        &BackendDefaults::default(),
    )
    .unwrap();

    let status = adapter.probe(&descriptor).await;

    assert_eq!(status.state, BackendState::Unavailable);
    assert!(status.reason().contains("rejected the credentials"));
}

#[tokio::test]
async fn test_proxy_probe_model_not_served() {
    let url = support::serve(support::litellm_stub(StubState::serving(&["claude-haiku"]))).await;
    let adapter = RoutedAdapter::new(timeout());

    let status = adapter.probe(&proxy_role(&url, "gpt-4o-mini")).await;

    assert!(status.is_unavailable());
    assert!(status.reason().contains("not served"));
}

// =============================================================================
// Failure mapping
// =============================================================================

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    let url = support::refused_url().await;
    let adapter = OllamaAdapter::new(timeout());
    let descriptor = ollama_role(&url, "granite");

    let result = adapter.invoke(&descriptor, &json!("hello")).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::BackendUnreachable));

    let status = adapter.probe(&descriptor).await;
    assert!(status.is_unavailable());
    assert!(status.reason().starts_with("cannot reach"));
}

#[tokio::test]
async fn test_hung_backend_times_out() {
    let url = support::serve(support::hanging_stub()).await;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let adapter = RoutedAdapter::with_client(client);

    let result = adapter
        .invoke(&proxy_role(&url, "gpt-4o-mini"), &json!("hello"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::BackendTimeout));
}

#[tokio::test]
async fn test_server_error_is_protocol_error() {
    let url = support::serve(support::fixed_stub(
        StatusCode::INTERNAL_SERVER_ERROR,
        r#"{"error": "model failed to load"}"#,
    ))
    .await;
    let adapter = OllamaAdapter::new(timeout());

    let result = adapter.invoke(&ollama_role(&url, "granite"), &json!("hello")).await;

    let MeshResult::Error { kind, message } = result else {
        panic!("expected error, got {result:?}");
    };
    assert_eq!(kind, ErrorKind::BackendProtocolError);
    assert!(message.contains("500"));
    assert!(message.contains("model failed to load"));
}

#[tokio::test]
async fn test_garbage_body_is_protocol_error() {
    let url = support::serve(support::fixed_stub(StatusCode::OK, "<html>proxy login</html>")).await;
    let adapter = RoutedAdapter::new(timeout());

    let result = adapter
        .invoke(&proxy_role(&url, "gpt-4o-mini"), &json!("hello"))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::BackendProtocolError));
}

// =============================================================================
// Whole mesh over HTTP
// =============================================================================

#[tokio::test]
async fn test_mesh_over_stub_backends() {
    let ollama = support::serve(support::ollama_stub(StubState::serving(&[
        "granite3.3-guardian:8b",
    ])))
    .await;
    let proxy_state = StubState::serving(&["gpt-4o-mini"]);
    let proxy = support::serve(support::litellm_stub(proxy_state.clone())).await;
    let dead = support::refused_url().await;

    let mut backends = BTreeMap::new();
    backends.insert(
        "guardian".to_string(),
        BackendSpec::new("granite3.3-guardian:8b").with_provider("ollama"),
    );
    backends.insert(
        "summarizer".to_string(),
        BackendSpec::new("gpt-4o-mini").with_option("api_key", json!("sk-test")),
    );
    backends.insert(
        "vision".to_string(),
        BackendSpec::new("granite-docling")
            .with_provider("ollama")
            .with_base_url(&dead),
    );
    let mut config = MeshConfig::with_backends(backends);
    config.ollama_base_url = Some(ollama);
    config.base_url = Some(proxy);
    config.probe = ProbeConfig {
        timeout: Duration::from_secs(2),
        reprobe_interval: None,
        ..ProbeConfig::default()
    };

    let mesh = Mesh::from_config(config).await.unwrap();

    assert_eq!(mesh.status("guardian").unwrap().state, BackendState::Available);
    assert_eq!(mesh.status("summarizer").unwrap().state, BackendState::Available);
    assert_eq!(mesh.status("vision").unwrap().state, BackendState::Unavailable);

    let guardian = mesh
        .call(MeshCall::new("guardian", json!("Is this harmful?")))
        .await;
    assert!(guardian.is_success(), "{guardian:?}");

    let summary = mesh
        .call(MeshCall::new("summarizer", json!({"prompt": "Summarize."})))
        .await;
    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(proxy_state.requests().len(), 1);

    let vision = mesh
        .call(MeshCall::new("vision", json!("read this page")))
        .await;
    assert!(vision.is_degraded());
}
