//! Stub model backends on ephemeral local ports

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// One request seen by a stub
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Shared stub state: served models plus every chat request received
#[derive(Clone, Default)]
pub struct StubState {
    models: Arc<Vec<String>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubState {
    pub fn serving(models: &[&str]) -> Self {
        Self {
            models: Arc::new(models.iter().map(|m| (*m).to_string()).collect()),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn record(&self, path: &str, headers: &HeaderMap, body: &Value) {
        self.requests.lock().push(Recorded {
            path: path.to_string(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: body.clone(),
        });
    }
}

/// Serve a router on 127.0.0.1, returning its base URL
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// URL of a port nothing listens on
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// =============================================================================
// Ollama
// =============================================================================

pub fn ollama_stub(state: StubState) -> Router {
    Router::new()
        .route("/api/tags", get(ollama_tags))
        .route("/api/chat", post(ollama_chat))
        .with_state(state)
}

async fn ollama_tags(State(state): State<StubState>) -> Json<Value> {
    let models: Vec<Value> = state
        .models
        .iter()
        .map(|name| json!({"name": name, "model": name, "size": 4_920_000_000_u64}))
        .collect();
    Json(json!({ "models": models }))
}

async fn ollama_chat(
    State(state): State<StubState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record(uri.path(), &headers, &body);
    Json(json!({
        "model": body["model"],
        "created_at": "2026-10-19T09:00:00Z",
        "message": {
            "role": "assistant",
            "content": "No",
            "thinking": "The request is benign."
        },
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": 42,
        "eval_count": 3
    }))
}

// =============================================================================
// LiteLLM
// =============================================================================

pub fn litellm_stub(state: StubState) -> Router {
    Router::new()
        .route("/v1/models", get(litellm_models))
        .route("/v1/chat/completions", post(litellm_chat))
        .with_state(state)
}

async fn litellm_models(State(state): State<StubState>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").is_none() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "missing api key"}})),
        );
    }
    let data: Vec<Value> = state
        .models
        .iter()
        .map(|id| json!({"id": id, "object": "model", "owned_by": "openai"}))
        .collect();
    (StatusCode::OK, Json(json!({"object": "list", "data": data})))
}

async fn litellm_chat(
    State(state): State<StubState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record(uri.path(), &headers, &body);
    Json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "A short summary."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 30, "completion_tokens": 5, "total_tokens": 35}
    }))
}

// =============================================================================
// Misbehaving backends
// =============================================================================

/// Answers every request with a fixed status and body
pub fn fixed_stub(status: StatusCode, body: &'static str) -> Router {
    Router::new().fallback(move || async move { (status, body) })
}

/// Accepts connections and never answers
pub fn hanging_stub() -> Router {
    Router::new().fallback(|| async { std::future::pending::<StatusCode>().await })
}
