//! Ollama Adapter
//!
//! Local inference daemon speaking the Ollama REST API.
//!
//! - `GET  /api/tags` - model listing, used by probes
//! - `POST /api/chat` - chat completion, always with `stream: false`
//!
//! Ollama takes `think`, `format` and `keep_alive` at the top level of the
//! request; every other option goes into the nested `options` object.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::http;
use super::traits::{ChatPayload, ProviderAdapter};
use crate::call::{ErrorKind, MeshResult};
use crate::descriptor::{BackendDescriptor, ProviderKind};
use crate::status::BackendStatus;

/// Options Ollama expects beside `model` rather than inside `options`
const TOP_LEVEL_OPTIONS: [&str; 3] = ["think", "format", "keep_alive"];

/// Adapter for Ollama backends
#[derive(Clone)]
pub struct OllamaAdapter {
    client: Client,
}

impl OllamaAdapter {
    /// Adapter whose requests give up after `timeout`
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: http::build_client(timeout),
        }
    }

    /// Adapter using an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Request body for `/api/chat`
    pub(crate) fn build_request(descriptor: &BackendDescriptor, payload: &ChatPayload) -> Value {
        let mut options = payload.merged_options(descriptor);

        let mut request = Map::new();
        request.insert("model".into(), json!(descriptor.model_id()));
        request.insert("messages".into(), json!(payload.conversation()));
        request.insert("stream".into(), json!(false));

        for key in TOP_LEVEL_OPTIONS {
            if let Some(value) = options.remove(key) {
                request.insert(key.into(), value);
            }
        }
        options.remove("stream");
        if !options.is_empty() {
            request.insert("options".into(), Value::Object(options));
        }

        Value::Object(request)
    }

    /// Normalized value from a `/api/chat` response
    pub(crate) fn parse_response(
        descriptor: &BackendDescriptor,
        body: &Value,
    ) -> Result<Value, String> {
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(format!("ollama reported an error: {error}"));
        }

        let message = body
            .get("message")
            .ok_or_else(|| "response has no 'message'".to_string())?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| "response has no 'message.content'".to_string())?;

        let mut value = Map::new();
        value.insert("role".into(), json!(descriptor.role()));
        value.insert(
            "model".into(),
            body.get("model")
                .cloned()
                .unwrap_or_else(|| json!(descriptor.model_id())),
        );
        value.insert("content".into(), json!(content));

        if let Some(thinking) = message.get("thinking").and_then(Value::as_str) {
            if !thinking.is_empty() {
                value.insert("thinking".into(), json!(thinking));
            }
        }
        if let Some(reason) = body.get("done_reason").and_then(Value::as_str) {
            value.insert("finish_reason".into(), json!(reason));
        }

        let prompt_tokens = body.get("prompt_eval_count").and_then(Value::as_u64);
        let completion_tokens = body.get("eval_count").and_then(Value::as_u64);
        if prompt_tokens.is_some() || completion_tokens.is_some() {
            value.insert(
                "usage".into(),
                json!({
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                }),
            );
        }

        Ok(Value::Object(value))
    }
}

/// Listed model name that satisfies the configured one
///
/// A bare name matches its `:latest` tag, the way `ollama run` resolves it.
pub(crate) fn matching_model<'a>(listed: &'a [String], wanted: &str) -> Option<&'a str> {
    listed
        .iter()
        .find(|name| {
            *name == wanted || (!wanted.contains(':') && **name == format!("{wanted}:latest"))
        })
        .map(String::as_str)
}

fn listed_models(listing: &Value) -> Vec<String> {
    listing
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .flat_map(|m| {
                    ["name", "model"]
                        .into_iter()
                        .filter_map(move |key| m.get(key).and_then(Value::as_str))
                })
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    async fn invoke(&self, descriptor: &BackendDescriptor, payload: &Value) -> MeshResult {
        let payload = match ChatPayload::from_value(payload) {
            Ok(payload) => payload,
            Err(message) => return MeshResult::error(ErrorKind::InvalidRequest, message),
        };

        let url = http::join_url(descriptor, "api/chat");
        let request = Self::build_request(descriptor, &payload);

        tracing::debug!(role = descriptor.role(), model = descriptor.model_id(), %url, "Ollama chat");

        let response = match http::authorize(self.client.post(&url), descriptor)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return http::request_failure(descriptor, &e),
        };

        let body = match http::read_json(descriptor, response).await {
            Ok(body) => body,
            Err(failure) => return failure,
        };

        match Self::parse_response(descriptor, &body) {
            Ok(value) => MeshResult::success(value),
            Err(message) => MeshResult::error(
                ErrorKind::BackendProtocolError,
                format!("{}: {message}", descriptor.label()),
            ),
        }
    }

    async fn probe(&self, descriptor: &BackendDescriptor) -> BackendStatus {
        let url = http::join_url(descriptor, "api/tags");
        let listing = match http::fetch_listing(&self.client, descriptor, &url).await {
            Ok(listing) => listing,
            Err(detail) => return BackendStatus::unavailable(descriptor.role(), detail),
        };

        if listing.get("models").and_then(Value::as_array).is_none() {
            return BackendStatus::unavailable(
                descriptor.role(),
                format!("{url} did not return a model listing"),
            );
        }

        let listed = listed_models(&listing);
        if let Some(name) = matching_model(&listed, descriptor.model_id()) {
            let status = BackendStatus::available(descriptor.role());
            if name == descriptor.model_id() {
                status
            } else {
                status.with_detail(format!("resolved to {name}"))
            }
        } else {
            BackendStatus::unavailable(
                descriptor.role(),
                format!(
                    "model '{model}' is not installed on {endpoint} (run `ollama pull {model}`)",
                    model = descriptor.model_id(),
                    endpoint = descriptor.endpoint(),
                ),
            )
        }
    }
}
