//! Routing Proxy Adapter
//!
//! Multi-provider routing proxy (LiteLLM) speaking the OpenAI-compatible API.
//!
//! - `GET  /v1/models`           - served model ids, used by probes
//! - `POST /v1/chat/completions` - chat completion, always with `stream: false`
//!
//! Endpoints configured with a trailing `/v1` are not doubled. Options are
//! merged into the request body as-is, so proxy-specific fields pass through.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::http;
use super::traits::{ChatMessage, ChatPayload, ProviderAdapter};
use crate::call::{ErrorKind, MeshResult};
use crate::descriptor::{BackendDescriptor, ProviderKind};
use crate::status::BackendStatus;

/// Adapter for LiteLLM-style routing proxies
#[derive(Clone)]
pub struct RoutedAdapter {
    client: Client,
}

impl RoutedAdapter {
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

    /// URL of an OpenAI-style resource under `/v1`
    pub(crate) fn api_url(descriptor: &BackendDescriptor, resource: &str) -> String {
        let base = descriptor.endpoint().as_str().trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/{resource}")
        } else {
            format!("{base}/v1/{resource}")
        }
    }

    /// Request body for `/v1/chat/completions`
    pub(crate) fn build_request(descriptor: &BackendDescriptor, payload: &ChatPayload) -> Value {
        let mut request = payload.merged_options(descriptor);
        request.insert("model".into(), json!(descriptor.model_id()));
        request.insert(
            "messages".into(),
            Value::Array(payload.conversation().iter().map(openai_message).collect()),
        );
        request.insert("stream".into(), json!(false));
        Value::Object(request)
    }

    /// Normalized value from a chat completion response
    pub(crate) fn parse_response(
        descriptor: &BackendDescriptor,
        body: &Value,
    ) -> Result<Value, String> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| "response has no 'choices'".to_string())?;
        let message = choice
            .get("message")
            .ok_or_else(|| "first choice has no 'message'".to_string())?;
        let content = match message.get("content") {
            Some(Value::String(content)) => content.clone(),
            None | Some(Value::Null) => String::new(),
            Some(_) => return Err("'message.content' is not a string".to_string()),
        };

        let mut value = Map::new();
        value.insert("role".into(), json!(descriptor.role()));
        value.insert(
            "model".into(),
            body.get("model")
                .cloned()
                .unwrap_or_else(|| json!(descriptor.model_id())),
        );
        value.insert("content".into(), json!(content));

        if let Some(thinking) = message.get("reasoning_content").and_then(Value::as_str) {
            if !thinking.is_empty() {
                value.insert("thinking".into(), json!(thinking));
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            value.insert("finish_reason".into(), json!(reason));
        }
        if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
            value.insert("usage".into(), usage.clone());
        }

        Ok(Value::Object(value))
    }
}

/// OpenAI message; images become `image_url` content parts
fn openai_message(message: &ChatMessage) -> Value {
    if message.images.is_empty() {
        return json!({"role": message.role, "content": message.content});
    }

    let mut parts = vec![json!({"type": "text", "text": message.content})];
    parts.extend(message.images.iter().map(|image| {
        let url = if image.starts_with("data:") || image.starts_with("http") {
            image.clone()
        } else {
            format!("data:image/png;base64,{image}")
        };
        json!({"type": "image_url", "image_url": {"url": url}})
    }));
    json!({"role": message.role, "content": parts})
}

#[async_trait]
impl ProviderAdapter for RoutedAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LiteLlm
    }

    fn name(&self) -> &str {
        "LiteLLM"
    }

    async fn invoke(&self, descriptor: &BackendDescriptor, payload: &Value) -> MeshResult {
        let payload = match ChatPayload::from_value(payload) {
            Ok(payload) => payload,
            Err(message) => return MeshResult::error(ErrorKind::InvalidRequest, message),
        };

        let url = Self::api_url(descriptor, "chat/completions");
        let request = Self::build_request(descriptor, &payload);

        tracing::debug!(role = descriptor.role(), model = descriptor.model_id(), %url, "Proxy chat");

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
        let url = Self::api_url(descriptor, "models");
        let listing = match http::fetch_listing(&self.client, descriptor, &url).await {
            Ok(listing) => listing,
            Err(detail) => return BackendStatus::unavailable(descriptor.role(), detail),
        };

        let Some(data) = listing.get("data").and_then(Value::as_array) else {
            return BackendStatus::unavailable(
                descriptor.role(),
                format!("{url} did not return a model listing"),
            );
        };

        let served = data
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .any(|id| id == descriptor.model_id());

        if served {
            BackendStatus::available(descriptor.role())
        } else {
            BackendStatus::unavailable(
                descriptor.role(),
                format!(
                    "model '{}' is not served by the routing proxy at {}",
                    descriptor.model_id(),
                    descriptor.endpoint()
                ),
            )
        }
    }
}
