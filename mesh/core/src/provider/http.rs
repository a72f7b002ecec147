//! Shared HTTP plumbing for the provider adapters
//!
//! Client construction, URL joining, authentication and the mapping of
//! reqwest failures onto mesh error kinds.

use std::error::Error as _;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::call::{ErrorKind, MeshResult};
use crate::descriptor::BackendDescriptor;

/// Upper bound on TCP connect, independent of the request timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest provider error body quoted back to callers
const MAX_ERROR_EXCERPT: usize = 300;

/// Pooled client shared by every role of one provider kind
pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

/// Join a path onto the descriptor's endpoint without doubling slashes
pub(crate) fn join_url(descriptor: &BackendDescriptor, path: &str) -> String {
    format!(
        "{}/{}",
        descriptor.endpoint().as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Apply bearer auth and extra headers from the descriptor options
pub(crate) fn authorize(mut request: RequestBuilder, descriptor: &BackendDescriptor) -> RequestBuilder {
    if let Some(key) = descriptor.api_key() {
        request = request.bearer_auth(key);
    }
    for (name, value) in descriptor.extra_headers() {
        request = request.header(name, value);
    }
    request
}

/// Error kind for a failed reqwest call
pub(crate) fn classify(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::BackendTimeout
    } else if err.is_decode() || err.is_status() {
        ErrorKind::BackendProtocolError
    } else {
        ErrorKind::BackendUnreachable
    }
}

/// Error display including the source chain (reqwest's own message is terse)
pub(crate) fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Mesh error for a failed request
pub(crate) fn request_failure(descriptor: &BackendDescriptor, err: &reqwest::Error) -> MeshResult {
    MeshResult::error(
        classify(err),
        format!(
            "{} at {}: {}",
            descriptor.label(),
            descriptor.endpoint(),
            describe(err)
        ),
    )
}

/// Read a successful JSON body, mapping HTTP errors to protocol errors
pub(crate) async fn read_json(
    descriptor: &BackendDescriptor,
    response: Response,
) -> Result<Value, MeshResult> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MeshResult::error(
            ErrorKind::BackendProtocolError,
            format!(
                "{} answered HTTP {}: {}",
                descriptor.label(),
                status,
                error_excerpt(&body)
            ),
        ));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| request_failure(descriptor, &e))
}

/// Fetch a model listing for a probe; failures become a status detail
pub(crate) async fn fetch_listing(
    client: &Client,
    descriptor: &BackendDescriptor,
    url: &str,
) -> Result<Value, String> {
    let response = authorize(client.get(url), descriptor)
        .send()
        .await
        .map_err(|e| format!("cannot reach {url}: {}", describe(&e)))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(format!("{url} rejected the credentials (HTTP {status})"));
    }
    if !status.is_success() {
        return Err(format!("{url} answered HTTP {status}"));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| format!("{url} returned an unreadable model listing: {}", describe(&e)))
}

/// Provider error message from a body, or a truncated copy of it
pub(crate) fn error_excerpt(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let body = body.trim();
    if body.is_empty() {
        return "empty response body".to_string();
    }
    match body.char_indices().nth(MAX_ERROR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
