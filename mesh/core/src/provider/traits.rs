//! Provider Adapter Traits
//!
//! The seam between the router and a provider family, plus the chat payload
//! shape every adapter understands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::MeshResult;
use crate::descriptor::{BackendDescriptor, Options, ProviderKind, RESERVED_OPTION_KEYS};
use crate::status::BackendStatus;

// ============================================================================
// Provider Adapter Trait
// ============================================================================

/// Speaks one provider family's wire protocol
///
/// Adapters are stateless with respect to roles: the descriptor passed to
/// each call carries the endpoint, model and options. One adapter instance
/// per provider kind is shared by every role of that kind.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider family this adapter handles
    fn kind(&self) -> ProviderKind;

    /// Display name for logs
    fn name(&self) -> &str;

    /// Perform one inference call
    ///
    /// Never panics and never retries. Transport failures map to
    /// `backend_unreachable` / `backend_timeout`, unusable answers to
    /// `backend_protocol_error`, malformed payloads to `invalid_request`
    /// (before any I/O).
    async fn invoke(&self, descriptor: &BackendDescriptor, payload: &Value) -> MeshResult;

    /// Cheap check that the endpoint answers and serves the model
    ///
    /// Must not perform inference. The returned status carries the
    /// descriptor's role.
    async fn probe(&self, descriptor: &BackendDescriptor) -> BackendStatus;
}

// ============================================================================
// Chat Payload
// ============================================================================

/// A chat message as forwarded to a provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    #[serde(default)]
    pub content: String,
    /// Base64 images attached to this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    /// Message with no images
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// Normalized view of a mesh payload
///
/// Accepted payloads are either a bare string (taken as the prompt) or an
/// object `{prompt?, system?, messages?, images?, options?}` with at least a
/// prompt or a non-empty message list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatPayload {
    /// System prompt, sent first
    pub system: Option<String>,
    /// Conversation, ending with the prompt if one was given
    pub messages: Vec<ChatMessage>,
    /// Per-call option overrides
    pub options: Options,
}

impl ChatPayload {
    /// Parse and validate a payload
    ///
    /// # Errors
    ///
    /// Returns a message describing the first problem found.
    pub fn from_value(payload: &Value) -> Result<Self, String> {
        if let Value::String(prompt) = payload {
            return Self::from_prompt(prompt);
        }

        let object = payload
            .as_object()
            .ok_or_else(|| "payload must be a string or an object".to_string())?;

        let system = match object.get("system") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err("'system' must be a string".to_string()),
        };

        let mut messages: Vec<ChatMessage> = match object.get("messages") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| format!("'messages' is malformed: {e}"))?,
        };

        let images: Vec<String> = match object.get("images") {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| "'images' must be a list of base64 strings".to_string())?,
        };

        match object.get("prompt") {
            None | Some(Value::Null) => {
                if !images.is_empty() {
                    if let Some(last) = messages.iter_mut().rev().find(|m| m.role == "user") {
                        last.images.extend(images);
                    }
                }
            }
            Some(Value::String(prompt)) if prompt.trim().is_empty() => {
                return Err("prompt must not be empty".to_string());
            }
            Some(Value::String(prompt)) => messages.push(ChatMessage {
                role: "user".to_string(),
                content: prompt.clone(),
                images,
            }),
            Some(_) => return Err("'prompt' must be a string".to_string()),
        }

        if messages.is_empty() {
            return Err("payload needs a 'prompt' or a non-empty 'messages' list".to_string());
        }

        let options = match object.get("options") {
            None | Some(Value::Null) => Options::new(),
            Some(Value::Object(options)) => options.clone(),
            Some(_) => return Err("'options' must be an object".to_string()),
        };

        Ok(Self {
            system,
            messages,
            options,
        })
    }

    fn from_prompt(prompt: &str) -> Result<Self, String> {
        if prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        Ok(Self {
            messages: vec![ChatMessage::new("user", prompt)],
            ..Default::default()
        })
    }

    /// Full conversation with the system prompt first
    #[must_use]
    pub fn conversation(&self) -> Vec<ChatMessage> {
        let mut conversation = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            conversation.push(ChatMessage::new("system", system.clone()));
        }
        conversation.extend(self.messages.iter().cloned());
        conversation
    }

    /// Descriptor options overlaid with this call's options
    ///
    /// Reserved keys are dropped from both sides.
    #[must_use]
    pub fn merged_options(&self, descriptor: &BackendDescriptor) -> Options {
        let mut options = descriptor.model_options();
        for (key, value) in &self.options {
            if RESERVED_OPTION_KEYS.contains(&key.as_str()) {
                continue;
            }
            options.insert(key.clone(), value.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_string_payload_is_prompt() {
        let payload = ChatPayload::from_value(&json!("is this safe?")).unwrap();
        assert_eq!(payload.messages, vec![ChatMessage::new("user", "is this safe?")]);
    }

    #[test]
    fn test_object_payload() {
        let payload = ChatPayload::from_value(&json!({
            "system": "You are a classifier.",
            "messages": [{"role": "assistant", "content": "hi"}],
            "prompt": "classify this",
            "images": ["aGVsbG8="],
            "options": {"temperature": 0.2}
        }))
        .unwrap();

        let conversation = payload.conversation();
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[0].role, "system");
        assert_eq!(conversation[2].content, "classify this");
        assert_eq!(conversation[2].images, vec!["aGVsbG8=".to_string()]);
        assert_eq!(payload.options["temperature"], json!(0.2));
    }

    #[test]
    fn test_images_attach_to_last_user_message() {
        let payload = ChatPayload::from_value(&json!({
            "messages": [
                {"role": "user", "content": "describe"},
                {"role": "assistant", "content": "sure"}
            ],
            "images": ["aW1n"]
        }))
        .unwrap();
        assert_eq!(payload.messages[0].images, vec!["aW1n".to_string()]);
        assert!(payload.messages[1].images.is_empty());
    }

    #[test]
    fn test_rejects_empty_payloads() {
        assert!(ChatPayload::from_value(&json!({})).is_err());
        assert!(ChatPayload::from_value(&json!({"messages": []})).is_err());
        assert!(ChatPayload::from_value(&json!("")).is_err());
        assert!(ChatPayload::from_value(&json!({"prompt": ""})).is_err());
        assert!(ChatPayload::from_value(&json!({"prompt": "  ", "system": "Be brief."})).is_err());
        assert!(ChatPayload::from_value(&json!(42)).is_err());
        assert!(ChatPayload::from_value(&json!({"prompt": 7})).is_err());
        assert!(ChatPayload::from_value(&json!({"prompt": "x", "options": []})).is_err());
    }

    #[test]
    fn test_call_options_override_descriptor_options() {
        use crate::descriptor::{BackendDefaults, BackendSpec};

        let spec = BackendSpec::new("m")
            .with_option("temperature", 0)
            .with_option("think", true)
            .with_option("api_key", "k");
        let descriptor =
            BackendDescriptor::from_spec("r", &spec, &BackendDefaults::new("ollama")).unwrap();
        let payload =
            ChatPayload::from_value(&json!({"prompt": "x", "options": {"temperature": 0.7}}))
                .unwrap();

        let merged = payload.merged_options(&descriptor);
        assert_eq!(merged["temperature"], json!(0.7));
        assert_eq!(merged["think"], json!(true));
        assert!(!merged.contains_key("api_key"));
    }

    #[test]
    fn test_call_options_cannot_inject_reserved_keys() {
        use crate::descriptor::{BackendDefaults, BackendSpec};

        let descriptor = BackendDescriptor::from_spec(
            "r",
            &BackendSpec::new("m"),
            &BackendDefaults::new("litellm"),
        )
        .unwrap();
        let payload = ChatPayload::from_value(&json!({
            "prompt": "x",
            "options": {
                "api_key": "sk-leak",
                "api_key_env": "HOME",
                "headers": {"x": "y"},
                "max_tokens": 16
            }
        }))
        .unwrap();

        let merged = payload.merged_options(&descriptor);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["max_tokens"], json!(16));
    }
}
