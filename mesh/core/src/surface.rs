//! Tool Surface Adapter
//!
//! Exposes the router as agent-callable tools:
//!
//! - `<tool_name>` (default `model_mesh`): `{ role | task, payload, call_id? }`
//!   routed through the mesh.
//! - `<tool_name>_status`: every role's current status and call counters,
//!   answered from memory without touching any backend.
//!
//! Responses map onto MCP `tools/call` results: success and degraded are
//! regular results (`isError: false`, degraded text prefixed `[degraded]`),
//! errors set `isError: true`. `structuredContent` always carries the tagged
//! result so agents can branch on `status`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::call::{ErrorKind, MeshCall, MeshResult};
use crate::descriptor::BackendEntry;
use crate::mesh::MeshError;
use crate::prompts::PromptCatalog;
use crate::router::MeshRouter;

/// Longest accepted tool name
const MAX_TOOL_NAME_LEN: usize = 64;

// ============================================================================
// Wire Types
// ============================================================================

/// Tool advertised to agents
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema of the arguments
    pub input_schema: Value,
    /// JSON Schema of `structuredContent`
    pub output_schema: Value,
}

/// One tool call from an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool being called
    pub tool_name: String,
    /// Raw arguments object
    #[serde(default)]
    pub arguments: Value,
    /// Correlation id from the transport, used when arguments carry none
    #[serde(default)]
    pub call_id: Option<String>,
}

impl ToolInvocation {
    /// Invocation without a transport correlation id
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            call_id: None,
        }
    }

    /// Attach a transport correlation id
    #[must_use]
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// Outcome class of a tool call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Backend answered
    Success,
    /// Backend known unavailable
    Degraded,
    /// Call rejected or failed
    Error,
}

/// Tool result handed back to the agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Outcome class
    pub status: ToolStatus,
    /// Success value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Degraded reason or error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ToolResponse {
    /// Successful response
    #[must_use]
    pub fn success(value: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            value: Some(value),
            message: None,
            kind: None,
        }
    }

    /// Error response
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            value: None,
            message: Some(message.into()),
            kind: Some(kind),
        }
    }

    /// Whether the agent should treat this as a failed call
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Tagged form matching the output schema
    #[must_use]
    pub fn structured_content(&self) -> Value {
        let message = self.message.clone().unwrap_or_default();
        match self.status {
            ToolStatus::Success => json!({
                "status": "success",
                "value": self.value.clone().unwrap_or(Value::Null),
            }),
            ToolStatus::Degraded => json!({"status": "degraded", "reason": message}),
            ToolStatus::Error => json!({
                "status": "error",
                "kind": self.kind.unwrap_or(ErrorKind::InvalidRequest),
                "message": message,
            }),
        }
    }

    /// Text shown to the agent
    #[must_use]
    pub fn text(&self) -> String {
        match self.status {
            ToolStatus::Success => match &self.value {
                Some(Value::Object(value)) if value.get("content").is_some_and(Value::is_string) => {
                    value["content"].as_str().unwrap_or_default().to_string()
                }
                Some(value) => value.to_string(),
                None => String::new(),
            },
            ToolStatus::Degraded => format!(
                "[degraded] {}",
                self.message.as_deref().unwrap_or_default()
            ),
            ToolStatus::Error => format!(
                "[{}] {}",
                self.kind.unwrap_or(ErrorKind::InvalidRequest),
                self.message.as_deref().unwrap_or_default()
            ),
        }
    }

    /// MCP `tools/call` result object
    #[must_use]
    pub fn to_call_tool_result(&self) -> Value {
        json!({
            "content": [{"type": "text", "text": self.text()}],
            "structuredContent": self.structured_content(),
            "isError": self.is_error(),
        })
    }
}

impl From<MeshResult> for ToolResponse {
    fn from(result: MeshResult) -> Self {
        match result {
            MeshResult::Success { value } => Self::success(value),
            MeshResult::Degraded { reason } => Self {
                status: ToolStatus::Degraded,
                value: None,
                message: Some(reason),
                kind: None,
            },
            MeshResult::Error { kind, message } => Self::error(kind, message),
        }
    }
}

// ============================================================================
// Tool Surface
// ============================================================================

/// Agent-facing tools over a router
pub struct ToolSurface {
    tool_name: String,
    status_tool_name: String,
    router: Arc<MeshRouter>,
    prompts: Arc<PromptCatalog>,
}

impl ToolSurface {
    /// Surface publishing `tool_name` and `<tool_name>_status`
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidToolName`] unless the name is non-empty,
    /// made of ASCII letters, digits, `_` or `-`, and short enough that
    /// `<name>_status` fits in 64 characters.
    pub fn new(
        tool_name: impl Into<String>,
        router: Arc<MeshRouter>,
        prompts: Arc<PromptCatalog>,
    ) -> Result<Self, MeshError> {
        let tool_name = tool_name.into();
        let valid = !tool_name.is_empty()
            && tool_name.len() + "_status".len() <= MAX_TOOL_NAME_LEN
            && tool_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(MeshError::InvalidToolName(tool_name));
        }

        Ok(Self {
            status_tool_name: format!("{tool_name}_status"),
            tool_name,
            router,
            prompts,
        })
    }

    /// Primary tool name
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Status tool name
    #[must_use]
    pub fn status_tool_name(&self) -> &str {
        &self.status_tool_name
    }

    /// Tools to advertise
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let roles = self.router.roles();
        let listed = if roles.is_empty() {
            "none".to_string()
        } else {
            roles.join(", ")
        };

        let mut properties = Map::new();
        properties.insert(
            "role".into(),
            json!({"type": "string", "enum": roles, "description": "Role to call"}),
        );
        if !self.router.rules().is_empty() {
            let tasks: Vec<&str> = self
                .router
                .rules()
                .rules()
                .iter()
                .map(|rule| rule.task.as_str())
                .collect();
            properties.insert(
                "task".into(),
                json!({
                    "type": "string",
                    "description": format!(
                        "Task label routed to a role when 'role' is absent. Known tasks: {}",
                        tasks.join(", ")
                    ),
                }),
            );
        }
        properties.insert("payload".into(), payload_schema());
        properties.insert(
            "call_id".into(),
            json!({"type": "string", "description": "Correlation id echoed in logs"}),
        );

        vec![
            ToolDescriptor {
                name: self.tool_name.clone(),
                description: format!(
                    "Call a specialised model by role. Configured roles: {listed}. \
                     A role whose backend is down answers with a degraded result \
                     instead of failing."
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": properties,
                    "required": ["payload"],
                }),
                output_schema: output_schema(),
            },
            ToolDescriptor {
                name: self.status_tool_name.clone(),
                description: "Report the availability of every configured role without \
                              contacting any backend."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "role": {"type": "string", "enum": roles, "description": "Limit the report to one role"}
                    },
                }),
                output_schema: output_schema(),
            },
        ]
    }

    /// Handle one tool call
    pub async fn invoke(&self, invocation: ToolInvocation) -> ToolResponse {
        if invocation.tool_name == self.tool_name {
            match self.parse_call(invocation) {
                Ok(call) => self.router.dispatch(call).await.into(),
                Err(response) => response,
            }
        } else if invocation.tool_name == self.status_tool_name {
            self.status_report(&invocation.arguments)
        } else {
            ToolResponse::error(
                ErrorKind::UnknownTool,
                format!(
                    "unknown tool '{}' (available: {}, {})",
                    invocation.tool_name, self.tool_name, self.status_tool_name
                ),
            )
        }
    }

    fn parse_call(&self, invocation: ToolInvocation) -> Result<MeshCall, ToolResponse> {
        let mut args = match invocation.arguments {
            Value::Object(args) => args,
            Value::Null => Map::new(),
            _ => return Err(invalid("arguments must be an object")),
        };

        let role = match (take_string(&mut args, "role")?, take_string(&mut args, "task")?) {
            (Some(role), _) => role,
            (None, Some(task)) => match self.router.infer_role(&task) {
                Some(role) => role.to_string(),
                None => {
                    return Err(ToolResponse::error(
                        ErrorKind::UnknownRole,
                        format!("no routing rule matches task '{task}'"),
                    ))
                }
            },
            (None, None) => return Err(invalid("arguments need a 'role' or a 'task'")),
        };

        let call_id = take_string(&mut args, "call_id")?.or(invocation.call_id);

        // Agents sometimes flatten the payload into the arguments.
        let mut payload = match args.remove("payload") {
            Some(payload) => payload,
            None if !args.is_empty() => Value::Object(args),
            None => return Err(invalid("arguments need a 'payload'")),
        };
        self.apply_system_prompt(&role, &mut payload);

        let call = MeshCall::new(role, payload);
        Ok(match call_id {
            Some(id) => call.with_call_id(id),
            None => call,
        })
    }

    fn apply_system_prompt(&self, role: &str, payload: &mut Value) {
        let Some(system) = self.prompts.system_prompt(role) else {
            return;
        };
        match payload {
            Value::String(prompt) => {
                *payload = json!({"prompt": prompt, "system": system});
            }
            Value::Object(fields) if !fields.contains_key("system") => {
                fields.insert("system".into(), json!(system));
            }
            _ => {}
        }
    }

    fn status_report(&self, arguments: &Value) -> ToolResponse {
        let mut args = arguments.as_object().cloned().unwrap_or_default();
        let filter = match take_string(&mut args, "role") {
            Ok(filter) => filter,
            Err(response) => return response,
        };
        let filter = filter.as_deref();
        if let Some(role) = filter {
            if self.router.status(role).is_none() {
                return ToolResponse::error(
                    ErrorKind::UnknownRole,
                    format!("unknown role '{role}'"),
                );
            }
        }

        let roles: Vec<Value> = self
            .router
            .statuses()
            .into_iter()
            .filter(|status| filter.map_or(true, |role| status.role == role))
            .map(|status| {
                let mut entry = json!({
                    "role": status.role,
                    "state": status.state,
                    "last_checked": status.last_checked,
                    "detail": status.detail,
                });
                if let Some(BackendEntry::Ready(descriptor)) = self.router.backend(&status.role) {
                    entry["model"] = json!(descriptor.model_id());
                    entry["provider"] = json!(descriptor.provider_kind());
                    entry["endpoint"] = json!(descriptor.endpoint().as_str());
                }
                if let Some(stats) = self.router.stats().role(&status.role) {
                    entry["stats"] = json!(stats);
                }
                entry
            })
            .collect();

        ToolResponse::success(json!({"roles": roles}))
    }
}

impl std::fmt::Debug for ToolSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSurface")
            .field("tool_name", &self.tool_name)
            .field("prompts", &self.prompts.len())
            .finish_non_exhaustive()
    }
}

fn invalid(message: &str) -> ToolResponse {
    ToolResponse::error(ErrorKind::InvalidRequest, message)
}

/// Remove a string argument; empty strings count as absent
fn take_string(args: &mut Map<String, Value>, key: &str) -> Result<Option<String>, ToolResponse> {
    match args.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ToolResponse::error(
            ErrorKind::InvalidRequest,
            format!("'{key}' must be a string"),
        )),
    }
}

fn payload_schema() -> Value {
    json!({
        "description": "Prompt text, or a chat request object",
        "oneOf": [
            {"type": "string"},
            {
                "type": "object",
                "properties": {
                    "prompt": {"type": "string"},
                    "system": {"type": "string"},
                    "messages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": {"type": "string"},
                                "content": {"type": "string"}
                            },
                            "required": ["role", "content"]
                        }
                    },
                    "images": {"type": "array", "items": {"type": "string"}},
                    "options": {"type": "object"}
                }
            }
        ]
    })
}

fn output_schema() -> Value {
    json!({
        "type": "object",
        "oneOf": [
            {
                "properties": {
                    "status": {"const": "success"},
                    "value": {}
                },
                "required": ["status", "value"]
            },
            {
                "properties": {
                    "status": {"const": "degraded"},
                    "reason": {"type": "string"}
                },
                "required": ["status", "reason"]
            },
            {
                "properties": {
                    "status": {"const": "error"},
                    "kind": {
                        "type": "string",
                        "enum": [
                            "unknown_role",
                            "backend_unreachable",
                            "backend_timeout",
                            "backend_protocol_error",
                            "invalid_request",
                            "unknown_tool"
                        ]
                    },
                    "message": {"type": "string"}
                },
                "required": ["status", "kind", "message"]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        BackendDefaults, BackendDescriptor, BackendSpec, BackendTable, ProviderKind,
    };
    use crate::provider::{ProviderAdapter, ProviderAdapters, ProviderTimeouts};
    use crate::router::{RoutingRule, RoutingRules};
    use crate::status::{BackendStatus, StatusBoard};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    /// Adapter that echoes the payload back as the response value
    struct EchoAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Ollama
        }

        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, descriptor: &BackendDescriptor, payload: &Value) -> MeshResult {
            MeshResult::success(json!({
                "role": descriptor.role(),
                "content": "echo",
                "payload": payload,
            }))
        }

        async fn probe(&self, descriptor: &BackendDescriptor) -> BackendStatus {
            BackendStatus::available(descriptor.role())
        }
    }

    fn surface(prompts: PromptCatalog) -> ToolSurface {
        let mut specs = BTreeMap::new();
        specs.insert("guardian".to_string(), BackendSpec::new("granite"));
        specs.insert("vision".to_string(), BackendSpec::new("docling"));
        let table = Arc::new(BackendTable::from_specs(&specs, &BackendDefaults::new("ollama")));
        let board = Arc::new(StatusBoard::new(table.roles()));
        board.record(BackendStatus::available("guardian"));
        board.record(BackendStatus::unavailable("vision", "model missing"));

        let mut adapters = ProviderAdapters::new();
        adapters.insert(Arc::new(EchoAdapter));
        let rules = RoutingRules::new(vec![RoutingRule::new("safety", "guardian")], &table);
        let router = MeshRouter::new(table, board, adapters, ProviderTimeouts::default(), rules);

        ToolSurface::new("model_mesh", Arc::new(router), Arc::new(prompts)).unwrap()
    }

    #[test]
    fn test_tool_name_validation() {
        let s = surface(PromptCatalog::new());
        let long = "x".repeat(60);
        for bad in ["", "has space", "ümlaut", long.as_str()] {
            let err = ToolSurface::new(bad, Arc::clone(&s.router), Arc::clone(&s.prompts));
            assert!(matches!(err, Err(MeshError::InvalidToolName(_))), "{bad}");
        }
    }

    #[test]
    fn test_descriptors() {
        let tools = surface(PromptCatalog::new()).descriptors();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "model_mesh");
        assert_eq!(tools[1].name, "model_mesh_status");
        assert_eq!(
            tools[0].input_schema["properties"]["role"]["enum"],
            json!(["guardian", "vision"])
        );
        assert!(tools[0].input_schema["properties"].get("task").is_some());

        let wire = serde_json::to_value(&tools[0]).unwrap();
        assert!(wire.get("inputSchema").is_some());
        assert!(wire.get("outputSchema").is_some());
    }

    #[tokio::test]
    async fn test_success_mapping() {
        let response = surface(PromptCatalog::new())
            .invoke(ToolInvocation::new(
                "model_mesh",
                json!({"role": "guardian", "payload": "hello"}),
            ))
            .await;

        let result = response.to_call_tool_result();
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["content"][0]["text"], json!("echo"));
        assert_eq!(result["structuredContent"]["status"], json!("success"));
    }

    #[tokio::test]
    async fn test_degraded_mapping() {
        let response = surface(PromptCatalog::new())
            .invoke(ToolInvocation::new(
                "model_mesh",
                json!({"role": "vision", "payload": {"prompt": "read this"}}),
            ))
            .await;

        let result = response.to_call_tool_result();
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["content"][0]["text"], json!("[degraded] model missing"));
        assert_eq!(
            result["structuredContent"],
            json!({"status": "degraded", "reason": "model missing"})
        );
    }

    #[tokio::test]
    async fn test_error_mappings() {
        let s = surface(PromptCatalog::new());

        let response = s
            .invoke(ToolInvocation::new("model_mesh", json!({"role": "poet", "payload": "x"})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::UnknownRole));
        assert_eq!(response.to_call_tool_result()["isError"], json!(true));

        let response = s.invoke(ToolInvocation::new("summon", json!({}))).await;
        assert_eq!(response.kind, Some(ErrorKind::UnknownTool));

        let response = s
            .invoke(ToolInvocation::new("model_mesh", json!({"payload": "x"})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::InvalidRequest));

        let response = s
            .invoke(ToolInvocation::new("model_mesh", json!({"role": 3, "payload": "x"})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::InvalidRequest));

        let response = s
            .invoke(ToolInvocation::new("model_mesh", json!({"role": "guardian"})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn test_task_routing() {
        let s = surface(PromptCatalog::new());
        let response = s
            .invoke(ToolInvocation::new(
                "model_mesh",
                json!({"task": "SAFETY", "payload": "x"}),
            ))
            .await;
        assert_eq!(response.value.unwrap()["role"], json!("guardian"));

        let response = s
            .invoke(ToolInvocation::new("model_mesh", json!({"task": "poetry", "payload": "x"})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::UnknownRole));
    }

    #[tokio::test]
    async fn test_system_prompt_insertion() {
        let s = surface(PromptCatalog::new().with_prompt("guardian", "Answer Yes or No."));

        let response = s
            .invoke(ToolInvocation::new(
                "model_mesh",
                json!({"role": "guardian", "payload": "is this harmful?"}),
            ))
            .await;
        assert_eq!(
            response.value.unwrap()["payload"],
            json!({"prompt": "is this harmful?", "system": "Answer Yes or No."})
        );

        let response = s
            .invoke(ToolInvocation::new(
                "model_mesh",
                json!({"role": "guardian", "payload": {"prompt": "x", "system": "custom"}}),
            ))
            .await;
        assert_eq!(response.value.unwrap()["payload"]["system"], json!("custom"));
    }

    #[tokio::test]
    async fn test_flattened_payload() {
        let response = surface(PromptCatalog::new())
            .invoke(ToolInvocation::new(
                "model_mesh",
                json!({"role": "guardian", "prompt": "flat"}),
            ))
            .await;
        assert_eq!(response.value.unwrap()["payload"], json!({"prompt": "flat"}));
    }

    #[tokio::test]
    async fn test_status_tool() {
        let s = surface(PromptCatalog::new());
        let response = s
            .invoke(ToolInvocation::new("model_mesh_status", json!({})))
            .await;

        let roles = response.value.unwrap()["roles"].clone();
        assert_eq!(roles[0]["role"], json!("guardian"));
        assert_eq!(roles[0]["state"], json!("available"));
        assert_eq!(roles[0]["provider"], json!("ollama"));
        assert_eq!(roles[1]["state"], json!("unavailable"));
        assert_eq!(roles[1]["detail"], json!("model missing"));

        let response = s
            .invoke(ToolInvocation::new("model_mesh_status", json!({"role": "vision"})))
            .await;
        assert_eq!(response.value.unwrap()["roles"].as_array().unwrap().len(), 1);

        let response = s
            .invoke(ToolInvocation::new("model_mesh_status", json!({"role": "poet"})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::UnknownRole));

        let response = s
            .invoke(ToolInvocation::new("model_mesh_status", json!({"role": 3})))
            .await;
        assert_eq!(response.kind, Some(ErrorKind::InvalidRequest));
    }
}
