//! Backend Descriptors
//!
//! Immutable configuration for one logical role: which model to call, which
//! provider family speaks to it, where it lives, and a free-form option bag.
//!
//! Descriptors are validated once, when the mesh is built. A role whose
//! configuration is broken does not stop the mesh from coming up; it is kept
//! in the [`BackendTable`] as [`BackendEntry::Misconfigured`] so the router
//! can report it as degraded instead of unknown.
//!
//! # Provider Kinds
//!
//! | Kind | Config spellings | Default endpoint |
//! |------|------------------|------------------|
//! | [`ProviderKind::Ollama`] | `ollama`, `local_daemon` | `http://localhost:11434` |
//! | [`ProviderKind::LiteLlm`] | `litellm`, `routed_multi_provider` | `http://localhost:4000` |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Provider-specific option bag, opaque to the router
pub type Options = Map<String, Value>;

/// Option keys consumed by the adapters themselves and never forwarded to a
/// model as inference options
pub const RESERVED_OPTION_KEYS: [&str; 3] = ["api_key", "api_key_env", "headers"];

// ============================================================================
// Configuration Errors
// ============================================================================

/// A role whose configuration cannot be turned into a descriptor
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Role name is empty or whitespace
    #[error("role name must not be empty")]
    EmptyRole,

    /// No model identifier was configured for the role
    #[error("role '{role}' has no model identifier")]
    EmptyModel {
        /// Offending role
        role: String,
    },

    /// Provider kind is not one of the supported kinds
    #[error("role '{role}' uses unknown provider '{provider}' (expected one of: ollama, litellm)")]
    UnknownProvider {
        /// Offending role
        role: String,
        /// Provider name as configured
        provider: String,
    },

    /// Endpoint is not a usable http(s) URL
    #[error("role '{role}' has invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Offending role
        role: String,
        /// Endpoint as configured
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },

    /// Same role registered twice
    #[error("role '{role}' is configured more than once")]
    DuplicateRole {
        /// Offending role
        role: String,
    },
}

// ============================================================================
// Provider Kind
// ============================================================================

/// Closed set of provider families the mesh knows how to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Local inference daemon (Ollama REST API)
    #[serde(rename = "ollama")]
    Ollama,
    /// Multi-provider routing proxy with an OpenAI-compatible API (LiteLLM)
    #[serde(rename = "litellm")]
    LiteLlm,
}

impl ProviderKind {
    /// Every supported kind
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Ollama, ProviderKind::LiteLlm];

    /// Parse a configured provider name, accepting the descriptive aliases
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local_daemon" => Some(Self::Ollama),
            "litellm" | "routed_multi_provider" => Some(Self::LiteLlm),
            _ => None,
        }
    }

    /// Canonical configuration name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LiteLlm => "litellm",
        }
    }

    /// Endpoint used when neither the role nor the mesh configures one
    #[must_use]
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::LiteLlm => "http://localhost:4000",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Raw Backend Spec
// ============================================================================

/// One role's configuration as written by the operator, before validation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSpec {
    /// Model identifier understood by the provider
    pub model: String,

    /// Provider name; falls back to the mesh default provider
    pub provider: Option<String>,

    /// Base endpoint; falls back to the mesh base URL, then the provider default
    pub base_url: Option<String>,

    /// Provider-specific options (temperature, think, api_key_env, ...)
    pub options: Options,
}

impl BackendSpec {
    /// Spec for a model with every other field defaulted
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the provider name
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the base endpoint
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add one option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Mesh-wide Defaults
// ============================================================================

/// Fallbacks for roles that leave provider or endpoint unset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendDefaults {
    /// Provider name used when a role names none
    pub provider: String,
    /// Endpoint per provider kind, overriding the kind's built-in default
    pub endpoints: BTreeMap<ProviderKind, String>,
}

impl Default for BackendDefaults {
    fn default() -> Self {
        Self {
            provider: ProviderKind::LiteLlm.as_str().to_string(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl BackendDefaults {
    /// Defaults with the given provider and no endpoint overrides
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            endpoints: BTreeMap::new(),
        }
    }

    /// Override the endpoint used for a kind
    #[must_use]
    pub fn with_endpoint(mut self, kind: ProviderKind, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(kind, endpoint.into());
        self
    }

    /// Endpoint for roles of `kind` that configure none
    #[must_use]
    pub fn endpoint_for(&self, kind: ProviderKind) -> &str {
        self.endpoints
            .get(&kind)
            .map_or_else(|| kind.default_endpoint(), String::as_str)
    }
}

// ============================================================================
// Backend Descriptor
// ============================================================================

/// Validated, immutable configuration for one role
#[derive(Clone, Debug, PartialEq)]
pub struct BackendDescriptor {
    role: String,
    model_id: String,
    provider_kind: ProviderKind,
    endpoint: Url,
    options: Options,
}

impl BackendDescriptor {
    /// Build a descriptor, validating role, model and endpoint
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the role or model is empty or the
    /// endpoint is not an absolute http(s) URL with a host.
    pub fn new(
        role: impl Into<String>,
        model_id: impl Into<String>,
        provider_kind: ProviderKind,
        endpoint: &str,
        options: Options,
    ) -> Result<Self, ConfigurationError> {
        let role = role.into().trim().to_string();
        if role.is_empty() {
            return Err(ConfigurationError::EmptyRole);
        }

        let model_id = model_id.into().trim().to_string();
        if model_id.is_empty() {
            return Err(ConfigurationError::EmptyModel { role });
        }

        let endpoint = parse_endpoint(&role, endpoint)?;

        Ok(Self {
            role,
            model_id,
            provider_kind,
            endpoint,
            options,
        })
    }

    /// Resolve a raw spec against the mesh-wide defaults
    ///
    /// The provider falls back to the default provider; the endpoint falls
    /// back to the per-kind default in `defaults`, then to the provider's own
    /// default endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for an unknown provider name or any
    /// failure of [`BackendDescriptor::new`].
    pub fn from_spec(
        role: &str,
        spec: &BackendSpec,
        defaults: &BackendDefaults,
    ) -> Result<Self, ConfigurationError> {
        if role.trim().is_empty() {
            return Err(ConfigurationError::EmptyRole);
        }

        let provider_name = spec.provider.as_deref().unwrap_or(&defaults.provider);
        let provider_kind =
            ProviderKind::from_name(provider_name).ok_or_else(|| {
                ConfigurationError::UnknownProvider {
                    role: role.to_string(),
                    provider: provider_name.to_string(),
                }
            })?;

        let endpoint = spec
            .base_url
            .as_deref()
            .unwrap_or_else(|| defaults.endpoint_for(provider_kind));

        Self::new(
            role,
            spec.model.clone(),
            provider_kind,
            endpoint,
            spec.options.clone(),
        )
    }

    /// Role this descriptor serves
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Target model identifier
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Provider family
    #[must_use]
    pub fn provider_kind(&self) -> ProviderKind {
        self.provider_kind
    }

    /// Base endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Full option bag, including reserved keys
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Options to forward to the model (reserved keys removed)
    #[must_use]
    pub fn model_options(&self) -> Options {
        self.options
            .iter()
            .filter(|(key, _)| !RESERVED_OPTION_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// API key from `api_key`, or from the environment variable named by `api_key_env`
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        if let Some(key) = self.options.get("api_key").and_then(Value::as_str) {
            return Some(key.to_string());
        }
        self.options
            .get("api_key_env")
            .and_then(Value::as_str)
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    /// Extra HTTP headers from the `headers` option
    #[must_use]
    pub fn extra_headers(&self) -> Vec<(String, String)> {
        self.options
            .get("headers")
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|v| (name.clone(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Short label for logs and degraded messages, e.g. `llama3 via ollama`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} via {}", self.model_id, self.provider_kind)
    }
}

fn parse_endpoint(role: &str, endpoint: &str) -> Result<Url, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidEndpoint {
        role: role.to_string(),
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

// ============================================================================
// Backend Table
// ============================================================================

/// A configured role: either a usable descriptor or the reason it is not
#[derive(Clone, Debug)]
pub enum BackendEntry {
    /// Valid descriptor
    Ready(Arc<BackendDescriptor>),
    /// Configuration rejected at construction; the role stays known but unavailable
    Misconfigured(ConfigurationError),
}

impl BackendEntry {
    /// Descriptor, if the role is usable
    #[must_use]
    pub fn descriptor(&self) -> Option<&Arc<BackendDescriptor>> {
        match self {
            Self::Ready(descriptor) => Some(descriptor),
            Self::Misconfigured(_) => None,
        }
    }
}

/// All roles of a mesh, keyed by role name
///
/// Built once; never mutated after the mesh is constructed.
#[derive(Clone, Debug, Default)]
pub struct BackendTable {
    entries: BTreeMap<String, BackendEntry>,
}

impl BackendTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every spec; broken specs become [`BackendEntry::Misconfigured`]
    #[must_use]
    pub fn from_specs(specs: &BTreeMap<String, BackendSpec>, defaults: &BackendDefaults) -> Self {
        let mut table = Self::new();
        for (role, spec) in specs {
            let entry = match BackendDescriptor::from_spec(role, spec, defaults) {
                Ok(descriptor) => BackendEntry::Ready(Arc::new(descriptor)),
                Err(e) => BackendEntry::Misconfigured(e),
            };
            // BTreeMap keys are unique; an empty role name is the only
            // rejection possible here and it has no key to live under.
            if let Err(e) = table.insert(role.trim(), entry) {
                tracing::warn!(role = %role, error = %e, "Dropping backend");
            }
        }
        table
    }

    /// Add a role
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyRole`] or
    /// [`ConfigurationError::DuplicateRole`]; the table is left unchanged.
    pub fn insert(&mut self, role: &str, entry: BackendEntry) -> Result<(), ConfigurationError> {
        let role = role.trim();
        if role.is_empty() {
            return Err(ConfigurationError::EmptyRole);
        }
        if self.entries.contains_key(role) {
            return Err(ConfigurationError::DuplicateRole {
                role: role.to_string(),
            });
        }
        self.entries.insert(role.to_string(), entry);
        Ok(())
    }

    /// Look up a role
    #[must_use]
    pub fn get(&self, role: &str) -> Option<&BackendEntry> {
        self.entries.get(role)
    }

    /// Whether the role exists (usable or not)
    #[must_use]
    pub fn contains(&self, role: &str) -> bool {
        self.entries.contains_key(role)
    }

    /// Role names in sorted order
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All entries in role order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BackendEntry)> {
        self.entries.iter().map(|(role, entry)| (role.as_str(), entry))
    }

    /// Provider kinds used by at least one valid descriptor
    #[must_use]
    pub fn provider_kinds(&self) -> BTreeSet<ProviderKind> {
        self.entries
            .values()
            .filter_map(BackendEntry::descriptor)
            .map(|d| d.provider_kind())
            .collect()
    }

    /// Number of roles
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no roles are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
