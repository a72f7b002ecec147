//! TOML Configuration File Support
//!
//! Centralized configuration loading for the mesh, supporting a TOML file at
//! `~/.config/model-mesh/mesh.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! Without any file the defaults describe the reference deployment: a
//! `guardian` role on `ibm/granite3.3-guardian:8b` and a `vision` role on
//! `ibm/granite-docling`, both served by a local Ollama.
//!
//! # Example Configuration
//!
//! ```toml
//! tool_name = "model_mesh"
//! default_provider = "litellm"
//! base_url = "http://localhost:4000"
//! ollama_base_url = "http://localhost:11434"
//! prompt_config_path = "model_mesh_prompts.json"
//!
//! [timeouts]
//! ollama_secs = 120
//! litellm_secs = 60
//!
//! [probe]
//! on_startup = true
//! timeout_ms = 5000
//! reprobe_interval_secs = 60
//!
//! [backends.guardian]
//! model = "ibm/granite3.3-guardian:8b"
//! provider = "ollama"
//! options = { think = true, temperature = 0 }
//!
//! [backends.summarizer]
//! model = "gpt-4o-mini"
//! options = { api_key_env = "OPENAI_API_KEY" }
//!
//! [[routing.rules]]
//! task = "safety"
//! role = "guardian"
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `OLLAMA_BASE_URL` | Endpoint for Ollama roles that set none |
//! | `MODEL_MESH_DEFAULT_PROVIDER` | Provider for roles that name none |
//! | `MODEL_MESH_REPROBE_SECS` | Reprobe period, `0` disables |
//! | `MODEL_MESH_PROMPTS` | Prompt catalog path |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::descriptor::{BackendDefaults, BackendSpec, ProviderKind};
use crate::prober::ProbeConfig;
use crate::prompts::PromptCatalog;
use crate::provider::ProviderTimeouts;
use crate::router::RoutingRule;

/// Tool name used when none is configured
pub const DEFAULT_TOOL_NAME: &str = "model_mesh";

/// Prompt catalog file looked up when none is configured
pub const DEFAULT_PROMPT_FILE: &str = "model_mesh_prompts.json";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a config or prompt file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to parse the prompt catalog
    #[error("Failed to parse prompt catalog: {0}")]
    PromptParseError(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Timeouts section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsToml {
    /// Ollama call timeout in seconds
    pub ollama_secs: Option<u64>,

    /// LiteLLM call timeout in seconds
    pub litellm_secs: Option<u64>,
}

/// Probe section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeToml {
    /// Whether to probe every role at startup
    pub on_startup: Option<bool>,

    /// Per-probe timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Reprobe period in seconds (0 = disabled)
    pub reprobe_interval_secs: Option<u64>,
}

/// Routing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingToml {
    /// Task-to-role rules, first match wins
    pub rules: Vec<RoutingRule>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshToml {
    /// Name of the primary tool
    pub tool_name: Option<String>,

    /// Provider for roles that name none
    pub default_provider: Option<String>,

    /// Endpoint of the default provider
    pub base_url: Option<String>,

    /// Endpoint of the local Ollama daemon
    pub ollama_base_url: Option<String>,

    /// Prompt catalog path, relative to the config file
    pub prompt_config_path: Option<String>,

    /// Timeouts section
    pub timeouts: TimeoutsToml,

    /// Probe section
    pub probe: ProbeToml,

    /// Routing section
    pub routing: RoutingToml,

    /// Roles; when present, replaces the default role set entirely
    pub backends: Option<BTreeMap<String, BackendSpec>>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved mesh configuration
///
/// Consolidates all sources and tracks where the values came from. Use
/// [`load_config`] to load with proper priority handling.
#[derive(Clone, Debug)]
pub struct MeshConfig {
    /// Name of the primary tool
    pub tool_name: String,

    /// Provider for roles that name none
    pub default_provider: String,

    /// Endpoint of the default provider
    pub base_url: Option<String>,

    /// Endpoint of the local Ollama daemon
    pub ollama_base_url: Option<String>,

    /// Roles by name
    pub backends: BTreeMap<String, BackendSpec>,

    /// Per-provider call timeouts
    pub timeouts: ProviderTimeouts,

    /// Probing policy
    pub probe: ProbeConfig,

    /// Task-to-role rules
    pub routing_rules: Vec<RoutingRule>,

    /// Prompt catalog path
    pub prompt_config_path: Option<PathBuf>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for MeshConfig {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert(
            "guardian".to_string(),
            BackendSpec::new("ibm/granite3.3-guardian:8b")
                .with_provider(ProviderKind::Ollama.as_str())
                .with_option("think", json!(true))
                .with_option("temperature", json!(0)),
        );
        backends.insert(
            "vision".to_string(),
            BackendSpec::new("ibm/granite-docling").with_provider(ProviderKind::Ollama.as_str()),
        );

        Self {
            tool_name: DEFAULT_TOOL_NAME.to_string(),
            default_provider: ProviderKind::LiteLlm.as_str().to_string(),
            base_url: None,
            ollama_base_url: None,
            backends,
            timeouts: ProviderTimeouts::default(),
            probe: ProbeConfig::default(),
            routing_rules: Vec::new(),
            prompt_config_path: Some(PathBuf::from(DEFAULT_PROMPT_FILE)),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl MeshConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with exactly the given roles and otherwise defaults
    ///
    /// No prompt file is looked up.
    #[must_use]
    pub fn with_backends(backends: BTreeMap<String, BackendSpec>) -> Self {
        Self {
            backends,
            prompt_config_path: None,
            ..Self::default()
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Fallbacks applied to roles leaving provider or endpoint unset
    ///
    /// `base_url` belongs to the default provider; `ollama_base_url` to
    /// Ollama and wins when both apply.
    #[must_use]
    pub fn backend_defaults(&self) -> BackendDefaults {
        let mut defaults = BackendDefaults::new(self.default_provider.clone());
        if let (Some(url), Some(kind)) = (
            &self.base_url,
            ProviderKind::from_name(&self.default_provider),
        ) {
            defaults = defaults.with_endpoint(kind, url.clone());
        }
        if let Some(url) = &self.ollama_base_url {
            defaults = defaults.with_endpoint(ProviderKind::Ollama, url.clone());
        }
        defaults
    }

    /// Check values no component can recover from
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for zero timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in ProviderKind::ALL {
            if self.timeouts.for_kind(kind).is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{kind} call timeout must be greater than zero"
                )));
            }
        }
        if self.probe.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "probe timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/model-mesh/mesh.toml` or
/// `~/.config/model-mesh/mesh.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("model-mesh").join("mesh.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<MeshConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<MeshConfig, ConfigError> {
    let mut config = MeshConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: MeshToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config, config_path.parent());
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                roles = config.backends.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Parse configuration from TOML text, without consulting the environment
///
/// # Errors
///
/// Returns an error if the text is not valid configuration.
pub fn config_from_toml_str(toml_content: &str) -> Result<MeshConfig, ConfigError> {
    let mut config = MeshConfig::default();
    let toml_config: MeshToml = toml::from_str(toml_content)?;
    apply_toml_config(&mut config, &toml_config, None);
    config.source = ConfigSource::File;
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut MeshConfig, toml: &MeshToml, base_dir: Option<&Path>) {
    if let Some(ref name) = toml.tool_name {
        config.tool_name.clone_from(name);
    }
    if let Some(ref provider) = toml.default_provider {
        config.default_provider.clone_from(provider);
    }
    if toml.base_url.is_some() {
        config.base_url.clone_from(&toml.base_url);
    }
    if toml.ollama_base_url.is_some() {
        config.ollama_base_url.clone_from(&toml.ollama_base_url);
    }
    if let Some(ref prompts) = toml.prompt_config_path {
        let path = PathBuf::from(prompts);
        config.prompt_config_path = Some(match base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        });
    }

    // Timeouts
    if let Some(secs) = toml.timeouts.ollama_secs {
        config.timeouts.ollama = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.timeouts.litellm_secs {
        config.timeouts.litellm = Duration::from_secs(secs);
    }

    // Probing
    if let Some(on_startup) = toml.probe.on_startup {
        config.probe.on_startup = on_startup;
    }
    if let Some(ms) = toml.probe.timeout_ms {
        config.probe.timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.probe.reprobe_interval_secs {
        config.probe.reprobe_interval = reprobe_interval(secs);
    }

    // Roles and rules
    if let Some(ref backends) = toml.backends {
        config.backends.clone_from(backends);
    }
    if !toml.routing.rules.is_empty() {
        config.routing_rules.clone_from(&toml.routing.rules);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut MeshConfig) {
    apply_env_from(config, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`
fn apply_env_from(config: &mut MeshConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("OLLAMA_BASE_URL").filter(|v| !v.is_empty()) {
        config.ollama_base_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(provider) = lookup("MODEL_MESH_DEFAULT_PROVIDER").filter(|v| !v.is_empty()) {
        config.default_provider = provider;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("MODEL_MESH_REPROBE_SECS") {
        match secs.trim().parse::<u64>() {
            Ok(secs) => {
                config.probe.reprobe_interval = reprobe_interval(secs);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(value = %secs, "Ignoring invalid MODEL_MESH_REPROBE_SECS"),
        }
    }
    if let Some(path) = lookup("MODEL_MESH_PROMPTS").filter(|v| !v.is_empty()) {
        config.prompt_config_path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
}

fn reprobe_interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load the prompt catalog named by the configuration
///
/// A missing file yields an empty catalog; roles then run without a
/// system prompt.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_prompt_catalog(config: &MeshConfig) -> Result<PromptCatalog, ConfigError> {
    match config.prompt_config_path {
        Some(ref path) if path.exists() => PromptCatalog::load(path),
        Some(ref path) => {
            tracing::warn!(
                path = %path.display(),
                "Prompt catalog not found, continuing without system prompts"
            );
            Ok(PromptCatalog::new())
        }
        None => Ok(PromptCatalog::new()),
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Startup probing override
    pub probe_on_startup: Option<bool>,

    /// Reprobe period override (seconds, 0 = disabled)
    pub reprobe_interval_secs: Option<u64>,

    /// Prompt catalog path override
    pub prompt_config_path: Option<PathBuf>,

    /// Default provider override
    pub default_provider: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set startup probing override
    #[must_use]
    pub fn with_probe_on_startup(mut self, enabled: bool) -> Self {
        self.probe_on_startup = Some(enabled);
        self
    }

    /// Set reprobe period override
    #[must_use]
    pub fn with_reprobe_interval_secs(mut self, secs: u64) -> Self {
        self.reprobe_interval_secs = Some(secs);
        self
    }

    /// Set prompt catalog path override
    #[must_use]
    pub fn with_prompt_config_path(mut self, path: PathBuf) -> Self {
        self.prompt_config_path = Some(path);
        self
    }

    /// Set default provider override
    #[must_use]
    pub fn with_default_provider(mut self, provider: String) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut MeshConfig) {
        if self.probe_on_startup.is_some()
            || self.reprobe_interval_secs.is_some()
            || self.prompt_config_path.is_some()
            || self.default_provider.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(enabled) = self.probe_on_startup {
            config.probe.on_startup = enabled;
        }
        if let Some(secs) = self.reprobe_interval_secs {
            config.probe.reprobe_interval = reprobe_interval(secs);
        }
        if let Some(ref path) = self.prompt_config_path {
            config.prompt_config_path = Some(path.clone());
        }
        if let Some(ref provider) = self.default_provider {
            config.default_provider.clone_from(provider);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
