//! Model Mesh Core
//!
//! Routes role-keyed model calls to heterogeneous backends and degrades
//! gracefully when a backend is missing, misconfigured or down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Calling agent                            │
//! │              tools/list  ·  tools/call model_mesh                │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ ToolInvocation
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          ToolSurface                             │
//! │     role / task → MeshCall, prompt catalog, status reporting     │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ MeshCall
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          MeshRouter                              │
//! │   BackendTable (role → descriptor)   StatusBoard (role → state)  │
//! └───────────┬───────────────────────────────────────┬──────────────┘
//!             │ invoke                                │ probe
//!             ▼                                       ▼
//! ┌───────────────────────┐               ┌──────────────────────────┐
//! │   ProviderAdapters    │◄──────────────│   AvailabilityProber     │
//! │  Ollama · LiteLLM     │               │ startup + periodic retry │
//! └───────────────────────┘               └──────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Mesh`]: Assembled mesh; owns router, prober and tool surface
//! - [`MeshCall`] / [`MeshResult`]: One routed request and its outcome
//! - [`BackendDescriptor`]: Resolved role → model/provider/endpoint binding
//! - [`BackendStatus`]: Last known availability of a role
//! - [`ProviderAdapter`]: Trait implemented per provider protocol
//! - [`ToolSurface`]: Agent-facing tool descriptors and invocation
//!
//! # Quick Start
//!
//! ```ignore
//! use model_mesh_core::{load_config, Mesh, MeshCall};
//! use serde_json::json;
//!
//! let config = load_config()?;
//! let mesh = Mesh::from_config(config).await?;
//!
//! let result = mesh
//!     .call(MeshCall::new("guardian", json!({ "prompt": "Is this safe?" })))
//!     .await;
//!
//! if result.is_degraded() {
//!     // fall back to local behavior; the mesh never raises for a down backend
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`descriptor`]: Backend descriptors, provider kinds and the role table
//! - [`status`]: Backend availability states and the status board
//! - [`call`]: Mesh calls, results and error kinds
//! - [`provider`]: Provider adapters (Ollama, LiteLLM) and their registry
//! - [`prober`]: Startup and periodic availability probing
//! - [`router`]: Role routing, task inference and call statistics
//! - [`surface`]: Tool descriptors and tool invocation
//! - [`prompts`]: Per-role system prompts
//! - [`config`]: TOML/env configuration loading
//! - [`mesh`]: Wiring everything together

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod call;
pub mod config;
pub mod descriptor;
pub mod mesh;
pub mod prober;
pub mod prompts;
pub mod provider;
pub mod router;
pub mod status;
pub mod surface;

// Re-exports for convenience
pub use call::{ErrorKind, MeshCall, MeshResult};
pub use descriptor::{
    BackendDefaults, BackendDescriptor, BackendEntry, BackendSpec, BackendTable,
    ConfigurationError, ProviderKind,
};
pub use mesh::{Mesh, MeshBuilder, MeshError};
pub use status::{BackendState, BackendStatus, StatusBoard};

// Provider exports
pub use provider::{
    create_adapter, ChatMessage, ChatPayload, OllamaAdapter, ProviderAdapter, ProviderAdapters,
    ProviderTimeouts, RoutedAdapter,
};

// Routing exports
pub use prober::{AvailabilityProber, ProbeConfig, ReprobeTask};
pub use router::{MeshRouter, MeshStats, RoleStats, RoutingRule, RoutingRules};

// Tool surface exports
pub use prompts::PromptCatalog;
pub use surface::{ToolDescriptor, ToolInvocation, ToolResponse, ToolStatus, ToolSurface};

// Config exports
pub use config::{
    config_from_toml_str, default_config_path, load_config, load_config_from_path,
    load_prompt_catalog, ConfigError, ConfigOverrides, ConfigSource, MeshConfig, MeshToml,
};
