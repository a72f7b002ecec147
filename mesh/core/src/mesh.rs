//! Mesh
//!
//! Owns the role table, the status board, one adapter per provider kind in
//! use, the router, the prober and the tool surface.
//!
//! ```text
//!   MeshConfig ──► MeshBuilder::build()
//!                    │  resolve descriptors (broken roles kept, unavailable)
//!                    │  create adapters for kinds in use
//!                    │  validate tool name
//!                    │  startup probe (concurrent)
//!                    │  spawn background reprobe
//!                    ▼
//!                  Mesh ──► router / surface / status / reprobe
//! ```
//!
//! Roles are fixed for the lifetime of a mesh. Dropping the mesh stops the
//! background reprobe task.

use std::sync::Arc;

use thiserror::Error;

use crate::call::{MeshCall, MeshResult};
use crate::config::{ConfigError, MeshConfig};
use crate::descriptor::{BackendDescriptor, BackendEntry, BackendTable};
use crate::prober::{AvailabilityProber, ReprobeTask};
use crate::prompts::PromptCatalog;
use crate::provider::{ProviderAdapter, ProviderAdapters};
use crate::router::{MeshRouter, RoleStats, RoutingRules};
use crate::status::{BackendState, BackendStatus, StatusBoard};
use crate::surface::ToolSurface;

/// Mesh construction failures
///
/// Broken roles are not construction failures; they surface as unavailable.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Tool name unusable on the tool surface
    #[error("invalid tool name '{0}': use 1-57 ASCII letters, digits, '_' or '-'")]
    InvalidToolName(String),

    /// Configuration values no component can work with
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and builds a [`Mesh`]
pub struct MeshBuilder {
    config: MeshConfig,
    adapters: ProviderAdapters,
    prompts: PromptCatalog,
}

impl MeshBuilder {
    /// Builder over a configuration
    #[must_use]
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            adapters: ProviderAdapters::new(),
            prompts: PromptCatalog::new(),
        }
    }

    /// Use this adapter for its provider kind instead of the built-in one
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter);
        self
    }

    /// System prompts inserted into payloads that carry none
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptCatalog) -> Self {
        self.prompts = prompts;
        self
    }

    /// Skip (or force) the startup probe
    #[must_use]
    pub fn probe_on_startup(mut self, enabled: bool) -> Self {
        self.config.probe.on_startup = enabled;
        self
    }

    /// Construct the mesh, probing backends if configured to
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidToolName`] or [`MeshError::Config`].
    /// Misconfigured roles never fail construction.
    pub async fn build(self) -> Result<Mesh, MeshError> {
        let Self {
            config,
            mut adapters,
            prompts,
        } = self;
        config.validate()?;

        let table = Arc::new(BackendTable::from_specs(
            &config.backends,
            &config.backend_defaults(),
        ));
        if table.is_empty() {
            tracing::warn!("No roles configured; every call will fail with unknown_role");
        }

        let board = Arc::new(StatusBoard::new(table.roles()));
        for (role, entry) in table.iter() {
            if let BackendEntry::Misconfigured(e) = entry {
                tracing::warn!(role, error = %e, "Role misconfigured, keeping it unavailable");
                board.record(BackendStatus::unavailable(
                    role,
                    format!("configuration error: {e}"),
                ));
            }
        }

        adapters.fill_missing(table.provider_kinds(), &config.timeouts);

        let rules = RoutingRules::new(config.routing_rules.clone(), &table);
        let router = Arc::new(MeshRouter::new(
            Arc::clone(&table),
            Arc::clone(&board),
            adapters.clone(),
            config.timeouts,
            rules,
        ));
        let surface = ToolSurface::new(
            config.tool_name.clone(),
            Arc::clone(&router),
            Arc::new(prompts),
        )?;

        let prober = Arc::new(AvailabilityProber::new(
            Arc::clone(&table),
            adapters,
            Arc::clone(&board),
            config.probe.timeout,
        ));

        if config.probe.on_startup {
            prober.probe_all().await;
        }
        let reprobe = config
            .probe
            .reprobe_interval
            .map(|interval| prober.spawn_reprobe(interval));

        tracing::info!(
            tool = surface.tool_name(),
            roles = table.len(),
            available = board.roles_in(BackendState::Available).len(),
            unavailable = board.roles_in(BackendState::Unavailable).len(),
            "Model mesh ready"
        );

        Ok(Mesh {
            table,
            board,
            router,
            prober,
            surface,
            reprobe,
        })
    }
}

// ============================================================================
// Mesh
// ============================================================================

/// A running model mesh
pub struct Mesh {
    table: Arc<BackendTable>,
    board: Arc<StatusBoard>,
    router: Arc<MeshRouter>,
    prober: Arc<AvailabilityProber>,
    surface: ToolSurface,
    reprobe: Option<ReprobeTask>,
}

impl Mesh {
    /// Builder over a configuration
    #[must_use]
    pub fn builder(config: MeshConfig) -> MeshBuilder {
        MeshBuilder::new(config)
    }

    /// Build with built-in adapters and no prompts
    ///
    /// # Errors
    ///
    /// See [`MeshBuilder::build`].
    pub async fn from_config(config: MeshConfig) -> Result<Self, MeshError> {
        MeshBuilder::new(config).build().await
    }

    /// Route one call
    pub async fn call(&self, call: MeshCall) -> MeshResult {
        self.router.dispatch(call).await
    }

    /// The router
    #[must_use]
    pub fn router(&self) -> &Arc<MeshRouter> {
        &self.router
    }

    /// The agent-facing tool surface
    #[must_use]
    pub fn surface(&self) -> &ToolSurface {
        &self.surface
    }

    /// Status of one role
    #[must_use]
    pub fn status(&self, role: &str) -> Option<BackendStatus> {
        self.board.get(role)
    }

    /// Status of every role, sorted by role
    #[must_use]
    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.board.snapshot()
    }

    /// Configured roles, sorted
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.table.roles().map(str::to_string).collect()
    }

    /// Descriptor of a usable role
    #[must_use]
    pub fn descriptor(&self, role: &str) -> Option<Arc<BackendDescriptor>> {
        self.table
            .get(role)
            .and_then(BackendEntry::descriptor)
            .cloned()
    }

    /// Call counters per role
    #[must_use]
    pub fn stats(&self) -> Vec<RoleStats> {
        self.router.stats().snapshot()
    }

    /// Probe every validly configured role now
    pub async fn reprobe(&self) -> Vec<BackendStatus> {
        let roles = self
            .table
            .iter()
            .filter(|(_, entry)| entry.descriptor().is_some())
            .map(|(role, _)| role.to_string())
            .collect();
        self.prober.probe_roles(roles).await
    }

    /// Whether the background reprobe task is running
    #[must_use]
    pub fn is_reprobing(&self) -> bool {
        self.reprobe.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("tool", &self.surface.tool_name())
            .field("roles", &self.roles())
            .field("reprobing", &self.is_reprobing())
            .finish_non_exhaustive()
    }
}
