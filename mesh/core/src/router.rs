//! Mesh Router
//!
//! Dispatches a [`MeshCall`] to the adapter of its role's backend, honouring
//! the role's availability and enforcing the per-provider timeout.
//!
//! ```text
//!   MeshCall ──► role known? ──no──► Error(unknown_role)
//!                    │
//!                    ▼
//!              status on board
//!      ┌─────────────┼──────────────────┐
//!  unavailable     unknown           available
//!      │              │                  │
//!  Degraded      invoke, then       invoke; unreachable/timeout
//!  (no I/O)      record outcome     demotes the role
//! ```
//!
//! The router never retries and never falls back to another role. Dropping
//! the dispatch future cancels the in-flight backend request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::call::{ErrorKind, MeshCall, MeshResult};
use crate::descriptor::{BackendEntry, BackendTable};
use crate::provider::{ProviderAdapters, ProviderTimeouts};
use crate::status::{BackendState, BackendStatus, StatusBoard};

// ============================================================================
// Routing Rules
// ============================================================================

/// Maps a free-form task label onto a role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Task label, compared case-insensitively
    pub task: String,
    /// Role to route to
    pub role: String,
}

impl RoutingRule {
    /// Rule routing `task` to `role`
    pub fn new(task: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            role: role.into(),
        }
    }
}

/// Ordered task-to-role rules; first match wins
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingRules {
    rules: Vec<RoutingRule>,
}

impl RoutingRules {
    /// Keep only rules naming a configured role
    #[must_use]
    pub fn new(rules: Vec<RoutingRule>, table: &BackendTable) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| {
                let known = table.contains(&rule.role);
                if !known {
                    tracing::warn!(
                        task = %rule.task,
                        role = %rule.role,
                        "Ignoring routing rule for unconfigured role"
                    );
                }
                known
            })
            .collect();
        Self { rules }
    }

    /// Role for a task label
    #[must_use]
    pub fn infer(&self, task: &str) -> Option<&str> {
        let task = task.trim();
        self.rules
            .iter()
            .find(|rule| rule.task.trim().eq_ignore_ascii_case(task))
            .map(|rule| rule.role.as_str())
    }

    /// Rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Whether no rules are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ============================================================================
// Call Statistics
// ============================================================================

#[derive(Debug, Default)]
struct RoleCounters {
    calls: AtomicU64,
    success: AtomicU64,
    degraded: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    latency_ms_total: AtomicU64,
}

/// Per-role counters at a point in time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStats {
    /// Role name
    pub role: String,
    /// Calls dispatched
    pub calls: u64,
    /// Calls that succeeded
    pub success: u64,
    /// Calls short-circuited as degraded
    pub degraded: u64,
    /// Calls that failed, timeouts included
    pub errors: u64,
    /// Calls that hit the provider timeout
    pub timeouts: u64,
    /// Mean wall time of attempted calls, in milliseconds
    pub mean_latency_ms: u64,
}

/// Lock-free per-role call counters
#[derive(Debug, Default)]
pub struct MeshStats {
    roles: DashMap<String, RoleCounters>,
}

impl MeshStats {
    /// Empty counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished call
    pub fn record(&self, role: &str, result: &MeshResult, elapsed_ms: u64) {
        let counters = self.roles.entry(role.to_string()).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        match result {
            MeshResult::Success { .. } => {
                counters.success.fetch_add(1, Ordering::Relaxed);
            }
            MeshResult::Degraded { .. } => {
                counters.degraded.fetch_add(1, Ordering::Relaxed);
            }
            MeshResult::Error { kind, .. } => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                if *kind == ErrorKind::BackendTimeout {
                    counters.timeouts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if !result.is_degraded() {
            counters
                .latency_ms_total
                .fetch_add(elapsed_ms, Ordering::Relaxed);
        }
    }

    /// Counters for one role
    #[must_use]
    pub fn role(&self, role: &str) -> Option<RoleStats> {
        self.roles.get(role).map(|c| snapshot(role, &c))
    }

    /// Counters for every role that has seen a call, sorted by role
    #[must_use]
    pub fn snapshot(&self) -> Vec<RoleStats> {
        let mut stats: Vec<_> = self
            .roles
            .iter()
            .map(|entry| snapshot(entry.key(), entry.value()))
            .collect();
        stats.sort_by(|a, b| a.role.cmp(&b.role));
        stats
    }
}

fn snapshot(role: &str, counters: &RoleCounters) -> RoleStats {
    let calls = counters.calls.load(Ordering::Relaxed);
    let degraded = counters.degraded.load(Ordering::Relaxed);
    let attempted = calls.saturating_sub(degraded);
    let latency = counters.latency_ms_total.load(Ordering::Relaxed);
    RoleStats {
        role: role.to_string(),
        calls,
        success: counters.success.load(Ordering::Relaxed),
        degraded,
        errors: counters.errors.load(Ordering::Relaxed),
        timeouts: counters.timeouts.load(Ordering::Relaxed),
        mean_latency_ms: if attempted == 0 { 0 } else { latency / attempted },
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes calls by role
pub struct MeshRouter {
    table: Arc<BackendTable>,
    board: Arc<StatusBoard>,
    adapters: ProviderAdapters,
    timeouts: ProviderTimeouts,
    rules: RoutingRules,
    stats: MeshStats,
}

impl MeshRouter {
    /// Router over a fixed table and shared board
    #[must_use]
    pub fn new(
        table: Arc<BackendTable>,
        board: Arc<StatusBoard>,
        adapters: ProviderAdapters,
        timeouts: ProviderTimeouts,
        rules: RoutingRules,
    ) -> Self {
        Self {
            table,
            board,
            adapters,
            timeouts,
            rules,
            stats: MeshStats::new(),
        }
    }

    /// Route one call to its role's backend
    ///
    /// Always returns exactly one result; failures are values, never panics.
    pub async fn dispatch(&self, call: MeshCall) -> MeshResult {
        let span = tracing::info_span!("mesh_call", call_id = %call.call_id, role = %call.role);
        async move {
            let started = Instant::now();
            let result = self.route(&call).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            if self.table.contains(&call.role) {
                self.stats.record(&call.role, &result, elapsed_ms);
            }
            match &result {
                MeshResult::Success { .. } => {
                    tracing::info!(elapsed_ms, "Call succeeded");
                }
                MeshResult::Degraded { reason } => {
                    tracing::info!(reason = %reason, "Call degraded");
                }
                MeshResult::Error { kind, message } => {
                    tracing::warn!(kind = %kind, error = %message, elapsed_ms, "Call failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn route(&self, call: &MeshCall) -> MeshResult {
        let Some(entry) = self.table.get(&call.role) else {
            let known: Vec<&str> = self.table.roles().collect();
            return MeshResult::error(
                ErrorKind::UnknownRole,
                format!(
                    "unknown role '{}' (configured roles: {})",
                    call.role,
                    known.join(", ")
                ),
            );
        };

        let status = self
            .board
            .get(&call.role)
            .unwrap_or_else(|| BackendStatus::unknown(call.role.as_str()));

        match status.state {
            BackendState::Unavailable => MeshResult::degraded(status.reason()),
            BackendState::Available => {
                let result = self.invoke(&call.role, entry, call).await;
                if let MeshResult::Error { kind, message } = &result {
                    if kind.is_transport_failure() {
                        self.board
                            .record(BackendStatus::unavailable(call.role.as_str(), message.as_str()));
                    }
                }
                result
            }
            BackendState::Unknown => {
                let result = self.invoke(&call.role, entry, call).await;
                match &result {
                    MeshResult::Success { .. } => {
                        self.board.record(BackendStatus::available(call.role.as_str()));
                    }
                    MeshResult::Error {
                        kind: ErrorKind::InvalidRequest,
                        ..
                    } => {}
                    MeshResult::Error { message, .. } => {
                        self.board
                            .record(BackendStatus::unavailable(call.role.as_str(), message.as_str()));
                    }
                    MeshResult::Degraded { reason } => {
                        self.board
                            .record(BackendStatus::unavailable(call.role.as_str(), reason.as_str()));
                    }
                }
                result
            }
        }
    }

    async fn invoke(&self, role: &str, entry: &BackendEntry, call: &MeshCall) -> MeshResult {
        let descriptor = match entry {
            BackendEntry::Ready(descriptor) => descriptor,
            BackendEntry::Misconfigured(e) => {
                return MeshResult::degraded(format!("configuration error: {e}"));
            }
        };

        let kind = descriptor.provider_kind();
        let Some(adapter) = self.adapters.get(kind) else {
            return MeshResult::degraded(format!(
                "no adapter registered for provider '{kind}' (role '{role}')"
            ));
        };

        let timeout = self.timeouts.for_kind(kind);
        tracing::debug!(
            model = descriptor.model_id(),
            provider = adapter.name(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Invoking backend"
        );

        match tokio::time::timeout(timeout, adapter.invoke(descriptor, &call.payload)).await {
            Ok(result) => result,
            Err(_) => MeshResult::error(
                ErrorKind::BackendTimeout,
                format!(
                    "{} at {} did not answer within {}ms",
                    descriptor.label(),
                    descriptor.endpoint(),
                    timeout.as_millis()
                ),
            ),
        }
    }

    /// Role a task label routes to
    #[must_use]
    pub fn infer_role(&self, task: &str) -> Option<&str> {
        self.rules.infer(task)
    }

    /// Active routing rules
    #[must_use]
    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    /// Configured roles, sorted
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.table.roles().map(str::to_string).collect()
    }

    /// Current status of a role
    #[must_use]
    pub fn status(&self, role: &str) -> Option<BackendStatus> {
        self.board.get(role)
    }

    /// Every role's status, sorted by role
    #[must_use]
    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.board.snapshot()
    }

    /// Configuration entry of a role
    #[must_use]
    pub fn backend(&self, role: &str) -> Option<&BackendEntry> {
        self.table.get(role)
    }

    /// Call counters
    #[must_use]
    pub fn stats(&self) -> &MeshStats {
        &self.stats
    }
}

impl std::fmt::Debug for MeshRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshRouter")
            .field("roles", &self.table.len())
            .field("adapters", &self.adapters)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
