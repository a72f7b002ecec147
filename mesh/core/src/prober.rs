//! Availability Prober
//!
//! Establishes and refreshes role availability without performing inference.
//!
//! ```text
//!   probe_all() ──┬── spawn(probe guardian) ──┐
//!                 ├── spawn(probe vision)   ──┼── join_all ──► StatusBoard
//!                 └── spawn(probe text)     ──┘
//! ```
//!
//! Every probe runs in its own task under its own timeout, so one slow or
//! panicking backend only affects its own role. Misconfigured roles are
//! reported unavailable without touching the network and are never reprobed.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::descriptor::{BackendEntry, BackendTable};
use crate::provider::{ProviderAdapter, ProviderAdapters};
use crate::status::{BackendState, BackendStatus, StatusBoard};

/// When and how long to probe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Probe every role while the mesh is being built
    pub on_startup: bool,
    /// Per-probe deadline
    pub timeout: Duration,
    /// Period of the background refresh of unavailable roles; `None` disables it
    pub reprobe_interval: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            timeout: Duration::from_secs(5),
            reprobe_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Probes roles and records the results on the shared board
pub struct AvailabilityProber {
    table: Arc<BackendTable>,
    adapters: ProviderAdapters,
    board: Arc<StatusBoard>,
    timeout: Duration,
}

impl AvailabilityProber {
    /// Prober over a fixed table
    #[must_use]
    pub fn new(
        table: Arc<BackendTable>,
        adapters: ProviderAdapters,
        board: Arc<StatusBoard>,
        timeout: Duration,
    ) -> Self {
        Self {
            table,
            adapters,
            board,
            timeout,
        }
    }

    /// Probe every role concurrently
    ///
    /// Misconfigured roles get their configuration error recorded. Idempotent:
    /// against unchanged backends a second run yields the same states.
    pub async fn probe_all(&self) -> Vec<BackendStatus> {
        let roles: Vec<String> = self.table.roles().map(str::to_string).collect();
        self.probe_roles(roles).await
    }

    /// Probe one role; `None` if it is not configured
    pub async fn probe_role(&self, role: &str) -> Option<BackendStatus> {
        if !self.table.contains(role) {
            return None;
        }
        self.probe_roles(vec![role.to_string()]).await.into_iter().next()
    }

    /// Reprobe roles currently unavailable whose configuration is valid
    pub async fn refresh_unavailable(&self) -> Vec<BackendStatus> {
        let roles: Vec<String> = self
            .board
            .roles_in(BackendState::Unavailable)
            .into_iter()
            .filter(|role| {
                self.table
                    .get(role)
                    .is_some_and(|entry| entry.descriptor().is_some())
            })
            .collect();

        if roles.is_empty() {
            return Vec::new();
        }
        tracing::debug!(count = roles.len(), "Reprobing unavailable backends");
        self.probe_roles(roles).await
    }

    /// Probe the given roles concurrently, one task each, and record results
    pub async fn probe_roles(&self, roles: Vec<String>) -> Vec<BackendStatus> {
        let handles: Vec<JoinHandle<BackendStatus>> = roles
            .iter()
            .filter_map(|role| {
                let entry = self.table.get(role)?.clone();
                let adapter = entry
                    .descriptor()
                    .and_then(|d| self.adapters.get(d.provider_kind()));
                Some(tokio::spawn(probe_entry(
                    role.clone(),
                    entry,
                    adapter,
                    self.timeout,
                )))
            })
            .collect();

        let results = join_all(handles).await;

        roles
            .into_iter()
            .filter(|role| self.table.contains(role))
            .zip(results)
            .map(|(role, joined)| {
                let status = joined.unwrap_or_else(|e| {
                    tracing::error!(role = %role, error = %e, "Probe task failed");
                    BackendStatus::unavailable(role.as_str(), format!("probe task failed: {e}"))
                });
                self.board.record(status.clone());
                status
            })
            .collect()
    }

    /// Start the periodic refresh of unavailable roles
    ///
    /// The task stops when the returned handle is dropped.
    #[must_use]
    pub fn spawn_reprobe(self: &Arc<Self>, interval: Duration) -> ReprobeTask {
        let prober = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; startup probing already ran.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                prober.refresh_unavailable().await;
            }
        });

        tracing::debug!(interval_secs = interval.as_secs(), "Background reprobe started");
        ReprobeTask { handle }
    }
}

impl std::fmt::Debug for AvailabilityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityProber")
            .field("roles", &self.table.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Probe one entry to completion; never fails
async fn probe_entry(
    role: String,
    entry: BackendEntry,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    timeout: Duration,
) -> BackendStatus {
    let descriptor = match entry {
        BackendEntry::Misconfigured(e) => {
            return BackendStatus::unavailable(role, format!("configuration error: {e}"));
        }
        BackendEntry::Ready(descriptor) => descriptor,
    };

    let Some(adapter) = adapter else {
        return BackendStatus::unavailable(
            role,
            format!(
                "no adapter registered for provider '{}'",
                descriptor.provider_kind()
            ),
        );
    };

    match tokio::time::timeout(timeout, adapter.probe(&descriptor)).await {
        Ok(mut status) => {
            status.role = role;
            status
        }
        Err(_) => BackendStatus::unavailable(
            role,
            format!(
                "probe of {} at {} timed out after {}ms",
                descriptor.label(),
                descriptor.endpoint(),
                timeout.as_millis()
            ),
        ),
    }
}

/// Handle to the background reprobe task; aborts it on drop
#[derive(Debug)]
pub struct ReprobeTask {
    handle: JoinHandle<()>,
}

impl ReprobeTask {
    /// Whether the task has stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ReprobeTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
