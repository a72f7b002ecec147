//! Backend Status
//!
//! Live availability knowledge about each role. The [`StatusBoard`] is the
//! single shared source of truth read by the router and written by the
//! prober (and by the router itself when a call reveals a state change).
//!
//! ```text
//!            probe ok / call ok
//!   Unknown ─────────────────────► Available
//!      │                               │
//!      │ probe/call failure            │ unreachable / timeout
//!      ▼                               ▼
//!   Unavailable ◄──────────────────────┘
//!      │
//!      └── probe ok ──► Available
//! ```
//!
//! The set of roles is fixed when the board is created; writes for an
//! unknown role are dropped.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Availability of a role's backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    /// Never checked
    #[default]
    Unknown,
    /// Last check or call succeeded
    Available,
    /// Last check or call failed
    Unavailable,
}

impl BackendState {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Snapshot of one role's availability
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    /// Role this status belongs to
    pub role: String,
    /// Current state
    pub state: BackendState,
    /// When the state was last established; `None` while unknown
    pub last_checked: Option<DateTime<Utc>>,
    /// Human-readable explanation, always present when unavailable
    pub detail: Option<String>,
}

impl BackendStatus {
    /// A role that has not been checked yet
    pub fn unknown(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            state: BackendState::Unknown,
            last_checked: None,
            detail: None,
        }
    }

    /// A role confirmed reachable just now
    pub fn available(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            state: BackendState::Available,
            last_checked: Some(Utc::now()),
            detail: None,
        }
    }

    /// A role found unusable just now
    pub fn unavailable(role: impl Into<String>, detail: impl Into<String>) -> Self {
        let role = role.into();
        let mut detail = detail.into();
        if detail.trim().is_empty() {
            detail = format!("backend for role '{role}' is unavailable");
        }
        Self {
            role,
            state: BackendState::Unavailable,
            last_checked: Some(Utc::now()),
            detail: Some(detail),
        }
    }

    /// Attach a detail (e.g. a model listing note on an available backend)
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether the role is confirmed available
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state == BackendState::Available
    }

    /// Whether the role is known unavailable
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.state == BackendState::Unavailable
    }

    /// Reason usable in a degraded result
    #[must_use]
    pub fn reason(&self) -> String {
        self.detail
            .clone()
            .unwrap_or_else(|| format!("backend for role '{}' is unavailable", self.role))
    }
}

// ============================================================================
// Status Board
// ============================================================================

/// Shared per-role status table
///
/// Reads are concurrent; writes are serialized. No lock is held across I/O:
/// callers take a snapshot, do their work, then [`record`](Self::record).
#[derive(Debug, Default)]
pub struct StatusBoard {
    entries: RwLock<HashMap<String, BackendStatus>>,
}

impl StatusBoard {
    /// Board with every role starting as unknown
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = roles
            .into_iter()
            .map(Into::into)
            .map(|role: String| (role.clone(), BackendStatus::unknown(role)))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Current status of a role
    #[must_use]
    pub fn get(&self, role: &str) -> Option<BackendStatus> {
        self.entries.read().get(role).cloned()
    }

    /// Current state of a role
    #[must_use]
    pub fn state(&self, role: &str) -> Option<BackendState> {
        self.entries.read().get(role).map(|s| s.state)
    }

    /// Replace a role's status, returning the previous state
    ///
    /// Returns `None` (and changes nothing) if the role is not on the board.
    pub fn record(&self, status: BackendStatus) -> Option<BackendState> {
        let previous = {
            let mut entries = self.entries.write();
            let slot = entries.get_mut(&status.role)?;
            let previous = slot.state;
            *slot = status.clone();
            previous
        };

        if previous != status.state {
            match status.state {
                BackendState::Available => tracing::info!(
                    role = %status.role,
                    from = previous.as_str(),
                    "Backend available"
                ),
                BackendState::Unavailable => tracing::warn!(
                    role = %status.role,
                    from = previous.as_str(),
                    detail = status.detail.as_deref().unwrap_or_default(),
                    "Backend unavailable"
                ),
                BackendState::Unknown => {}
            }
        }

        Some(previous)
    }

    /// Every role's status, sorted by role
    #[must_use]
    pub fn snapshot(&self) -> Vec<BackendStatus> {
        let mut statuses: Vec<_> = self.entries.read().values().cloned().collect();
        statuses.sort_by(|a, b| a.role.cmp(&b.role));
        statuses
    }

    /// Roles currently in `state`, sorted
    #[must_use]
    pub fn roles_in(&self, state: BackendState) -> Vec<String> {
        let mut roles: Vec<_> = self
            .entries
            .read()
            .values()
            .filter(|s| s.state == state)
            .map(|s| s.role.clone())
            .collect();
        roles.sort();
        roles
    }

    /// Number of roles on the board
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the board has no roles
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
