//! Provider Adapters
//!
//! One adapter per provider family translates mesh payloads into that
//! family's wire protocol.
//!
//! # Available Providers
//!
//! - **Ollama**: local inference daemon ([`OllamaAdapter`])
//! - **LiteLLM**: multi-provider routing proxy, OpenAI-compatible ([`RoutedAdapter`])
//!
//! Adapters are created once per kind in use and shared by every role of
//! that kind, so each kind gets a single pooled HTTP client.

mod http;
mod ollama;
mod routed;
mod traits;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use ollama::OllamaAdapter;
pub use routed::RoutedAdapter;
pub use traits::{ChatMessage, ChatPayload, ProviderAdapter};

use crate::descriptor::ProviderKind;

/// Per-kind inference timeouts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderTimeouts {
    /// Local daemon timeout (models may need loading)
    pub ollama: Duration,
    /// Routing proxy timeout
    pub litellm: Duration,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            ollama: Duration::from_secs(120),
            litellm: Duration::from_secs(60),
        }
    }
}

impl ProviderTimeouts {
    /// Timeout for a kind
    #[must_use]
    pub fn for_kind(&self, kind: ProviderKind) -> Duration {
        match kind {
            ProviderKind::Ollama => self.ollama,
            ProviderKind::LiteLlm => self.litellm,
        }
    }

    /// Same timeout for every kind
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            ollama: timeout,
            litellm: timeout,
        }
    }
}

/// Create the adapter for a provider kind
#[must_use]
pub fn create_adapter(kind: ProviderKind, timeout: Duration) -> Arc<dyn ProviderAdapter> {
    match kind {
        ProviderKind::Ollama => Arc::new(OllamaAdapter::new(timeout)),
        ProviderKind::LiteLlm => Arc::new(RoutedAdapter::new(timeout)),
    }
}

/// Adapter registry keyed by provider kind
#[derive(Clone, Default)]
pub struct ProviderAdapters {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderAdapters {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Create adapters for every listed kind not already registered
    pub fn fill_missing<I>(&mut self, kinds: I, timeouts: &ProviderTimeouts)
    where
        I: IntoIterator<Item = ProviderKind>,
    {
        for kind in kinds {
            self.adapters
                .entry(kind)
                .or_insert_with(|| create_adapter(kind, timeouts.for_kind(kind)));
        }
    }

    /// Adapter for a kind
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Whether a kind has an adapter
    #[must_use]
    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Number of registered adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().collect();
        kinds.sort();
        f.debug_struct("ProviderAdapters")
            .field("kinds", &kinds)
            .finish()
    }
}
