//! Prompt Catalog
//!
//! Per-role system prompts loaded from a JSON file. Entries are either a
//! plain string or an object with a `system` field:
//!
//! ```json
//! {
//!   "guardian": "You are a safety classifier. Answer Yes or No.",
//!   "vision": { "system": "Convert the document image to markdown." }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::ConfigError;

#[derive(Deserialize)]
#[serde(untagged)]
enum PromptEntry {
    Text(String),
    Detailed { system: String },
}

impl PromptEntry {
    fn into_system(self) -> String {
        match self {
            Self::Text(text) | Self::Detailed { system: text } => text,
        }
    }
}

/// System prompts keyed by role
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptCatalog {
    prompts: HashMap<String, String>,
}

impl PromptCatalog {
    /// Empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a role's prompt
    #[must_use]
    pub fn with_prompt(mut self, role: impl Into<String>, system: impl Into<String>) -> Self {
        self.prompts.insert(role.into(), system.into());
        self
    }

    /// Parse a catalog from JSON text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PromptParseError`] if the text is not an object
    /// of strings or `{ "system": ... }` entries.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let entries: HashMap<String, PromptEntry> = serde_json::from_str(json)?;
        let prompts = entries
            .into_iter()
            .map(|(role, entry)| (role, entry.into_system()))
            .filter(|(_, system)| !system.trim().is_empty())
            .collect();
        Ok(Self { prompts })
    }

    /// Load a catalog file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file cannot be read, or a
    /// parse error as for [`from_json_str`](Self::from_json_str).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let catalog = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            prompts = catalog.len(),
            "Loaded prompt catalog"
        );
        Ok(catalog)
    }

    /// System prompt for a role
    #[must_use]
    pub fn system_prompt(&self, role: &str) -> Option<&str> {
        self.prompts.get(role).map(String::as_str)
    }

    /// Number of prompts
    #[must_use]
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
