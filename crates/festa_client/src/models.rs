//! Selectable model list served by the model listing endpoint.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Available models plus the current selection.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    available: Vec<ModelInfo>,
    current: String,
    fallback: String,
}

impl ModelCatalog {
    /// Empty catalog selecting `fallback` until a listing arrives.
    pub fn new(fallback: impl Into<String>) -> Self {
        let fallback = fallback.into();
        Self {
            available: Vec::new(),
            current: fallback.clone(),
            fallback,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn available(&self) -> &[ModelInfo] {
        &self.available
    }

    /// Replace the listing; keeps the selection if still offered.
    pub fn replace(&mut self, models: Vec<ModelInfo>) {
        self.available = models;
        if !self.contains(&self.current) {
            self.current = self.fallback.clone();
        }
    }

    /// Select `id`. Before any listing is loaded every id is accepted.
    pub fn select(&mut self, id: &str) -> bool {
        if !self.available.is_empty() && !self.contains(id) {
            return false;
        }
        self.current = id.to_string();
        true
    }

    /// Display name for a model id, or the id itself when unknown.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.available
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.name.as_str())
            .unwrap_or(id)
    }

    fn contains(&self, id: &str) -> bool {
        self.available.iter().any(|m| m.id == id)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}
