//! Model registry
//!
//! Maps a human-readable model name to the provider that serves it. The
//! built-in list is embedded from `builtin_models.toml`; users can extend it
//! with `custom_models` in their preference file.

use serde::{Deserialize, Serialize};

use crate::core::providers::ProviderKind;

pub const DEFAULT_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub provider: ProviderKind,
}

#[derive(Debug, Deserialize)]
struct BuiltinModelsConfig {
    models: Vec<ModelEntry>,
}

/// Load built-in models from the embedded configuration.
pub fn load_builtin_models() -> Result<Vec<ModelEntry>, toml::de::Error> {
    const CONFIG_CONTENT: &str = include_str!("../builtin_models.toml");

    let config: BuiltinModelsConfig = toml::from_str(CONFIG_CONTENT)?;
    Ok(config.models)
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    pub fn new(entries: Vec<ModelEntry>) -> Self {
        Self { entries }
    }

    /// Built-in models followed by `custom`; a custom entry with the same
    /// name as a built-in one replaces it.
    pub fn with_custom(custom: &[ModelEntry]) -> Result<Self, toml::de::Error> {
        let mut entries = load_builtin_models()?;
        for entry in custom {
            match entries.iter_mut().find(|e| e.name == entry.name) {
                Some(existing) => existing.provider = entry.provider,
                None => entries.push(entry.clone()),
            }
        }
        Ok(Self { entries })
    }

    /// Exact-name lookup. Model ids are case-sensitive upstream, so no
    /// normalization happens here.
    pub fn lookup(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }
}
