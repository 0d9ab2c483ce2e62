use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::builtin_models::ModelEntry;

/// Client preferences persisted between sessions.
///
/// Every field is optional so an empty or partial file is valid; accessors in
/// `defaults.rs` supply the fallbacks. Sampling parameters that are unset stay
/// unset all the way to the provider.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the relay server (e.g. "http://127.0.0.1:3000")
    pub relay_url: Option<String>,
    /// Model name as listed by `relaychat models`
    pub model: Option<String>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    /// Character budget for the history sent with each request
    pub max_input_characters: Option<usize>,
    /// Pause between attempts when a stream read fails
    pub retry_backoff_ms: Option<u64>,
    /// Total time reads may keep failing before the response is abandoned
    pub retry_ceiling_ms: Option<u64>,
    /// Extra model-to-provider mappings on top of the built-in list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_models: Vec<ModelEntry>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
