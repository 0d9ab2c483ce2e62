use std::time::Duration;

use crate::api::GenerationParameters;
use crate::core::builtin_models::{ModelRegistry, DEFAULT_MODEL};
use crate::core::chat_stream::RetryPolicy;
use crate::core::config::data::Config;
use crate::core::config::io::ConfigError;
use crate::core::error::ChatError;
use crate::core::generation::GenerationConfig;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_MAX_INPUT_CHARACTERS: usize = 10_000;

/// Keys accepted by `relaychat set` / `unset`.
pub const SETTABLE_KEYS: &[&str] = &[
    "relay-url",
    "model",
    "system",
    "max-tokens",
    "temperature",
    "top-p",
    "top-k",
    "presence-penalty",
    "frequency-penalty",
    "max-input-characters",
    "retry-backoff-ms",
    "retry-ceiling-ms",
];

impl Config {
    pub fn relay_url(&self) -> &str {
        self.relay_url.as_deref().unwrap_or(DEFAULT_RELAY_URL)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn max_input_characters(&self) -> usize {
        self.max_input_characters
            .unwrap_or(DEFAULT_MAX_INPUT_CHARACTERS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            backoff: self
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
            ceiling: self
                .retry_ceiling_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.ceiling),
        }
    }

    pub fn model_registry(&self) -> Result<ModelRegistry, ConfigError> {
        ModelRegistry::with_custom(&self.custom_models)
            .map_err(|err| ConfigError::Invalid(format!("invalid built-in model list: {err}")))
    }

    /// Resolve the selected model against `registry` and collect the
    /// sampling parameters that are actually set.
    pub fn generation_config(
        &self,
        registry: &ModelRegistry,
    ) -> Result<GenerationConfig, ChatError> {
        self.validate()
            .map_err(|err| ChatError::configuration(err.to_string()))?;

        let model = self.model();
        let entry = registry
            .lookup(model)
            .ok_or_else(|| ChatError::unknown_model(model))?;

        Ok(GenerationConfig {
            provider: entry.provider,
            model_name: entry.name.clone(),
            parameters: GenerationParameters {
                system: self.system.clone().filter(|s| !s.trim().is_empty()),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                presence_penalty: self.presence_penalty,
                frequency_penalty: self.frequency_penalty,
            },
            max_input_characters: self.max_input_characters(),
        })
    }

    /// Range checks matching what the provider APIs accept.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("temperature", self.temperature, 0.0, 1.0)?;
        check_range("top-p", self.top_p, 0.0, 1.0)?;
        check_range("presence-penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("frequency-penalty", self.frequency_penalty, -2.0, 2.0)?;
        if self.max_tokens == Some(0) {
            return Err(ConfigError::Invalid("max-tokens must be at least 1".into()));
        }
        if self.max_input_characters == Some(0) {
            return Err(ConfigError::Invalid(
                "max-input-characters must be at least 1".into(),
            ));
        }
        if self.retry_backoff_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "retry-backoff-ms must be at least 1".into(),
            ));
        }
        if self.retry_ceiling_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "retry-ceiling-ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply a `relaychat set <key> <value>`; the result is validated before
    /// being accepted so a bad value never reaches disk.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut updated = self.clone();
        match key {
            "relay-url" => updated.relay_url = Some(value.trim().to_string()),
            "model" => {
                let registry = self.model_registry()?;
                if registry.lookup(value).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "Unknown model '{value}'. Run 'relaychat models' to list available models."
                    )));
                }
                updated.model = Some(value.to_string());
            }
            "system" => updated.system = Some(value.to_string()),
            "max-tokens" => updated.max_tokens = Some(parse_number(key, value)?),
            "temperature" => updated.temperature = Some(parse_number(key, value)?),
            "top-p" => updated.top_p = Some(parse_number(key, value)?),
            "top-k" => updated.top_k = Some(parse_number(key, value)?),
            "presence-penalty" => updated.presence_penalty = Some(parse_number(key, value)?),
            "frequency-penalty" => updated.frequency_penalty = Some(parse_number(key, value)?),
            "max-input-characters" => {
                updated.max_input_characters = Some(parse_number(key, value)?)
            }
            "retry-backoff-ms" => updated.retry_backoff_ms = Some(parse_number(key, value)?),
            "retry-ceiling-ms" => updated.retry_ceiling_ms = Some(parse_number(key, value)?),
            _ => return Err(unknown_key(key)),
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), ConfigError> {
        match key {
            "relay-url" => self.relay_url = None,
            "model" => self.model = None,
            "system" => self.system = None,
            "max-tokens" => self.max_tokens = None,
            "temperature" => self.temperature = None,
            "top-p" => self.top_p = None,
            "top-k" => self.top_k = None,
            "presence-penalty" => self.presence_penalty = None,
            "frequency-penalty" => self.frequency_penalty = None,
            "max-input-characters" => self.max_input_characters = None,
            "retry-backoff-ms" => self.retry_backoff_ms = None,
            "retry-ceiling-ms" => self.retry_ceiling_ms = None,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}

fn check_range(name: &str, value: Option<f64>, min: f64, max: f64) -> Result<(), ConfigError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(ConfigError::Invalid(format!(
            "{name} must be between {min} and {max} (got {v})"
        ))),
        _ => Ok(()),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid value for {key}: '{value}'")))
}

fn unknown_key(key: &str) -> ConfigError {
    ConfigError::Invalid(format!(
        "Unknown config key '{key}'. Available keys: {}",
        SETTABLE_KEYS.join(", ")
    ))
}
