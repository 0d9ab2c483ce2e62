//! Payloads exchanged between the client and the relay endpoint.

use serde::{Deserialize, Serialize};

use crate::core::builtin_models::DEFAULT_MODEL;
use crate::core::message::Message;
use crate::core::providers::ProviderKind;

/// Path the relay serves generation requests on.
pub const GENERATE_PATH: &str = "/api/generate";
pub const HEARTBEAT_PATH: &str = "/api/heartbeat";

/// Optional sampling parameters.
///
/// `None` means "not set" and is never serialized, so the provider's own
/// default applies. `Some(0.0)` is a real value and is sent as such.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    /// Provider wire name, e.g. `"bedrock"`. Kept as a string so the relay
    /// can report an unknown provider instead of failing deserialization.
    #[serde(default = "default_provider")]
    pub model: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(flatten)]
    pub parameters: GenerationParameters,
}

fn default_provider() -> String {
    ProviderKind::Bedrock.as_str().to_string()
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

/// JSON body of every non-streaming failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
