use crate::api::{GenerationParameters, GenerationRequest};
use crate::core::message::Message;
use crate::core::providers::ProviderKind;

/// Everything needed to shape one outbound request, resolved from the user's
/// preferences and the model registry.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model_name: String,
    pub parameters: GenerationParameters,
    pub max_input_characters: usize,
}

impl GenerationConfig {
    pub fn new(provider: ProviderKind, model_name: impl Into<String>, budget: usize) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
            parameters: GenerationParameters::default(),
            max_input_characters: budget,
        }
    }

    pub fn request(&self, messages: Vec<Message>) -> GenerationRequest {
        GenerationRequest {
            messages,
            model: self.provider.as_str().to_string(),
            model_name: self.model_name.clone(),
            parameters: self.parameters.clone(),
        }
    }
}
