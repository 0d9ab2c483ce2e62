//! Upstream model providers the relay can stream from.
//!
//! Each binding turns a model name and a [`CompletionRequest`] into a stream
//! of text fragments. Bindings are looked up by [`ProviderKind`] so the set
//! of reachable providers is closed.

pub mod bedrock;
pub mod google;
pub mod openai;

use async_trait::async_trait;
use futures_util::Stream;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::api::GenerationParameters;
use crate::core::history::sanitize;
use crate::core::message::Message;
use crate::core::providers::ProviderKind;

pub use bedrock::BedrockProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiCompatibleProvider;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Provider-neutral call options. Parameters that are `None` are left out
/// of the upstream request entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub parameters: GenerationParameters,
}

impl CompletionRequest {
    /// Drops blank turns, which the upstream APIs reject, then merges the
    /// neighbours that became adjacent so roles still alternate.
    pub fn new(messages: Vec<Message>, parameters: GenerationParameters) -> Self {
        let kept: Vec<Message> = messages
            .into_iter()
            .filter(|m| !m.content.trim().is_empty())
            .collect();
        Self {
            messages: sanitize(&kept),
            parameters,
        }
    }
}

#[derive(Debug)]
pub enum ProviderError {
    /// The credential the binding needs is not configured on the relay.
    MissingCredential(&'static str),
    Request(String),
    Status { status: u16, message: String },
    Stream(String),
    Decode(String),
    /// The provider reported a failure inside an otherwise healthy stream.
    Upstream(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::MissingCredential(var) => {
                write!(f, "Provider is not configured: {var} is not set")
            }
            ProviderError::Request(err) => write!(f, "Upstream request failed: {err}"),
            ProviderError::Status { status, message } => {
                write!(f, "Upstream returned status {status}: {message}")
            }
            ProviderError::Stream(err) => write!(f, "Upstream stream failed: {err}"),
            ProviderError::Decode(err) => write!(f, "Could not decode upstream response: {err}"),
            ProviderError::Upstream(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Request(err.to_string())
    }
}

#[async_trait]
pub trait TextStreamProvider: Send + Sync {
    async fn open_stream(
        &self,
        model_name: &str,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError>;
}

/// Provider credentials and endpoints read from the relay's environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub google_api_key: Option<String>,
    pub github_token: Option<String>,
    pub bedrock_api_key: Option<String>,
    pub aws_region: Option<String>,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            openai_api_key: read("OPENAI_API_KEY"),
            openai_base_url: read("OPENAI_BASE_URL"),
            google_api_key: read("GOOGLE_GENERATIVE_AI_API_KEY"),
            github_token: read("GITHUB_TOKEN"),
            bedrock_api_key: read("AWS_BEARER_TOKEN_BEDROCK"),
            aws_region: read("AWS_REGION"),
        }
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    bindings: HashMap<ProviderKind, Arc<dyn TextStreamProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One binding per [`ProviderKind`], all sharing `client`.
    pub fn from_settings(client: reqwest::Client, settings: &ProviderSettings) -> Self {
        let mut registry = Self::new();
        registry.register(
            ProviderKind::OpenAi,
            Arc::new(OpenAiCompatibleProvider::openai(
                client.clone(),
                settings.openai_base_url.as_deref(),
                settings.openai_api_key.clone(),
            )),
        );
        registry.register(
            ProviderKind::Github,
            Arc::new(OpenAiCompatibleProvider::github(
                client.clone(),
                settings.github_token.clone(),
            )),
        );
        registry.register(
            ProviderKind::Google,
            Arc::new(GoogleProvider::new(
                client.clone(),
                settings.google_api_key.clone(),
            )),
        );
        registry.register(
            ProviderKind::Bedrock,
            Arc::new(BedrockProvider::new(
                client,
                settings.aws_region.as_deref(),
                settings.bedrock_api_key.clone(),
            )),
        );
        registry
    }

    pub fn register(&mut self, kind: ProviderKind, binding: Arc<dyn TextStreamProvider>) {
        self.bindings.insert(kind, binding);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn TextStreamProvider>> {
        self.bindings.get(&kind).cloned()
    }
}
