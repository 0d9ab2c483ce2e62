//! OpenAI chat completions, also used for GitHub Models which speaks the same
//! wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, ProviderError, TextStream, TextStreamProvider};
use crate::server::sse::{extract_error_summary, summarize_error_body, text_stream, SsePayload};
use crate::utils::url::construct_api_url;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GITHUB_MODELS_BASE_URL: &str = "https://models.inference.ai.azure.com";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Deserialize, Default)]
struct ChatDelta {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    credential_var: &'static str,
}

impl OpenAiCompatibleProvider {
    pub fn openai(client: reqwest::Client, base_url: Option<&str>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).to_string(),
            api_key,
            credential_var: "OPENAI_API_KEY",
        }
    }

    pub fn github(client: reqwest::Client, token: Option<String>) -> Self {
        Self {
            client,
            base_url: GITHUB_MODELS_BASE_URL.to_string(),
            api_key: token,
            credential_var: "GITHUB_TOKEN",
        }
    }

    pub fn endpoint(&self) -> String {
        construct_api_url(&self.base_url, "chat/completions")
    }
}

fn build_request<'a>(model_name: &'a str, request: &'a CompletionRequest) -> ChatRequest<'a> {
    let params = &request.parameters;
    let system = params
        .system
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|content| ChatMessage {
            role: "system",
            content,
        });

    let messages = system
        .into_iter()
        .chain(request.messages.iter().map(|m| ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }))
        .collect();

    ChatRequest {
        model: model_name,
        messages,
        stream: true,
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        presence_penalty: params.presence_penalty,
        frequency_penalty: params.frequency_penalty,
    }
}

pub(crate) fn parse_payload(payload: &str) -> Result<SsePayload, ProviderError> {
    if payload == "[DONE]" {
        return Ok(SsePayload::Done);
    }

    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|err| ProviderError::Decode(err.to_string()))?;
    if value.get("error").is_some() {
        let message = extract_error_summary(&value).unwrap_or_else(|| payload.to_string());
        return Err(ProviderError::Upstream(message));
    }

    let response: ChatResponse =
        serde_json::from_value(value).map_err(|err| ProviderError::Decode(err.to_string()))?;
    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map_or(SsePayload::Skip, SsePayload::Text))
}

#[async_trait]
impl TextStreamProvider for OpenAiCompatibleProvider {
    async fn open_stream(
        &self,
        model_name: &str,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential(self.credential_var))?;

        let body = build_request(model_name, request);
        debug!(endpoint = %self.endpoint(), model = model_name, "opening chat completions stream");

        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: summarize_error_body(&body),
            });
        }

        Ok(text_stream(response.bytes_stream(), parse_payload))
    }
}
