//! Google Gemini via the Generative Language API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, ProviderError, TextStream, TextStreamProvider};
use crate::core::message::Role;
use crate::server::sse::{extract_error_summary, summarize_error_body, text_stream, SsePayload};
use crate::utils::url::encode_path_segment;

pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        self.max_output_tokens.is_none()
            && self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.presence_penalty.is_none()
            && self.frequency_penalty.is_none()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "GenerationConfig::is_empty")]
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Clone)]
pub struct GoogleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleProvider {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: GOOGLE_BASE_URL.to_string(),
            api_key,
        }
    }

    pub fn endpoint(&self, model_name: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url.trim_end_matches('/'),
            encode_path_segment(model_name)
        )
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn build_request(request: &CompletionRequest) -> GenerateContentRequest<'_> {
    let params = &request.parameters;
    GenerateContentRequest {
        contents: request.messages.iter()
            .map(|m| Content {
                role: Some(gemini_role(m.role)),
                parts: vec![Part { text: &m.content }],
            })
            .collect(),
        system_instruction: params
            .system
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
        generation_config: GenerationConfig {
            max_output_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
        },
    }
}

fn parse_payload(payload: &str) -> Result<SsePayload, ProviderError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|err| ProviderError::Decode(err.to_string()))?;
    if value.get("error").is_some() {
        let message = extract_error_summary(&value).unwrap_or_else(|| payload.to_string());
        return Err(ProviderError::Upstream(message));
    }

    let response: GenerateContentResponse =
        serde_json::from_value(value).map_err(|err| ProviderError::Decode(err.to_string()))?;

    if response.candidates.is_empty() {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::Upstream(format!("Prompt blocked: {reason}")));
        }
    }

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(if text.is_empty() {
        SsePayload::Skip
    } else {
        SsePayload::Text(text)
    })
}

#[async_trait]
impl TextStreamProvider for GoogleProvider {
    async fn open_stream(
        &self,
        model_name: &str,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential("GOOGLE_GENERATIVE_AI_API_KEY"))?;

        debug!(model = model_name, "opening Gemini stream");
        let response = self
            .client
            .post(self.endpoint(model_name))
            .header("Content-Type", "application/json")
            .query(&[("alt", "sse"), ("key", api_key)])
            .json(&build_request(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: summarize_error_body(&body),
            });
        }

        Ok(text_stream(response.bytes_stream(), parse_payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GenerationParameters;
    use crate::core::message::Message;
    use serde_json::json;

    #[test]
    fn assistant_turns_use_model_role_and_system_moves_out_of_contents() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            parameters: GenerationParameters {
                system: Some("be brief".into()),
                max_tokens: Some(64),
                top_k: Some(5),
                ..Default::default()
            },
        };

        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]}
                ],
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "generationConfig": {"maxOutputTokens": 64, "topK": 5}
            })
        );
    }

    #[test]
    fn empty_generation_config_is_omitted() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            parameters: GenerationParameters::default(),
        };
        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert!(value.get("generationConfig").is_none());
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn candidate_parts_are_concatenated() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(parse_payload(payload).unwrap(), SsePayload::Text("Hello".into()));

        let finished = r#"{"candidates":[{"finishReason":"STOP"}]}"#;
        assert_eq!(parse_payload(finished).unwrap(), SsePayload::Skip);
    }

    #[test]
    fn blocked_prompts_and_errors_fail_the_stream() {
        let blocked = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert_eq!(
            parse_payload(blocked).unwrap_err().to_string(),
            "Prompt blocked: SAFETY"
        );

        let error = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(parse_payload(error).unwrap_err().to_string(), "API key not valid");
    }

    #[test]
    fn endpoint_names_the_model() {
        let provider = GoogleProvider::new(reqwest::Client::new(), None);
        assert_eq!(
            provider.endpoint("gemini-1.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:streamGenerateContent"
        );
    }

    #[test]
    fn endpoint_keeps_model_name_inside_one_segment() {
        let provider = GoogleProvider::new(reqwest::Client::new(), None);
        assert_eq!(
            provider.endpoint("../files?x="),
            "https://generativelanguage.googleapis.com/v1beta/models/..%2Ffiles%3Fx%3D:streamGenerateContent"
        );
        assert_eq!(
            provider.endpoint("tunedModels/mine"),
            "https://generativelanguage.googleapis.com/v1beta/models/tunedModels%2Fmine:streamGenerateContent"
        );
    }
}
