//! Amazon Bedrock through the Converse streaming API, authenticated with a
//! Bedrock API key sent as a bearer token.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use tracing::{debug, warn};

use super::{CompletionRequest, ProviderError, TextStream, TextStreamProvider};
use crate::server::eventstream::{EventMessage, EventStreamDecoder};
use crate::server::sse::summarize_error_body;
use crate::utils::url::encode_path_segment;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Serialize)]
struct TextBlock<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct ConverseMessage<'a> {
    role: &'a str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

impl InferenceConfig {
    fn is_empty(&self) -> bool {
        self.max_tokens.is_none() && self.temperature.is_none() && self.top_p.is_none()
    }
}

#[derive(Serialize)]
struct AdditionalFields {
    top_k: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseStreamRequest<'a> {
    messages: Vec<ConverseMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<TextBlock<'a>>,
    #[serde(skip_serializing_if = "InferenceConfig::is_empty")]
    inference_config: InferenceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_model_request_fields: Option<AdditionalFields>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: Option<DeltaText>,
}

#[derive(Deserialize)]
struct DeltaText {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ExceptionBody {
    message: Option<String>,
    #[serde(rename = "Message")]
    message_upper: Option<String>,
}

#[derive(Clone)]
pub struct BedrockProvider {
    client: reqwest::Client,
    region: String,
    api_key: Option<String>,
}

impl BedrockProvider {
    pub fn new(client: reqwest::Client, region: Option<&str>, api_key: Option<String>) -> Self {
        Self {
            client,
            region: region.unwrap_or(DEFAULT_REGION).to_string(),
            api_key,
        }
    }

    pub fn endpoint(&self, model_id: &str) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/converse-stream",
            self.region,
            encode_path_segment(model_id)
        )
    }
}

fn build_request(request: &CompletionRequest) -> ConverseStreamRequest<'_> {
    let params = &request.parameters;
    if params.presence_penalty.is_some() || params.frequency_penalty.is_some() {
        debug!("Bedrock Converse does not take presence/frequency penalties; ignoring them");
    }

    ConverseStreamRequest {
        messages: request.messages.iter()
            .map(|m| ConverseMessage {
                role: m.role.as_str(),
                content: vec![TextBlock { text: &m.content }],
            })
            .collect(),
        system: params
            .system
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|text| TextBlock { text })
            .into_iter()
            .collect(),
        inference_config: InferenceConfig {
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        },
        additional_model_request_fields: params.top_k.map(|top_k| AdditionalFields { top_k }),
    }
}

/// What one decoded event-stream message means for the text stream.
#[derive(Debug, PartialEq, Eq)]
enum ConverseEvent {
    Text(String),
    Ignore,
    Stop,
}

fn interpret(message: &EventMessage) -> Result<ConverseEvent, ProviderError> {
    match message.header_str(":message-type") {
        Some("event") => {}
        Some("exception") => {
            let kind = message.header_str(":exception-type").unwrap_or("exception");
            let detail = serde_json::from_slice::<ExceptionBody>(&message.payload)
                .ok()
                .and_then(|body| body.message.or(body.message_upper))
                .unwrap_or_else(|| String::from_utf8_lossy(&message.payload).into_owned());
            return Err(ProviderError::Upstream(format!("{kind}: {detail}")));
        }
        Some("error") => {
            let code = message.header_str(":error-code").unwrap_or("error");
            let detail = message.header_str(":error-message").unwrap_or("");
            return Err(ProviderError::Upstream(format!("{code}: {detail}")));
        }
        other => {
            debug!(message_type = ?other, "ignoring unexpected event-stream message");
            return Ok(ConverseEvent::Ignore);
        }
    }

    match message.header_str(":event-type") {
        Some("contentBlockDelta") => {
            let event: ContentBlockDelta = serde_json::from_slice(&message.payload)
                .map_err(|err| ProviderError::Decode(err.to_string()))?;
            Ok(event
                .delta
                .and_then(|delta| delta.text)
                .filter(|text| !text.is_empty())
                .map_or(ConverseEvent::Ignore, ConverseEvent::Text))
        }
        Some("messageStop") => Ok(ConverseEvent::Stop),
        _ => Ok(ConverseEvent::Ignore),
    }
}

struct ConverseState<S> {
    body: Pin<Box<S>>,
    decoder: EventStreamDecoder,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
}

impl<S> ConverseState<S> {
    fn drain_messages(&mut self) {
        loop {
            match self.decoder.next_message() {
                Ok(Some(message)) => match interpret(&message) {
                    Ok(ConverseEvent::Text(text)) => self.pending.push_back(Ok(text)),
                    Ok(ConverseEvent::Ignore) => {}
                    Ok(ConverseEvent::Stop) => {
                        self.finished = true;
                        return;
                    }
                    Err(err) => {
                        self.fail(err);
                        return;
                    }
                },
                Ok(None) => return,
                Err(err) => {
                    self.fail(ProviderError::Decode(err.to_string()));
                    return;
                }
            }
        }
    }

    fn fail(&mut self, err: ProviderError) {
        warn!(error = %err, "Bedrock stream failed");
        self.pending.push_back(Err(err));
        self.finished = true;
    }
}

fn converse_text_stream<S, E>(body: S) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send,
{
    let state = ConverseState {
        body: Box::pin(body),
        decoder: EventStreamDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.decoder.push(&chunk);
                    state.drain_messages();
                }
                Some(Err(err)) => state.fail(ProviderError::Stream(err.to_string())),
                None => {
                    if let Err(err) = state.decoder.finish() {
                        state.fail(ProviderError::Decode(err.to_string()));
                    }
                    state.finished = true;
                }
            }
        }
    }))
}

#[async_trait]
impl TextStreamProvider for BedrockProvider {
    async fn open_stream(
        &self,
        model_name: &str,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential("AWS_BEARER_TOKEN_BEDROCK"))?;

        let endpoint = self.endpoint(model_name);
        debug!(%endpoint, "opening Bedrock converse stream");
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/vnd.amazon.eventstream")
            .bearer_auth(api_key)
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

        Ok(converse_text_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GenerationParameters;
    use crate::core::message::Message;
    use crate::server::eventstream::test_support::encode;
    use serde_json::json;

    fn event(event_type: &str, payload: &str) -> Vec<u8> {
        encode(
            &[(":event-type", event_type), (":message-type", "event")],
            payload.as_bytes(),
        )
    }

    fn delta(text: &str) -> Vec<u8> {
        event(
            "contentBlockDelta",
            &json!({"contentBlockIndex": 0, "delta": {"text": text}}).to_string(),
        )
    }

    async fn collect(chunks: Vec<Vec<u8>>) -> Vec<Result<String, String>> {
        let body = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, String>(Bytes::from(c)))
                .collect::<Vec<_>>(),
        );
        converse_text_stream(body)
            .map(|item| item.map_err(|err| err.to_string()))
            .collect()
            .await
    }

    #[test]
    fn model_ids_are_path_encoded() {
        let provider = BedrockProvider::new(reqwest::Client::new(), Some("eu-central-1"), None);
        assert_eq!(
            provider.endpoint("anthropic.claude-3-haiku-20240307-v1:0"),
            "https://bedrock-runtime.eu-central-1.amazonaws.com/model/anthropic.claude-3-haiku-20240307-v1%3A0/converse-stream"
        );
    }

    #[test]
    fn request_maps_parameters_into_converse_shape() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            parameters: GenerationParameters {
                system: Some("be brief".into()),
                max_tokens: Some(100),
                top_p: Some(0.9),
                top_k: Some(50),
                presence_penalty: Some(1.0),
                ..Default::default()
            },
        };

        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            value,
            json!({
                "messages": [
                    {"role": "user", "content": [{"text": "hi"}]},
                    {"role": "assistant", "content": [{"text": "hello"}]}
                ],
                "system": [{"text": "be brief"}],
                "inferenceConfig": {"maxTokens": 100, "topP": 0.9},
                "additionalModelRequestFields": {"top_k": 50}
            })
        );
    }

    #[test]
    fn bare_request_omits_optional_sections() {
        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            parameters: GenerationParameters::default(),
        };
        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            value,
            json!({"messages": [{"role": "user", "content": [{"text": "hi"}]}]})
        );
    }

    #[tokio::test]
    async fn deltas_stream_until_message_stop() {
        let mut wire = event("messageStart", r#"{"role":"assistant"}"#);
        wire.extend(delta("Hel"));
        let split = wire.len() - 5;
        let mut rest = wire.split_off(split);
        rest.extend(delta("lo"));
        rest.extend(event("contentBlockStop", r#"{"contentBlockIndex":0}"#));
        rest.extend(event("messageStop", r#"{"stopReason":"end_turn"}"#));
        rest.extend(delta("ignored"));

        assert_eq!(
            collect(vec![wire, rest]).await,
            vec![Ok("Hel".to_string()), Ok("lo".to_string())]
        );
    }

    #[tokio::test]
    async fn exceptions_become_stream_errors() {
        let exception = encode(
            &[
                (":exception-type", "throttlingException"),
                (":message-type", "exception"),
            ],
            br#"{"message":"Too many requests"}"#,
        );
        let results = collect(vec![delta("partial"), exception]).await;
        assert_eq!(
            results,
            vec![
                Ok("partial".to_string()),
                Err("throttlingException: Too many requests".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn truncated_body_is_a_decode_error() {
        let mut wire = delta("whole");
        let partial = delta("cut");
        wire.extend_from_slice(&partial[..partial.len() / 2]);

        let results = collect(vec![wire]).await;
        assert_eq!(results[0], Ok("whole".to_string()));
        assert!(results[1]
            .as_ref()
            .unwrap_err()
            .starts_with("Could not decode upstream response"));
    }
}
