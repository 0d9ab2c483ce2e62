//! HTTP transport from the client to the relay's generate endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use std::pin::Pin;
use tracing::debug;

use crate::api::{GenerationRequest, GENERATE_PATH};
use crate::core::error::ChatError;
use crate::utils::url::construct_api_url;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// What the relay answered before any body bytes were consumed.
pub enum RelayResponse {
    /// 2xx: the body is the generated text, streamed.
    Streaming(ByteStream),
    /// Any other status, with the (small) error body read in full.
    Rejected { status: u16, body: String },
}

/// Seam between the orchestrator and the network so exchanges can be driven
/// against a scripted relay in tests.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn send(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<RelayResponse, ChatError>;
}

#[derive(Clone)]
pub struct HttpRelayClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelayClient {
    pub fn new(client: reqwest::Client, relay_url: &str) -> Self {
        Self {
            client,
            endpoint: construct_api_url(relay_url, GENERATE_PATH),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RelayTransport for HttpRelayClient {
    async fn send(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<RelayResponse, ChatError> {
        debug!(
            endpoint = %self.endpoint,
            provider = %request.model,
            model = %request.model_name,
            messages = request.messages.len(),
            "sending generation request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .bearer_auth(credential)
            .json(request)
            .send()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Ok(RelayResponse::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response.bytes_stream().map_err(|err| err.to_string());
        Ok(RelayResponse::Streaming(Box::pin(stream)))
    }
}
