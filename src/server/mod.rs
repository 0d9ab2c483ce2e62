//! The relay: accepts generation requests from clients, forwards them to the
//! selected provider and streams the generated text straight back.
//!
//! Errors before the first chunk become a single JSON error response. Once
//! streaming has started the only way to signal failure is to abort the body,
//! which the client observes as a read error.

pub mod eventstream;
pub mod providers;
pub mod sse;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, StreamExt};
use std::error::Error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{ErrorBody, GenerationRequest, GENERATE_PATH, HEARTBEAT_PATH};
use crate::core::providers::{ProviderKind, UnknownProvider};
use providers::{CompletionRequest, ProviderError, ProviderRegistry, ProviderSettings};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug)]
pub enum RelayError {
    Unauthorized,
    MalformedBody(String),
    UnknownProvider(UnknownProvider),
    ProviderUnavailable(ProviderKind),
    Provider(ProviderError),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Unauthorized => write!(f, "Unauthorized"),
            RelayError::MalformedBody(err) => write!(f, "Invalid request body: {err}"),
            RelayError::UnknownProvider(err) => write!(f, "{err}"),
            RelayError::ProviderUnavailable(kind) => {
                write!(f, "No binding registered for provider '{kind}'")
            }
            RelayError::Provider(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RelayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RelayError::UnknownProvider(err) => Some(err),
            RelayError::Provider(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProviderError> for RelayError {
    fn from(err: ProviderError) -> Self {
        RelayError::Provider(err)
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Startup failures for `relaychat serve`.
#[derive(Debug)]
pub enum ServeError {
    MissingSecret,
    Bind { addr: String, source: std::io::Error },
    Serve(std::io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::MissingSecret => {
                write!(f, "API_KEY must be set to the secret clients authenticate with")
            }
            ServeError::Bind { addr, source } => write!(f, "Failed to bind {addr}: {source}"),
            ServeError::Serve(err) => write!(f, "Relay server failed: {err}"),
        }
    }
}

impl Error for ServeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServeError::Bind { source, .. } => Some(source),
            ServeError::Serve(err) => Some(err),
            ServeError::MissingSecret => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub secret: String,
    pub providers: ProviderSettings,
}

impl ServerConfig {
    pub fn from_env(bind: Option<String>) -> Result<Self, ServeError> {
        let secret = std::env::var("API_KEY")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or(ServeError::MissingSecret)?;
        Ok(Self {
            bind: bind.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            secret,
            providers: ProviderSettings::from_env(),
        })
    }
}

#[derive(Clone)]
pub struct RelayState {
    secret: Arc<str>,
    providers: ProviderRegistry,
}

impl RelayState {
    pub fn new(secret: impl Into<Arc<str>>, providers: ProviderRegistry) -> Self {
        Self {
            secret: secret.into(),
            providers,
        }
    }
}

pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), RelayError> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == secret => Ok(()),
        _ => Err(RelayError::Unauthorized),
    }
}

pub async fn generate(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RelayError> {
    authorize(&headers, &state.secret).inspect_err(|_| warn!("rejected unauthorized request"))?;

    let request: GenerationRequest = serde_json::from_slice(&body)
        .map_err(|err| RelayError::MalformedBody(err.to_string()))?;
    let kind: ProviderKind = request.model.parse().map_err(RelayError::UnknownProvider)?;
    let binding = state
        .providers
        .get(kind)
        .ok_or(RelayError::ProviderUnavailable(kind))?;

    info!(
        provider = %kind,
        model = %request.model_name,
        messages = request.messages.len(),
        "relaying generation request"
    );

    let completion = CompletionRequest::new(request.messages, request.parameters);
    let mut upstream = binding
        .open_stream(&request.model_name, &completion)
        .await
        .inspect_err(|err| warn!(provider = %kind, error = %err, "provider stream failed to open"))?;

    // Hold the response until the provider has produced something so that
    // early failures still get a proper status code.
    let first = match upstream.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(err)) => {
            warn!(provider = %kind, error = %err, "provider failed before first chunk");
            return Err(err.into());
        }
        None => None,
    };

    let rest = upstream.map(move |item| {
        item.map(Bytes::from).map_err(|err| {
            warn!(provider = %kind, error = %err, "aborting response stream");
            std::io::Error::other(err)
        })
    });
    let body = stream::iter(first.map(|chunk| Ok(Bytes::from(chunk)))).chain(rest);

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    debug!(provider = %kind, "streaming response started");
    Ok(response)
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route(GENERATE_PATH, post(generate))
        .route(HEARTBEAT_PATH, get(heartbeat))
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(config: ServerConfig) -> Result<(), ServeError> {
    let registry = ProviderRegistry::from_settings(reqwest::Client::new(), &config.providers);
    let app = build_router(RelayState::new(config.secret, registry));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.bind.clone(),
            source,
        })?;
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down relay");
        })
        .await
        .map_err(ServeError::Serve)
}
