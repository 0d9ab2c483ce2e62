//! Drives one user turn through the relay and records the outcome.
//!
//! A [`ChatSession`] owns the conversation. Each successful exchange appends
//! exactly two messages (the user's turn up front, the assistant's reply at
//! the end); a failed one appends only the user's turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ErrorBody;
use crate::core::chat_stream::{RetryPolicy, StreamReader};
use crate::core::error::ChatError;
use crate::core::generation::GenerationConfig;
use crate::core::history::prepare_outbound;
use crate::core::keyring::{CredentialStore, KeyringAccessError};
use crate::core::message::Message;
use crate::core::relay_client::{RelayResponse, RelayTransport};

pub struct ChatSession {
    conversation: Mutex<Vec<Message>>,
    in_flight: AtomicBool,
    transport: Arc<dyn RelayTransport>,
    credentials: Arc<dyn CredentialStore>,
    retry_policy: RetryPolicy,
}

/// Clears the in-flight flag however the exchange ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChatSession {
    pub fn new(transport: Arc<dyn RelayTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            conversation: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            transport,
            credentials,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Snapshot of the conversation so far.
    pub async fn conversation(&self) -> Vec<Message> {
        self.conversation.lock().await.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start over with an empty conversation. Refused while a reply is
    /// streaming.
    pub async fn clear(&self) -> Result<(), ChatError> {
        let _in_flight = self.begin()?;
        self.conversation.lock().await.clear();
        Ok(())
    }

    pub async fn submit<F>(
        &self,
        user_text: &str,
        config: &GenerationConfig,
        on_update: F,
    ) -> Result<String, ChatError>
    where
        F: FnMut(&str) + Send,
    {
        self.submit_with_cancel(user_text, config, CancellationToken::new(), on_update)
            .await
    }

    /// Run one exchange. `on_update` receives the accumulated reply after
    /// every chunk; the final reply is returned and recorded.
    ///
    /// While an exchange is running, further submissions are rejected with
    /// [`ChatError::Busy`] and leave the conversation untouched.
    pub async fn submit_with_cancel<F>(
        &self,
        user_text: &str,
        config: &GenerationConfig,
        cancel_token: CancellationToken,
        on_update: F,
    ) -> Result<String, ChatError>
    where
        F: FnMut(&str) + Send,
    {
        if user_text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        let _in_flight = self.begin()?;

        let outbound = {
            let mut conversation = self.conversation.lock().await;
            conversation.push(Message::user(user_text));
            prepare_outbound(&conversation, config.max_input_characters)
        };

        let result = self
            .run_exchange(outbound, config, cancel_token, on_update)
            .await;

        match result {
            Ok(reply) => {
                self.conversation
                    .lock()
                    .await
                    .push(Message::assistant(reply.clone()));
                info!(chars = reply.chars().count(), "exchange complete");
                Ok(reply)
            }
            Err(err) => {
                warn!(kind = ?err.kind(), error = %err, "exchange failed");
                Err(err)
            }
        }
    }

    fn begin(&self) -> Result<InFlight<'_>, ChatError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlight(&self.in_flight))
            .map_err(|_| ChatError::Busy)
    }

    async fn run_exchange<F>(
        &self,
        outbound: Vec<Message>,
        config: &GenerationConfig,
        cancel_token: CancellationToken,
        on_update: F,
    ) -> Result<String, ChatError>
    where
        F: FnMut(&str) + Send,
    {
        let credential = self
            .credentials
            .get()
            .map_err(credential_error)?
            .filter(|credential| !credential.trim().is_empty())
            .ok_or_else(ChatError::missing_credential)?;

        if !outbound.first().is_some_and(Message::is_user) {
            return Err(ChatError::MalformedHistory {
                max_input_characters: config.max_input_characters,
            });
        }

        debug!(
            outbound_messages = outbound.len(),
            budget = config.max_input_characters,
            "history prepared"
        );
        let request = config.request(outbound);

        let stream = match self.transport.send(&request, &credential).await? {
            RelayResponse::Streaming(stream) => stream,
            RelayResponse::Rejected { status, body } => return Err(classify_rejection(status, &body)),
        };

        StreamReader::with_cancel_token(stream, self.retry_policy, cancel_token)
            .consume(on_update)
            .await
    }
}

fn classify_rejection(status: u16, body: &str) -> ChatError {
    if status == 401 {
        return ChatError::Authorization;
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| body.trim().to_string());
    let message = if message.is_empty() {
        format!("Request failed with status {status}")
    } else {
        message
    };
    ChatError::Relay { status, message }
}

fn credential_error(err: KeyringAccessError) -> ChatError {
    if err.is_recoverable() {
        ChatError::configuration(format!(
            "System keyring is unavailable ({err}). Unlock it or set RELAYCHAT_API_KEY."
        ))
    } else {
        ChatError::configuration(format!("Failed to read API key: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GenerationRequest;
    use crate::core::error::ChatErrorKind;
    use crate::core::keyring::MemoryCredentialStore;
    use crate::core::providers::ProviderKind;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    type Scripted = Box<dyn FnOnce() -> Result<RelayResponse, ChatError> + Send>;

    /// Relay double: hands out scripted responses in order and records what
    /// it was asked.
    #[derive(Default)]
    struct ScriptedRelay {
        responses: StdMutex<VecDeque<Scripted>>,
        requests: StdMutex<Vec<(GenerationRequest, String)>>,
    }

    impl ScriptedRelay {
        fn push(&self, response: impl FnOnce() -> Result<RelayResponse, ChatError> + Send + 'static) {
            self.responses.lock().unwrap().push_back(Box::new(response));
        }

        fn push_text(&self, chunks: &[&'static str]) {
            let chunks: Vec<Result<Bytes, String>> = chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            self.push(move || Ok(RelayResponse::Streaming(Box::pin(stream::iter(chunks)))));
        }

        fn push_rejection(&self, status: u16, body: &'static str) {
            self.push(move || {
                Ok(RelayResponse::Rejected {
                    status,
                    body: body.to_string(),
                })
            });
        }

        fn requests(&self) -> Vec<(GenerationRequest, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RelayTransport for ScriptedRelay {
        async fn send(
            &self,
            request: &GenerationRequest,
            credential: &str,
        ) -> Result<RelayResponse, ChatError> {
            self.requests
                .lock()
                .unwrap()
                .push((request.clone(), credential.to_string()));
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected relay call");
            next()
        }
    }

    fn session_with(relay: Arc<ScriptedRelay>, credential: Option<&str>) -> ChatSession {
        ChatSession::new(
            relay,
            Arc::new(MemoryCredentialStore::new(credential.map(str::to_string))),
        )
    }

    fn config(budget: usize) -> GenerationConfig {
        GenerationConfig::new(ProviderKind::OpenAi, "gpt-4o-mini", budget)
    }

    #[tokio::test]
    async fn successful_exchange_appends_user_and_assistant() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push_text(&["Hel", "lo", "!"]);
        let session = session_with(relay.clone(), Some("secret"));

        let mut updates = Vec::new();
        let reply = session
            .submit("hi there", &config(1000), |text| updates.push(text.to_string()))
            .await
            .unwrap();

        assert_eq!(reply, "Hello!");
        assert_eq!(updates, vec!["Hel", "Hello", "Hello!"]);
        assert_eq!(
            session.conversation().await,
            vec![Message::user("hi there"), Message::assistant("Hello!")]
        );

        let requests = relay.requests();
        assert_eq!(requests.len(), 1);
        let (request, credential) = &requests[0];
        assert_eq!(credential, "secret");
        assert_eq!(request.model, "openai");
        assert_eq!(request.model_name, "gpt-4o-mini");
        assert_eq!(request.messages, vec![Message::user("hi there")]);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn outbound_history_is_truncated_and_sanitized() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push_text(&["one"]);
        relay.push_text(&["two"]);
        let session = session_with(relay.clone(), Some("secret"));
        let mut cfg = config(12);
        cfg.parameters.temperature = Some(0.0);

        session.submit("hello there", &cfg, |_| {}).await.unwrap();
        session.submit("next", &cfg, |_| {}).await.unwrap();

        let (request, _) = relay.requests().pop().unwrap();
        // "hello there" no longer fits; "one" would, but is an assistant
        // turn and cannot lead the context.
        assert_eq!(request.messages, vec![Message::user("next")]);
        assert_eq!(request.parameters.temperature, Some(0.0));
        assert_eq!(request.parameters.top_p, None);

        // The full conversation is untouched by truncation.
        assert_eq!(session.conversation().await.len(), 4);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_side_effects() {
        let relay = Arc::new(ScriptedRelay::default());
        let session = session_with(relay.clone(), Some("secret"));

        let err = session.submit("  \n\t", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::EmptyInput);
        assert!(session.conversation().await.is_empty());
        assert!(relay.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_network_call() {
        let relay = Arc::new(ScriptedRelay::default());
        let session = session_with(relay.clone(), None);

        let err = session.submit("hello", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::Configuration);
        assert_eq!(session.conversation().await, vec![Message::user("hello")]);
        assert!(relay.requests().is_empty());
    }

    /// Keyring whose backend is locked.
    struct LockedKeyring;

    impl CredentialStore for LockedKeyring {
        fn get(&self) -> Result<Option<String>, KeyringAccessError> {
            Err(keyring::Error::PlatformFailure("locked".to_string().into()).into())
        }

        fn set(&self, _credential: &str) -> Result<(), KeyringAccessError> {
            Ok(())
        }

        fn clear(&self) -> Result<(), KeyringAccessError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn locked_keyring_points_at_the_env_fallback() {
        let relay = Arc::new(ScriptedRelay::default());
        let session = ChatSession::new(relay.clone(), Arc::new(LockedKeyring));

        let err = session.submit("hello", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::Configuration);
        assert!(err.to_string().contains("RELAYCHAT_API_KEY"), "{err}");
        assert!(relay.requests().is_empty());
    }

    #[tokio::test]
    async fn message_over_budget_is_malformed_history() {
        let relay = Arc::new(ScriptedRelay::default());
        let session = session_with(relay.clone(), Some("secret"));

        let err = session.submit("hi", &config(1), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::MalformedHistory);
        assert_eq!(session.conversation().await, vec![Message::user("hi")]);
        assert!(relay.requests().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_keeps_only_the_user_turn() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push_rejection(401, r#"{"error":"Unauthorized"}"#);
        let session = session_with(relay, Some("wrong"));

        let err = session.submit("hello", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::Authorization);
        assert_eq!(err.to_string(), "Unauthorized. Please check your API key.");
        assert_eq!(session.conversation().await, vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn server_error_surfaces_the_relay_message() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push_rejection(500, r#"{"error":"Internal Server Error"}"#);
        relay.push_rejection(502, "bad gateway");
        let session = session_with(relay, Some("secret"));

        let err = session.submit("hello", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "Internal Server Error");

        let err = session.submit("again", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "bad gateway");
        assert_eq!(session.conversation().await.len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_keeps_only_the_user_turn() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push(|| Err(ChatError::Transport("connection refused".into())));
        let session = session_with(relay, Some("secret"));

        let err = session.submit("hello", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::Transport);
        assert_eq!(session.conversation().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_stream_discards_partial_reply() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push(|| {
            let items: Vec<Result<Bytes, String>> = vec![
                Ok(Bytes::from_static(b"partial")),
                Err("connection reset".to_string()),
            ];
            Ok(RelayResponse::Streaming(Box::pin(stream::iter(items))))
        });
        let session = session_with(relay, Some("secret"));

        let mut saw_partial = false;
        let err = session
            .submit("hello", &config(100), |text| saw_partial |= text == "partial")
            .await
            .unwrap_err();

        assert!(saw_partial);
        assert_eq!(err.kind(), ChatErrorKind::StreamRead);
        assert_eq!(session.conversation().await, vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn overlapping_submission_is_rejected_while_streaming() {
        let relay = Arc::new(ScriptedRelay::default());
        let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, String>>();
        relay.push(move || {
            let body = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(RelayResponse::Streaming(Box::pin(body)))
        });
        let session = Arc::new(session_with(relay.clone(), Some("secret")));

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .submit("first", &config(100), move |text| {
                        let _ = seen_tx.send(text.to_string());
                    })
                    .await
            })
        };

        tx.send(Ok(Bytes::from_static(b"working"))).unwrap();
        assert_eq!(seen_rx.recv().await.as_deref(), Some("working"));
        assert!(session.is_busy());

        let err = session.submit("second", &config(100), |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ChatErrorKind::Busy);
        assert_eq!(session.conversation().await, vec![Message::user("first")]);

        drop(tx);
        let reply = first.await.unwrap().unwrap();
        assert_eq!(reply, "working");
        assert!(!session.is_busy());
        assert_eq!(
            session.conversation().await,
            vec![Message::user("first"), Message::assistant("working")]
        );
        assert_eq!(relay.requests().len(), 1);
    }

    #[tokio::test]
    async fn clear_forgets_the_conversation() {
        let relay = Arc::new(ScriptedRelay::default());
        relay.push_text(&["hello"]);
        let session = session_with(relay, Some("secret"));

        session.submit("hi", &config(100), |_| {}).await.unwrap();
        assert_eq!(session.conversation().await.len(), 2);
        session.clear().await.unwrap();
        assert!(session.conversation().await.is_empty());
        assert!(!session.is_busy());
    }

    #[test]
    fn rejection_without_body_mentions_status() {
        let err = classify_rejection(503, "  ");
        assert_eq!(err.to_string(), "Request failed with status 503");
    }
}
