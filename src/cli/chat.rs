//! Terminal client: the `chat` REPL and the one-shot `say` command.

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

use crate::core::config::{Config, PreferenceStore};
use crate::core::error::{ChatError, ChatErrorKind};
use crate::core::generation::GenerationConfig;
use crate::core::keyring::CredentialStore;
use crate::core::relay_client::HttpRelayClient;
use crate::core::submission::ChatSession;

/// Prints only the part of the accumulated reply that has not been shown yet.
#[derive(Debug, Default)]
pub struct DeltaPrinter {
    printed: usize,
}

impl DeltaPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// New suffix of `accumulated`; the reply only ever grows, so the
    /// previous length is always a char boundary.
    pub fn delta<'a>(&mut self, accumulated: &'a str) -> &'a str {
        let start = self.printed.min(accumulated.len());
        self.printed = accumulated.len();
        accumulated.get(start..).unwrap_or("")
    }

    pub fn write_delta(&mut self, accumulated: &str, out: &mut impl Write) {
        let delta = self.delta(accumulated);
        if !delta.is_empty() {
            let _ = out.write_all(delta.as_bytes());
            let _ = out.flush();
        }
    }
}

/// What the REPL should do with one line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Quit,
    Clear,
    Skip,
    Prompt(&'a str),
}

pub fn classify_input(line: &str) -> ReplInput<'_> {
    match line.trim() {
        "" => ReplInput::Skip,
        "/quit" | "/exit" => ReplInput::Quit,
        "/clear" => ReplInput::Clear,
        _ => ReplInput::Prompt(line),
    }
}

fn prepare(
    model: Option<String>,
    store: &dyn PreferenceStore,
    credentials: Arc<dyn CredentialStore>,
) -> Result<(ChatSession, GenerationConfig), Box<dyn Error>> {
    let mut config: Config = store.load()?;
    if let Some(model) = model {
        config.model = Some(model);
    }

    let registry = config.model_registry()?;
    let generation = config.generation_config(&registry)?;
    let transport = Arc::new(HttpRelayClient::new(reqwest::Client::new(), config.relay_url()));
    let session =
        ChatSession::new(transport, credentials).with_retry_policy(config.retry_policy());
    Ok((session, generation))
}

/// Run one exchange, echoing the reply as it streams. Ctrl+C cancels it.
async fn exchange(
    session: &ChatSession,
    generation: &GenerationConfig,
    prompt: &str,
) -> Result<String, ChatError> {
    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let mut printer = DeltaPrinter::new();
    let result = session
        .submit_with_cancel(prompt, generation, token, |text| {
            printer.write_delta(text, &mut io::stdout())
        })
        .await;
    watcher.abort();
    println!();
    result
}

fn report(err: &ChatError) {
    match err.kind() {
        ChatErrorKind::Cancelled => eprintln!("⏹  Reply cancelled"),
        ChatErrorKind::Authorization => {
            eprintln!("❌ {err}");
            eprintln!("   Run 'relaychat auth' to store a new credential.");
        }
        _ => eprintln!("❌ {err}"),
    }
}

/// Ask for a replacement credential after the relay rejected the current
/// one. Returns whether a new credential was stored; a blank answer keeps
/// the old one.
pub async fn reauthorize<R>(
    lines: &mut Lines<R>,
    credentials: &dyn CredentialStore,
    out: &mut impl Write,
) -> Result<bool, Box<dyn Error>>
where
    R: AsyncBufRead + Unpin,
{
    write!(out, "New relay credential (blank to keep the current one): ")?;
    out.flush()?;

    let Some(line) = lines.next_line().await? else {
        return Ok(false);
    };
    let key = line.trim();
    if key.is_empty() {
        return Ok(false);
    }
    credentials.set(key)?;
    Ok(true)
}

pub async fn run_say(
    prompt: String,
    model: Option<String>,
    store: &dyn PreferenceStore,
    credentials: Arc<dyn CredentialStore>,
) -> Result<(), Box<dyn Error>> {
    let (session, generation) = prepare(model, store, credentials)?;
    if let Err(err) = exchange(&session, &generation, &prompt).await {
        report(&err);
        std::process::exit(1);
    }
    Ok(())
}

pub async fn run_chat(
    model: Option<String>,
    store: &dyn PreferenceStore,
    credentials: Arc<dyn CredentialStore>,
) -> Result<(), Box<dyn Error>> {
    let (session, generation) = prepare(model, store, credentials.clone())?;
    println!(
        "Chatting with {} via {}. /quit to leave, /clear to start over.",
        generation.model_name,
        generation.provider.display_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        match classify_input(&line) {
            ReplInput::Quit => return Ok(()),
            ReplInput::Skip => continue,
            ReplInput::Clear => match session.clear().await {
                Ok(()) => println!("Conversation cleared."),
                Err(err) => report(&err),
            },
            ReplInput::Prompt(prompt) => {
                let Err(err) = exchange(&session, &generation, prompt).await else {
                    continue;
                };
                report(&err);
                if err.kind() == ChatErrorKind::Authorization {
                    match reauthorize(&mut lines, credentials.as_ref(), &mut io::stdout()).await {
                        Ok(true) => println!("✅ Credential updated. Send your message again."),
                        Ok(false) => {}
                        Err(err) => eprintln!("❌ Could not store the credential: {err}"),
                    }
                }
            }
        }
    }
}
