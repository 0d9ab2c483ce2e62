//! Command-line interface parsing and dispatch.

pub mod chat;
pub mod model_list;

use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::chat::{run_chat, run_say};
use crate::cli::model_list::list_models;
use crate::core::config::data::path_display;
use crate::core::config::{FilePreferenceStore, PreferenceStore};
use crate::core::keyring::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore};
use crate::server::{self, ServerConfig};
use crate::utils::logging::{self, LogTarget};

/// Environment variable that overrides the stored relay credential.
pub const API_KEY_ENV: &str = "RELAYCHAT_API_KEY";

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(about = "Streaming chat through a provider relay")]
#[command(
    long_about = "relaychat has two halves. 'relaychat serve' runs the relay: an HTTP server that \
checks a shared secret and streams text from Amazon Bedrock, Google Gemini, OpenAI or GitHub \
Models back to the caller. 'relaychat chat' and 'relaychat say' are the client: they keep the \
conversation, trim it to a character budget and print the reply as it streams in.\n\n\
Relay environment:\n\
  API_KEY                       Shared secret clients must present (required)\n\
  OPENAI_API_KEY                OpenAI key; OPENAI_BASE_URL overrides the endpoint\n\
  GOOGLE_GENERATIVE_AI_API_KEY  Gemini key\n\
  GITHUB_TOKEN                  GitHub Models token\n\
  AWS_BEARER_TOKEN_BEDROCK      Bedrock API key; AWS_REGION picks the region\n\n\
Client credential:\n\
  Use 'relaychat auth' to store the relay secret in the system keyring, or set\n\
  RELAYCHAT_API_KEY.\n\n\
Chat commands:\n\
  /clear            Forget the conversation so far\n\
  /quit             Leave the chat (Ctrl+D also works)\n\
  Ctrl+C            Stop the reply that is streaming"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for this run instead of the configured one
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Write diagnostic logs to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the relay server
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Start an interactive chat (default)
    Chat,
    /// Send a single prompt and print the reply
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        prompt: Vec<String>,
    },
    /// Store the relay credential in the system keyring
    Auth {
        /// Credential to store; prompted for when omitted
        key: Option<String>,
    },
    /// Remove the stored relay credential
    Deauth,
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Unset configuration values
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Print the current configuration
    Config,
    /// List the models the client can select
    Models,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Commands::Chat);

    let target = match (&args.log, &command) {
        (Some(path), _) => LogTarget::File(path),
        (None, Commands::Serve { .. }) => LogTarget::Stderr,
        (None, _) => LogTarget::Quiet,
    };
    logging::init(target)?;

    match command {
        Commands::Serve { bind } => {
            let config = ServerConfig::from_env(bind)?;
            server::serve(config).await?;
            Ok(())
        }
        Commands::Chat => run_chat(args.model, &preference_store()?, credential_store()).await,
        Commands::Say { prompt } => {
            run_say(
                prompt.join(" "),
                args.model,
                &preference_store()?,
                credential_store(),
            )
            .await
        }
        Commands::Auth { key } => {
            let key = match key {
                Some(key) => key,
                None => prompt_for_key()?,
            };
            let key = key.trim();
            if key.is_empty() {
                return Err("No credential entered".into());
            }
            KeyringCredentialStore.set(key)?;
            println!("✅ Relay credential saved to the system keyring");
            Ok(())
        }
        Commands::Deauth => {
            KeyringCredentialStore.clear()?;
            println!("✅ Relay credential removed");
            Ok(())
        }
        Commands::Set { key, value } => {
            let store = preference_store()?;
            let mut config = store.load()?;
            let value = value.join(" ");
            config.set_value(&key, &value)?;
            store.save(&config)?;
            println!("✅ Set {key} to: {value}");
            Ok(())
        }
        Commands::Unset { key } => {
            let store = preference_store()?;
            let mut config = store.load()?;
            config.unset_value(&key)?;
            store.save(&config)?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Commands::Config => {
            let store = preference_store()?;
            println!("Config file: {}", path_display(store.path()));
            store.load()?.print_all();
            Ok(())
        }
        Commands::Models => {
            let config = preference_store()?.load()?;
            list_models(&config)
        }
    }
}

fn preference_store() -> Result<FilePreferenceStore, Box<dyn Error>> {
    Ok(FilePreferenceStore::default_location()?)
}

/// `RELAYCHAT_API_KEY` when set, the system keyring otherwise.
pub fn credential_store() -> Arc<dyn CredentialStore> {
    credential_store_from(std::env::var(API_KEY_ENV).ok())
}

pub(crate) fn credential_store_from(env_value: Option<String>) -> Arc<dyn CredentialStore> {
    match env_value.filter(|value| !value.trim().is_empty()) {
        Some(value) => Arc::new(MemoryCredentialStore::new(Some(value))),
        None => Arc::new(KeyringCredentialStore),
    }
}

fn prompt_for_key() -> io::Result<String> {
    print!("Relay credential: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests;
