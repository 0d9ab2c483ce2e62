//! relaychat is a streaming chat relay and the terminal client that talks to
//! it.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the client side: conversation history, the character
//!   budget and sanitizer, the retrying stream reader and the submission
//!   orchestrator, plus preferences, credentials and the model registry.
//! - [`server`] is the relay: an axum router that authenticates callers and
//!   streams text from the provider bindings in [`server::providers`].
//! - [`api`] defines the JSON payloads exchanged between client and relay.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod server;
pub mod utils;
