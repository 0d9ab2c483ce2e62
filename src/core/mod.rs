pub mod builtin_models;
pub mod chat_stream;
pub mod config;
pub mod error;
pub mod generation;
pub mod history;
pub mod keyring;
pub mod message;
pub mod providers;
pub mod relay_client;
pub mod submission;
