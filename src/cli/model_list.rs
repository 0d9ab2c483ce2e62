//! `relaychat models`: what the client can select and which relay provider
//! each model routes to.

use std::error::Error;

use crate::core::builtin_models::ModelEntry;
use crate::core::config::Config;

pub fn format_model_list(entries: &[ModelEntry], selected: &str) -> Vec<String> {
    let width = entries
        .iter()
        .map(|entry| entry.name.chars().count())
        .max()
        .unwrap_or(0);

    entries
        .iter()
        .map(|entry| {
            let marker = if entry.name == selected { "*" } else { " " };
            format!(
                "{marker} {:<width$}  {}",
                entry.name,
                entry.provider.display_name()
            )
        })
        .collect()
}

pub fn list_models(config: &Config) -> Result<(), Box<dyn Error>> {
    let registry = config.model_registry()?;
    let selected = config.model();

    println!("🤖 Available models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for line in format_model_list(registry.entries(), selected) {
        println!("{line}");
    }
    println!();
    println!("* selected. Change it with 'relaychat set model <name>'.");
    if registry.lookup(selected).is_none() {
        println!("⚠️  The configured model '{selected}' is not in this list.");
    }
    Ok(())
}
