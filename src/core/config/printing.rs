use crate::core::config::data::Config;

fn show<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "(unset)".to_string(),
    }
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  relay-url: {}", self.relay_url());
        println!("  model: {}", self.model());
        match &self.system {
            Some(system) => println!("  system: {system}"),
            None => println!("  system: (unset)"),
        }
        println!("  max-tokens: {}", show(&self.max_tokens));
        println!("  temperature: {}", show(&self.temperature));
        println!("  top-p: {}", show(&self.top_p));
        println!("  top-k: {}", show(&self.top_k));
        println!("  presence-penalty: {}", show(&self.presence_penalty));
        println!("  frequency-penalty: {}", show(&self.frequency_penalty));
        println!("  max-input-characters: {}", self.max_input_characters());
        let policy = self.retry_policy();
        println!("  retry-backoff-ms: {}", policy.backoff.as_millis());
        println!("  retry-ceiling-ms: {}", policy.ceiling.as_millis());
        if !self.custom_models.is_empty() {
            println!("  custom-models:");
            for entry in &self.custom_models {
                println!("    {}: {}", entry.name, entry.provider);
            }
        }
    }
}
