//! `ensemble backends` implementation.

use anyhow::Result;
use colored::Colorize;
use ensemble_models::{ModelFactory, ModelType};
use serde_json::json;

/// Lists the backends whose credentials are present in the environment.
pub fn execute(json_output: bool) -> Result<()> {
    let configs = ModelFactory::discover_from_env();

    if json_output {
        let list: Vec<_> = configs
            .iter()
            .map(|config| {
                json!({
                    "kind": config.model_type.to_string(),
                    "model": config.model_id,
                    "credential": config.model_type.api_key_env(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if configs.is_empty() {
        let variables: Vec<&str> =
            ModelType::DISCOVERABLE.iter().filter_map(|kind| kind.api_key_env()).collect();
        println!("{}", "No backends discovered.".yellow());
        println!("Set one of: {}", variables.join(", "));
        return Ok(());
    }

    println!("{}", "Discovered backends (routing order):".bold());
    for (position, config) in configs.iter().enumerate() {
        println!("  {}. {} {}", position + 1, config.model_type.to_string().cyan(), config.model_id);
    }
    Ok(())
}
