//! Config command - view or modify configuration.

use anyhow::{bail, Result};
use meetchat_core::ClientConfig;

pub async fn execute(key: Option<String>, value: Option<String>) -> Result<()> {
    let mut config = ClientConfig::load()?;

    match (key.as_deref(), value) {
        (None, None) => {
            // Show all config
            println!("Current Configuration");
            println!("=====================");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        (Some(key), None) => {
            // Get specific key
            match key {
                "agent_address" => println!("{}", config.agent_address),
                "agent_node_id" => println!("{:?}", config.agent_node_id),
                "agent_relay_url" => println!("{:?}", config.agent_relay_url),
                "guest_address" => println!("{}", config.guest_address),
                "reply_delay_ms" => println!(
                    "{}-{}",
                    config.reply_delay_min_ms, config.reply_delay_max_ms
                ),
                _ => println!("Unknown config key: {}", key),
            }
        }
        (Some(key), Some(value)) => {
            // Set specific key
            match key {
                "agent_address" => config.agent_address = value,
                "agent_node_id" => config.agent_node_id = non_empty(value),
                "agent_relay_url" => config.agent_relay_url = non_empty(value),
                "guest_address" => config.guest_address = value,
                _ => bail!("Cannot set config key: {}", key),
            }
            config.validate()?;
            config.save()?;
            println!("Set {}", key);
        }
        (None, Some(_)) => {
            println!("Must specify a key to set a value");
        }
    }

    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
