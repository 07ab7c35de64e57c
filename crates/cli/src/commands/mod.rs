//! Command implementations.

pub mod agent;
pub mod chat;
pub mod config;
pub mod status;

use anyhow::Result;
use meetchat_core::ClientConfig;
use std::path::Path;
use tracing::info;

/// Load configuration from an explicit file, or from the default location
/// with environment overrides.
pub fn load_config(config_path: Option<String>) -> Result<ClientConfig> {
    let config = match config_path {
        Some(path) => {
            info!("Loading config from: {}", path);
            let mut config = ClientConfig::load_from(Path::new(&path))?;
            config.apply_env()?;
            config
        }
        None => ClientConfig::load_with_env()?,
    };
    Ok(config)
}
