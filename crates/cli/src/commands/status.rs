//! Status command - shows identity, paths and configuration.

use anyhow::Result;
use meetchat_core::identity::LocalSigner;
use meetchat_core::{platform, ClientConfig};

pub async fn execute() -> Result<()> {
    println!("MeetChat Status");
    println!("===============");
    println!();

    // Show paths
    println!("Paths:");
    println!("  Config:    {:?}", platform::config_dir());
    println!("  Data:      {:?}", platform::data_dir());

    println!();

    // Show config file status
    let config_file = platform::config_file_path();
    if config_file.exists() {
        println!("Config file: {:?}", config_file);
    } else {
        println!("Config file: Not found (using defaults)");
    }

    // Show identity status
    let identity_file = platform::identity_file_path();
    if identity_file.exists() {
        match LocalSigner::load_from_file(&identity_file) {
            Ok(identity) => {
                println!("Identity:    {} ({})", identity.address, identity.name);
            }
            Err(e) => println!("Identity:    \x1b[31mUnreadable\x1b[0m ({})", e),
        }
    } else {
        println!("Identity:    Not created yet (guest mode until first chat)");
    }

    println!();

    let config = ClientConfig::load_with_env()?;
    println!("Agent:       {}", config.agent_address);
    match &config.agent_node_id {
        Some(node_id) => println!("Network:     \x1b[32m● Live\x1b[0m via node {}", node_id),
        None => println!("Network:     \x1b[33m○ Simulated\x1b[0m (no agent node id)"),
    }

    Ok(())
}
