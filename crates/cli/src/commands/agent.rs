//! Agent command - hosts the agent endpoint.

use anyhow::Result;
use meetchat_core::identity::LocalSigner;
use meetchat_core::transport::{serve_connection, AgentOptions, IrohAgentListener};
use meetchat_core::platform;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub async fn execute(config_path: Option<String>, allow: Vec<String>, delay_ms: u64) -> Result<()> {
    let config = super::load_config(config_path)?;

    let mut options = AgentOptions::from_config(&config);
    options.reply_delay = Duration::from_millis(delay_ms);
    if !allow.is_empty() {
        options.allowed_addresses = Some(allow.into_iter().collect::<HashSet<_>>());
    }
    let options = Arc::new(options);

    let key = LocalSigner::load_or_create_at(&platform::agent_identity_file_path())?;
    let listener = IrohAgentListener::bind(key.secret_bytes()).await?;

    info!("MeetChat agent v{}", env!("CARGO_PKG_VERSION"));
    println!("Agent address: {}", options.address);
    println!("Agent node id: {}", listener.node_id());
    println!("Clients set MEETCHAT_AGENT_NODE_ID to the node id above.");
    println!("Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((node_id, stream)) => {
                    debug!("Serving client node {}", node_id);
                    let options = options.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream.reader, stream.writer, options).await {
                            warn!("Client {} session ended: {}", node_id, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept client: {}", e);
                }
            }
        }
    }

    listener.close().await;
    info!("Agent stopped");
    Ok(())
}
