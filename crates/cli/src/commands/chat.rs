//! Chat command - interactive session with the agent.

use anyhow::Result;
use meetchat_core::identity::{LocalSigner, Signer};
use meetchat_core::transport::{AgentOptions, Dialer, IrohDialer, LoopbackDialer};
use meetchat_core::{ChatClient, ClientStatus, Message};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub async fn execute(
    config_path: Option<String>,
    offline: bool,
    guest: bool,
    loopback: bool,
) -> Result<()> {
    let config = super::load_config(config_path)?;

    let identity = if guest {
        None
    } else {
        Some(Arc::new(LocalSigner::load_or_create()?))
    };

    // Keep the iroh dialer around so its endpoint can be closed on exit
    let mut iroh_dialer: Option<Arc<IrohDialer>> = None;
    let dialer: Option<Arc<dyn Dialer>> = if offline || identity.is_none() {
        None
    } else if loopback {
        Some(Arc::new(LoopbackDialer::new(AgentOptions::from_config(&config))) as Arc<dyn Dialer>)
    } else if let (Some(node_id), Some(identity)) = (config.agent_node_id.as_deref(), identity.as_ref()) {
        match IrohDialer::new(identity.secret_bytes(), node_id, config.agent_relay_url.as_deref()).await {
            Ok(dialer) => {
                let dialer = Arc::new(dialer);
                iroh_dialer = Some(dialer.clone());
                Some(dialer as Arc<dyn Dialer>)
            }
            Err(e) => {
                warn!("Network unavailable, falling back to simulation: {}", e);
                None
            }
        }
    } else {
        info!("No agent node id configured, using simulation");
        None
    };

    let connectivity = dialer.is_some();
    let client = ChatClient::new(config, dialer)?;
    let signer = identity.map(|identity| identity as Arc<dyn Signer>);

    let mode = client.connect(signer, connectivity).await?;
    let local = client.local_address().await.unwrap_or_default();

    println!("MeetChat");
    println!("========");
    println!("You:   {}", local);
    println!("Agent: {}", client.counterparty());
    println!("Mode:  {}", mode);
    println!();
    println!("Type a message, or /history, /status, /quit");
    println!();

    let subscription = client.subscribe(|message: &Message| {
        println!("agent> {}", message.content);
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => print_history(&client.history().await, &local),
            "/status" => print_status(&client.status().await),
            content => {
                if let Err(e) = client.send(content).await {
                    println!("! {}", e);
                }
            }
        }
    }

    subscription.unsubscribe();
    client.disconnect().await;
    if let Some(dialer) = iroh_dialer {
        dialer.close().await;
    }

    Ok(())
}

fn print_history(history: &[Message], local: &str) {
    if history.is_empty() {
        println!("(no messages yet)");
        return;
    }
    for message in history {
        let who = if message.sender_address == local { "you" } else { "agent" };
        println!("[{}] {}> {}", message.timestamp.format("%H:%M:%S"), who, message.content);
    }
}

fn print_status(status: &ClientStatus) {
    println!("State: {:?}", status.state);
    match status.mode {
        Some(mode) => println!("Mode:  {}", mode),
        None => println!("Mode:  -"),
    }
    println!("Ready: {}", status.ready);
    if let Some(error) = &status.last_error {
        println!("Error: {}", error);
    }
}
