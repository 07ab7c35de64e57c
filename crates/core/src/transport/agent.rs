//! The agent side of the wire protocol.
//!
//! Accepts a client handshake, verifies the signed Hello, then answers each
//! chat message with the next reply from the response pool. Used by the
//! `meetchat agent` command and by [`LoopbackDialer`], which runs the agent
//! in-process over a memory pipe.

use crate::chat::types::MessageId;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::identity::{verify_proof, SignatureProof};
use crate::transport::wire::{handshake_payload, FrameReader, FrameWriter, WireMessage};
use crate::transport::{Dialer, WireStream};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Timeout for the client's Hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Size of the in-process pipe used by [`LoopbackDialer`].
const LOOPBACK_PIPE_SIZE: usize = 64 * 1024;

/// How the agent answers.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Address the agent speaks as
    pub address: String,
    /// Replies, used in order and then cycled
    pub responses: Vec<String>,
    /// Pause before each reply
    pub reply_delay: Duration,
    /// If set, only these client addresses are welcomed
    pub allowed_addresses: Option<HashSet<String>>,
    /// How far a Hello timestamp may drift from the agent's clock
    pub max_clock_skew: Duration,
}

impl AgentOptions {
    /// Agent speaking as the configured counterparty with the configured pool.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            address: config.agent_address.clone(),
            responses: config.responses.clone(),
            reply_delay: Duration::ZERO,
            allowed_addresses: None,
            max_clock_skew: Duration::from_secs(5 * 60),
        }
    }

    fn reply_for(&self, turn: usize, content: &str) -> String {
        if self.responses.is_empty() {
            format!("Received: {}", content)
        } else {
            self.responses[turn % self.responses.len()].clone()
        }
    }
}

/// Check a Hello frame, returning the client address or a rejection reason.
fn verify_hello(hello: WireMessage, options: &AgentOptions) -> std::result::Result<String, String> {
    let (address, public_key, timestamp, signature) = match hello {
        WireMessage::Hello {
            address,
            public_key,
            timestamp,
            signature,
        } => (address, public_key, timestamp, signature),
        other => return Err(format!("expected hello, got {:?}", other)),
    };

    let skew = (Utc::now().timestamp_millis() - timestamp).unsigned_abs();
    if skew > options.max_clock_skew.as_millis() as u64 {
        return Err("hello timestamp outside the accepted window".to_string());
    }

    let proof = SignatureProof {
        public_key,
        signature,
    };
    let key_address = verify_proof(&proof, &handshake_payload(&address, timestamp))
        .map_err(|e| e.to_string())?;
    if !key_address.eq_ignore_ascii_case(&address) {
        return Err("address does not match signing key".to_string());
    }

    if let Some(allowed) = &options.allowed_addresses {
        if !allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(&address)) {
            return Err(format!("{} is not allowed to talk to this agent", address));
        }
    }

    Ok(address)
}

/// Serve one client connection until it closes.
///
/// Returns [`Error::Auth`] if the client's identity was refused.
pub async fn serve_connection<R, W>(reader: R, writer: W, options: Arc<AgentOptions>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);

    let hello = tokio::time::timeout(HELLO_TIMEOUT, reader.recv())
        .await
        .map_err(|_| Error::Transport("timeout waiting for Hello".to_string()))??;

    let client = match verify_hello(hello, &options) {
        Ok(client) => client,
        Err(reason) => {
            warn!("Rejecting client: {}", reason);
            writer
                .send(&WireMessage::Rejected {
                    reason: reason.clone(),
                })
                .await?;
            return Err(Error::Auth(reason));
        }
    };

    writer
        .send(&WireMessage::Welcome {
            address: options.address.clone(),
        })
        .await?;
    info!("Client {} connected", client);

    let mut turn = 0usize;
    while let Some(frame) = reader.next_frame().await? {
        match WireMessage::decode(&frame) {
            Ok(WireMessage::Chat { sender, content, .. }) => {
                if sender != client {
                    warn!("Ignoring chat claiming to be from {}", sender);
                    continue;
                }
                if !options.reply_delay.is_zero() {
                    tokio::time::sleep(options.reply_delay).await;
                }

                let reply = WireMessage::Chat {
                    id: Some(MessageId::new().0),
                    sender: options.address.clone(),
                    recipient: client.clone(),
                    content: options.reply_for(turn, &content),
                    sent_at: Some(Utc::now().timestamp_millis()),
                };
                turn += 1;
                writer.send(&reply).await?;
            }
            Ok(WireMessage::Ping { timestamp }) => {
                writer.send(&WireMessage::Pong { timestamp }).await?;
            }
            Ok(other) => debug!("Ignoring frame from client: {:?}", other),
            Err(e) => warn!("Discarding malformed frame from {}: {}", client, e),
        }
    }

    info!("Client {} disconnected", client);
    Ok(())
}

/// Dialer that runs an agent in-process for every dial.
pub struct LoopbackDialer {
    options: Arc<AgentOptions>,
    dials: AtomicUsize,
}

impl LoopbackDialer {
    pub fn new(options: AgentOptions) -> Self {
        Self {
            options: Arc::new(options),
            dials: AtomicUsize::new(0),
        }
    }

    /// How many connections have been opened.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self) -> Result<WireStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let (client, agent) = tokio::io::duplex(LOOPBACK_PIPE_SIZE);
        let (agent_reader, agent_writer) = tokio::io::split(agent);
        let options = self.options.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(agent_reader, agent_writer, options).await {
                debug!("Loopback agent stopped: {}", e);
            }
        });

        let (reader, writer) = tokio::io::split(client);
        Ok(WireStream::new(reader, writer))
    }
}
