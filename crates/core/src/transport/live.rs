//! Live transport: the wire protocol over a dialed network stream.
//!
//! Connecting performs the identity handshake:
//!
//! 1. Client dials the agent
//! 2. Client sends Hello with its address and a signature over the handshake payload
//! 3. Agent verifies the signature and answers Welcome (or Rejected)
//!
//! After that the stream carries Chat frames both ways.

use crate::chat::types::{Message, MessageId, TransportMode};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::identity::Signer;
use crate::transport::wire::{handshake_payload, FrameReader, FrameWriter, WireMessage};
use crate::transport::{BoxReader, BoxWriter, Dialer, IncomingStream, Transport, INCOMING_BUFFER};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedWriter = Arc<Mutex<FrameWriter<BoxWriter>>>;

/// Transport talking to the agent over the network.
pub struct LiveTransport {
    local_address: String,
    dialer: Arc<dyn Dialer>,
    signer: Arc<dyn Signer>,
    handshake_timeout: Duration,
    writer: SharedWriter,
    /// Reader left over from the last handshake, consumed by the next stream.
    reader: Mutex<Option<FrameReader<BoxReader>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LiveTransport {
    /// Dial the agent and prove our identity.
    ///
    /// Fails with [`Error::Auth`] if the agent refuses the identity or the
    /// payload cannot be signed, and with [`Error::Transport`] if the network
    /// handshake cannot complete.
    pub async fn connect(
        dialer: Arc<dyn Dialer>,
        signer: Arc<dyn Signer>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let handshake_timeout = config.handshake_timeout();
        let (reader, writer) = handshake(dialer.as_ref(), signer.as_ref(), handshake_timeout).await?;

        Ok(Self {
            local_address: signer.address(),
            dialer,
            signer,
            handshake_timeout,
            writer: Arc::new(Mutex::new(writer)),
            reader: Mutex::new(Some(reader)),
            pump: Mutex::new(None),
        })
    }
}

/// Dial and run the Hello/Welcome exchange.
async fn handshake(
    dialer: &dyn Dialer,
    signer: &dyn Signer,
    timeout: Duration,
) -> Result<(FrameReader<BoxReader>, FrameWriter<BoxWriter>)> {
    let address = signer.address();
    let timestamp = Utc::now().timestamp_millis();

    let proof = signer
        .sign(&handshake_payload(&address, timestamp))
        .await
        .map_err(|e| match e {
            Error::Auth(_) => e,
            other => Error::Auth(format!("signing failed: {}", other)),
        })?;

    let stream = tokio::time::timeout(timeout, dialer.dial())
        .await
        .map_err(|_| Error::Transport("connection timeout".to_string()))?
        .map_err(|e| match e {
            Error::Transport(_) => e,
            other => Error::Transport(format!("dial failed: {}", other)),
        })?;

    let mut reader = FrameReader::new(stream.reader);
    let mut writer = FrameWriter::new(stream.writer);

    info!("Connected to agent, sending Hello as {}", address);

    writer
        .send(&WireMessage::Hello {
            address: address.clone(),
            public_key: proof.public_key,
            timestamp,
            signature: proof.signature,
        })
        .await?;

    let response = tokio::time::timeout(timeout, reader.recv())
        .await
        .map_err(|_| Error::Transport("timeout waiting for Welcome".to_string()))?
        .map_err(|e| match e {
            Error::Serialization(err) => Error::Transport(format!("malformed handshake reply: {}", err)),
            other => other,
        })?;

    match response {
        WireMessage::Welcome { address: agent } => {
            info!("Handshake completed with agent {}", agent);
            Ok((reader, writer))
        }
        WireMessage::Rejected { reason } => {
            warn!("Agent rejected identity {}: {}", address, reason);
            Err(Error::Auth(format!("identity rejected: {}", reason)))
        }
        other => {
            error!("Unexpected message during handshake: {:?}", other);
            Err(Error::Transport(format!(
                "unexpected message: expected Welcome, got {:?}",
                other
            )))
        }
    }
}

/// Translate an inbound Chat frame into a local message.
fn to_message(
    id: Option<String>,
    sender: String,
    content: String,
    sent_at: Option<i64>,
) -> Message {
    let timestamp = sent_at
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    let id = id.map(MessageId).unwrap_or_default();
    Message::from_incoming(id, sender, content, timestamp)
}

/// Read frames until the stream ends or the consumer goes away.
async fn pump_frames(
    mut reader: FrameReader<BoxReader>,
    writer: SharedWriter,
    tx: mpsc::Sender<Message>,
    local_address: String,
) {
    loop {
        let frame = tokio::select! {
            _ = tx.closed() => {
                debug!("Inbound consumer gone, stopping reader");
                return;
            }
            frame = reader.next_frame() => frame,
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!("Agent closed the inbound stream");
                return;
            }
            Err(e) => {
                warn!("Inbound stream failed: {}", e);
                return;
            }
        };

        match WireMessage::decode(&bytes) {
            Ok(WireMessage::Chat { id, sender, content, sent_at, .. }) => {
                if sender == local_address {
                    continue;
                }
                let message = to_message(id, sender, content, sent_at);
                debug!("Received message {} from {}", message.id, message.sender_address);
                if tx.send(message).await.is_err() {
                    return;
                }
            }
            Ok(WireMessage::Ping { timestamp }) => {
                if let Err(e) = writer.lock().await.send(&WireMessage::Pong { timestamp }).await {
                    warn!("Failed to answer ping: {}", e);
                }
            }
            Ok(other) => {
                debug!("Ignoring inbound frame: {:?}", other);
            }
            Err(e) => {
                warn!("Discarding malformed inbound frame: {}", e);
            }
        }
    }
}

#[async_trait]
impl Transport for LiveTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Live
    }

    fn local_address(&self) -> &str {
        &self.local_address
    }

    async fn send(&self, peer_address: &str, content: &str) -> Result<Message> {
        let message = Message::new_outgoing(&self.local_address, peer_address, content);

        let frame = WireMessage::Chat {
            id: Some(message.id.0.clone()),
            sender: self.local_address.clone(),
            recipient: peer_address.to_string(),
            content: content.to_string(),
            sent_at: Some(message.timestamp.timestamp_millis()),
        };
        self.writer.lock().await.send(&frame).await?;

        debug!("Message {} sent to {}", message.id, peer_address);
        Ok(message)
    }

    async fn stream_incoming(&self) -> Result<IncomingStream> {
        if let Some(old) = self.pump.lock().await.take() {
            old.abort();
        }

        let leftover = self.reader.lock().await.take();
        let reader = match leftover {
            Some(reader) => reader,
            None => {
                info!("Re-establishing agent connection for a new inbound stream");
                let (reader, writer) =
                    handshake(self.dialer.as_ref(), self.signer.as_ref(), self.handshake_timeout)
                        .await?;
                *self.writer.lock().await = writer;
                reader
            }
        };

        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let handle = tokio::spawn(pump_frames(
            reader,
            self.writer.clone(),
            tx,
            self.local_address.clone(),
        ));
        *self.pump.lock().await = Some(handle);

        Ok(IncomingStream::new(rx))
    }

    async fn close(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.reader.lock().await.take();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Failed to close agent stream gracefully: {}", e);
        }
    }
}
