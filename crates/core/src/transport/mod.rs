//! Transports carrying messages between the local identity and the agent.
//!
//! Two implementations share the [`Transport`] contract:
//! - [`LiveTransport`]: framed wire protocol over a network stream, opened
//!   through a [`Dialer`] (the production dialer is [`IrohDialer`])
//! - [`SimulatedTransport`]: synthesizes agent replies locally on timers
//!
//! The client picks one at connect time and never branches on the variant
//! afterwards.

pub mod agent;
pub mod iroh;
pub mod live;
pub mod simulated;
pub mod wire;

use crate::chat::types::{Message, TransportMode};
use crate::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

pub use self::agent::{serve_connection, AgentOptions, LoopbackDialer};
pub use self::iroh::{IrohAgentListener, IrohDialer};
pub use self::live::LiveTransport;
pub use self::simulated::SimulatedTransport;
pub use self::wire::{FrameReader, FrameWriter, WireMessage, ALPN_AGENT};

/// Capacity of the channel between a transport's inbound source and its stream.
pub(crate) const INCOMING_BUFFER: usize = 256;

/// Common contract of the live and simulated transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which variant this is.
    fn mode(&self) -> TransportMode;

    /// Address of the local identity.
    fn local_address(&self) -> &str;

    /// Send `content` to `peer_address`, returning the outbound message.
    async fn send(&self, peer_address: &str, content: &str) -> Result<Message>;

    /// Start (or restart) the inbound message stream.
    async fn stream_incoming(&self) -> Result<IncomingStream>;

    /// Cancel every background task owned by the transport.
    async fn close(&self);
}

/// Inbound messages produced by a transport.
///
/// Ends (`next` returns `None`) when the underlying source goes away.
#[derive(Debug)]
pub struct IncomingStream {
    rx: mpsc::Receiver<Message>,
}

impl IncomingStream {
    pub(crate) fn new(rx: mpsc::Receiver<Message>) -> Self {
        Self { rx }
    }

    /// Wait for the next inbound message.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Read half of a network stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a network stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A freshly opened bidirectional stream to the agent.
pub struct WireStream {
    pub reader: BoxReader,
    pub writer: BoxWriter,
}

impl WireStream {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens network streams to the agent.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<WireStream>;
}
