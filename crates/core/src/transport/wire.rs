//! Wire protocol for the live agent channel.
//!
//! All frames are JSON, length-prefixed (4-byte big-endian length, then JSON bytes).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// ALPN identifier for the agent protocol.
pub const ALPN_AGENT: &[u8] = b"meetchat/agent/1";

/// Maximum frame size (1MB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Frames exchanged between a client and the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Identity proof sent by the client right after connecting.
    Hello {
        /// Address the client claims
        address: String,
        /// Hex public key the signature verifies against
        public_key: String,
        /// Unix timestamp millis, covered by the signature
        timestamp: i64,
        /// Hex signature over [`handshake_payload`]
        signature: String,
    },

    /// Handshake accepted.
    Welcome {
        /// Address of the agent
        address: String,
    },

    /// Handshake refused.
    Rejected {
        /// Why the identity was refused
        reason: String,
    },

    /// A chat message in either direction.
    Chat {
        /// Sender-assigned message id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Sender address
        sender: String,
        /// Recipient address
        recipient: String,
        /// Message text
        content: String,
        /// When sent (Unix timestamp millis)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sent_at: Option<i64>,
    },

    /// Keepalive.
    Ping {
        /// Unix timestamp
        timestamp: u64,
    },

    /// Keepalive response.
    Pong {
        /// Echo back the timestamp from ping
        timestamp: u64,
    },
}

impl WireMessage {
    /// Encode a frame for sending (length-prefixed JSON).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut buf = Vec::with_capacity(4 + json.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&json);
        Ok(buf)
    }

    /// Decode a frame body (length prefix already stripped).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let msg = serde_json::from_slice(data)?;
        Ok(msg)
    }
}

/// Bytes the client signs to prove its identity.
pub fn handshake_payload(address: &str, timestamp: i64) -> Vec<u8> {
    format!("meetchat-hello:{}:{}", address, timestamp).into_bytes()
}

/// Reads length-prefixed frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next raw frame body.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between frames.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Transport(format!("recv length failed: {}", e))),
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_SIZE {
            return Err(Error::Transport(format!("frame too large: {} bytes", len)));
        }

        let mut buf = vec![0u8; len as usize];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(|e| Error::Transport(format!("recv body failed: {}", e)))?;

        Ok(Some(buf))
    }

    /// Read and decode the next frame, treating a closed stream as an error.
    pub async fn recv(&mut self) -> Result<WireMessage> {
        match self.next_frame().await? {
            Some(frame) => WireMessage::decode(&frame),
            None => Err(Error::Transport("connection closed by peer".to_string())),
        }
    }
}

/// Writes length-prefixed frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send one frame and flush it.
    pub async fn send(&mut self, msg: &WireMessage) -> Result<()> {
        let encoded = msg.encode()?;
        self.inner
            .write_all(&encoded)
            .await
            .map_err(|e| Error::Transport(format!("send failed: {}", e)))?;
        self.inner
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush failed: {}", e)))?;
        Ok(())
    }

    /// Finish the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("shutdown failed: {}", e)))
    }
}
