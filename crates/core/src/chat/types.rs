//! Core data types for the messaging client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Unique identifier for a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new random message ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single chat message. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Message content.
    pub content: String,
    /// Address of whoever wrote the message.
    pub sender_address: String,
    /// When the message was sent (or received, if the wire carried no time).
    pub timestamp: DateTime<Utc>,
    /// Peer address of the conversation this message belongs to.
    pub conversation_id: String,
}

impl Message {
    /// Create a message written by `sender_address` to `peer_address`.
    pub fn new_outgoing(sender_address: &str, peer_address: &str, content: &str) -> Self {
        Self {
            id: MessageId::new(),
            content: content.to_string(),
            sender_address: sender_address.to_string(),
            timestamp: Utc::now(),
            conversation_id: peer_address.to_string(),
        }
    }

    /// Create a message received from `sender_address`.
    ///
    /// The conversation is keyed by the sender.
    pub fn from_incoming(
        id: MessageId,
        sender_address: String,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            content,
            conversation_id: sender_address.clone(),
            sender_address,
            timestamp,
        }
    }

    /// Check if this message was sent by us (vs received).
    pub fn is_outgoing(&self, our_address: &str) -> bool {
        self.sender_address == our_address
    }
}

/// Ordered message history with one peer.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    peer_address: String,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl Conversation {
    /// Create an empty conversation for a peer.
    pub fn new(peer_address: String) -> Self {
        Self {
            peer_address,
            messages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message to the end of the history.
    ///
    /// Returns `false` (and leaves the history untouched) if a message with
    /// the same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

/// Which transport a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Real network channel to the agent.
    Live,
    /// Local synthetic replies, used without a network identity.
    Simulated,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Live => "live",
            TransportMode::Simulated => "simulated",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "mode", rename_all = "snake_case")]
pub enum SessionState {
    /// No connect has been attempted yet.
    #[default]
    Uninitialized,
    /// A connect is in progress.
    Connecting,
    /// Connected and usable.
    Ready(TransportMode),
    /// The last connect attempt failed.
    Error,
    /// Torn down by an explicit disconnect.
    Disconnected,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }

    pub fn mode(&self) -> Option<TransportMode> {
        match self {
            SessionState::Ready(mode) => Some(*mode),
            _ => None,
        }
    }
}

/// Read-only status descriptor for the UI layer.
///
/// A failed connect (`state == Error`, `last_error` set) is distinct from a
/// degraded but usable simulated session (`mode == Some(Simulated)`, `ready`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub state: SessionState,
    pub mode: Option<TransportMode>,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
