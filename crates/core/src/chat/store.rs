//! In-memory conversation storage shared by the send and receive paths.

use crate::chat::types::{Conversation, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared handle to one peer's conversation.
pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// Session-scoped conversation storage.
///
/// The peer map lock is only held to look up or create a conversation. Appends
/// take the per-conversation mutex, so two peers never block each other and
/// two appends for the same peer are serialized in lock acquisition order.
#[derive(Default)]
pub struct ConversationStore {
    /// peer_address -> conversation
    conversations: RwLock<HashMap<String, ConversationHandle>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the conversation for a peer, creating an empty one on first use.
    pub async fn get_or_create(&self, peer_address: &str) -> ConversationHandle {
        if let Some(conv) = self.conversations.read().await.get(peer_address) {
            return conv.clone();
        }

        let mut conversations = self.conversations.write().await;
        conversations
            .entry(peer_address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(peer_address.to_string()))))
            .clone()
    }

    /// Append a message to a peer's conversation.
    ///
    /// Returns `false` if the conversation already holds a message with the
    /// same id.
    pub async fn append(&self, peer_address: &str, message: Message) -> bool {
        let conv = self.get_or_create(peer_address).await;
        let mut conv = conv.lock().await;
        conv.append(message)
    }

    /// Snapshot of a peer's history in arrival order.
    ///
    /// An unknown peer has an empty history.
    pub async fn history(&self, peer_address: &str) -> Vec<Message> {
        let conv = match self.conversations.read().await.get(peer_address) {
            Some(conv) => conv.clone(),
            None => return Vec::new(),
        };
        let conv = conv.lock().await;
        conv.messages().to_vec()
    }

    /// Number of messages exchanged with a peer.
    pub async fn len(&self, peer_address: &str) -> usize {
        let conv = match self.conversations.read().await.get(peer_address) {
            Some(conv) => conv.clone(),
            None => return 0,
        };
        let len = conv.lock().await.len();
        len
    }

    /// Addresses of every peer with a conversation.
    pub async fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.conversations.read().await.keys().cloned().collect();
        peers.sort();
        peers
    }
}
