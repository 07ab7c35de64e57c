//! Chat with the scheduling agent.
//!
//! - Per-peer conversations with arrival-ordered history
//! - Subscriber callbacks for inbound messages
//! - A client facade that picks a live or simulated transport

pub mod client;
pub mod listeners;
pub mod store;
pub mod types;

pub use client::ChatClient;
pub use listeners::{Listener, ListenerRegistry, Subscription};
pub use store::ConversationStore;
pub use types::*;
