//! MeetChat Core Library
//!
//! This crate provides the messaging core for MeetChat, including:
//! - The chat client facade and its session state machine
//! - Live (iroh) and simulated transports
//! - The agent side of the wire protocol
//! - Local identity and configuration management
//!
//! It is used by the `meetchat` command line tool.

pub mod chat;
pub mod config;
pub mod error;
pub mod identity;
pub mod platform;
pub mod transport;

// Re-export commonly used types
pub use chat::{ChatClient, ClientStatus, Message, MessageId, SessionState, Subscription, TransportMode};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use identity::{LocalSigner, Signer};
pub use transport::{AgentOptions, IrohAgentListener, IrohDialer, LoopbackDialer, Transport};
