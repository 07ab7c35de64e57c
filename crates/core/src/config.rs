//! Configuration management for the messaging client.

use crate::error::{Error, Result};
use crate::platform;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Address of the scheduling agent this client talks to.
pub const DEFAULT_AGENT_ADDRESS: &str = "0xdFec4Ae81303e7449B8f22c1fd2939118B5dE346";

/// Address used for the local side when no wallet identity is connected.
pub const DEFAULT_GUEST_ADDRESS: &str = "demo.base.eth";

/// Replies the simulated agent picks from.
pub const DEFAULT_RESPONSES: &[&str] = &[
    "Hello! I'm your AI meeting scheduler. How can I help you today?",
    "I can help you find available meeting slots. What type of meeting are you looking for?",
    "Let me check the host's availability for you...",
    "I found some available slots. Would you like to book one of these times?",
    "Great! I'll process your meeting request and send you a payment link.",
    "The host has availability on Monday 2-3 PM, Wednesday 10-11 AM, and Friday 3-4 PM. Which works best for you?",
    "Perfect! The meeting rate is 50 USDC for a 30-minute slot. Shall I proceed with the booking?",
    "I've initiated the smart contract for payment. Please confirm the transaction to complete your booking.",
];

/// Messaging client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the fixed counterparty (`0x` + 40 hex digits).
    pub agent_address: String,

    /// Iroh node id of the agent endpoint (None = live transport unavailable).
    pub agent_node_id: Option<String>,

    /// Relay URL advertised by the agent, if any.
    pub agent_relay_url: Option<String>,

    /// Local address used in simulated mode when no identity is connected.
    pub guest_address: String,

    /// Lower bound of the simulated reply delay.
    pub reply_delay_min_ms: u64,

    /// Upper bound of the simulated reply delay.
    pub reply_delay_max_ms: u64,

    /// How long the live handshake may take.
    pub handshake_timeout_secs: u64,

    /// How many times the inbound stream is restarted before giving up.
    pub stream_retry_attempts: u32,

    /// Base delay of the exponential stream restart backoff.
    pub stream_retry_backoff_ms: u64,

    /// Maximum message size in bytes.
    pub max_content_length: usize,

    /// Pool of synthetic agent replies.
    pub responses: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            agent_address: DEFAULT_AGENT_ADDRESS.to_string(),
            agent_node_id: None,
            agent_relay_url: None,
            guest_address: DEFAULT_GUEST_ADDRESS.to_string(),
            reply_delay_min_ms: 1000,
            reply_delay_max_ms: 3000,
            handshake_timeout_secs: 30,
            stream_retry_attempts: 5,
            stream_retry_backoff_ms: 500,
            max_content_length: 10 * 1024,
            responses: DEFAULT_RESPONSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = platform::config_file_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(ClientConfig::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ClientConfig = serde_json::from_str(&contents)?;
        config.fix_invalid_values();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to file/defaults.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `MEETCHAT_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(address) = std::env::var("MEETCHAT_AGENT_ADDRESS") {
            self.agent_address = address;
        }

        if let Ok(node_id) = std::env::var("MEETCHAT_AGENT_NODE_ID") {
            self.agent_node_id = Some(node_id);
        }

        if let Ok(window) = std::env::var("MEETCHAT_REPLY_DELAY_MS") {
            let (min, max) = parse_delay_window(&window)?;
            self.reply_delay_min_ms = min;
            self.reply_delay_max_ms = max;
        }

        self.fix_invalid_values();
        self.validate()
    }

    /// Save configuration to the default config file.
    pub fn save(&mut self) -> Result<()> {
        self.fix_invalid_values();

        let config_path = platform::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        Ok(())
    }

    /// Fix any invalid or empty values with sensible defaults.
    fn fix_invalid_values(&mut self) {
        if self.guest_address.trim().is_empty() {
            self.guest_address = DEFAULT_GUEST_ADDRESS.to_string();
        }
        if self.responses.is_empty() {
            self.responses = DEFAULT_RESPONSES.iter().map(|s| s.to_string()).collect();
        }
        if self.agent_node_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            self.agent_node_id = None;
        }
        if self.max_content_length == 0 {
            self.max_content_length = ClientConfig::default().max_content_length;
        }
    }

    /// Check values that cannot be fixed up silently.
    pub fn validate(&self) -> Result<()> {
        if !is_account_address(&self.agent_address) {
            return Err(Error::Config(format!(
                "agent address must be 0x followed by 40 hex digits, got {}",
                self.agent_address
            )));
        }
        if self.reply_delay_min_ms > self.reply_delay_max_ms {
            return Err(Error::Config(format!(
                "reply delay window is inverted: {}ms > {}ms",
                self.reply_delay_min_ms, self.reply_delay_max_ms
            )));
        }
        Ok(())
    }

    /// Simulated reply delay window.
    pub fn reply_delay(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reply_delay_min_ms),
            Duration::from_millis(self.reply_delay_max_ms),
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn stream_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.stream_retry_backoff_ms)
    }
}

/// Check for the `0x` + 40 hex digit account address shape.
pub fn is_account_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Parse a `min-max` millisecond window.
fn parse_delay_window(value: &str) -> Result<(u64, u64)> {
    let invalid = || Error::Config(format!("invalid reply delay window: {}", value));
    let (min, max) = value.split_once('-').ok_or_else(invalid)?;
    let min = min.trim().parse().map_err(|_| invalid())?;
    let max = max.trim().parse().map_err(|_| invalid())?;
    Ok((min, max))
}
