//! Iroh networking for the live transport.
//!
//! The client side dials the agent's node id with the agent ALPN and opens
//! one bidirectional stream per connection. The agent side accepts those
//! connections and hands their streams to [`serve_connection`].
//!
//! [`serve_connection`]: crate::transport::agent::serve_connection

use crate::error::{Error, Result};
use crate::transport::wire::ALPN_AGENT;
use crate::transport::{Dialer, WireStream};
use async_trait::async_trait;
use iroh::{Endpoint, NodeAddr, NodeId, RelayMode, SecretKey};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for connection attempts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind an iroh endpoint speaking the agent protocol.
async fn bind_endpoint(secret: [u8; 32]) -> Result<Endpoint> {
    let endpoint = Endpoint::builder()
        .secret_key(SecretKey::from_bytes(&secret))
        .alpns(vec![ALPN_AGENT.to_vec()])
        .relay_mode(RelayMode::Default)
        .discovery_n0()
        .bind()
        .await
        .map_err(|e| Error::Transport(format!("failed to create endpoint: {}", e)))?;

    info!("Iroh endpoint created with node_id: {}", endpoint.node_id());
    Ok(endpoint)
}

/// Dials the agent over iroh.
pub struct IrohDialer {
    endpoint: Endpoint,
    agent: NodeId,
}

impl IrohDialer {
    /// Bind a local endpoint keyed by `secret` that dials `agent_node_id`.
    pub async fn new(secret: [u8; 32], agent_node_id: &str, relay_url: Option<&str>) -> Result<Self> {
        let agent: NodeId = agent_node_id
            .parse()
            .map_err(|e| Error::Config(format!("invalid agent node id: {}", e)))?;

        let endpoint = bind_endpoint(secret).await?;

        if let Some(relay_url) = relay_url {
            match relay_url.parse() {
                Ok(url) => {
                    endpoint
                        .add_node_addr(NodeAddr::new(agent).with_relay_url(url))
                        .map_err(|e| Error::Transport(format!("failed to add node addr: {}", e)))?;
                    info!("Using relay URL: {}", relay_url);
                }
                Err(e) => warn!("Ignoring invalid relay URL {}: {}", relay_url, e),
            }
        }

        Ok(Self { endpoint, agent })
    }

    /// Close the endpoint gracefully.
    pub async fn close(&self) {
        self.endpoint.close().await;
        info!("Iroh endpoint closed");
    }
}

#[async_trait]
impl Dialer for IrohDialer {
    async fn dial(&self) -> Result<WireStream> {
        debug!("Connecting to agent node: {}", self.agent);

        let conn = tokio::time::timeout(CONNECT_TIMEOUT, self.endpoint.connect(self.agent, ALPN_AGENT))
            .await
            .map_err(|_| Error::Transport("connection timeout".to_string()))?
            .map_err(|e| Error::Transport(format!("connection failed: {}", e)))?;

        info!("Connected to agent node: {}", self.agent);

        let (send, recv) = conn
            .open_bi()
            .await
            .map_err(|e| Error::Transport(format!("failed to open stream: {}", e)))?;

        Ok(WireStream::new(recv, send))
    }
}

/// Accepts client connections for the agent.
pub struct IrohAgentListener {
    endpoint: Endpoint,
}

impl IrohAgentListener {
    /// Bind the agent endpoint keyed by `secret`.
    pub async fn bind(secret: [u8; 32]) -> Result<Self> {
        Ok(Self {
            endpoint: bind_endpoint(secret).await?,
        })
    }

    /// Node id clients dial.
    pub fn node_id(&self) -> String {
        self.endpoint.node_id().to_string()
    }

    /// Wait for the next client stream.
    pub async fn accept(&self) -> Result<(String, WireStream)> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| Error::Transport("endpoint closed".to_string()))?;

        let conn = incoming
            .await
            .map_err(|e| Error::Transport(format!("failed to accept connection: {}", e)))?;

        let remote_id = conn
            .remote_node_id()
            .map_err(|e| Error::Transport(format!("failed to get remote node id: {}", e)))?;
        debug!("Accepted connection from: {}", remote_id);

        let alpn = conn.alpn();
        if alpn.as_deref() != Some(ALPN_AGENT) {
            warn!("Unknown ALPN: {:?}", alpn);
            return Err(Error::Transport(format!("unknown ALPN: {:?}", alpn)));
        }

        let (send, recv) = conn
            .accept_bi()
            .await
            .map_err(|e| Error::Transport(format!("failed to accept stream: {}", e)))?;

        Ok((remote_id.to_string(), WireStream::new(recv, send)))
    }

    /// Close the endpoint gracefully.
    pub async fn close(&self) {
        self.endpoint.close().await;
        info!("Iroh endpoint closed");
    }
}
