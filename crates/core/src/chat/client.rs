//! Client facade: session lifecycle, mode selection and inbound dispatch.

use crate::chat::listeners::{ListenerRegistry, Subscription};
use crate::chat::store::ConversationStore;
use crate::chat::types::{ClientStatus, Message, SessionState, TransportMode};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::identity::Signer;
use crate::transport::{Dialer, IncomingStream, LiveTransport, SimulatedTransport, Transport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared slot for failures reported by the background stream task.
type StreamError = Arc<Mutex<Option<String>>>;

/// Per-session state, replaced on every connect.
struct Session {
    state: SessionState,
    last_error: Option<String>,
    local_address: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    store: Arc<ConversationStore>,
    stream_task: Option<JoinHandle<()>>,
    stream_error: StreamError,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            last_error: None,
            local_address: None,
            transport: None,
            store: Arc::new(ConversationStore::new()),
            stream_task: None,
            stream_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Detach the stream task and transport so they can be shut down
    /// outside the session lock.
    fn take_resources(&mut self) -> Teardown {
        Teardown {
            stream_task: self.stream_task.take(),
            transport: self.transport.take(),
        }
    }
}

/// Resources of a session being torn down.
struct Teardown {
    stream_task: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Teardown {
    /// Cancel the stream task, wait until it has stopped, then close the
    /// transport. Returns whether there was anything to shut down.
    async fn run(self) -> bool {
        let active = self.transport.is_some();

        if let Some(task) = self.stream_task {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("Inbound stream task failed: {}", e),
            }
        }
        if let Some(transport) = self.transport {
            transport.close().await;
        }
        active
    }
}

/// How the background task restarts a dropped inbound stream.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Messaging client for one local identity and the fixed agent.
///
/// Owned by the caller; every session state lives inside this value.
pub struct ChatClient {
    config: ClientConfig,
    dialer: Option<Arc<dyn Dialer>>,
    listeners: Arc<ListenerRegistry>,
    session: RwLock<Session>,
    /// Serializes connect/disconnect so sessions never interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

impl ChatClient {
    /// Create a client. Without a dialer, live connects fail with a transport error.
    ///
    /// Fails with [`Error::Config`] if the configuration does not validate.
    pub fn new(config: ClientConfig, dialer: Option<Arc<dyn Dialer>>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            dialer,
            listeners: Arc::new(ListenerRegistry::new()),
            session: RwLock::new(Session::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Address of the fixed counterparty.
    pub fn counterparty(&self) -> &str {
        &self.config.agent_address
    }

    /// Connect, choosing the transport from identity and connectivity.
    ///
    /// Without an identity, or when `connectivity` is false, the session goes
    /// straight to `Ready(Simulated)`. Otherwise the live handshake runs and
    /// its failure is returned (the session is left in `Error`). A connect
    /// while a session is active tears that session down first.
    pub async fn connect(
        &self,
        identity: Option<Arc<dyn Signer>>,
        connectivity: bool,
    ) -> Result<TransportMode> {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = {
            let mut session = self.session.write().await;
            let previous = session.take_resources();
            *session = Session::new();
            session.state = SessionState::Connecting;
            previous
        };
        if previous.run().await {
            info!("Superseded active session");
            self.listeners.clear();
        }

        let transport: Arc<dyn Transport> = match identity {
            Some(signer) if connectivity => match self.connect_live(signer).await {
                Ok(transport) => Arc::new(transport),
                Err(e) => {
                    error!("Live connect failed: {}", e);
                    let mut session = self.session.write().await;
                    session.state = SessionState::Error;
                    session.last_error = Some(e.to_string());
                    return Err(e);
                }
            },
            identity => {
                let address = identity
                    .map(|signer| signer.address())
                    .unwrap_or_else(|| self.config.guest_address.clone());
                Arc::new(SimulatedTransport::connect(&address, &self.config))
            }
        };

        let mode = transport.mode();
        let stream = match transport.stream_incoming().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start inbound stream: {}", e);
                transport.close().await;
                let mut session = self.session.write().await;
                session.state = SessionState::Error;
                session.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut session = self.session.write().await;
        let task = tokio::spawn(run_inbound(
            transport.clone(),
            stream,
            session.store.clone(),
            self.listeners.clone(),
            session.stream_error.clone(),
            RetryPolicy {
                attempts: self.config.stream_retry_attempts,
                backoff: self.config.stream_retry_backoff(),
            },
        ));

        session.local_address = Some(transport.local_address().to_string());
        session.transport = Some(transport);
        session.stream_task = Some(task);
        session.state = SessionState::Ready(mode);
        info!("Client ready in {} mode", mode);

        Ok(mode)
    }

    async fn connect_live(&self, signer: Arc<dyn Signer>) -> Result<LiveTransport> {
        let dialer = self
            .dialer
            .clone()
            .ok_or_else(|| Error::Transport("no network dialer configured".to_string()))?;
        LiveTransport::connect(dialer, signer, &self.config).await
    }

    /// Send a message to the agent.
    ///
    /// Blank content is rejected before any state is touched. The returned
    /// message is already in [`history`](Self::history); it is not dispatched
    /// to subscribers.
    pub async fn send(&self, content: &str) -> Result<Message> {
        if content.trim().is_empty() {
            return Err(Error::Validation("message content cannot be empty".to_string()));
        }
        if content.len() > self.config.max_content_length {
            return Err(Error::Validation(format!(
                "message content exceeds maximum length of {} bytes",
                self.config.max_content_length
            )));
        }

        let (transport, store) = {
            let session = self.session.read().await;
            if !session.state.is_ready() {
                return Err(Error::NotReady);
            }
            let transport = session.transport.clone().ok_or(Error::NotReady)?;
            (transport, session.store.clone())
        };

        let message = transport.send(self.counterparty(), content).await?;
        store.append(&message.conversation_id, message.clone()).await;
        Ok(message)
    }

    /// Register a callback for inbound messages.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    /// Conversation with the agent, in arrival order.
    pub async fn history(&self) -> Vec<Message> {
        let store = self.session.read().await.store.clone();
        store.history(self.counterparty()).await
    }

    /// Address of the local side of the current session.
    pub async fn local_address(&self) -> Option<String> {
        self.session.read().await.local_address.clone()
    }

    /// Read-only status for the UI.
    pub async fn status(&self) -> ClientStatus {
        let session = self.session.read().await;
        let stream_error = session
            .stream_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        ClientStatus {
            state: session.state,
            mode: session.state.mode(),
            ready: session.state.is_ready(),
            last_error: session.last_error.clone().or(stream_error),
        }
    }

    /// End the session: stop the inbound task, close the transport and drop
    /// every subscriber. History stays readable until the next connect.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let teardown = {
            let mut session = self.session.write().await;
            session.state = SessionState::Disconnected;
            session.take_resources()
        };
        teardown.run().await;
        self.listeners.clear();
        info!("Client disconnected");
    }

    /// Number of active subscribers.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Append and dispatch one inbound message.
async fn deliver(message: Message, store: &ConversationStore, listeners: &ListenerRegistry) {
    if store.append(&message.conversation_id, message.clone()).await {
        listeners.dispatch(&message);
    } else {
        debug!("Dropping duplicate inbound message {}", message.id);
    }
}

/// Background task: drain the inbound stream, restarting it with backoff
/// when it ends.
async fn run_inbound(
    transport: Arc<dyn Transport>,
    mut stream: IncomingStream,
    store: Arc<ConversationStore>,
    listeners: Arc<ListenerRegistry>,
    stream_error: StreamError,
    retry: RetryPolicy,
) {
    let mut attempt = 0u32;

    loop {
        while let Some(message) = stream.next().await {
            attempt = 0;
            deliver(message, &store, &listeners).await;
        }

        warn!("Inbound stream ended");
        stream = loop {
            if attempt >= retry.attempts {
                let reason = format!("inbound stream lost after {} restart attempt(s)", attempt);
                error!("{}", reason);
                *stream_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
                return;
            }

            let delay = retry.delay(attempt);
            attempt += 1;
            debug!("Restarting inbound stream in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;

            match transport.stream_incoming().await {
                Ok(stream) => {
                    info!("Inbound stream resumed");
                    break stream;
                }
                Err(e) => warn!("Failed to restart inbound stream: {}", e),
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GUEST_ADDRESS;
    use crate::identity::LocalSigner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> ClientConfig {
        ClientConfig {
            reply_delay_min_ms: 1000,
            reply_delay_max_ms: 3000,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_initial_status() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        let status = client.status().await;
        assert_eq!(status.state, SessionState::Uninitialized);
        assert!(!status.ready);
        assert!(status.mode.is_none());
        assert!(client.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_before_connect_not_ready() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        assert!(matches!(client.send("hi").await, Err(Error::NotReady)));
    }

    #[tokio::test]
    async fn test_validation_precedes_readiness() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        assert!(matches!(client.send("").await, Err(Error::Validation(_))));
        assert!(matches!(client.send("   ").await, Err(Error::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_session_uses_guest_address() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        let mode = client.connect(None, true).await.unwrap();
        assert_eq!(mode, TransportMode::Simulated);
        assert_eq!(client.local_address().await.as_deref(), Some(DEFAULT_GUEST_ADDRESS));

        let sent = client.send("hi").await.unwrap();
        assert_eq!(sent.sender_address, DEFAULT_GUEST_ADDRESS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_identity_is_simulated() {
        let local = LocalSigner::generate("me".to_string());
        let address = local.address.clone();
        let signer: Arc<dyn Signer> = Arc::new(local);
        let client = ChatClient::new(fast_config(), None).unwrap();

        let mode = client.connect(Some(signer), false).await.unwrap();
        assert_eq!(mode, TransportMode::Simulated);
        assert_eq!(client.local_address().await, Some(address));
    }

    #[tokio::test]
    async fn test_oversized_content_rejected() {
        let config = ClientConfig {
            max_content_length: 4,
            ..fast_config()
        };
        let client = ChatClient::new(config, None).unwrap();
        client.connect(None, false).await.unwrap();

        assert!(matches!(client.send("12345").await, Err(Error::Validation(_))));
        assert!(client.history().await.is_empty());
    }

    #[test]
    fn test_inverted_delay_window_rejected() {
        let config = ClientConfig {
            reply_delay_min_ms: 3000,
            reply_delay_max_ms: 1000,
            ..ClientConfig::default()
        };
        assert!(matches!(ChatClient::new(config, None), Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_reply_within_window() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        client.connect(None, true).await.unwrap();

        let (tx, mut inbox) = tokio::sync::mpsc::unbounded_channel();
        let _sub = client.subscribe(move |m| {
            let _ = tx.send(m.clone());
        });

        let started = tokio::time::Instant::now();
        let sent = client.send("hi").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(10), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() <= Duration::from_millis(3000));

        let history = client.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, sent.id);
        assert_eq!(history[1].id, reply.id);
        assert_eq!(history[1].sender_address, client.counterparty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_not_dispatched() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        client.connect(None, false).await.unwrap();

        let senders = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = senders.clone();
        let _sub = client.subscribe(move |m| {
            seen.lock().unwrap().push(m.sender_address.clone());
        });

        client.send("hi").await.unwrap();
        assert_eq!(client.history().await.len(), 1);
        assert!(senders.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(*senders.lock().unwrap(), vec![client.counterparty().to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reply() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        client.connect(None, false).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = client.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.send("hi").await.unwrap();
        client.disconnect().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.status().await.state, SessionState::Disconnected);
        assert_eq!(client.history().await.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(client.send("late").await, Err(Error::NotReady)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_supersedes_session() {
        let client = ChatClient::new(fast_config(), None).unwrap();
        client.connect(None, false).await.unwrap();
        client.send("first").await.unwrap();

        let old_calls = Arc::new(AtomicUsize::new(0));
        let counter = old_calls.clone();
        let old_sub = client.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        client.connect(None, false).await.unwrap();
        assert!(!old_sub.is_active());
        assert_eq!(client.listener_count(), 0);

        // Subscribers share one registry across sessions, so a surviving
        // task from the old session would dispatch its reply here.
        let new_calls = Arc::new(AtomicUsize::new(0));
        let counter = new_calls.clone();
        let _sub = client.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(old_calls.load(Ordering::SeqCst), 0);
        assert_eq!(new_calls.load(Ordering::SeqCst), 0);
        assert!(client.history().await.is_empty());
    }

    async fn send_concurrently(client: &Arc<ChatClient>, count: usize) -> Vec<Message> {
        let handles: Vec<_> = (0..count)
            .map(|n| {
                let client = client.clone();
                tokio::spawn(async move { client.send(&format!("message {}", n)).await })
            })
            .collect();

        let mut sent = Vec::new();
        for handle in handles {
            sent.push(handle.await.unwrap().unwrap());
        }
        sent
    }

    fn assert_unique_ids(history: &[Message]) {
        let ids: std::collections::HashSet<_> = history.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), history.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sends_and_replies_all_recorded() {
        let client = Arc::new(ChatClient::new(fast_config(), None).unwrap());
        client.connect(None, false).await.unwrap();

        let sent = send_concurrently(&client, 20).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let history = client.history().await;
        assert_eq!(history.len(), 40);
        assert_unique_ids(&history);
        for message in &sent {
            assert!(history.iter().any(|m| m.id == message.id));
        }
        let replies = history
            .iter()
            .filter(|m| m.sender_address == client.counterparty())
            .count();
        assert_eq!(replies, 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_and_replies_multi_thread() {
        let config = ClientConfig {
            reply_delay_min_ms: 0,
            reply_delay_max_ms: 20,
            ..ClientConfig::default()
        };
        let client = Arc::new(ChatClient::new(config, None).unwrap());
        client.connect(None, false).await.unwrap();

        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = dispatched.clone();
        let _sub = client.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        send_concurrently(&client, 50).await;

        let history = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let history = client.history().await;
                if history.len() >= 100 && dispatched.load(Ordering::SeqCst) >= 50 {
                    return history;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(history.len(), 100);
        assert_unique_ids(&history);
        assert_eq!(dispatched.load(Ordering::SeqCst), 50);
    }
}
