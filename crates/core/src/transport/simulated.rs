//! Local simulation of the agent.
//!
//! Every message sent to the counterparty schedules exactly one synthetic
//! reply after a random delay. Replies are buffered until a stream is started.

use crate::chat::types::{Message, TransportMode};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::{IncomingStream, Transport, INCOMING_BUFFER};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where synthetic replies go: the sender of the current stream, plus its
/// receiver until a stream picks it up.
struct Inbound {
    tx: mpsc::Sender<Message>,
    rx: Option<mpsc::Receiver<Message>>,
}

#[derive(Default)]
struct Timers {
    closed: bool,
    handles: Vec<JoinHandle<()>>,
}

/// Transport that answers locally instead of touching the network.
pub struct SimulatedTransport {
    local_address: String,
    counterparty: String,
    delay: (Duration, Duration),
    responses: Arc<Vec<String>>,
    inbound: Arc<tokio::sync::Mutex<Inbound>>,
    timers: Mutex<Timers>,
}

impl SimulatedTransport {
    /// Create a simulated transport. Never fails and needs no network.
    pub fn connect(local_address: &str, config: &ClientConfig) -> Self {
        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let (min, max) = config.reply_delay();
        info!("Simulated transport ready for {}", local_address);

        Self {
            local_address: local_address.to_string(),
            counterparty: config.agent_address.clone(),
            delay: (min.min(max), min.max(max)),
            responses: Arc::new(config.responses.clone()),
            inbound: Arc::new(tokio::sync::Mutex::new(Inbound { tx, rx: Some(rx) })),
            timers: Mutex::new(Timers::default()),
        }
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of replies still waiting on their timer.
    pub fn pending_replies(&self) -> usize {
        self.timers().handles.iter().filter(|h| !h.is_finished()).count()
    }

    fn pick_reply(&self) -> (Duration, String) {
        let mut rng = rand::thread_rng();
        let (min, max) = self.delay;
        let delay = Duration::from_millis(rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64));
        let content = self
            .responses
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();
        (delay, content)
    }

    fn schedule_reply(&self, timers: &mut Timers) {
        let (delay, content) = self.pick_reply();
        let inbound = self.inbound.clone();
        let sender = self.counterparty.clone();

        debug!("Simulated reply scheduled in {:?}", delay);

        timers.handles.retain(|h| !h.is_finished());
        timers.handles.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let reply = Message::from_incoming(
                Default::default(),
                sender,
                content,
                chrono::Utc::now(),
            );
            let tx = inbound.lock().await.tx.clone();
            if tx.send(reply).await.is_err() {
                debug!("Simulated reply dropped, no stream listening");
            }
        }));
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Simulated
    }

    fn local_address(&self) -> &str {
        &self.local_address
    }

    async fn send(&self, peer_address: &str, content: &str) -> Result<Message> {
        let mut timers = self.timers();
        if timers.closed {
            return Err(Error::Transport("transport closed".to_string()));
        }

        let message = Message::new_outgoing(&self.local_address, peer_address, content);
        if peer_address == self.counterparty {
            self.schedule_reply(&mut timers);
        }

        Ok(message)
    }

    async fn stream_incoming(&self) -> Result<IncomingStream> {
        if self.timers().closed {
            return Err(Error::Transport("transport closed".to_string()));
        }

        let mut inbound = self.inbound.lock().await;
        let rx = match inbound.rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
                inbound.tx = tx;
                rx
            }
        };
        Ok(IncomingStream::new(rx))
    }

    async fn close(&self) {
        let handles = {
            let mut timers = self.timers();
            timers.closed = true;
            std::mem::take(&mut timers.handles)
        };
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            debug!("Cancelled {} simulated reply timer(s)", handles.len());
        }
    }
}
