//! End-to-end tests of `ChatClient` over in-process agents.

mod common;

use async_trait::async_trait;
use common::*;
use meetchat_core::config::DEFAULT_AGENT_ADDRESS;
use meetchat_core::transport::{AgentOptions, Dialer, LoopbackDialer, WireMessage, WireStream};
use meetchat_core::{ChatClient, Error, SessionState, TransportMode};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted dial does.
enum Script {
    Serve { frames: Vec<Vec<u8>>, hold_open: bool },
    Fail,
}

/// Dialer that plays one script per dial, failing once the scripts run out.
struct ScriptedDialer {
    scripts: Mutex<VecDeque<Script>>,
    dials: AtomicUsize,
}

impl ScriptedDialer {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            dials: AtomicUsize::new(0),
        })
    }

    fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self) -> meetchat_core::Result<WireStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();

        match script {
            Some(Script::Serve { frames, hold_open }) => {
                let (client, agent) = tokio::io::duplex(64 * 1024);
                let (agent_reader, agent_writer) = tokio::io::split(agent);
                tokio::spawn(run_script(
                    WireStream::new(agent_reader, agent_writer),
                    DEFAULT_AGENT_ADDRESS.to_string(),
                    frames,
                    hold_open,
                ));
                let (reader, writer) = tokio::io::split(client);
                Ok(WireStream::new(reader, writer))
            }
            Some(Script::Fail) | None => Err(Error::Transport("agent unreachable".to_string())),
        }
    }
}

fn agent_chat(id: &str, recipient: &str, content: &str) -> Vec<u8> {
    frame(&WireMessage::Chat {
        id: Some(id.to_string()),
        sender: DEFAULT_AGENT_ADDRESS.to_string(),
        recipient: recipient.to_string(),
        content: content.to_string(),
        sent_at: None,
    })
}

#[tokio::test]
async fn test_live_round_trip_over_loopback() {
    init_test_logging();

    let config = test_config();
    let dialer = Arc::new(LoopbackDialer::new(AgentOptions::from_config(&config)));
    let client = ChatClient::new(config.clone(), Some(dialer.clone())).unwrap();
    let (address, signer) = new_signer();

    let mode = with_timeout(client.connect(Some(signer), true)).await.unwrap();
    assert_eq!(mode, TransportMode::Live);
    assert_eq!(client.local_address().await, Some(address.clone()));

    let status = client.status().await;
    assert!(status.ready);
    assert_eq!(status.mode, Some(TransportMode::Live));

    let (callback, mut inbox) = message_sink();
    let _sub = client.subscribe(callback);

    let sent = client.send("Can we meet Tuesday?").await.unwrap();
    assert_eq!(sent.sender_address, address);

    let reply = with_timeout(inbox.recv()).await.unwrap();
    assert_eq!(reply.sender_address, DEFAULT_AGENT_ADDRESS);
    assert_eq!(reply.content, config.responses[0]);

    let history = client.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, sent.id);
    assert_eq!(history[1].id, reply.id);
    assert_eq!(dialer.dial_count(), 1);

    client.disconnect().await;
    assert_eq!(client.status().await.state, SessionState::Disconnected);
    assert_eq!(client.history().await.len(), 2);
}

#[tokio::test]
async fn test_rejected_identity_is_auth_error() {
    let config = test_config();
    let mut options = AgentOptions::from_config(&config);
    options.allowed_addresses = Some(HashSet::from([
        "0x3333333333333333333333333333333333333333".to_string(),
    ]));
    let client = ChatClient::new(config, Some(Arc::new(LoopbackDialer::new(options)))).unwrap();
    let (_, signer) = new_signer();

    let result = with_timeout(client.connect(Some(signer), true)).await;
    assert!(matches!(result, Err(Error::Auth(_))));

    let status = client.status().await;
    assert_eq!(status.state, SessionState::Error);
    assert!(!status.ready);
    assert!(status.last_error.is_some());
    assert!(matches!(client.send("hi").await, Err(Error::NotReady)));
    assert!(client.history().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_agent_is_transport_error() {
    let dialer = ScriptedDialer::new(vec![Script::Fail]);
    let client = ChatClient::new(test_config(), Some(dialer)).unwrap();
    let (_, signer) = new_signer();

    let result = with_timeout(client.connect(Some(signer), true)).await;
    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(client.status().await.state, SessionState::Error);
}

#[tokio::test]
async fn test_missing_dialer_is_transport_error() {
    let client = ChatClient::new(test_config(), None).unwrap();
    let (_, signer) = new_signer();

    let result = client.connect(Some(signer), true).await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_error_session_can_reconnect_simulated() {
    let client = ChatClient::new(test_config(), Some(ScriptedDialer::new(vec![Script::Fail]))).unwrap();
    let (_, signer) = new_signer();

    assert!(client.connect(Some(signer.clone()), true).await.is_err());
    let mode = client.connect(Some(signer), false).await.unwrap();
    assert_eq!(mode, TransportMode::Simulated);
    assert!(client.status().await.last_error.is_none());
}

#[tokio::test]
async fn test_bad_frames_skipped_and_duplicates_dropped() {
    let (address, signer) = new_signer();
    let echo = frame(&WireMessage::Chat {
        id: Some("echo".to_string()),
        sender: address.clone(),
        recipient: DEFAULT_AGENT_ADDRESS.to_string(),
        content: "my own words".to_string(),
        sent_at: None,
    });
    let dialer = ScriptedDialer::new(vec![Script::Serve {
        frames: vec![
            malformed_frame(),
            echo,
            agent_chat("a1", &address, "first"),
            agent_chat("a1", &address, "first again"),
            agent_chat("a2", &address, "second"),
        ],
        hold_open: true,
    }]);
    let client = ChatClient::new(test_config(), Some(dialer)).unwrap();

    let (callback, mut inbox) = message_sink();
    let _sub = client.subscribe(callback);
    with_timeout(client.connect(Some(signer), true)).await.unwrap();

    let first = with_timeout(inbox.recv()).await.unwrap();
    let second = with_timeout(inbox.recv()).await.unwrap();
    assert_eq!(first.content, "first");
    assert_eq!(second.content, "second");

    let history = client.history().await;
    assert_eq!(history.len(), 2);
    assert!(inbox.try_recv().is_err());
    assert!(client.status().await.ready);
}

#[tokio::test]
async fn test_stream_restarts_after_drop() {
    let (address, signer) = new_signer();
    let dialer = ScriptedDialer::new(vec![
        Script::Serve {
            frames: vec![agent_chat("r1", &address, "before drop")],
            hold_open: false,
        },
        Script::Serve {
            frames: vec![agent_chat("r2", &address, "after drop")],
            hold_open: true,
        },
    ]);
    let client = ChatClient::new(test_config(), Some(dialer.clone())).unwrap();

    let (callback, mut inbox) = message_sink();
    let _sub = client.subscribe(callback);
    with_timeout(client.connect(Some(signer), true)).await.unwrap();

    assert_eq!(with_timeout(inbox.recv()).await.unwrap().content, "before drop");
    assert_eq!(with_timeout(inbox.recv()).await.unwrap().content, "after drop");
    assert_eq!(dialer.dial_count(), 2);

    let history = client.history().await;
    assert_eq!(history.len(), 2);
    assert!(client.status().await.last_error.is_none());
}

#[tokio::test]
async fn test_stream_gives_up_after_retry_budget() {
    let (_, signer) = new_signer();
    let dialer = ScriptedDialer::new(vec![Script::Serve {
        frames: Vec::new(),
        hold_open: false,
    }]);
    let config = test_config();
    let attempts = config.stream_retry_attempts as usize;
    let client = ChatClient::new(config, Some(dialer.clone())).unwrap();

    with_timeout(client.connect(Some(signer), true)).await.unwrap();

    let status = with_timeout(async {
        loop {
            let status = client.status().await;
            if status.last_error.is_some() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    assert_eq!(status.state, SessionState::Ready(TransportMode::Live));
    assert_eq!(dialer.dial_count(), 1 + attempts);
}

#[tokio::test]
async fn test_disconnect_clears_subscribers() {
    let client = ChatClient::new(test_config(), None).unwrap();
    client.connect(None, true).await.unwrap();

    let (callback, _inbox) = message_sink();
    let sub = client.subscribe(callback);
    assert_eq!(client.listener_count(), 1);

    client.disconnect().await;
    assert_eq!(client.listener_count(), 0);
    sub.unsubscribe();
    assert!(matches!(client.send("hi").await, Err(Error::NotReady)));
}
