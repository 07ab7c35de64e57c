//! Common test utilities for integration tests.
//!
//! Shared helpers for driving a `ChatClient` against in-process agents.

use meetchat_core::identity::{LocalSigner, Signer};
use meetchat_core::transport::{FrameReader, WireMessage, WireStream};
use meetchat_core::{ClientConfig, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging with appropriate filters.
///
/// Safe to call multiple times (subsequent calls are no-ops).
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meetchat_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Run an async operation with a timeout.
#[allow(dead_code)]
pub async fn with_timeout<T, F>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("Test operation timed out")
}

/// Config with fast restarts for tests.
#[allow(dead_code)]
pub fn test_config() -> ClientConfig {
    ClientConfig {
        stream_retry_attempts: 3,
        stream_retry_backoff_ms: 10,
        handshake_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

/// A fresh signing identity.
#[allow(dead_code)]
pub fn new_signer() -> (String, Arc<dyn Signer>) {
    let signer = LocalSigner::generate("test".to_string());
    (signer.address.clone(), Arc::new(signer))
}

/// Channel fed by a subscriber callback.
#[allow(dead_code)]
pub fn message_sink() -> (
    impl Fn(&Message) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Message>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (move |m: &Message| {
        let _ = tx.send(m.clone());
    }, rx)
}

/// Encode a frame, panicking on failure.
#[allow(dead_code)]
pub fn frame(message: &WireMessage) -> Vec<u8> {
    message.encode().expect("encode frame")
}

/// A length-prefixed frame whose body is not valid JSON.
#[allow(dead_code)]
pub fn malformed_frame() -> Vec<u8> {
    let body = b"{\"type\": \"chat\", \"content\":";
    let mut buf = (body.len() as u32).to_be_bytes().to_vec();
    buf.extend_from_slice(body);
    buf
}

/// Agent side of one scripted connection: accept the Hello, welcome the
/// client, write `frames`, then either wait for the client to hang up or
/// close immediately.
#[allow(dead_code)]
pub async fn run_script(stream: WireStream, agent_address: String, frames: Vec<Vec<u8>>, hold_open: bool) {
    let WireStream { reader, mut writer } = stream;
    let mut reader = FrameReader::new(reader);

    if reader.recv().await.is_err() {
        return;
    }
    let welcome = frame(&WireMessage::Welcome {
        address: agent_address,
    });
    if writer.write_all(&welcome).await.is_err() {
        return;
    }
    for bytes in frames {
        if writer.write_all(&bytes).await.is_err() {
            return;
        }
    }
    let _ = writer.flush().await;

    if hold_open {
        while let Ok(Some(_)) = reader.next_frame().await {}
    } else {
        let _ = writer.shutdown().await;
    }
}
