// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publishing sinks for encoded network messages.
//!
//! The engine hands every flushed batch of [`NetworkMessage`]s to one
//! [`NetworkMessageSink`]. Sinks never see notifications, only wire-ready
//! payloads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use opcpub_core::error::SinkError;
use opcpub_core::message::NetworkMessage;

// =============================================================================
// NetworkMessageSink
// =============================================================================

/// Destination for encoded network messages.
#[async_trait]
pub trait NetworkMessageSink: Send + Sync {
    /// Publishes a batch of messages, in order.
    async fn send(&self, messages: &[NetworkMessage]) -> Result<(), SinkError>;

    /// Returns the sink name for logging.
    fn name(&self) -> &str;

    /// Returns `true` if the sink believes it can accept messages.
    fn is_healthy(&self) -> bool {
        true
    }
}

// =============================================================================
// HttpMessageSink
// =============================================================================

/// Posts every network message as one HTTP request.
///
/// The request body is the raw payload and the `Content-Type` follows the
/// message encoding. Group and message ids travel as headers so receivers can
/// deduplicate without parsing the body.
pub struct HttpMessageSink {
    client: reqwest::Client,
    url: String,
    healthy: AtomicBool,
}

impl HttpMessageSink {
    /// Header carrying the writer group id.
    pub const GROUP_HEADER: &'static str = "x-opcpub-writer-group";

    /// Header carrying the network message id.
    pub const MESSAGE_ID_HEADER: &'static str = "x-opcpub-message-id";

    /// Creates a sink posting to `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| SinkError::send_failed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            healthy: AtomicBool::new(true),
        })
    }

    /// Returns the target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, message: &NetworkMessage) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, message.content_type())
            .header(Self::GROUP_HEADER, message.writer_group_id.as_str())
            .header(Self::MESSAGE_ID_HEADER, message.message_id.as_str())
            .body(message.payload.clone())
            .send()
            .await
            .map_err(|e| SinkError::send_failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::rejected(status.as_u16(), body));
        }

        Ok(())
    }
}

#[async_trait]
impl NetworkMessageSink for HttpMessageSink {
    async fn send(&self, messages: &[NetworkMessage]) -> Result<(), SinkError> {
        for message in messages {
            if let Err(e) = self.post(message).await {
                self.healthy.store(false, Ordering::Relaxed);
                return Err(e);
            }
        }
        self.healthy.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for HttpMessageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMessageSink")
            .field("url", &self.url)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

// =============================================================================
// LoggingSink
// =============================================================================

/// Logs every message instead of publishing it.
#[derive(Debug, Default)]
pub struct LoggingSink {
    messages: AtomicU64,
    bytes: AtomicU64,
    log_payload: bool,
}

impl LoggingSink {
    /// Creates a logging sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also logs JSON payloads as text (at debug level).
    pub fn with_payload(mut self, log_payload: bool) -> Self {
        self.log_payload = log_payload;
        self
    }

    /// Returns the number of messages logged.
    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Returns the number of payload bytes logged.
    pub fn byte_count(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NetworkMessageSink for LoggingSink {
    async fn send(&self, messages: &[NetworkMessage]) -> Result<(), SinkError> {
        for message in messages {
            self.messages.fetch_add(1, Ordering::Relaxed);
            self.bytes.fetch_add(message.size() as u64, Ordering::Relaxed);

            info!(
                group_id = %message.writer_group_id,
                message_id = %message.message_id,
                sequence_number = message.sequence_number,
                message_type = message.kind.message_type(),
                notifications = message.notification_count,
                size = message.size(),
                "Network message"
            );

            if self.log_payload {
                if let Ok(text) = std::str::from_utf8(&message.payload) {
                    debug!(message_id = %message.message_id, payload = text, "Network message payload");
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

// =============================================================================
// ChannelSink
// =============================================================================

/// Forwards messages into a tokio channel.
///
/// Used to embed the engine into a host process and by tests.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NetworkMessage>,
}

impl ChannelSink {
    /// Creates a sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NetworkMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NetworkMessageSink for ChannelSink {
    async fn send(&self, messages: &[NetworkMessage]) -> Result<(), SinkError> {
        for message in messages {
            self.tx.send(message.clone()).await.map_err(|_| SinkError::Closed)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "channel"
    }

    fn is_healthy(&self) -> bool {
        !self.tx.is_closed()
    }
}

// =============================================================================
// MockMessageSink
// =============================================================================

/// A sink that records messages in memory and can be told to fail.
#[derive(Debug)]
pub struct MockMessageSink {
    messages: Mutex<Vec<NetworkMessage>>,
    send_count: AtomicU64,
    should_fail: AtomicBool,
    failure_message: String,
}

impl MockMessageSink {
    /// Creates a mock sink that succeeds.
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            send_count: AtomicU64::new(0),
            should_fail: AtomicBool::new(false),
            failure_message: "Mock failure".to_string(),
        }
    }

    /// Creates a mock sink that always fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            should_fail: AtomicBool::new(true),
            failure_message: message.into(),
            ..Self::new()
        }
    }

    /// Sets whether the sink should fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Returns the number of successful sends.
    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::Relaxed)
    }

    /// Returns a copy of every message received so far.
    pub fn messages(&self) -> Vec<NetworkMessage> {
        self.messages.lock().clone()
    }

    /// Returns the number of data (non keep-alive) messages received.
    pub fn data_message_count(&self) -> usize {
        self.messages.lock().iter().filter(|m| !m.is_keep_alive()).count()
    }

    /// Returns the total number of notifications received.
    pub fn notification_count(&self) -> usize {
        self.messages.lock().iter().map(|m| m.notification_count).sum()
    }
}

impl Default for MockMessageSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMessageSink for MockMessageSink {
    async fn send(&self, messages: &[NetworkMessage]) -> Result<(), SinkError> {
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(SinkError::send_failed(&self.failure_message));
        }

        self.send_count.fetch_add(1, Ordering::Relaxed);
        self.messages.lock().extend_from_slice(messages);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_healthy(&self) -> bool {
        !self.should_fail.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcpub_core::types::WriterGroupId;
    use opcpub_encoding::{EncodingContext, NetworkMessageEncoder};

    fn keep_alive() -> NetworkMessage {
        let encoder = NetworkMessageEncoder::new();
        encoder.encode_keep_alive(&EncodingContext::new(WriterGroupId::new("group-1")))
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        let first = keep_alive();
        let second = keep_alive();

        sink.send(&[first.clone(), second.clone()]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().message_id, first.message_id);
        assert_eq!(rx.recv().await.unwrap().message_id, second.message_id);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);

        assert!(!sink.is_healthy());
        let err = sink.send(&[keep_alive()]).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }

    #[tokio::test]
    async fn test_logging_sink_counts() {
        let sink = LoggingSink::new().with_payload(true);
        let message = keep_alive();
        let size = message.size() as u64;

        sink.send(&[message]).await.unwrap();

        assert_eq!(sink.message_count(), 1);
        assert_eq!(sink.byte_count(), size);
    }

    #[tokio::test]
    async fn test_mock_sink_failure_toggle() {
        let sink = MockMessageSink::failing("down");
        assert!(sink.send(&[keep_alive()]).await.is_err());
        assert_eq!(sink.send_count(), 0);

        sink.set_should_fail(false);
        sink.send(&[keep_alive()]).await.unwrap();
        assert_eq!(sink.send_count(), 1);
        assert_eq!(sink.messages().len(), 1);
        assert_eq!(sink.data_message_count(), 0);
    }

    #[test]
    fn test_http_sink_builds() {
        let sink = HttpMessageSink::new("http://localhost:9/ingest", Duration::from_secs(1)).unwrap();
        assert_eq!(sink.url(), "http://localhost:9/ingest");
        assert!(sink.is_healthy());
        assert_eq!(sink.name(), "http");
    }
}
