// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-writer subscription task.
//!
//! ```text
//!            ┌─────────── backoff ◀──────────┐
//!            ▼                               │
//! Activated ──subscribe──▶ Connected ──fail──┴─▶ Error
//!     │                        │
//!     └────── cancelled ───────┴──────────────▶ Disconnected
//! ```
//!
//! The task owns the writer's sequence counter, so sequence numbers stay
//! monotonic across reconnects of the same writer.
//!
//! A notification that already has a sequence number is never discarded: when
//! the task is cancelled while waiting for room in the output channel, the
//! notification is parked in the shared [`Undelivered`] slot instead.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opcpub_core::backoff::{BackoffConfig, ExponentialBackoff};
use opcpub_core::error::SourceError;
use opcpub_core::message::Notification;
use opcpub_core::model::DataSetWriter;
use opcpub_core::state::{StateReporter, WriterState};

use crate::source::{DataSetSource, SourceEvent, SourceSubscription};

/// Notifications produced by cancelled writer tasks that did not fit into
/// the output channel. The consumer drains them after the channel.
pub type Undelivered = Arc<Mutex<Vec<Notification>>>;

/// How one subscription attempt ended.
enum Outcome {
    Cancelled,
    Failed(SourceError),
}

/// Runtime object of one data-set writer.
pub struct DataSetWriterSubscription {
    writer: DataSetWriter,
    source: Arc<dyn DataSetSource>,
    reporter: Arc<dyn StateReporter>,
    output: mpsc::Sender<Notification>,
    undelivered: Undelivered,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    sequence: u32,
}

impl DataSetWriterSubscription {
    /// Creates a subscription task for `writer` emitting into `output`.
    pub fn new(
        writer: DataSetWriter,
        source: Arc<dyn DataSetSource>,
        reporter: Arc<dyn StateReporter>,
        output: mpsc::Sender<Notification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            writer,
            source,
            reporter,
            output,
            undelivered: Undelivered::default(),
            backoff: BackoffConfig::default(),
            cancel,
            sequence: 0,
        }
    }

    /// Sets the reconnect backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Parks notifications cut off by cancellation in `undelivered`.
    pub fn with_undelivered(mut self, undelivered: Undelivered) -> Self {
        self.undelivered = undelivered;
        self
    }

    /// Returns the writer.
    pub fn writer(&self) -> &DataSetWriter {
        &self.writer
    }

    /// Spawns the task on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the cancellation token fires.
    pub async fn run(mut self) {
        let mut backoff = ExponentialBackoff::new(self.backoff.clone());

        info!(
            writer_id = %self.writer.id,
            source = self.source.name(),
            endpoint = %self.writer.source.endpoint_url,
            "Writer subscription started"
        );

        loop {
            self.report(WriterState::Activated, None);

            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.source.subscribe(&self.writer) => result,
            };

            let failure = match subscribed {
                Ok(mut subscription) => {
                    backoff.reset();
                    self.report(WriterState::Connected, None);

                    let outcome = self.pump(subscription.as_mut()).await;
                    subscription.close().await;

                    match outcome {
                        Outcome::Cancelled => break,
                        Outcome::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            let reason = failure.to_string();
            self.report(WriterState::Error, Some(&reason));

            if !failure.is_retryable() {
                warn!(
                    writer_id = %self.writer.id,
                    error = %failure,
                    "Writer subscription failed permanently"
                );
                self.cancel.cancelled().await;
                break;
            }

            let delay = backoff.next_delay();
            warn!(
                writer_id = %self.writer.id,
                error = %failure,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Writer subscription failed, reconnecting"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.report(WriterState::Disconnected, None);
        info!(
            writer_id = %self.writer.id,
            last_sequence = self.sequence,
            "Writer subscription stopped"
        );
    }

    async fn pump(&mut self, subscription: &mut dyn SourceSubscription) -> Outcome {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                event = subscription.next_event() => event,
            };

            let notification = match event {
                Ok(Some(SourceEvent::Sample { node_id, display_name, value })) => {
                    let notification =
                        Notification::sample(self.writer.id.clone(), self.next_sequence(), node_id, value);
                    with_display_name(notification, display_name)
                }
                Ok(Some(SourceEvent::Event { event_notifier, display_name, fields })) => {
                    let notification = Notification::event(
                        self.writer.id.clone(),
                        self.next_sequence(),
                        event_notifier,
                        fields,
                    );
                    with_display_name(notification, display_name)
                }
                Ok(Some(SourceEvent::ItemState { node_id, state, reason })) => {
                    self.reporter.on_data_set_variable_state_change(
                        &self.writer.id,
                        &node_id,
                        state,
                        reason.as_deref(),
                    );
                    continue;
                }
                Ok(None) => return Outcome::Failed(SourceError::Closed),
                Err(e) => return Outcome::Failed(e),
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = self.output.reserve() => permit.ok(),
            };
            match permit {
                Some(permit) => permit.send(notification),
                None => {
                    debug!(
                        writer_id = %self.writer.id,
                        sequence_number = notification.sequence_number,
                        "Output unavailable, parking notification"
                    );
                    self.undelivered.lock().push(notification);
                    return Outcome::Cancelled;
                }
            }
        }
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn report(&self, state: WriterState, reason: Option<&str>) {
        self.reporter
            .on_data_set_writer_state_change(&self.writer.id, state, reason);
    }
}

fn with_display_name(notification: Notification, display_name: Option<String>) -> Notification {
    match display_name {
        Some(name) => notification.with_display_name(name),
        None => notification,
    }
}

impl std::fmt::Debug for DataSetWriterSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSetWriterSubscription")
            .field("writer_id", &self.writer.id)
            .field("source", &self.source.name())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use opcpub_core::message::NotificationPayload;
    use opcpub_core::state::{ItemState, StatusRegistry};
    use opcpub_core::types::{DataValue, EventField, Variant};

    use crate::source::ChannelSource;

    struct Harness {
        source: Arc<ChannelSource>,
        status: Arc<StatusRegistry>,
        rx: mpsc::Receiver<Notification>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(writer: DataSetWriter) -> Harness {
        let source = Arc::new(ChannelSource::new());
        let status = Arc::new(StatusRegistry::new());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = DataSetWriterSubscription::new(
            writer,
            source.clone(),
            status.clone(),
            tx,
            cancel.clone(),
        )
        .with_backoff(BackoffConfig::for_testing())
        .spawn();

        Harness { source, status, rx, cancel, task }
    }

    async fn recv(rx: &mut mpsc::Receiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("channel closed")
    }

    async fn wait_for_state(status: &StatusRegistry, writer: &str, state: WriterState) {
        let id = writer.into();
        for _ in 0..200 {
            if status.writer_state(&id) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("writer {} never reached {:?}", writer, state);
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let mut h = start(DataSetWriter::new("w1", "g1", "opc.tcp://a"));
        let handle = h.source.handle("w1");

        handle.sample("n1", DataValue::good(Variant::Int32(1)));
        handle.event("i=2253", vec![EventField::new("Severity", 10)]);
        handle.sample("n2", DataValue::good(Variant::Int32(2)));

        let first = recv(&mut h.rx).await;
        let second = recv(&mut h.rx).await;
        let third = recv(&mut h.rx).await;

        assert_eq!(
            [first.sequence_number, second.sequence_number, third.sequence_number],
            [1, 2, 3]
        );
        assert!(matches!(second.payload, NotificationPayload::Event(_)));
        assert_eq!(third.node_id, "n2");

        h.cancel.cancel();
        h.task.await.unwrap();
        assert_eq!(h.status.writer_state(&"w1".into()), Some(WriterState::Disconnected));
    }

    #[tokio::test]
    async fn test_stream_failure_reports_error_and_reconnects() {
        let mut h = start(DataSetWriter::new("w1", "g1", "opc.tcp://a"));
        let handle = h.source.handle("w1");

        handle.sample("n1", DataValue::good(Variant::Int32(1)));
        assert_eq!(recv(&mut h.rx).await.sequence_number, 1);

        handle.fail("connection reset");
        handle.sample("n1", DataValue::good(Variant::Int32(2)));

        let after = recv(&mut h.rx).await;
        assert_eq!(after.sequence_number, 2);
        assert!(handle.subscribe_count() >= 2);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_failure_reports_error() {
        let writer = DataSetWriter::new("w1", "g1", "opc.tcp://a");
        let source = Arc::new(ChannelSource::new());
        let handle = source.handle("w1");
        handle.fail_next_subscribes(u32::MAX);

        let status = Arc::new(StatusRegistry::new());
        let (tx, _rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = DataSetWriterSubscription::new(writer, source, status.clone(), tx, cancel.clone())
            .with_backoff(BackoffConfig::for_testing())
            .spawn();

        wait_for_state(&status, "w1", WriterState::Error).await;
        let entry = status.writer_status(&"w1".into()).unwrap();
        assert!(entry.reason.unwrap().contains("injected"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_output_full_parks_notification() {
        let writer = DataSetWriter::new("w1", "g1", "opc.tcp://a");
        let source = Arc::new(ChannelSource::new());
        let handle = source.handle("w1");
        let undelivered = Undelivered::default();

        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = DataSetWriterSubscription::new(
            writer,
            source,
            Arc::new(StatusRegistry::new()),
            tx,
            cancel.clone(),
        )
        .with_undelivered(undelivered.clone())
        .spawn();

        handle.sample("n1", DataValue::good(Variant::Int32(1)));
        handle.sample("n1", DataValue::good(Variant::Int32(2)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        task.await.unwrap();

        assert_eq!(rx.try_recv().unwrap().sequence_number, 1);
        assert!(rx.try_recv().is_err());
        let parked: Vec<u32> = undelivered.lock().iter().map(|n| n.sequence_number).collect();
        assert_eq!(parked, vec![2]);
    }

    #[tokio::test]
    async fn test_item_states_are_forwarded() {
        let h = start(DataSetWriter::new("w1", "g1", "opc.tcp://a"));
        let handle = h.source.handle("w1");
        handle.item_state("n1", ItemState::Connected);

        for _ in 0..200 {
            if h.status.item_state(&"w1".into(), "n1") == Some(ItemState::Connected) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.status.item_state(&"w1".into(), "n1"), Some(ItemState::Connected));

        h.cancel.cancel();
        h.task.await.unwrap();
    }
}
