// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol sources.
//!
//! A [`DataSetSource`] opens one [`SourceSubscription`] per data-set writer.
//! The subscription yields raw [`SourceEvent`]s; turning them into
//! sequenced notifications is the job of the writer subscription task.
//!
//! Two sources ship with the crate:
//!
//! - [`SimulatedSource`]: periodic synthetic samples and events
//! - [`ChannelSource`]: events pushed by the host process through a
//!   [`SourceHandle`]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

use opcpub_core::error::SourceError;
use opcpub_core::model::{DataSetWriter, PublishedEvent, PublishedVariable};
use opcpub_core::state::ItemState;
use opcpub_core::types::{DataSetWriterId, DataValue, EventField, Variant};

// =============================================================================
// Traits
// =============================================================================

/// Something observed by a source subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A sampled variable value.
    Sample {
        /// Node id of the variable.
        node_id: String,
        /// Display name of the variable, if configured.
        display_name: Option<String>,
        /// Sampled value.
        value: DataValue,
    },

    /// An event instance.
    Event {
        /// Node id of the event notifier.
        event_notifier: String,
        /// Display name of the notifier, if configured.
        display_name: Option<String>,
        /// Selected event fields.
        fields: Vec<EventField>,
    },

    /// A monitored item changed state.
    ItemState {
        /// Node id of the item.
        node_id: String,
        /// New state.
        state: ItemState,
        /// Optional reason.
        reason: Option<String>,
    },
}

/// A live subscription for one data-set writer.
#[async_trait]
pub trait SourceSubscription: Send {
    /// Waits for the next event.
    ///
    /// `Ok(None)` means the source ended the stream; the writer task treats
    /// that as a disconnect and resubscribes.
    async fn next_event(&mut self) -> Result<Option<SourceEvent>, SourceError>;

    /// Releases the subscription.
    async fn close(&mut self) {}
}

/// A protocol source able to subscribe to a writer's published items.
#[async_trait]
pub trait DataSetSource: Send + Sync {
    /// Opens a subscription for `writer`.
    async fn subscribe(
        &self,
        writer: &DataSetWriter,
    ) -> Result<Box<dyn SourceSubscription>, SourceError>;

    /// Returns the source name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// SimulatedSource
// =============================================================================

/// Produces synthetic samples for every published variable and a synthetic
/// event for every published event notifier.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    default_interval: Duration,
    event_every: u32,
    subscriptions: Arc<AtomicU64>,
}

impl SimulatedSource {
    /// Creates a simulated source sampling every `default_interval` when a
    /// variable does not specify its own sampling interval.
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            event_every: 10,
            subscriptions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emits one event per published notifier every `ticks` sampling ticks.
    pub fn with_event_every(mut self, ticks: u32) -> Self {
        self.event_every = ticks.max(1);
        self
    }

    /// Returns how many subscriptions were opened.
    pub fn subscription_count(&self) -> u64 {
        self.subscriptions.load(Ordering::Relaxed)
    }

    fn tick_interval(&self, writer: &DataSetWriter) -> Duration {
        writer
            .source
            .variables
            .iter()
            .map(|v| v.sampling_interval)
            .filter(|i| !i.is_zero())
            .min()
            .unwrap_or(self.default_interval)
            .max(Duration::from_millis(1))
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl DataSetSource for SimulatedSource {
    async fn subscribe(
        &self,
        writer: &DataSetWriter,
    ) -> Result<Box<dyn SourceSubscription>, SourceError> {
        if writer.item_count() == 0 {
            return Err(SourceError::unsupported(format!(
                "writer '{}' publishes no items",
                writer.id
            )));
        }

        self.subscriptions.fetch_add(1, Ordering::Relaxed);

        let mut interval = tokio::time::interval(self.tick_interval(writer));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending = VecDeque::new();
        for variable in &writer.source.variables {
            pending.push_back(SourceEvent::ItemState {
                node_id: variable.node_id.clone(),
                state: ItemState::Connected,
                reason: None,
            });
        }
        for event in &writer.source.events {
            pending.push_back(SourceEvent::ItemState {
                node_id: event.event_notifier.clone(),
                state: ItemState::Connected,
                reason: None,
            });
        }

        debug!(
            writer_id = %writer.id,
            endpoint = %writer.source.endpoint_url,
            items = writer.item_count(),
            "Simulated subscription opened"
        );

        Ok(Box::new(SimulatedSubscription {
            variables: writer.source.variables.clone(),
            events: writer.source.events.clone(),
            event_every: self.event_every,
            interval,
            pending,
            tick: 0,
            rng: StdRng::from_entropy(),
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

struct SimulatedSubscription {
    variables: Vec<PublishedVariable>,
    events: Vec<PublishedEvent>,
    event_every: u32,
    interval: Interval,
    pending: VecDeque<SourceEvent>,
    tick: u64,
    rng: StdRng,
}

impl SimulatedSubscription {
    fn generate(&mut self) {
        self.tick += 1;
        let now = Utc::now();

        for (index, variable) in self.variables.iter().enumerate() {
            let phase = self.tick as f64 / 10.0 + index as f64;
            let noise: f64 = self.rng.gen_range(-0.5..0.5);
            let value = DataValue::good(Variant::Double(50.0 + 25.0 * phase.sin() + noise))
                .source_timestamp(now)
                .server_timestamp(now);
            self.pending.push_back(SourceEvent::Sample {
                node_id: variable.node_id.clone(),
                display_name: variable.display_name.clone(),
                value,
            });
        }

        if self.tick % u64::from(self.event_every) == 0 {
            for event in &self.events {
                let fields = event
                    .selected_fields
                    .iter()
                    .map(|name| EventField::new(name.clone(), synthetic_field(name, self.tick)))
                    .collect();
                self.pending.push_back(SourceEvent::Event {
                    event_notifier: event.event_notifier.clone(),
                    display_name: event.display_name.clone(),
                    fields,
                });
            }
        }
    }
}

fn synthetic_field(name: &str, tick: u64) -> Variant {
    match name {
        "Severity" => Variant::UInt16(((tick * 37) % 1000) as u16 + 1),
        "Time" | "ReceiveTime" => Variant::DateTime(Utc::now()),
        "Message" => Variant::String(format!("Simulated event {}", tick)),
        "EventId" => Variant::ByteString(tick.to_be_bytes().to_vec()),
        _ => Variant::String(format!("{}-{}", name, tick)),
    }
}

#[async_trait]
impl SourceSubscription for SimulatedSubscription {
    async fn next_event(&mut self) -> Result<Option<SourceEvent>, SourceError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            self.interval.tick().await;
            self.generate();
        }
    }
}

// =============================================================================
// ChannelSource
// =============================================================================

type EventResult = Result<SourceEvent, SourceError>;

struct WriterChannel {
    tx: mpsc::UnboundedSender<EventResult>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<EventResult>>>,
    subscribe_count: Arc<AtomicU32>,
    subscribe_failures: Arc<AtomicU32>,
}

impl WriterChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            subscribe_count: Arc::new(AtomicU32::new(0)),
            subscribe_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    fn handle(&self, writer_id: DataSetWriterId) -> SourceHandle {
        SourceHandle {
            writer_id,
            tx: self.tx.clone(),
            subscribe_count: Arc::clone(&self.subscribe_count),
            subscribe_failures: Arc::clone(&self.subscribe_failures),
        }
    }
}

/// A source fed by the host process.
///
/// Each writer gets one queue that outlives individual subscriptions, so
/// events pushed while a writer is reconnecting are delivered after the
/// reconnect.
#[derive(Default)]
pub struct ChannelSource {
    channels: DashMap<DataSetWriterId, WriterChannel>,
}

impl ChannelSource {
    /// Creates an empty channel source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle feeding `writer_id`, creating its queue on first use.
    pub fn handle(&self, writer_id: impl Into<DataSetWriterId>) -> SourceHandle {
        let writer_id = writer_id.into();
        self.channels
            .entry(writer_id.clone())
            .or_insert_with(WriterChannel::new)
            .handle(writer_id)
    }
}

impl std::fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSource")
            .field("writers", &self.channels.len())
            .finish()
    }
}

#[async_trait]
impl DataSetSource for ChannelSource {
    async fn subscribe(
        &self,
        writer: &DataSetWriter,
    ) -> Result<Box<dyn SourceSubscription>, SourceError> {
        let channel = self
            .channels
            .entry(writer.id.clone())
            .or_insert_with(WriterChannel::new);

        channel.subscribe_count.fetch_add(1, Ordering::SeqCst);

        let failures = channel.subscribe_failures.load(Ordering::SeqCst);
        if failures > 0 {
            channel.subscribe_failures.store(failures - 1, Ordering::SeqCst);
            return Err(SourceError::connect_failed(
                &writer.source.endpoint_url,
                "injected subscribe failure",
            ));
        }

        Ok(Box::new(ChannelSubscription {
            rx: Arc::clone(&channel.rx),
        }))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

struct ChannelSubscription {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<EventResult>>>,
}

#[async_trait]
impl SourceSubscription for ChannelSubscription {
    async fn next_event(&mut self) -> Result<Option<SourceEvent>, SourceError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Pushes events into one writer's [`ChannelSource`] queue.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    writer_id: DataSetWriterId,
    tx: mpsc::UnboundedSender<EventResult>,
    subscribe_count: Arc<AtomicU32>,
    subscribe_failures: Arc<AtomicU32>,
}

impl SourceHandle {
    /// Returns the writer this handle feeds.
    pub fn writer_id(&self) -> &DataSetWriterId {
        &self.writer_id
    }

    /// Pushes a raw source event.
    pub fn push(&self, event: SourceEvent) {
        let _ = self.tx.send(Ok(event));
    }

    /// Pushes a sample.
    pub fn sample(&self, node_id: impl Into<String>, value: DataValue) {
        self.push(SourceEvent::Sample {
            node_id: node_id.into(),
            display_name: None,
            value,
        });
    }

    /// Pushes an event instance.
    pub fn event(&self, event_notifier: impl Into<String>, fields: Vec<EventField>) {
        self.push(SourceEvent::Event {
            event_notifier: event_notifier.into(),
            display_name: None,
            fields,
        });
    }

    /// Pushes an item state change.
    pub fn item_state(&self, node_id: impl Into<String>, state: ItemState) {
        self.push(SourceEvent::ItemState {
            node_id: node_id.into(),
            state,
            reason: None,
        });
    }

    /// Makes the current subscription fail with a stream error.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(Err(SourceError::stream_failed(message)));
    }

    /// Makes the next `count` subscribe attempts fail.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Returns how many times the writer subscribed (failed attempts included).
    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::SeqCst)
    }
}
