// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Writer-group engine.
//!
//! The engine owns the live writer set of one group and runs its
//! collect/encode/publish cycle:
//!
//! ```text
//!               batch_size reached
//!             ┌─── or interval ───┐
//!             │                   ▼
//! Idle ──▶ Collecting         Encoding ──▶ Publishing ──┐
//!             ▲                                         │
//!             └─────────────────────────────────────────┘
//! ```
//!
//! Writer tasks push notifications into a bounded channel. The receiving end
//! and the pending buffer form the *collector*, guarded by a fair async mutex.
//! The loop holds the collector while it waits and gives it up on request, so
//! `remove_writers` and `shutdown` can flush pending notifications themselves,
//! whether or not the loop is running. Notifications a cancelled writer could
//! not push into the channel are parked in a shared slot and drained by the
//! next flush, after the channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opcpub_core::backoff::BackoffConfig;
use opcpub_core::error::EngineError;
use opcpub_core::message::{NetworkMessage, Notification};
use opcpub_core::model::{DataSetWriter, WriterGroup};
use opcpub_core::state::{GroupState, ItemState, StateReporter, WriterState};
use opcpub_core::types::{DataSetWriterId, WriterGroupId};
use opcpub_encoding::{apply_ordering, ContentMask, EncoderStats, EncodingContext, NetworkMessageEncoder};

use crate::sink::NetworkMessageSink;
use crate::source::DataSetSource;
use crate::subscription::{DataSetWriterSubscription, Undelivered};

// =============================================================================
// Configuration
// =============================================================================

/// Engine runtime settings that are not part of the writer group model.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the notification channel between writers and the loop.
    pub queue_capacity: usize,
    /// Publisher id written into network message headers.
    pub publisher_id: Option<String>,
    /// Reconnect backoff of writer subscriptions.
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            publisher_id: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the publisher id.
    pub fn with_publisher_id(mut self, publisher_id: impl Into<String>) -> Self {
        self.publisher_id = Some(publisher_id.into());
        self
    }

    /// Sets the writer reconnect backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fast settings for tests.
    pub fn for_testing() -> Self {
        Self {
            queue_capacity: 256,
            publisher_id: Some("test-publisher".to_string()),
            backoff: BackoffConfig::for_testing(),
        }
    }
}

// =============================================================================
// EngineState
// =============================================================================

/// Where the collect/encode/publish cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    /// The loop is not running.
    Idle = 0,
    /// Waiting for notifications or the interval.
    Collecting = 1,
    /// Encoding a batch.
    Encoding = 2,
    /// Handing messages to the sink.
    Publishing = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Collecting,
            2 => EngineState::Encoding,
            3 => EngineState::Publishing,
            _ => EngineState::Idle,
        }
    }

    /// Returns the state as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Collecting => "collecting",
            EngineState::Encoding => "encoding",
            EngineState::Publishing => "publishing",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStats {
    /// Notifications taken from the writer channel.
    pub notifications_received: u64,
    /// Notifications handed to the encoder.
    pub notifications_flushed: u64,
    /// Data messages accepted by the sink.
    pub messages_published: u64,
    /// Keep-alive messages accepted by the sink.
    pub keep_alives_published: u64,
    /// Sink calls that failed.
    pub publish_failures: u64,
    /// Flushes that encoded at least one notification.
    pub flushes: u64,
    /// Encoder counters.
    pub encoder: EncoderStats,
}

#[derive(Debug, Default)]
struct EngineCounters {
    notifications_received: AtomicU64,
    notifications_flushed: AtomicU64,
    messages_published: AtomicU64,
    keep_alives_published: AtomicU64,
    publish_failures: AtomicU64,
    flushes: AtomicU64,
}

// =============================================================================
// WriterSetController
// =============================================================================

/// Mutation interface of a live writer set, as used by the registry loader.
#[async_trait]
pub trait WriterSetController: Send + Sync {
    /// Returns the group id writers must belong to.
    fn writer_group_id(&self) -> &WriterGroupId;

    /// Returns the ids of the live writers.
    fn writer_ids(&self) -> Vec<DataSetWriterId>;

    /// Adds (or replaces) writers. Returns how many became live.
    async fn add_writers(&self, writers: Vec<DataSetWriter>) -> Result<usize, EngineError>;

    /// Removes writers after flushing their pending notifications. Returns
    /// how many were live.
    async fn remove_writers(&self, writer_ids: Vec<DataSetWriterId>) -> Result<usize, EngineError>;
}

// =============================================================================
// Group health
// =============================================================================

/// Derives the group state from writer and sink health and forwards every
/// transition to the user reporter.
struct GroupHealth {
    group_id: WriterGroupId,
    reporter: Arc<dyn StateReporter>,
    active: AtomicBool,
    published: AtomicBool,
    writers_in_error: DashMap<DataSetWriterId, String>,
    sink_error: Mutex<Option<String>>,
    current: Mutex<Option<GroupState>>,
}

impl GroupHealth {
    fn new(group_id: WriterGroupId, reporter: Arc<dyn StateReporter>) -> Self {
        Self {
            group_id,
            reporter,
            active: AtomicBool::new(false),
            published: AtomicBool::new(false),
            writers_in_error: DashMap::new(),
            sink_error: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    fn transition(&self, state: GroupState, reason: Option<&str>) {
        let mut current = self.current.lock();
        if *current == Some(state) {
            return;
        }
        *current = Some(state);
        self.reporter
            .on_writer_group_state_change(&self.group_id, state, reason);
    }

    fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.transition(GroupState::Activated, None);
        self.evaluate();
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.transition(GroupState::Disconnected, None);
    }

    fn record_publish(&self) {
        self.published.store(true, Ordering::SeqCst);
        *self.sink_error.lock() = None;
        self.evaluate();
    }

    fn record_sink_failure(&self, reason: String) {
        *self.sink_error.lock() = Some(reason);
        self.evaluate();
    }

    fn forget(&self, writer_id: &DataSetWriterId) {
        if self.writers_in_error.remove(writer_id).is_some() {
            self.evaluate();
        }
    }

    fn evaluate(&self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let sink_error = self.sink_error.lock().clone();
        if let Some(reason) = sink_error {
            self.transition(GroupState::Error, Some(&reason));
        } else if !self.writers_in_error.is_empty() {
            let reason = format!("{} writer(s) in error", self.writers_in_error.len());
            self.transition(GroupState::Degraded, Some(&reason));
        } else if self.published.load(Ordering::SeqCst) {
            self.transition(GroupState::Publishing, None);
        } else {
            self.transition(GroupState::Activated, None);
        }
    }
}

impl StateReporter for GroupHealth {
    fn name(&self) -> &str {
        self.reporter.name()
    }

    fn on_data_set_variable_state_change(
        &self,
        writer_id: &DataSetWriterId,
        node_id: &str,
        state: ItemState,
        reason: Option<&str>,
    ) {
        self.reporter
            .on_data_set_variable_state_change(writer_id, node_id, state, reason);
    }

    fn on_data_set_writer_state_change(
        &self,
        writer_id: &DataSetWriterId,
        state: WriterState,
        reason: Option<&str>,
    ) {
        self.reporter
            .on_data_set_writer_state_change(writer_id, state, reason);

        let changed = match state {
            WriterState::Error => self
                .writers_in_error
                .insert(writer_id.clone(), reason.unwrap_or_default().to_string())
                .is_none(),
            WriterState::Connected | WriterState::Disconnected => {
                self.writers_in_error.remove(writer_id).is_some()
            }
            WriterState::Pending | WriterState::Activated => false,
        };

        if changed {
            self.evaluate();
        }
    }

    fn on_writer_group_state_change(
        &self,
        group_id: &WriterGroupId,
        state: GroupState,
        reason: Option<&str>,
    ) {
        self.reporter
            .on_writer_group_state_change(group_id, state, reason);
    }

    fn on_data_set_writer_removed(&self, writer_id: &DataSetWriterId) {
        self.reporter.on_data_set_writer_removed(writer_id);
        self.forget(writer_id);
    }
}

// =============================================================================
// Engine internals
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum FlushReason {
    BatchFull,
    Interval,
    Removal,
    Manual,
    Shutdown,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            FlushReason::BatchFull => "batch_full",
            FlushReason::Interval => "interval",
            FlushReason::Removal => "removal",
            FlushReason::Manual => "manual",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

enum LoopEvent {
    Shutdown,
    Yield,
    Tick,
    Received(Option<Notification>),
}

struct Collector {
    rx: mpsc::Receiver<Notification>,
    pending: Vec<Notification>,
}

struct WriterHandle {
    writer: DataSetWriter,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct EngineInner {
    group: WriterGroup,
    config: EngineConfig,
    source: Arc<dyn DataSetSource>,
    sink: Arc<dyn NetworkMessageSink>,
    health: Arc<GroupHealth>,
    encoder: NetworkMessageEncoder,
    writers: DashMap<DataSetWriterId, WriterHandle>,
    tx: mpsc::Sender<Notification>,
    undelivered: Undelivered,
    collector: tokio::sync::Mutex<Collector>,
    yield_request: Notify,
    membership: tokio::sync::Mutex<()>,
    state: AtomicU8,
    running: AtomicBool,
    shutting_down: AtomicBool,
    writers_token: CancellationToken,
    loop_token: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    last_publish: Mutex<Instant>,
    counters: EngineCounters,
}

impl EngineInner {
    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn idle_state(&self) -> EngineState {
        if self.running.load(Ordering::SeqCst) && !self.loop_token.is_cancelled() {
            EngineState::Collecting
        } else {
            EngineState::Idle
        }
    }

    fn encoding_context(&self) -> EncodingContext {
        let mut ctx = EncodingContext::for_group(&self.group, self.config.publisher_id.clone());
        for entry in self.writers.iter() {
            ctx.writer_masks.insert(
                entry.key().clone(),
                ContentMask {
                    data_set: entry.writer.data_set_content_mask,
                    field: entry.writer.field_content_mask,
                },
            );
        }
        ctx
    }

    async fn run(self: Arc<Self>) {
        let interval_duration = self.group.publishing_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(interval_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        let threshold = self.group.batch_size.max(1);

        info!(
            group_id = %self.group.id,
            interval_ms = interval_duration.as_millis() as u64,
            batch_size = threshold,
            encoding = %self.group.encoding,
            "Writer group loop started"
        );

        loop {
            let mut collector = self.collector.lock().await;
            self.set_state(EngineState::Collecting);

            let event = tokio::select! {
                biased;
                _ = self.loop_token.cancelled() => LoopEvent::Shutdown,
                _ = self.yield_request.notified() => LoopEvent::Yield,
                _ = interval.tick() => LoopEvent::Tick,
                received = collector.rx.recv() => LoopEvent::Received(received),
            };

            match event {
                LoopEvent::Shutdown => {
                    self.flush(&mut collector, FlushReason::Shutdown).await;
                    break;
                }
                LoopEvent::Yield => {}
                LoopEvent::Tick => {
                    self.flush(&mut collector, FlushReason::Interval).await;
                    if self.keep_alive_due() {
                        self.publish_keep_alive().await;
                    }
                }
                LoopEvent::Received(Some(notification)) => {
                    self.counters
                        .notifications_received
                        .fetch_add(1, Ordering::Relaxed);
                    collector.pending.push(notification);
                    if collector.pending.len() >= threshold {
                        self.flush(&mut collector, FlushReason::BatchFull).await;
                    }
                }
                LoopEvent::Received(None) => break,
            }
        }

        self.set_state(EngineState::Idle);
        info!(group_id = %self.group.id, "Writer group loop stopped");
    }

    /// Takes the collector away from the loop and flushes it.
    async fn flush_now(&self, reason: FlushReason) -> usize {
        self.yield_request.notify_one();
        let mut collector = self.collector.lock().await;
        self.flush(&mut collector, reason).await
    }

    /// Encodes and publishes everything pending. Returns the number of
    /// notifications flushed.
    async fn flush(&self, collector: &mut Collector, reason: FlushReason) -> usize {
        while let Ok(notification) = collector.rx.try_recv() {
            self.counters
                .notifications_received
                .fetch_add(1, Ordering::Relaxed);
            collector.pending.push(notification);
        }
        let parked = std::mem::take(&mut *self.undelivered.lock());
        if !parked.is_empty() {
            self.counters
                .notifications_received
                .fetch_add(parked.len() as u64, Ordering::Relaxed);
            collector.pending.extend(parked);
        }

        if collector.pending.is_empty() {
            return 0;
        }

        let batch = std::mem::take(&mut collector.pending);
        let count = batch.len();

        self.set_state(EngineState::Encoding);
        let ctx = self.encoding_context();
        let messages = if self.group.is_batched() {
            let mut messages = Vec::new();
            let mut remaining = apply_ordering(batch, ctx.ordering).into_iter().peekable();
            while remaining.peek().is_some() {
                let chunk: Vec<Notification> = remaining.by_ref().take(self.group.batch_size).collect();
                messages.extend(self.encoder.encode_batch(&ctx, chunk));
            }
            messages
        } else {
            self.encoder.encode(&ctx, batch)
        };

        self.counters
            .notifications_flushed
            .fetch_add(count as u64, Ordering::Relaxed);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        debug!(
            group_id = %self.group.id,
            reason = reason.as_str(),
            notifications = count,
            messages = messages.len(),
            "Flushing writer group"
        );

        self.set_state(EngineState::Publishing);
        if self.publish(&messages).await {
            self.counters
                .messages_published
                .fetch_add(messages.len() as u64, Ordering::Relaxed);
        }
        self.set_state(self.idle_state());

        count
    }

    async fn publish(&self, messages: &[NetworkMessage]) -> bool {
        if messages.is_empty() {
            return true;
        }

        match self.sink.send(messages).await {
            Ok(()) => {
                *self.last_publish.lock() = Instant::now();
                self.health.record_publish();
                true
            }
            Err(e) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    group_id = %self.group.id,
                    sink = self.sink.name(),
                    error = %e,
                    error_type = e.error_type(),
                    messages = messages.len(),
                    "Failed to publish network messages"
                );
                self.health.record_sink_failure(e.to_string());
                false
            }
        }
    }

    fn keep_alive_due(&self) -> bool {
        match self.group.keep_alive_time {
            Some(keep_alive) if !keep_alive.is_zero() => {
                self.last_publish.lock().elapsed() >= keep_alive
            }
            _ => false,
        }
    }

    async fn publish_keep_alive(&self) {
        let message = self.encoder.encode_keep_alive(&self.encoding_context());
        debug!(group_id = %self.group.id, message_id = %message.message_id, "Publishing keep-alive");

        self.set_state(EngineState::Publishing);
        if self.publish(std::slice::from_ref(&message)).await {
            self.counters
                .keep_alives_published
                .fetch_add(1, Ordering::Relaxed);
        }
        self.set_state(self.idle_state());
    }

    fn spawn_writer(&self, writer: DataSetWriter) {
        let cancel = self.writers_token.child_token();
        let reporter: Arc<dyn StateReporter> = self.health.clone();
        reporter.on_data_set_writer_state_change(&writer.id, WriterState::Pending, None);

        let task = DataSetWriterSubscription::new(
            writer.clone(),
            Arc::clone(&self.source),
            reporter,
            self.tx.clone(),
            cancel.clone(),
        )
        .with_backoff(self.config.backoff.clone())
        .with_undelivered(Arc::clone(&self.undelivered))
        .spawn();

        self.writers.insert(
            writer.id.clone(),
            WriterHandle {
                writer,
                cancel,
                task: Some(task),
            },
        );
    }

    /// Stops the given writers, flushes and drops them. The caller holds the
    /// membership lock.
    async fn remove_locked(&self, writer_ids: &[DataSetWriterId], reason: FlushReason) -> usize {
        let mut live = Vec::new();
        let mut tasks = Vec::new();

        for id in writer_ids {
            if let Some(mut handle) = self.writers.get_mut(id) {
                handle.cancel.cancel();
                if let Some(task) = handle.task.take() {
                    tasks.push(task);
                }
                live.push(id.clone());
            }
        }

        if live.is_empty() {
            return 0;
        }

        join_all(tasks).await;
        self.flush_now(reason).await;

        for id in &live {
            self.writers.remove(id);
            self.health.on_data_set_writer_removed(id);
        }

        info!(group_id = %self.group.id, removed = live.len(), "Writers removed");
        live.len()
    }
}

// =============================================================================
// WriterGroupEngine
// =============================================================================

/// Runs one writer group.
///
/// Cloning is cheap; clones share the same engine.
#[derive(Clone)]
pub struct WriterGroupEngine {
    inner: Arc<EngineInner>,
}

impl WriterGroupEngine {
    /// Creates a builder for `group`.
    pub fn builder(
        group: WriterGroup,
        source: Arc<dyn DataSetSource>,
        sink: Arc<dyn NetworkMessageSink>,
    ) -> WriterGroupEngineBuilder {
        WriterGroupEngineBuilder {
            group,
            source,
            sink,
            reporter: None,
            config: EngineConfig::default(),
        }
    }

    /// Returns the group id.
    pub fn group_id(&self) -> &WriterGroupId {
        &self.inner.group.id
    }

    /// Returns the group settings.
    pub fn group(&self) -> &WriterGroup {
        &self.inner.group
    }

    /// Returns the current cycle state.
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Returns `true` while the loop runs.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Returns the ids of the live writers, sorted.
    pub fn writer_ids(&self) -> Vec<DataSetWriterId> {
        let mut ids: Vec<_> = self.inner.writers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Returns the number of live writers.
    pub fn writer_count(&self) -> usize {
        self.inner.writers.len()
    }

    /// Returns the definition of a live writer.
    pub fn writer(&self, writer_id: &DataSetWriterId) -> Option<DataSetWriter> {
        self.inner.writers.get(writer_id).map(|h| h.writer.clone())
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> EngineStats {
        let c = &self.inner.counters;
        EngineStats {
            notifications_received: c.notifications_received.load(Ordering::Relaxed),
            notifications_flushed: c.notifications_flushed.load(Ordering::Relaxed),
            messages_published: c.messages_published.load(Ordering::Relaxed),
            keep_alives_published: c.keep_alives_published.load(Ordering::Relaxed),
            publish_failures: c.publish_failures.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            encoder: self.inner.encoder.stats(),
        }
    }

    /// Starts the collection loop.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::already_running(self.inner.group.id.as_str()));
        }

        *self.inner.last_publish.lock() = Instant::now();
        self.inner.health.activate();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run());
        *self.inner.loop_handle.lock() = Some(handle);

        Ok(())
    }

    /// Flushes pending notifications immediately. Returns how many were
    /// flushed.
    pub async fn flush(&self) -> usize {
        self.inner.flush_now(FlushReason::Manual).await
    }

    /// Adds writers. Writers of another group are rejected and disabled
    /// writers are not started; either is removed if live. A live id is
    /// replaced after its pending notifications are flushed.
    pub async fn add_writers(&self, writers: Vec<DataSetWriter>) -> Result<usize, EngineError> {
        let _membership = self.lock_membership().await?;

        let mut accepted: Vec<DataSetWriter> = Vec::new();
        let mut dropped = Vec::new();

        for writer in writers {
            if writer.writer_group_id != self.inner.group.id {
                let err = EngineError::group_mismatch(
                    writer.id.as_str(),
                    self.inner.group.id.as_str(),
                    writer.writer_group_id.as_str(),
                );
                warn!(writer_id = %writer.id, error = %err, "Rejecting writer");
                self.inner.health.reporter.on_data_set_writer_state_change(
                    &writer.id,
                    WriterState::Error,
                    Some(&err.to_string()),
                );
                if self.inner.writers.contains_key(&writer.id) {
                    dropped.push(writer.id);
                } else {
                    self.inner.health.reporter.on_data_set_writer_removed(&writer.id);
                }
                continue;
            }

            if !writer.enabled {
                debug!(writer_id = %writer.id, "Writer disabled");
                dropped.push(writer.id);
                continue;
            }

            match accepted.iter().position(|w| w.id == writer.id) {
                Some(index) => accepted[index] = writer,
                None => accepted.push(writer),
            }
        }

        let mut replaced: Vec<DataSetWriterId> = accepted
            .iter()
            .filter(|w| self.inner.writers.contains_key(&w.id))
            .map(|w| w.id.clone())
            .collect();
        replaced.extend(dropped);
        if !replaced.is_empty() {
            self.inner.remove_locked(&replaced, FlushReason::Removal).await;
        }

        let added = accepted.len();
        for writer in accepted {
            self.inner.spawn_writer(writer);
        }

        if added > 0 {
            info!(
                group_id = %self.inner.group.id,
                added,
                live = self.inner.writers.len(),
                "Writers added"
            );
        }
        Ok(added)
    }

    /// Removes writers. Returns once their pending notifications are
    /// published.
    pub async fn remove_writers(&self, writer_ids: Vec<DataSetWriterId>) -> Result<usize, EngineError> {
        let _membership = self.lock_membership().await?;
        Ok(self.inner.remove_locked(&writer_ids, FlushReason::Removal).await)
    }

    /// Takes the membership lock. Fails if shutdown started, including while
    /// waiting for the lock.
    async fn lock_membership(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, EngineError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        let guard = self.inner.membership.lock().await;
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        Ok(guard)
    }

    /// Stops every writer, stops the loop and publishes what is left.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(group_id = %self.inner.group.id, "Shutting down writer group");

        let _membership = self.inner.membership.lock().await;

        self.inner.writers_token.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .writers
            .iter_mut()
            .filter_map(|mut h| h.task.take())
            .collect();
        join_all(tasks).await;

        self.inner.loop_token.cancel();
        let loop_handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = loop_handle {
            if let Err(e) = handle.await {
                error!(group_id = %self.inner.group.id, error = %e, "Writer group loop panicked");
            }
        }

        let flushed = self.inner.flush_now(FlushReason::Shutdown).await;
        if flushed > 0 {
            debug!(group_id = %self.inner.group.id, flushed, "Flushed notifications after loop exit");
        }

        self.inner.writers.clear();
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.set_state(EngineState::Idle);
        self.inner.health.deactivate();

        let stats = self.stats();
        info!(
            group_id = %self.inner.group.id,
            messages_published = stats.messages_published,
            publish_failures = stats.publish_failures,
            "Writer group stopped"
        );
    }
}

#[async_trait]
impl WriterSetController for WriterGroupEngine {
    fn writer_group_id(&self) -> &WriterGroupId {
        self.group_id()
    }

    fn writer_ids(&self) -> Vec<DataSetWriterId> {
        WriterGroupEngine::writer_ids(self)
    }

    async fn add_writers(&self, writers: Vec<DataSetWriter>) -> Result<usize, EngineError> {
        WriterGroupEngine::add_writers(self, writers).await
    }

    async fn remove_writers(&self, writer_ids: Vec<DataSetWriterId>) -> Result<usize, EngineError> {
        WriterGroupEngine::remove_writers(self, writer_ids).await
    }
}

impl fmt::Debug for WriterGroupEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterGroupEngine")
            .field("group_id", &self.inner.group.id)
            .field("state", &self.state())
            .field("writers", &self.inner.writers.len())
            .field("source", &self.inner.source.name())
            .field("sink", &self.inner.sink.name())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`WriterGroupEngine`].
pub struct WriterGroupEngineBuilder {
    group: WriterGroup,
    source: Arc<dyn DataSetSource>,
    sink: Arc<dyn NetworkMessageSink>,
    reporter: Option<Arc<dyn StateReporter>>,
    config: EngineConfig,
}

impl WriterGroupEngineBuilder {
    /// Sets the state reporter.
    pub fn reporter(mut self, reporter: Arc<dyn StateReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine. Writers listed in the group are not started; pass
    /// them to [`WriterGroupEngine::add_writers`].
    pub fn build(self) -> WriterGroupEngine {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(opcpub_core::state::NoopStateReporter));
        let health = Arc::new(GroupHealth::new(self.group.id.clone(), reporter));
        health.transition(GroupState::Pending, None);

        WriterGroupEngine {
            inner: Arc::new(EngineInner {
                group: self.group,
                config: self.config,
                source: self.source,
                sink: self.sink,
                health,
                encoder: NetworkMessageEncoder::new(),
                writers: DashMap::new(),
                tx,
                undelivered: Undelivered::default(),
                collector: tokio::sync::Mutex::new(Collector {
                    rx,
                    pending: Vec::new(),
                }),
                yield_request: Notify::new(),
                membership: tokio::sync::Mutex::new(()),
                state: AtomicU8::new(EngineState::Idle as u8),
                running: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                writers_token: CancellationToken::new(),
                loop_token: CancellationToken::new(),
                loop_handle: Mutex::new(None),
                last_publish: Mutex::new(Instant::now()),
                counters: EngineCounters::default(),
            }),
        }
    }
}

impl fmt::Debug for WriterGroupEngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterGroupEngineBuilder")
            .field("group_id", &self.group.id)
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
