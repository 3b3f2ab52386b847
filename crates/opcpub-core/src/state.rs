// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Item, writer and group state reporting.
//!
//! The data path reports every observed state transition synchronously
//! through a [`StateReporter`]. Reporters are write-only from the data path's
//! point of view; status-query callers read the last known values from a
//! [`StatusRegistry`].
//!
//! ```text
//!                            ┌──────────────────────┐
//!  writer subscription ──┐   │ CompositeStateReporter│──▶ StatusRegistry (DashMap, last value wins)
//!  writer group engine ──┼──▶│                      │──▶ TracingStateReporter
//!  registry loader     ──┘   └──────────────────────┘──▶ ...
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──▶ Activated ──▶ Connected ──▶ Error / Disconnected
//!                                 ▲               │
//!                                 └───────────────┘ (reconnect)
//! ```
//!
//! Groups additionally move through `Publishing` and `Degraded`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::{DataSetWriterId, WriterGroupId};

// =============================================================================
// States
// =============================================================================

/// State of a single published variable or event item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Configured but not yet subscribed.
    Pending,
    /// Subscription created.
    Activated,
    /// Receiving good values.
    Connected,
    /// The item reported an error.
    Error,
    /// The item is no longer monitored.
    Disconnected,
}

/// State of a data-set writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterState {
    /// Added, subscription not yet started.
    Pending,
    /// Subscription is being established.
    Activated,
    /// Subscription is live.
    Connected,
    /// Subscription failed; the writer is reconnecting.
    Error,
    /// Writer removed or stopped.
    Disconnected,
}

/// State of a writer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Created, not started.
    Pending,
    /// Collection loop started.
    Activated,
    /// Network messages are being published.
    Publishing,
    /// At least one writer is in error; others keep publishing.
    Degraded,
    /// Publishing to the sink failed.
    Error,
    /// The group has been shut down.
    Disconnected,
}

macro_rules! impl_state_display {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the state name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_state_display!(ItemState {
    Pending => "pending",
    Activated => "activated",
    Connected => "connected",
    Error => "error",
    Disconnected => "disconnected",
});

impl_state_display!(WriterState {
    Pending => "pending",
    Activated => "activated",
    Connected => "connected",
    Error => "error",
    Disconnected => "disconnected",
});

impl_state_display!(GroupState {
    Pending => "pending",
    Activated => "activated",
    Publishing => "publishing",
    Degraded => "degraded",
    Error => "error",
    Disconnected => "disconnected",
});

impl WriterState {
    /// Returns `true` if the writer needs attention.
    pub fn is_error(&self) -> bool {
        matches!(self, WriterState::Error)
    }
}

// =============================================================================
// StateReporter
// =============================================================================

/// Receives state transitions from the data path.
///
/// Calls are made synchronously on the hot path and must not block.
pub trait StateReporter: Send + Sync {
    /// Returns the reporter name for logging.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// A published variable or event item changed state.
    fn on_data_set_variable_state_change(
        &self,
        writer_id: &DataSetWriterId,
        node_id: &str,
        state: ItemState,
        reason: Option<&str>,
    );

    /// A data-set writer changed state.
    fn on_data_set_writer_state_change(
        &self,
        writer_id: &DataSetWriterId,
        state: WriterState,
        reason: Option<&str>,
    );

    /// A writer group changed state.
    fn on_writer_group_state_change(
        &self,
        group_id: &WriterGroupId,
        state: GroupState,
        reason: Option<&str>,
    );

    /// A data-set writer left the group, either removed or rejected. No
    /// further transitions follow for it until it is added again.
    fn on_data_set_writer_removed(&self, _writer_id: &DataSetWriterId) {}
}

/// A reporter that discards every transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStateReporter;

impl StateReporter for NoopStateReporter {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_data_set_variable_state_change(
        &self,
        _writer_id: &DataSetWriterId,
        _node_id: &str,
        _state: ItemState,
        _reason: Option<&str>,
    ) {
    }

    fn on_data_set_writer_state_change(
        &self,
        _writer_id: &DataSetWriterId,
        _state: WriterState,
        _reason: Option<&str>,
    ) {
    }

    fn on_writer_group_state_change(
        &self,
        _group_id: &WriterGroupId,
        _state: GroupState,
        _reason: Option<&str>,
    ) {
    }
}

// =============================================================================
// StatusRegistry
// =============================================================================

/// The last reported state of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry<S> {
    /// Reported state.
    pub state: S,
    /// Optional reason (usually an error message).
    pub reason: Option<String>,
    /// When the state was reported.
    pub updated_at: DateTime<Utc>,
}

impl<S> StatusEntry<S> {
    fn new(state: S, reason: Option<&str>) -> Self {
        Self {
            state,
            reason: reason.map(str::to_string),
            updated_at: Utc::now(),
        }
    }
}

/// State of one item as returned in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    /// Owning writer.
    pub writer_id: DataSetWriterId,
    /// Item node id.
    pub node_id: String,
    /// Last reported status.
    #[serde(flatten)]
    pub status: StatusEntry<ItemState>,
}

/// Point-in-time copy of every known state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Group states.
    pub groups: Vec<(WriterGroupId, StatusEntry<GroupState>)>,
    /// Writer states.
    pub writers: Vec<(DataSetWriterId, StatusEntry<WriterState>)>,
    /// Item states.
    pub items: Vec<ItemStatus>,
}

/// Holds the most recent state per id and serves status queries.
///
/// Concurrent writers never block each other; the last write for an id wins.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    groups: DashMap<WriterGroupId, StatusEntry<GroupState>>,
    writers: DashMap<DataSetWriterId, StatusEntry<WriterState>>,
    items: DashMap<(DataSetWriterId, String), StatusEntry<ItemState>>,
}

impl StatusRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last reported state of a group.
    pub fn group_state(&self, group_id: &WriterGroupId) -> Option<GroupState> {
        self.groups.get(group_id).map(|e| e.state)
    }

    /// Returns the last reported status of a group.
    pub fn group_status(&self, group_id: &WriterGroupId) -> Option<StatusEntry<GroupState>> {
        self.groups.get(group_id).map(|e| e.value().clone())
    }

    /// Returns the last reported state of a writer.
    pub fn writer_state(&self, writer_id: &DataSetWriterId) -> Option<WriterState> {
        self.writers.get(writer_id).map(|e| e.state)
    }

    /// Returns the last reported status of a writer.
    pub fn writer_status(&self, writer_id: &DataSetWriterId) -> Option<StatusEntry<WriterState>> {
        self.writers.get(writer_id).map(|e| e.value().clone())
    }

    /// Returns the last reported state of an item.
    pub fn item_state(&self, writer_id: &DataSetWriterId, node_id: &str) -> Option<ItemState> {
        self.items
            .get(&(writer_id.clone(), node_id.to_string()))
            .map(|e| e.state)
    }

    /// Returns the ids of writers whose last state is `Error`.
    pub fn writers_in_error(&self) -> Vec<DataSetWriterId> {
        self.writers
            .iter()
            .filter(|e| e.state.is_error())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Forgets a writer and all of its items.
    pub fn forget_writer(&self, writer_id: &DataSetWriterId) {
        self.writers.remove(writer_id);
        self.items.retain(|(w, _), _| w != writer_id);
    }

    /// Returns a copy of every known state.
    pub fn snapshot(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot {
            groups: self
                .groups
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            writers: self
                .writers
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            items: self
                .items
                .iter()
                .map(|e| ItemStatus {
                    writer_id: e.key().0.clone(),
                    node_id: e.key().1.clone(),
                    status: e.value().clone(),
                })
                .collect(),
        };
        snapshot.groups.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot.writers.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
            .items
            .sort_by(|a, b| (&a.writer_id, &a.node_id).cmp(&(&b.writer_id, &b.node_id)));
        snapshot
    }
}

impl StateReporter for StatusRegistry {
    fn name(&self) -> &str {
        "status_registry"
    }

    fn on_data_set_variable_state_change(
        &self,
        writer_id: &DataSetWriterId,
        node_id: &str,
        state: ItemState,
        reason: Option<&str>,
    ) {
        self.items.insert(
            (writer_id.clone(), node_id.to_string()),
            StatusEntry::new(state, reason),
        );
    }

    fn on_data_set_writer_state_change(
        &self,
        writer_id: &DataSetWriterId,
        state: WriterState,
        reason: Option<&str>,
    ) {
        self.writers
            .insert(writer_id.clone(), StatusEntry::new(state, reason));
    }

    fn on_writer_group_state_change(
        &self,
        group_id: &WriterGroupId,
        state: GroupState,
        reason: Option<&str>,
    ) {
        self.groups
            .insert(group_id.clone(), StatusEntry::new(state, reason));
    }

    fn on_data_set_writer_removed(&self, writer_id: &DataSetWriterId) {
        self.forget_writer(writer_id);
    }
}

// =============================================================================
// TracingStateReporter
// =============================================================================

/// Logs state transitions through `tracing`.
///
/// Error states are logged at `warn`, everything else at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStateReporter;

impl TracingStateReporter {
    /// Creates a new tracing reporter.
    pub fn new() -> Self {
        Self
    }
}

impl StateReporter for TracingStateReporter {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_data_set_variable_state_change(
        &self,
        writer_id: &DataSetWriterId,
        node_id: &str,
        state: ItemState,
        reason: Option<&str>,
    ) {
        if state == ItemState::Error {
            tracing::warn!(writer_id = %writer_id, node_id, state = %state, reason, "Item state changed");
        } else {
            tracing::debug!(writer_id = %writer_id, node_id, state = %state, reason, "Item state changed");
        }
    }

    fn on_data_set_writer_state_change(
        &self,
        writer_id: &DataSetWriterId,
        state: WriterState,
        reason: Option<&str>,
    ) {
        if state == WriterState::Error {
            tracing::warn!(writer_id = %writer_id, state = %state, reason, "Writer state changed");
        } else {
            tracing::debug!(writer_id = %writer_id, state = %state, reason, "Writer state changed");
        }
    }

    fn on_writer_group_state_change(
        &self,
        group_id: &WriterGroupId,
        state: GroupState,
        reason: Option<&str>,
    ) {
        match state {
            GroupState::Error | GroupState::Degraded => {
                tracing::warn!(group_id = %group_id, state = %state, reason, "Writer group state changed")
            }
            _ => {
                tracing::info!(group_id = %group_id, state = %state, reason, "Writer group state changed")
            }
        }
    }

    fn on_data_set_writer_removed(&self, writer_id: &DataSetWriterId) {
        tracing::debug!(writer_id = %writer_id, "Writer removed from status");
    }
}

// =============================================================================
// CompositeStateReporter
// =============================================================================

/// Fans every transition out to several reporters.
pub struct CompositeStateReporter {
    reporters: RwLock<Vec<Arc<dyn StateReporter>>>,
}

impl CompositeStateReporter {
    /// Creates an empty composite reporter.
    pub fn new() -> Self {
        Self {
            reporters: RwLock::new(Vec::new()),
        }
    }

    /// Creates a composite from a list of reporters.
    pub fn with_reporters(reporters: Vec<Arc<dyn StateReporter>>) -> Self {
        Self {
            reporters: RwLock::new(reporters),
        }
    }

    /// Registers a reporter.
    pub fn register(&self, reporter: Arc<dyn StateReporter>) {
        self.reporters.write().push(reporter);
    }

    /// Returns the number of registered reporters.
    pub fn reporter_count(&self) -> usize {
        self.reporters.read().len()
    }

    fn each(&self, f: impl Fn(&dyn StateReporter)) {
        let reporters = self.reporters.read().clone();
        for reporter in reporters {
            f(reporter.as_ref());
        }
    }
}

impl Default for CompositeStateReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompositeStateReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reporters = self.reporters.read();
        let names: Vec<_> = reporters.iter().map(|r| r.name().to_string()).collect();
        f.debug_struct("CompositeStateReporter")
            .field("reporters", &names)
            .finish()
    }
}

impl StateReporter for CompositeStateReporter {
    fn name(&self) -> &str {
        "composite"
    }

    fn on_data_set_variable_state_change(
        &self,
        writer_id: &DataSetWriterId,
        node_id: &str,
        state: ItemState,
        reason: Option<&str>,
    ) {
        self.each(|r| r.on_data_set_variable_state_change(writer_id, node_id, state, reason));
    }

    fn on_data_set_writer_state_change(
        &self,
        writer_id: &DataSetWriterId,
        state: WriterState,
        reason: Option<&str>,
    ) {
        self.each(|r| r.on_data_set_writer_state_change(writer_id, state, reason));
    }

    fn on_writer_group_state_change(
        &self,
        group_id: &WriterGroupId,
        state: GroupState,
        reason: Option<&str>,
    ) {
        self.each(|r| r.on_writer_group_state_change(group_id, state, reason));
    }

    fn on_data_set_writer_removed(&self, writer_id: &DataSetWriterId) {
        self.each(|r| r.on_data_set_writer_removed(writer_id));
    }
}

// =============================================================================
// Tests
// =============================================================================
