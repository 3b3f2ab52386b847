// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Registry loader.
//!
//! Keeps the engine's live writer set in line with the registry:
//!
//! ```text
//! on_data_set_writer_changed ─┐                    ┌─▶ RegistryClient (N parallel)
//! on_data_set_writer_removed ─┼─▶ dirty/removed ──▶│
//! on_writer_group_changed ────┘   + trigger        └─▶ remove_writers / add_writers
//! ```
//!
//! Change notifications only mark ids and arm a [`DebounceTrigger`]; the
//! background task drains the sets in one reconciliation pass. Failed
//! downloads go back into the dirty set and a retry pass is scheduled after
//! `retry_delay`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opcpub_core::error::RegistryError;
use opcpub_core::model::DataSetWriter;
use opcpub_core::trigger::DebounceTrigger;
use opcpub_core::types::DataSetWriterId;

use crate::engine::WriterSetController;
use crate::registry::RegistryClient;

// =============================================================================
// Configuration
// =============================================================================

/// Loader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Registry endpoint passed to the client.
    pub registry_endpoint: String,

    /// Debounce delay between the first change notification and the pass.
    #[serde(default = "default_debounce", with = "duration_millis")]
    pub debounce: Duration,

    /// Maximum number of parallel downloads.
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// Delay before failed downloads are retried.
    #[serde(default = "default_retry_delay", with = "duration_millis")]
    pub retry_delay: Duration,
}

fn default_debounce() -> Duration {
    Duration::from_millis(100)
}

fn default_download_concurrency() -> usize {
    8
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

impl LoaderConfig {
    /// Creates a configuration with default timings.
    pub fn new(registry_endpoint: impl Into<String>) -> Self {
        Self {
            registry_endpoint: registry_endpoint.into(),
            debounce: default_debounce(),
            download_concurrency: default_download_concurrency(),
            retry_delay: default_retry_delay(),
        }
    }

    /// Fast timings for tests.
    pub fn for_testing() -> Self {
        Self {
            registry_endpoint: "memory://registry".to_string(),
            debounce: Duration::from_millis(10),
            download_concurrency: 4,
            retry_delay: Duration::from_millis(20),
        }
    }
}

// =============================================================================
// Load state
// =============================================================================

/// Outcome of the last download of one writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadState {
    /// The writer was downloaded and applied.
    Loaded {
        /// When it was applied.
        timestamp: DateTime<Utc>,
    },
    /// The last attempt failed.
    Failed {
        /// Why it failed.
        error: String,
        /// When it failed.
        failed_at: DateTime<Utc>,
    },
}

impl LoadState {
    fn loaded() -> Self {
        LoadState::Loaded { timestamp: Utc::now() }
    }

    fn failed(error: impl Into<String>) -> Self {
        LoadState::Failed {
            error: error.into(),
            failed_at: Utc::now(),
        }
    }

    /// Returns `true` for `Loaded`.
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded { .. })
    }

    /// Returns the error message of a failed load.
    pub fn error(&self) -> Option<&str> {
        match self {
            LoadState::Failed { error, .. } => Some(error),
            LoadState::Loaded { .. } => None,
        }
    }
}

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Successful downloads.
    pub downloaded: usize,
    /// Failed downloads.
    pub failed: usize,
    /// Failed downloads put back into the dirty set.
    pub requeued: usize,
    /// Writers that became live.
    pub added: usize,
    /// Writers that were live and got removed.
    pub removed: usize,
    /// Writers rejected because they belong to another group.
    pub rejected: usize,
}

#[derive(Debug, Default)]
struct PendingChanges {
    dirty: HashSet<DataSetWriterId>,
    removed: HashSet<DataSetWriterId>,
}

// =============================================================================
// WriterRegistryLoader
// =============================================================================

struct LoaderInner {
    config: LoaderConfig,
    registry: Arc<dyn RegistryClient>,
    controller: Arc<dyn WriterSetController>,
    pending: Mutex<PendingChanges>,
    trigger: DebounceTrigger,
    load_state: DashMap<DataSetWriterId, LoadState>,
    pass_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    retry_scheduled: AtomicBool,
    passes: AtomicU64,
}

/// Debounced reconciliation between the registry and one writer group.
#[derive(Clone)]
pub struct WriterRegistryLoader {
    inner: Arc<LoaderInner>,
}

impl WriterRegistryLoader {
    /// Creates a loader feeding `controller`.
    pub fn new(
        config: LoaderConfig,
        registry: Arc<dyn RegistryClient>,
        controller: Arc<dyn WriterSetController>,
    ) -> Self {
        let trigger = DebounceTrigger::new(config.debounce);
        Self {
            inner: Arc::new(LoaderInner {
                config,
                registry,
                controller,
                pending: Mutex::new(PendingChanges::default()),
                trigger,
                load_state: DashMap::new(),
                pass_lock: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
                retry_scheduled: AtomicBool::new(false),
                passes: AtomicU64::new(0),
            }),
        }
    }

    /// Marks a writer as changed and schedules a pass.
    pub fn on_data_set_writer_changed(&self, writer_id: impl Into<DataSetWriterId>) {
        let writer_id = writer_id.into();
        {
            let mut pending = self.inner.pending.lock();
            pending.removed.remove(&writer_id);
            pending.dirty.insert(writer_id);
        }
        self.inner.trigger.trigger();
    }

    /// Marks a writer as removed and schedules a pass.
    pub fn on_data_set_writer_removed(&self, writer_id: impl Into<DataSetWriterId>) {
        let writer_id = writer_id.into();
        {
            let mut pending = self.inner.pending.lock();
            pending.dirty.remove(&writer_id);
            pending.removed.insert(writer_id);
        }
        self.inner.trigger.trigger();
    }

    /// Marks every known writer as changed.
    pub fn on_writer_group_changed(&self) {
        let mut known: HashSet<DataSetWriterId> =
            self.inner.controller.writer_ids().into_iter().collect();
        known.extend(self.inner.load_state.iter().map(|e| e.key().clone()));

        debug!(writers = known.len(), "Writer group changed, resyncing all writers");
        {
            let mut pending = self.inner.pending.lock();
            for id in known {
                if !pending.removed.contains(&id) {
                    pending.dirty.insert(id);
                }
            }
        }
        self.inner.trigger.trigger();
    }

    /// Seeds the dirty set and starts the background task.
    pub fn start(&self, seed: impl IntoIterator<Item = DataSetWriterId>) {
        let mut task = self.inner.task.lock();
        if task.is_some() || self.inner.cancel.is_cancelled() {
            warn!("Registry loader already started");
            return;
        }

        let seeded = {
            let mut pending = self.inner.pending.lock();
            pending.dirty.extend(seed);
            pending.dirty.len()
        };

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run()));
        drop(task);

        info!(
            group_id = %self.inner.controller.writer_group_id(),
            endpoint = %self.inner.config.registry_endpoint,
            seeded,
            "Registry loader started"
        );

        if seeded > 0 {
            self.inner.trigger.trigger();
        }
    }

    /// Runs one reconciliation pass now.
    pub async fn reconcile(&self) -> ReconcileReport {
        self.inner.reconcile().await
    }

    /// Returns a copy of the load state map.
    pub fn load_state(&self) -> HashMap<DataSetWriterId, LoadState> {
        self.inner
            .load_state
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Returns the load state of one writer.
    pub fn load_state_of(&self, writer_id: &DataSetWriterId) -> Option<LoadState> {
        self.inner.load_state.get(writer_id).map(|e| e.value().clone())
    }

    /// Returns the number of ids waiting for the next pass.
    pub fn pending_count(&self) -> usize {
        let pending = self.inner.pending.lock();
        pending.dirty.len() + pending.removed.len()
    }

    /// Returns the number of passes that had work to do.
    pub fn pass_count(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    /// Cancels the pending wait and waits for an in-flight pass.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Registry loader task panicked");
            }
        }
        info!("Registry loader stopped");
    }
}

impl std::fmt::Debug for WriterRegistryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterRegistryLoader")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry.name())
            .field("pending", &self.pending_count())
            .field("passes", &self.pass_count())
            .finish()
    }
}

impl LoaderInner {
    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.trigger.wait() => {}
            }

            let report = self.reconcile().await;
            if report.requeued > 0 {
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        if self.retry_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(inner.config.retry_delay) => {
                    inner.retry_scheduled.store(false, Ordering::SeqCst);
                    inner.trigger.trigger();
                }
            }
        });
    }

    fn requeue_dirty(&self, ids: impl IntoIterator<Item = DataSetWriterId>) {
        let mut pending = self.pending.lock();
        for id in ids {
            if !pending.removed.contains(&id) {
                pending.dirty.insert(id);
            }
        }
    }

    fn requeue_removed(&self, ids: impl IntoIterator<Item = DataSetWriterId>) {
        let mut pending = self.pending.lock();
        for id in ids {
            if !pending.dirty.contains(&id) {
                pending.removed.insert(id);
            }
        }
    }

    async fn reconcile(&self) -> ReconcileReport {
        let _pass = self.pass_lock.lock().await;

        let (dirty, removed) = {
            let mut pending = self.pending.lock();
            (
                std::mem::take(&mut pending.dirty),
                std::mem::take(&mut pending.removed),
            )
        };

        let mut report = ReconcileReport::default();
        if dirty.is_empty() && removed.is_empty() {
            return report;
        }
        self.passes.fetch_add(1, Ordering::Relaxed);

        debug!(dirty = dirty.len(), removed = removed.len(), "Reconciling writers");

        let registry = Arc::clone(&self.registry);
        let endpoint = self.config.registry_endpoint.clone();
        let downloads: Vec<(DataSetWriterId, Result<DataSetWriter, RegistryError>)> =
            stream::iter(dirty)
                .map(move |id| {
                    let registry = Arc::clone(&registry);
                    let endpoint = endpoint.clone();
                    async move {
                        let result = registry.get_data_set_writer(&endpoint, &id).await;
                        (id, result)
                    }
                })
                .buffer_unordered(self.config.download_concurrency.max(1))
                .collect()
                .await;

        let group_id = self.controller.writer_group_id().clone();
        let mut to_add = Vec::new();
        let mut to_remove: Vec<DataSetWriterId> = removed.iter().cloned().collect();
        let mut retry = Vec::new();

        for (id, result) in downloads {
            match result {
                Ok(writer) if writer.writer_group_id != group_id => {
                    report.rejected += 1;
                    let message = format!(
                        "writer belongs to group '{}', expected '{}'",
                        writer.writer_group_id, group_id
                    );
                    warn!(writer_id = %id, reason = %message, "Rejecting downloaded writer");
                    self.load_state.insert(id.clone(), LoadState::failed(message));
                    to_remove.push(id);
                }
                Ok(writer) if !writer.enabled => {
                    report.downloaded += 1;
                    debug!(writer_id = %id, "Downloaded writer is disabled");
                    self.load_state.insert(id.clone(), LoadState::loaded());
                    to_remove.push(id);
                }
                Ok(writer) => {
                    report.downloaded += 1;
                    to_add.push(writer);
                }
                Err(RegistryError::NotFound { .. }) => {
                    report.failed += 1;
                    warn!(writer_id = %id, "Writer not found in registry, removing");
                    self.load_state
                        .insert(id.clone(), LoadState::failed("writer not found in registry"));
                    to_remove.push(id);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        writer_id = %id,
                        error = %e,
                        error_type = e.error_type(),
                        "Failed to download writer"
                    );
                    self.load_state.insert(id.clone(), LoadState::failed(e.to_string()));
                    retry.push(id);
                }
            }
        }

        report.requeued = retry.len();
        self.requeue_dirty(retry);

        if !to_remove.is_empty() {
            match self.controller.remove_writers(to_remove).await {
                Ok(count) => {
                    report.removed = count;
                    for id in &removed {
                        self.load_state.remove(id);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to remove writers");
                    self.requeue_removed(removed);
                }
            }
        }

        if !to_add.is_empty() {
            let ids: Vec<DataSetWriterId> = to_add.iter().map(|w| w.id.clone()).collect();
            match self.controller.add_writers(to_add).await {
                Ok(count) => {
                    report.added = count;
                    for id in ids {
                        self.load_state.insert(id, LoadState::loaded());
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to add writers");
                    for id in &ids {
                        self.load_state.insert(id.clone(), LoadState::failed(e.to_string()));
                    }
                    report.requeued += ids.len();
                    self.requeue_dirty(ids);
                }
            }
        }

        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            added = report.added,
            removed = report.removed,
            rejected = report.rejected,
            "Reconciliation pass complete"
        );

        report
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opcpub_core::error::EngineError;
    use opcpub_core::types::WriterGroupId;

    use crate::registry::InMemoryRegistry;

    struct RecordingController {
        group_id: WriterGroupId,
        live: Mutex<Vec<DataSetWriterId>>,
        add_calls: Mutex<Vec<Vec<DataSetWriterId>>>,
        remove_calls: Mutex<Vec<Vec<DataSetWriterId>>>,
    }

    impl RecordingController {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                group_id: WriterGroupId::new("g1"),
                live: Mutex::new(Vec::new()),
                add_calls: Mutex::new(Vec::new()),
                remove_calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WriterSetController for RecordingController {
        fn writer_group_id(&self) -> &WriterGroupId {
            &self.group_id
        }

        fn writer_ids(&self) -> Vec<DataSetWriterId> {
            self.live.lock().clone()
        }

        async fn add_writers(&self, writers: Vec<DataSetWriter>) -> Result<usize, EngineError> {
            let ids: Vec<_> = writers.into_iter().map(|w| w.id).collect();
            let mut live = self.live.lock();
            for id in &ids {
                if !live.contains(id) {
                    live.push(id.clone());
                }
            }
            self.add_calls.lock().push(ids.clone());
            Ok(ids.len())
        }

        async fn remove_writers(&self, ids: Vec<DataSetWriterId>) -> Result<usize, EngineError> {
            let mut live = self.live.lock();
            let before = live.len();
            live.retain(|id| !ids.contains(id));
            self.remove_calls.lock().push(ids);
            Ok(before - live.len())
        }
    }

    fn writer(id: &str) -> DataSetWriter {
        DataSetWriter::new(id, "g1", "opc.tcp://plc")
    }

    fn loader(
        registry: Arc<InMemoryRegistry>,
        controller: Arc<RecordingController>,
    ) -> WriterRegistryLoader {
        WriterRegistryLoader::new(LoaderConfig::for_testing(), registry, controller)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_burst_of_changes_downloads_once() {
        let registry = Arc::new(InMemoryRegistry::with_writers([writer("w1")]));
        let controller = RecordingController::new();
        let loader = loader(registry.clone(), controller.clone());
        loader.start(Vec::new());

        for _ in 0..20 {
            loader.on_data_set_writer_changed("w1");
        }

        eventually(|| controller.add_calls.lock().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.request_count(&"w1".into()), 1);
        assert_eq!(controller.add_calls.lock().len(), 1);
        assert_eq!(loader.pass_count(), 1);

        loader.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_download_is_requeued_until_success() {
        let registry = Arc::new(InMemoryRegistry::with_writers([writer("w1"), writer("w2")]));
        registry.fail_next("w1", 2);
        let controller = RecordingController::new();
        let loader = loader(registry.clone(), controller.clone());

        loader.on_data_set_writer_changed("w1");
        loader.on_data_set_writer_changed("w2");

        let first = loader.reconcile().await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.added, 1);
        assert!(loader.load_state_of(&"w1".into()).unwrap().error().is_some());
        assert!(loader.load_state_of(&"w2".into()).unwrap().is_loaded());

        let second = loader.reconcile().await;
        assert_eq!(second.failed, 1);
        assert!(!loader.load_state_of(&"w1".into()).unwrap().is_loaded());

        let third = loader.reconcile().await;
        assert_eq!(third.added, 1);
        assert!(loader.load_state_of(&"w1".into()).unwrap().is_loaded());

        let w1_adds = controller
            .add_calls
            .lock()
            .iter()
            .filter(|call| call.contains(&"w1".into()))
            .count();
        assert_eq!(w1_adds, 1);
        assert_eq!(registry.request_count(&"w1".into()), 3);
        assert_eq!(loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_pass_is_scheduled() {
        let registry = Arc::new(InMemoryRegistry::with_writers([writer("w1")]));
        registry.fail_next("w1", 2);
        let controller = RecordingController::new();
        let loader = loader(registry.clone(), controller.clone());

        loader.start(vec!["w1".into()]);

        eventually(|| loader.load_state_of(&"w1".into()).is_some_and(|s| s.is_loaded())).await;
        assert_eq!(registry.request_count(&"w1".into()), 3);
        assert_eq!(controller.add_calls.lock().len(), 1);

        loader.shutdown().await;
    }

    #[tokio::test]
    async fn test_removal_cancels_pending_change() {
        let registry = Arc::new(InMemoryRegistry::with_writers([writer("w1")]));
        let controller = RecordingController::new();
        let loader = loader(registry.clone(), controller.clone());

        loader.on_data_set_writer_changed("w1");
        loader.on_data_set_writer_removed("w1");
        let report = loader.reconcile().await;

        assert_eq!(registry.total_requests(), 0);
        assert!(controller.add_calls.lock().is_empty());
        assert_eq!(
            controller.remove_calls.lock().clone(),
            vec![vec![DataSetWriterId::new("w1")]]
        );
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn test_foreign_and_disabled_writers_are_removed() {
        let registry = Arc::new(InMemoryRegistry::with_writers([
            DataSetWriter::new("w1", "other", "opc.tcp://plc"),
            writer("w2").with_enabled(false),
        ]));
        let controller = RecordingController::new();
        controller.live.lock().push("w2".into());
        let loader = loader(registry, controller.clone());

        loader.on_data_set_writer_changed("w1");
        loader.on_data_set_writer_changed("w2");
        let report = loader.reconcile().await;

        assert_eq!(report.rejected, 1);
        assert_eq!(report.removed, 1);
        assert!(controller.add_calls.lock().is_empty());
        assert!(controller.live.lock().is_empty());
        assert!(loader
            .load_state_of(&"w1".into())
            .unwrap()
            .error()
            .unwrap()
            .contains("other"));
    }

    #[tokio::test]
    async fn test_no_add_call_without_successful_download() {
        let registry = Arc::new(InMemoryRegistry::new());
        let controller = RecordingController::new();
        let loader = loader(registry, controller.clone());

        loader.on_data_set_writer_changed("ghost");
        let report = loader.reconcile().await;

        assert_eq!(report.failed, 1);
        assert!(controller.add_calls.lock().is_empty());
        assert_eq!(loader.pending_count(), 0);
        assert!(loader.load_state_of(&"ghost".into()).unwrap().error().is_some());
    }

    #[tokio::test]
    async fn test_group_change_resyncs_loaded_writers() {
        let registry = Arc::new(InMemoryRegistry::with_writers([writer("w1"), writer("w2")]));
        let controller = RecordingController::new();
        let loader = loader(registry.clone(), controller.clone());

        loader.on_data_set_writer_changed("w1");
        loader.on_data_set_writer_changed("w2");
        loader.reconcile().await;

        loader.on_writer_group_changed();
        assert_eq!(loader.pending_count(), 2);
        loader.reconcile().await;

        assert_eq!(registry.total_requests(), 4);
    }

    #[test]
    fn test_load_state_serialization() {
        let state = LoadState::failed("boom");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
