// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publisher runtime orchestration.
//!
//! Wires configuration into running components in this order:
//!
//! 1. state reporters (status registry + tracing)
//! 2. sink
//! 3. source
//! 4. writer-group engine
//! 5. registry client and registry loader (seeded with the configured writers)
//! 6. background tasks: configuration watcher, status logger
//!
//! Shutdown runs in reverse: background tasks, loader, engine (final flush).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opcpub_config::{
    ConfigLoader, ConfigWatcher, PublisherConfig, RegistryKind, SinkConfig, SinkKind, SourceConfig,
    SourceKind,
};
use opcpub_core::model::DataSetWriter;
use opcpub_core::state::{CompositeStateReporter, StateReporter, StatusRegistry, TracingStateReporter};
use opcpub_core::types::DataSetWriterId;
use opcpub_engine::{
    DataSetSource, HttpMessageSink, HttpRegistryClient, InMemoryRegistry, LoggingSink,
    NetworkMessageSink, RegistryClient, SimulatedSource, WriterGroupEngine, WriterRegistryLoader,
};

use crate::error::{BinError, BinResult};
use crate::shutdown::{ShutdownCoordinator, ShutdownGuard};

// =============================================================================
// PublisherRuntime
// =============================================================================

/// Owns the configuration and runs the publisher until shutdown.
pub struct PublisherRuntime {
    config: PublisherConfig,
    config_path: Option<PathBuf>,
    shutdown: ShutdownCoordinator,
    watch_interval: Option<Duration>,
    status_interval: Option<Duration>,
}

impl PublisherRuntime {
    /// Creates a runtime for `config`.
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            config_path: None,
            shutdown: ShutdownCoordinator::new(),
            watch_interval: None,
            status_interval: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Runs until an OS signal or a manual shutdown request.
    pub async fn run(self) -> BinResult<()> {
        info!(version = crate::VERSION, "Starting opcpub publisher");

        let publisher = self.start()?;
        info!(
            writer_group = %self.config.writer_group.id,
            encoding = %self.config.writer_group.encoding,
            schema = %self.config.writer_group.schema,
            "Publisher is ready"
        );

        self.shutdown.wait_for_shutdown().await;
        info!("Shutdown initiated, cleaning up...");

        publisher.stop().await;
        info!("Publisher shutdown complete");
        Ok(())
    }

    /// Builds and starts every component. Must be called inside a Tokio runtime.
    pub fn start(&self) -> BinResult<RunningPublisher> {
        let config = &self.config;

        let status = Arc::new(StatusRegistry::new());
        let reporter: Arc<dyn StateReporter> = Arc::new(CompositeStateReporter::with_reporters(vec![
            status.clone() as Arc<dyn StateReporter>,
            Arc::new(TracingStateReporter::new()),
        ]));

        let sink = build_sink(&config.sink)?;
        let source = build_source(&config.source);

        let engine = WriterGroupEngine::builder(config.writer_group_model(), source, sink)
            .reporter(reporter)
            .config(config.engine_config())
            .build();
        engine.start()?;

        let (registry, memory_registry) = build_registry(config)?;
        let loader =
            WriterRegistryLoader::new(config.loader_config(), registry, Arc::new(engine.clone()));
        loader.start(config.seed_writer_ids());

        let cancel = self.shutdown.child_token();
        let mut tasks = Vec::new();

        if let (Some(path), Some(interval)) = (&self.config_path, self.watch_interval) {
            tasks.push(spawn_config_watcher(
                path.clone(),
                interval,
                config.clone(),
                loader.clone(),
                memory_registry.clone(),
                self.shutdown.clone(),
                cancel.clone(),
            ));
        }

        if let Some(interval) = self.status_interval {
            tasks.push(spawn_status_logger(
                interval,
                engine.clone(),
                status.clone(),
                cancel.clone(),
            ));
        }

        Ok(RunningPublisher {
            engine,
            loader,
            status,
            memory_registry,
            cancel,
            tasks,
        })
    }
}

impl std::fmt::Debug for PublisherRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRuntime")
            .field("writer_group", &self.config.writer_group.id)
            .field("config_path", &self.config_path)
            .field("watch_interval", &self.watch_interval)
            .field("status_interval", &self.status_interval)
            .finish()
    }
}

// =============================================================================
// RunningPublisher
// =============================================================================

/// Handles of a started publisher.
pub struct RunningPublisher {
    /// The writer-group engine.
    pub engine: WriterGroupEngine,
    /// The registry loader feeding the engine.
    pub loader: WriterRegistryLoader,
    /// Last-known states of the group, its writers and items.
    pub status: Arc<StatusRegistry>,
    memory_registry: Option<Arc<InMemoryRegistry>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningPublisher {
    /// Returns the in-memory registry when writers come from the configuration.
    pub fn memory_registry(&self) -> Option<&Arc<InMemoryRegistry>> {
        self.memory_registry.as_ref()
    }

    /// Stops background tasks, the loader and the engine, in that order.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task panicked");
            }
        }

        self.loader.shutdown().await;
        self.engine.shutdown().await;

        let stats = self.engine.stats();
        info!(
            notifications_received = stats.notifications_received,
            messages_published = stats.messages_published,
            keep_alives_published = stats.keep_alives_published,
            publish_failures = stats.publish_failures,
            notifications_dropped = stats.encoder.notifications_dropped,
            "Final publisher statistics"
        );
    }
}

// =============================================================================
// Component Factories
// =============================================================================

/// Creates the configured sink.
pub fn build_sink(config: &SinkConfig) -> BinResult<Arc<dyn NetworkMessageSink>> {
    match config.kind {
        SinkKind::Logging => {
            info!(log_payloads = config.log_payloads, "Using logging sink");
            Ok(Arc::new(LoggingSink::new().with_payload(config.log_payloads)))
        }
        SinkKind::Http => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| BinError::config("sink.url is required for the http sink"))?;
            info!(url, "Using HTTP sink");
            Ok(Arc::new(HttpMessageSink::new(url, config.timeout())?))
        }
    }
}

/// Creates the configured source.
pub fn build_source(config: &SourceConfig) -> Arc<dyn DataSetSource> {
    match config.kind {
        SourceKind::Simulated => Arc::new(
            SimulatedSource::new(config.default_interval()).with_event_every(config.event_every),
        ),
    }
}

/// Creates the registry client. The in-memory registry is also returned so
/// configuration reloads can update it.
pub fn build_registry(
    config: &PublisherConfig,
) -> BinResult<(Arc<dyn RegistryClient>, Option<Arc<InMemoryRegistry>>)> {
    match config.registry.kind {
        RegistryKind::Memory => {
            let registry = Arc::new(InMemoryRegistry::with_writers(config.all_writers().cloned()));
            info!(writers = registry.len(), "Using in-memory registry");
            Ok((registry.clone(), Some(registry)))
        }
        RegistryKind::Http => {
            let mut client = HttpRegistryClient::new(config.registry.timeout())?;
            if let Some(key) = &config.registry.api_key {
                client = client.with_api_key(key.clone());
            }
            info!(endpoint = %config.registry.endpoint, "Using HTTP registry");
            Ok((Arc::new(client), None))
        }
    }
}

// =============================================================================
// Configuration Reload
// =============================================================================

/// Writer-level difference between two configurations.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigDiff {
    /// Writer definitions that are new or changed.
    pub upserts: Vec<DataSetWriter>,
    /// Ids the loader must download again.
    pub changed: Vec<DataSetWriterId>,
    /// Ids no longer configured.
    pub removed: Vec<DataSetWriterId>,
    /// Whether writer-group settings differ.
    pub group_changed: bool,
}

impl ConfigDiff {
    /// Returns `true` when nothing writer-related changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty() && !self.group_changed
    }
}

/// Compares two configurations.
pub fn diff_config(old: &PublisherConfig, new: &PublisherConfig) -> ConfigDiff {
    let old_defs: HashMap<&DataSetWriterId, &DataSetWriter> =
        old.all_writers().map(|w| (&w.id, w)).collect();

    let upserts: Vec<DataSetWriter> = new
        .all_writers()
        .filter(|w| old_defs.get(&w.id).copied() != Some(*w))
        .cloned()
        .collect();

    let old_seeds: HashSet<DataSetWriterId> = old.seed_writer_ids().into_iter().collect();
    let new_seeds = new.seed_writer_ids();
    let new_seed_set: HashSet<&DataSetWriterId> = new_seeds.iter().collect();
    let upserted: HashSet<&DataSetWriterId> = upserts.iter().map(|w| &w.id).collect();

    let changed = new_seeds
        .iter()
        .filter(|id| upserted.contains(id) || !old_seeds.contains(*id))
        .cloned()
        .collect();

    let mut removed: Vec<DataSetWriterId> = old_seeds
        .iter()
        .filter(|id| !new_seed_set.contains(id))
        .cloned()
        .collect();
    removed.sort();

    ConfigDiff {
        upserts,
        changed,
        removed,
        group_changed: old.writer_group_model() != new.writer_group_model(),
    }
}

/// Pushes a configuration diff into the registry and the loader.
pub fn apply_diff(diff: &ConfigDiff, loader: &WriterRegistryLoader, memory: Option<&InMemoryRegistry>) {
    if diff.group_changed {
        warn!("Writer group settings changed; restart the publisher to apply them");
    }

    if let Some(registry) = memory {
        for writer in &diff.upserts {
            registry.upsert(writer.clone());
        }
        for id in &diff.removed {
            registry.remove(id);
        }
    }

    for id in &diff.changed {
        loader.on_data_set_writer_changed(id.clone());
    }
    for id in &diff.removed {
        loader.on_data_set_writer_removed(id.clone());
    }

    info!(
        changed = diff.changed.len(),
        removed = diff.removed.len(),
        "Applied configuration changes"
    );
}

fn spawn_config_watcher(
    path: PathBuf,
    interval: Duration,
    mut current: PublisherConfig,
    loader: WriterRegistryLoader,
    memory: Option<Arc<InMemoryRegistry>>,
    shutdown: ShutdownCoordinator,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let guard = ShutdownGuard::new(shutdown);
        let mut watcher = ConfigWatcher::new(&path, ConfigLoader::new());
        debug!(path = %path.display(), interval_ms = interval.as_millis() as u64, "Watching configuration");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match watcher.reload_if_changed() {
                Ok(Some(next)) => {
                    let diff = diff_config(&current, &next);
                    if !diff.is_empty() {
                        apply_diff(&diff, &loader, memory.as_deref());
                    }
                    current = next;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    error_type = e.error_type(),
                    "Ignoring invalid configuration change"
                ),
            }
        }

        guard.disarm();
    })
}

fn spawn_status_logger(
    interval: Duration,
    engine: WriterGroupEngine,
    status: Arc<StatusRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let stats = engine.stats();
            let group_state = status
                .group_state(engine.group_id())
                .map(|s| s.as_str())
                .unwrap_or("unknown");
            info!(
                group_state,
                writers = engine.writer_count(),
                writers_in_error = status.writers_in_error().len(),
                messages_published = stats.messages_published,
                publish_failures = stats.publish_failures,
                avg_notifications_per_message = stats.encoder.average_notifications_per_message,
                "Publisher status"
            );
        }
    })
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`PublisherRuntime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<PublisherConfig>,
    watch_interval: Option<Duration>,
    status_interval: Option<Duration>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path. The file is loaded by `build` unless
    /// a configuration is given directly, and it is the file being watched.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: PublisherConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Polls the configuration file at `interval`; zero disables watching.
    pub fn watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Logs a status line at `interval`; zero disables it.
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<PublisherRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .as_ref()
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                opcpub_config::load_config(path).map_err(|e| {
                    BinError::from(e).with_context(format!("loading {}", path.display()))
                })?
            }
        };

        Ok(PublisherRuntime {
            config,
            config_path: self.config_path,
            shutdown: ShutdownCoordinator::new(),
            watch_interval: self.watch_interval,
            status_interval: self.status_interval,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opcpub_core::model::{PublishedVariable, WriterGroup};
    use opcpub_core::state::GroupState;

    fn writer(id: &str) -> DataSetWriter {
        let mut variable = PublishedVariable::new(format!("ns=2;s={}", id));
        variable.sampling_interval = Duration::from_millis(20);
        DataSetWriter::new(id, "line-1", "opc.tcp://plc:4840").with_variable(variable)
    }

    fn config(writers: Vec<DataSetWriter>) -> PublisherConfig {
        let mut group = WriterGroup::new("line-1");
        group.publishing_interval = Duration::from_millis(50);
        let mut config = PublisherConfig::new(group);
        config.writers = writers;
        config.registry.debounce_ms = 5;
        config.registry.retry_delay_ms = 20;
        config
    }

    #[test]
    fn test_runtime_builder_requires_config() {
        assert!(RuntimeBuilder::new().build().is_err());
    }

    #[test]
    fn test_runtime_builder_missing_file() {
        let err = RuntimeBuilder::new()
            .config_path("/nonexistent/opcpub.yaml")
            .build()
            .unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("/nonexistent/opcpub.yaml"));
    }

    #[test]
    fn test_runtime_builder_intervals() {
        let runtime = RuntimeBuilder::new()
            .config(config(vec![]))
            .watch_interval(Duration::ZERO)
            .status_interval(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(runtime.watch_interval, None);
        assert_eq!(runtime.status_interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_http_sink_without_url_rejected() {
        let sink = SinkConfig {
            kind: SinkKind::Http,
            ..SinkConfig::default()
        };
        assert!(build_sink(&sink).is_err());
    }

    #[test]
    fn test_diff_config() {
        let old = config(vec![writer("w1"), writer("w2"), writer("w3")]);

        let mut changed_w2 = writer("w2");
        changed_w2.enabled = false;
        let mut new = config(vec![writer("w1"), changed_w2, writer("w4")]);
        new.registry.writer_ids = vec!["remote-1".to_string()];

        let diff = diff_config(&old, &new);
        let ids = |v: &[DataSetWriterId]| v.iter().map(|id| id.as_str().to_string()).collect::<Vec<_>>();

        assert_eq!(ids(&diff.changed), ["w2", "w4", "remote-1"]);
        assert_eq!(ids(&diff.removed), ["w3"]);
        assert_eq!(diff.upserts.len(), 2);
        assert!(!diff.group_changed);

        assert!(diff_config(&old, &old).is_empty());
    }

    #[test]
    fn test_diff_config_detects_group_change() {
        let old = config(vec![writer("w1")]);
        let mut new = old.clone();
        new.writer_group.batch_size = 7;

        let diff = diff_config(&old, &new);
        assert!(diff.group_changed);
        assert!(diff.changed.is_empty());
    }

    #[tokio::test]
    async fn test_start_loads_configured_writers() {
        let runtime = PublisherRuntime::new(config(vec![writer("w1"), writer("w2")]));
        let publisher = runtime.start().unwrap();

        for _ in 0..200 {
            if publisher.engine.writer_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(publisher.engine.writer_count(), 2);

        for _ in 0..200 {
            if publisher.status.group_state(publisher.engine.group_id()) == Some(GroupState::Publishing) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            publisher.status.group_state(publisher.engine.group_id()),
            Some(GroupState::Publishing)
        );

        let engine = publisher.engine.clone();
        publisher.stop().await;
        assert!(!engine.is_running());
        assert!(engine.stats().messages_published > 0);
    }

    #[tokio::test]
    async fn test_apply_diff_removes_writer() {
        let old = config(vec![writer("w1"), writer("w2")]);
        let publisher = PublisherRuntime::new(old.clone()).start().unwrap();

        for _ in 0..200 {
            if publisher.engine.writer_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let new = config(vec![writer("w1")]);
        let diff = diff_config(&old, &new);
        apply_diff(&diff, &publisher.loader, publisher.memory_registry().map(|r| r.as_ref()));

        for _ in 0..200 {
            if publisher.engine.writer_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(publisher.engine.writer_ids(), vec![DataSetWriterId::new("w1")]);
        assert_eq!(publisher.memory_registry().map(|r| r.len()), Some(1));

        publisher.stop().await;
    }
}
