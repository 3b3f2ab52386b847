// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Wires an in-memory registry, the registry loader, a writer-group engine,
//! a channel source and a recording sink the way the runtime does.
//!
//! ```text
//! InMemoryRegistry ──▶ WriterRegistryLoader ──▶ WriterGroupEngine ──▶ MockMessageSink
//!                                                      ▲
//!                                               ChannelSource
//! ```

use std::sync::Arc;

use opcpub_core::model::{DataSetWriter, WriterGroup};
use opcpub_core::state::{GroupState, StatusRegistry, WriterState};
use opcpub_core::types::DataSetWriterId;
use opcpub_engine::{
    ChannelSource, EngineConfig, InMemoryRegistry, LoaderConfig, MockMessageSink, WriterGroupEngine,
    WriterRegistryLoader,
};

use super::eventually;

/// A running publisher pipeline with every collaborator exposed.
pub struct PublisherHarness {
    /// Registry the loader downloads from.
    pub registry: Arc<InMemoryRegistry>,
    /// Debounced loader feeding the engine.
    pub loader: WriterRegistryLoader,
    /// The engine under test.
    pub engine: WriterGroupEngine,
    /// Per-writer event queues.
    pub source: Arc<ChannelSource>,
    /// Recording sink.
    pub sink: Arc<MockMessageSink>,
    /// Last reported states.
    pub status: Arc<StatusRegistry>,
}

impl PublisherHarness {
    /// Start a pipeline for `group`, seeding the registry with `writers` and
    /// waiting until all of them are live.
    pub async fn start(group: WriterGroup, writers: impl IntoIterator<Item = DataSetWriter>) -> Self {
        let writers: Vec<DataSetWriter> = writers.into_iter().collect();
        let seed: Vec<DataSetWriterId> = writers.iter().map(|w| w.id.clone()).collect();

        let registry = Arc::new(InMemoryRegistry::with_writers(writers));
        let source = Arc::new(ChannelSource::new());
        let sink = Arc::new(MockMessageSink::new());
        let status = Arc::new(StatusRegistry::new());

        let engine = WriterGroupEngine::builder(group, source.clone(), sink.clone())
            .reporter(status.clone())
            .config(EngineConfig::for_testing())
            .build();
        engine.start().expect("engine starts");

        let loader = WriterRegistryLoader::new(
            LoaderConfig::for_testing(),
            registry.clone(),
            Arc::new(engine.clone()),
        );
        loader.start(seed.clone());

        let harness = Self {
            registry,
            loader,
            engine,
            source,
            sink,
            status,
        };
        harness.wait_for_writers(&seed).await;
        harness
    }

    /// Wait until exactly `ids` are live.
    pub async fn wait_for_writers(&self, ids: &[DataSetWriterId]) {
        let mut expected = ids.to_vec();
        expected.sort();
        eventually(|| self.engine.writer_ids() == expected).await;
    }

    /// Wait until a writer reports `state`.
    pub async fn wait_for_writer_state(&self, writer_id: &str, state: WriterState) {
        let id = DataSetWriterId::new(writer_id);
        eventually(|| self.status.writer_state(&id) == Some(state)).await;
    }

    /// Current group state.
    pub fn group_state(&self) -> Option<GroupState> {
        self.status.group_state(self.engine.group_id())
    }

    /// Stop the loader, then the engine.
    pub async fn stop(self) {
        self.loader.shutdown().await;
        self.engine.shutdown().await;
    }
}
