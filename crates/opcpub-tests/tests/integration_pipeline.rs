// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Pipeline Integration Tests
//!
//! Registry, loader, engine, source and sink running together:
//!
//! - Writer liveness on add and remove
//! - Debounced, retried registry downloads
//! - Failure isolation between writers
//! - Flush on removal and shutdown
//!
//! ## Test Categories
//!
//! - `test_pipeline_*`: full pipeline through [`PublisherHarness`]
//! - `test_loader_*`: loader against a recording controller

use std::sync::Arc;
use std::time::Duration;

use opcpub_core::state::{GroupState, WriterState};
use opcpub_core::types::{DataSetWriterId, DataValue, Variant};
use opcpub_engine::{InMemoryRegistry, LoaderConfig, WriterRegistryLoader};

use opcpub_tests::prelude::*;

fn ids(names: &[&str]) -> Vec<DataSetWriterId> {
    names.iter().map(|n| DataSetWriterId::new(*n)).collect()
}

fn value(i: i32) -> DataValue {
    DataValue::good(Variant::Int32(i))
}

// =============================================================================
// Liveness
// =============================================================================

#[tokio::test]
async fn test_pipeline_seeded_writers_publish() {
    init_test_logging();
    let harness = PublisherHarness::start(GroupFixtures::batched(2), WriterFixtures::writers(2)).await;

    harness.source.handle("w1").sample("ns=2;s=Value", value(1));
    harness.source.handle("w2").sample("ns=2;s=Value", value(2));

    eventually(|| harness.sink.notification_count() == 2).await;
    let mut labels = harness.sink.messages().labels();
    labels.sort();
    assert_eq!(labels, vec!["w11", "w21"]);
    assert_eq!(harness.group_state(), Some(GroupState::Publishing));

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_added_writer_becomes_live() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(1)).await;

    harness.registry.upsert(WriterFixtures::writer("w2"));
    harness.loader.on_data_set_writer_changed("w2");
    harness.wait_for_writers(&ids(&["w1", "w2"])).await;

    harness.source.handle("w2").sample("ns=2;s=Value", value(7));
    eventually(|| harness.sink.notification_count() == 1).await;
    assert_eq!(harness.sink.messages().labels(), vec!["w21"]);

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_removed_writer_flushes_then_stops() {
    let harness = PublisherHarness::start(GroupFixtures::batched(100), WriterFixtures::writers(2)).await;

    harness.source.handle("w1").sample("ns=2;s=Value", value(1));
    eventually(|| harness.engine.stats().notifications_received == 1).await;
    assert_eq!(harness.sink.notification_count(), 0);

    harness.registry.remove(&"w1".into());
    harness.loader.on_data_set_writer_removed("w1");
    harness.wait_for_writers(&ids(&["w2"])).await;

    eventually(|| harness.loader.load_state_of(&"w1".into()).is_none()).await;
    assert_eq!(harness.sink.messages().labels(), vec!["w11"]);
    assert!(harness.status.writer_state(&"w1".into()).is_none());

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_writer_missing_from_registry_is_removed() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(2)).await;

    harness.registry.remove(&"w2".into());
    harness.loader.on_data_set_writer_changed("w2");
    harness.wait_for_writers(&ids(&["w1"])).await;

    let state = harness.loader.load_state_of(&"w2".into()).expect("load state recorded");
    assert!(state.error().is_some_and(|e| e.contains("not found")));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(harness.registry.request_count(&"w2".into()), 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_foreign_writer_is_rejected() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(1)).await;

    harness.registry.upsert(WriterFixtures::foreign("w9"));
    harness.loader.on_data_set_writer_changed("w9");

    eventually(|| harness.loader.load_state_of(&"w9".into()).is_some()).await;
    let state = harness.loader.load_state_of(&"w9".into()).expect("load state recorded");
    assert!(state.error().is_some_and(|e| e.contains("other-group")));
    assert_eq!(harness.engine.writer_ids(), ids(&["w1"]));

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_changed_writer_is_replaced() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(1)).await;

    let changed = WriterBuilder::new("w1").variable("ns=2;s=Value").variable("ns=2;s=Other").build();
    harness.registry.upsert(changed);
    harness.loader.on_data_set_writer_changed("w1");

    eventually(|| {
        harness
            .engine
            .writer(&"w1".into())
            .is_some_and(|w| w.item_count() == 2)
    })
    .await;
    assert_eq!(harness.engine.writer_count(), 1);

    harness.stop().await;
}

// =============================================================================
// Registry Downloads
// =============================================================================

#[tokio::test]
async fn test_pipeline_download_fails_twice_then_succeeds() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(1)).await;

    harness.registry.upsert(WriterFixtures::writer("w2"));
    harness.registry.fail_next("w2", 2);
    harness.loader.on_data_set_writer_changed("w2");

    harness.wait_for_writers(&ids(&["w1", "w2"])).await;
    assert!(harness.loader.load_state_of(&"w2".into()).is_some_and(|s| s.is_loaded()));
    assert_eq!(harness.registry.request_count(&"w2".into()), 3);
    assert_eq!(harness.loader.pending_count(), 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_loader_failure_recorded_before_success() {
    let registry = Arc::new(InMemoryRegistry::with_writers([WriterFixtures::writer("w1")]));
    registry.fail_next("w1", 2);
    let controller = RecordingController::new();
    let loader = WriterRegistryLoader::new(LoaderConfig::for_testing(), registry.clone(), controller.clone());

    loader.on_data_set_writer_changed("w1");

    let first = loader.reconcile().await;
    assert_eq!((first.failed, first.requeued), (1, 1));
    assert!(loader.load_state_of(&"w1".into()).is_some_and(|s| s.error().is_some()));

    let second = loader.reconcile().await;
    assert_eq!(second.failed, 1);
    assert!(loader.load_state_of(&"w1".into()).is_some_and(|s| !s.is_loaded()));
    assert!(controller.add_calls().is_empty());

    let third = loader.reconcile().await;
    assert_eq!(third.added, 1);
    assert!(loader.load_state_of(&"w1".into()).is_some_and(|s| s.is_loaded()));
    assert_eq!(controller.adds_of("w1"), 1);
    assert_eq!(loader.pending_count(), 0);
}

#[tokio::test]
async fn test_loader_burst_of_changes_downloads_once() {
    let registry = Arc::new(InMemoryRegistry::with_writers([WriterFixtures::writer("w1")]));
    let controller = RecordingController::new();
    let loader = WriterRegistryLoader::new(LoaderConfig::for_testing(), registry.clone(), controller.clone());
    loader.start(Vec::new());

    for _ in 0..50 {
        loader.on_data_set_writer_changed("w1");
    }

    eventually(|| controller.adds_of("w1") == 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(registry.request_count(&"w1".into()), 1);
    assert_eq!(controller.add_calls().len(), 1);
    assert_eq!(loader.pass_count(), 1);

    loader.shutdown().await;
}

#[tokio::test]
async fn test_loader_failed_add_is_retried() {
    let registry = Arc::new(InMemoryRegistry::with_writers([WriterFixtures::writer("w1")]));
    let controller = RecordingController::new();
    controller.fail_next_adds(1);
    let loader = WriterRegistryLoader::new(LoaderConfig::for_testing(), registry.clone(), controller.clone());
    loader.start(ids(&["w1"]));

    eventually(|| controller.live_writer("w1").is_some()).await;
    assert_eq!(controller.adds_of("w1"), 2);
    assert!(loader.load_state_of(&"w1".into()).is_some_and(|s| s.is_loaded()));

    loader.shutdown().await;
}

#[tokio::test]
async fn test_loader_disabled_writer_is_removed() {
    let registry = Arc::new(InMemoryRegistry::with_writers([WriterFixtures::writer("w1")]));
    let controller = RecordingController::new();
    let loader = WriterRegistryLoader::new(LoaderConfig::for_testing(), registry.clone(), controller.clone());

    loader.on_data_set_writer_changed("w1");
    loader.reconcile().await;
    assert!(controller.live_writer("w1").is_some());

    registry.upsert(WriterBuilder::new("w1").variable("ns=2;s=Value").disabled().build());
    loader.on_data_set_writer_changed("w1");
    let report = loader.reconcile().await;

    assert_eq!(report.removed, 1);
    assert!(controller.live_writer("w1").is_none());
    assert_eq!(controller.remove_calls(), vec![ids(&["w1"])]);
}

// =============================================================================
// Failure Isolation
// =============================================================================

#[tokio::test]
async fn test_pipeline_stream_failure_isolated_to_writer() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(2)).await;

    let failing = harness.source.handle("w1");
    failing.fail_next_subscribes(u32::MAX);
    failing.fail("subscription lost");

    harness.wait_for_writer_state("w1", WriterState::Error).await;
    eventually(|| harness.group_state() == Some(GroupState::Degraded)).await;

    harness.source.handle("w2").sample("ns=2;s=Value", value(3));
    eventually(|| harness.sink.notification_count() == 1).await;
    assert_eq!(harness.sink.messages().labels(), vec!["w21"]);
    assert_eq!(harness.status.writers_in_error(), ids(&["w1"]));

    harness.stop().await;
}

#[tokio::test]
async fn test_pipeline_sink_failure_drops_and_recovers() {
    let harness = PublisherHarness::start(GroupFixtures::unbatched(), WriterFixtures::writers(1)).await;
    harness.sink.set_should_fail(true);

    harness.source.handle("w1").sample("ns=2;s=Value", value(1));
    eventually(|| harness.engine.stats().publish_failures == 1).await;
    assert_eq!(harness.group_state(), Some(GroupState::Error));

    harness.sink.set_should_fail(false);
    harness.source.handle("w1").sample("ns=2;s=Value", value(2));
    eventually(|| harness.group_state() == Some(GroupState::Publishing)).await;
    assert_eq!(harness.sink.messages().labels(), vec!["w12"]);

    harness.stop().await;
}

// =============================================================================
// Shutdown and Keep-Alive
// =============================================================================

#[tokio::test]
async fn test_pipeline_shutdown_flushes_pending() {
    let harness = PublisherHarness::start(GroupFixtures::batched(100), WriterFixtures::writers(1)).await;
    let sink = harness.sink.clone();

    let handle = harness.source.handle("w1");
    for i in 0..4 {
        handle.sample("ns=2;s=Value", value(i));
    }
    eventually(|| harness.engine.stats().notifications_received == 4).await;

    harness.stop().await;

    let messages = sink.messages();
    assert_eq!(messages.labels(), vec!["w11", "w12", "w13", "w14"]);
    messages.assert_writer_sequences_increase();
}

#[tokio::test]
async fn test_pipeline_keep_alive_when_idle() {
    let group = GroupBuilder::new("g1").batch_size(10).interval_ms(10).keep_alive_ms(30).build();
    let harness = PublisherHarness::start(group, WriterFixtures::writers(1)).await;

    eventually(|| harness.engine.stats().keep_alives_published >= 1).await;
    assert!(harness.sink.messages().iter().any(|m| m.is_keep_alive()));
    assert_eq!(harness.sink.notification_count(), 0);

    harness.stop().await;
}
