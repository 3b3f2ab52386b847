// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Config Integration Tests
//!
//! Configuration files on disk driving the publisher runtime:
//!
//! - Loading and validating YAML/TOML files
//! - Starting a runtime from a file
//! - Hot reload of the writer list

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use opcpub_bin::RuntimeBuilder;
use opcpub_config::{load_config, ConfigError, RegistryKind, SinkKind};
use opcpub_core::model::{MessageEncoding, OrderingMode};
use opcpub_core::state::GroupState;
use opcpub_core::types::DataSetWriterId;

use opcpub_tests::prelude::*;

fn writer_yaml(id: &str) -> String {
    format!(
        r#"
  - id: {id}
    writer_group_id: line-1
    source:
      endpoint_url: opc.tcp://plc-1:4840
      variables:
        - node_id: "ns=2;s={id}"
          sampling_interval: 20
"#
    )
}

fn config_yaml(writer_ids: &[&str]) -> String {
    let writers: String = writer_ids.iter().map(|id| writer_yaml(id)).collect();
    format!(
        r#"
publisher:
  id: press-7

registry:
  kind: memory
  debounce_ms: 10
  retry_delay_ms: 20

writer_group:
  id: line-1
  encoding: uadp
  batch_size: 5
  publishing_interval: 50
  max_network_message_size: 4096
  ordering: by_writer

writers:{writers}
sink:
  kind: logging
"#
    )
}

fn write_config(path: &Path, content: &str) {
    fs::write(path, content).expect("write config");
}

fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).expect("open config");
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .expect("set mtime");
}

// =============================================================================
// Loading
// =============================================================================

#[test]
fn test_config_load_yaml_file() {
    let dir = temp_test_dir("opcpub_config");
    let path = dir.path().join("publisher.yaml");
    write_config(&path, &config_yaml(&["w1", "w2"]));

    let config = load_config(&path).expect("config loads");

    assert_eq!(config.publisher.id, "press-7");
    assert_eq!(config.registry.kind, RegistryKind::Memory);
    assert_eq!(config.sink.kind, SinkKind::Logging);
    assert_eq!(config.writer_group.encoding, MessageEncoding::Uadp);
    assert_eq!(config.writer_group.ordering, OrderingMode::ByWriter);
    assert_eq!(config.writer_group.publishing_interval, Duration::from_millis(50));
    assert_eq!(
        config.seed_writer_ids(),
        vec![DataSetWriterId::new("w1"), DataSetWriterId::new("w2")]
    );

    let loader = config.loader_config();
    assert_eq!(loader.debounce, Duration::from_millis(10));
    assert_eq!(loader.retry_delay, Duration::from_millis(20));
    assert_eq!(config.engine_config().publisher_id.as_deref(), Some("press-7"));
}

#[test]
fn test_config_load_toml_file() {
    let dir = temp_test_dir("opcpub_config");
    let path = dir.path().join("publisher.toml");
    write_config(
        &path,
        r#"
[writer_group]
id = "line-2"
batch_size = 1

[[writers]]
id = "w9"
writer_group_id = "line-2"

[writers.source]
endpoint_url = "opc.tcp://plc-9:4840"
"#,
    );

    let config = load_config(&path).expect("config loads");
    assert_eq!(config.writer_group.id.as_str(), "line-2");
    assert!(!config.writer_group.is_batched());
    assert_eq!(config.all_writers().count(), 1);
}

#[test]
fn test_config_rejects_duplicate_writers() {
    let dir = temp_test_dir("opcpub_config");
    let path = dir.path().join("publisher.yaml");
    write_config(&path, &config_yaml(&["w1", "w1"]));

    let err = load_config(&path).expect_err("duplicate writer rejected");
    assert!(matches!(err, ConfigError::DuplicateWriterId { .. }), "{:?}", err);
}

#[test]
fn test_config_missing_file() {
    let dir = temp_test_dir("opcpub_config");
    let err = load_config(dir.path().join("absent.yaml")).expect_err("missing file rejected");
    assert!(matches!(err, ConfigError::FileNotFound { .. }), "{:?}", err);
}

// =============================================================================
// Runtime
// =============================================================================

#[tokio::test]
async fn test_runtime_starts_from_file() {
    let dir = temp_test_dir("opcpub_runtime");
    let path = dir.path().join("publisher.yaml");
    write_config(&path, &config_yaml(&["w1", "w2"]));

    let runtime = RuntimeBuilder::new()
        .config_path(&path)
        .watch_interval(Duration::ZERO)
        .status_interval(Duration::ZERO)
        .build()
        .expect("runtime builds");
    let publisher = runtime.start().expect("publisher starts");

    eventually(|| publisher.engine.writer_count() == 2).await;
    eventually(|| publisher.status.group_state(publisher.engine.group_id()) == Some(GroupState::Publishing))
        .await;
    assert!(publisher.engine.stats().messages_published > 0);

    publisher.stop().await;
}

#[tokio::test]
async fn test_runtime_hot_reload_adds_and_removes_writers() {
    let dir = temp_test_dir("opcpub_runtime");
    let path = dir.path().join("publisher.yaml");
    write_config(&path, &config_yaml(&["w1", "w2"]));

    let runtime = RuntimeBuilder::new()
        .config_path(&path)
        .watch_interval(Duration::from_millis(20))
        .build()
        .expect("runtime builds");
    let publisher = runtime.start().expect("publisher starts");
    eventually(|| publisher.engine.writer_count() == 2).await;

    write_config(&path, &config_yaml(&["w2", "w3"]));
    bump_mtime(&path);

    let expected = vec![DataSetWriterId::new("w2"), DataSetWriterId::new("w3")];
    eventually(|| publisher.engine.writer_ids() == expected).await;

    let registry = publisher.memory_registry().expect("memory registry in use");
    assert!(registry.request_count(&"w3".into()) >= 1);
    assert_eq!(registry.len(), 2);

    publisher.stop().await;
}

#[tokio::test]
async fn test_runtime_keeps_running_on_invalid_reload() {
    let dir = temp_test_dir("opcpub_runtime");
    let path = dir.path().join("publisher.yaml");
    write_config(&path, &config_yaml(&["w1"]));

    let runtime = RuntimeBuilder::new()
        .config_path(&path)
        .watch_interval(Duration::from_millis(20))
        .build()
        .expect("runtime builds");
    let coordinator = runtime.shutdown_coordinator().clone();
    let publisher = runtime.start().expect("publisher starts");
    eventually(|| publisher.engine.writer_count() == 1).await;

    write_config(&path, "writer_group: [not, a, map]");
    bump_mtime(&path);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(publisher.engine.is_running());
    assert_eq!(publisher.engine.writer_count(), 1);
    assert!(!coordinator.is_shutdown_initiated());

    publisher.stop().await;
}
