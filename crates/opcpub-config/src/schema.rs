// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema for the publisher.
//!
//! ```text
//! PublisherConfig
//! ├── publisher: PublisherSection
//! │   └── backoff: BackoffConfig
//! ├── registry: RegistryConfig
//! ├── writer_group: WriterGroup
//! ├── writers: [DataSetWriter]
//! ├── sink: SinkConfig
//! ├── source: SourceConfig
//! └── logging: LoggingConfig
//! ```
//!
//! The writer group and writer sections reuse the core model types, so a
//! configuration file and a registry document describe writers the same way.
//! Durations in this module are plain millisecond integers.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use opcpub_core::backoff::BackoffConfig;
use opcpub_core::model::{DataSetWriter, WriterGroup};
use opcpub_core::types::DataSetWriterId;
use opcpub_engine::{EngineConfig, LoaderConfig};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default notification queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default registry endpoint when writers come from the configuration file.
pub const DEFAULT_REGISTRY_ENDPOINT: &str = "memory://local";

/// Upper bound for parallel registry downloads.
pub const MAX_DOWNLOAD_CONCURRENCY: usize = 256;

// =============================================================================
// PublisherConfig
// =============================================================================

/// Root configuration of the publisher daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    /// Publisher identity and engine tuning.
    #[serde(default)]
    pub publisher: PublisherSection,

    /// Where writer definitions are downloaded from.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// The writer group this publisher runs.
    pub writer_group: WriterGroup,

    /// Writers served by the in-memory registry and seeded into the loader.
    #[serde(default)]
    pub writers: Vec<DataSetWriter>,

    /// Where network messages go.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Where samples come from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PublisherConfig {
    /// Creates a configuration for `writer_group` with defaults elsewhere.
    pub fn new(writer_group: WriterGroup) -> Self {
        Self {
            publisher: PublisherSection::default(),
            registry: RegistryConfig::default(),
            writer_group,
            writers: Vec::new(),
            sink: SinkConfig::default(),
            source: SourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validates every section and the cross-section constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        self.publisher.validate()?;
        self.registry.validate()?;
        self.validate_writer_group()?;
        self.validate_writers()?;
        self.sink.validate()?;
        self.source.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    fn validate_writer_group(&self) -> ConfigResult<()> {
        let group = &self.writer_group;
        if group.id.as_str().trim().is_empty() {
            return Err(ConfigError::missing_field("writer_group.id"));
        }
        if group.batch_size == 0 {
            return Err(ConfigError::validation(
                "writer_group.batch_size",
                "must be at least 1",
            ));
        }
        if group.publishing_interval.is_zero() {
            return Err(ConfigError::validation(
                "writer_group.publishing_interval",
                "must be greater than zero",
            ));
        }
        if let Some(keep_alive) = group.keep_alive_time {
            if keep_alive.is_zero() {
                return Err(ConfigError::validation(
                    "writer_group.keep_alive_time",
                    "must be greater than zero when set",
                ));
            }
        }
        Ok(())
    }

    fn validate_writers(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for writer in self.all_writers() {
            if writer.id.as_str().trim().is_empty() {
                return Err(ConfigError::missing_field("writers[].id"));
            }
            if !seen.insert(writer.id.clone()) {
                return Err(ConfigError::duplicate_writer_id(writer.id.as_str()));
            }
            if writer.writer_group_id != self.writer_group.id {
                return Err(ConfigError::foreign_writer(
                    writer.id.as_str(),
                    self.writer_group.id.as_str(),
                    writer.writer_group_id.as_str(),
                ));
            }
            if writer.source.endpoint_url.trim().is_empty() {
                return Err(ConfigError::missing_field(format!(
                    "writers[{}].source.endpoint_url",
                    writer.id
                )));
            }
        }

        for id in &self.registry.writer_ids {
            if id.trim().is_empty() {
                return Err(ConfigError::validation("registry.writer_ids", "empty writer id"));
            }
        }
        Ok(())
    }

    /// Writers declared either inside `writer_group` or at the top level.
    pub fn all_writers(&self) -> impl Iterator<Item = &DataSetWriter> {
        self.writer_group.writers.iter().chain(self.writers.iter())
    }

    /// Ids the registry loader starts with: every declared writer plus the
    /// ids listed under `registry.writer_ids`, without duplicates.
    pub fn seed_writer_ids(&self) -> Vec<DataSetWriterId> {
        let mut seen = HashSet::new();
        self.all_writers()
            .map(|w| w.id.clone())
            .chain(self.registry.writer_ids.iter().map(DataSetWriterId::new))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// The writer group without its writers; writers reach the engine
    /// through the registry loader.
    pub fn writer_group_model(&self) -> WriterGroup {
        let mut group = self.writer_group.clone();
        group.writers.clear();
        group
    }

    /// Engine settings derived from the `publisher` section.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_queue_capacity(self.publisher.queue_capacity)
            .with_publisher_id(self.publisher.id.clone())
            .with_backoff(self.publisher.backoff.clone())
    }

    /// Loader settings derived from the `registry` section.
    pub fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::new(self.registry.endpoint.clone());
        config.debounce = Duration::from_millis(self.registry.debounce_ms);
        config.download_concurrency = self.registry.download_concurrency;
        config.retry_delay = Duration::from_millis(self.registry.retry_delay_ms);
        config
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Publisher identity and engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherSection {
    /// Publisher id written into network message headers.
    #[serde(default = "default_publisher_id")]
    pub id: String,

    /// Capacity of the notification queue between writers and the engine.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Reconnect backoff of writer subscriptions.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl PublisherSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::missing_field("publisher.id"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::validation(
                "publisher.queue_capacity",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::out_of_range(
                "publisher.backoff.jitter",
                self.backoff.jitter,
                0.0,
                1.0,
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigError::validation(
                "publisher.backoff.multiplier",
                "must be at least 1.0",
            ));
        }
        Ok(())
    }
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            id: default_publisher_id(),
            queue_capacity: default_queue_capacity(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_publisher_id() -> String {
    "opcpub".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

// =============================================================================
// Registry
// =============================================================================

/// Registry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// Serve the writers declared in this file.
    #[default]
    Memory,
    /// Download writers over HTTP.
    Http,
}

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Backend.
    #[serde(default)]
    pub kind: RegistryKind,

    /// Registry endpoint.
    #[serde(default = "default_registry_endpoint")]
    pub endpoint: String,

    /// Bearer token for the HTTP registry.
    #[serde(default)]
    pub api_key: Option<String>,

    /// HTTP request timeout.
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,

    /// Debounce between a change notification and the reconciliation pass.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Maximum number of parallel downloads.
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// Delay before failed downloads are retried.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Extra writer ids to download at startup.
    #[serde(default)]
    pub writer_ids: Vec<String>,
}

impl RegistryConfig {
    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.kind == RegistryKind::Http
            && !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://"))
        {
            return Err(ConfigError::validation(
                "registry.endpoint",
                format!("'{}' is not an http(s) URL", self.endpoint),
            ));
        }
        if self.download_concurrency == 0 || self.download_concurrency > MAX_DOWNLOAD_CONCURRENCY {
            return Err(ConfigError::out_of_range(
                "registry.download_concurrency",
                self.download_concurrency,
                1,
                MAX_DOWNLOAD_CONCURRENCY,
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::validation("registry.timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::default(),
            endpoint: default_registry_endpoint(),
            api_key: None,
            timeout_ms: default_registry_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            download_concurrency: default_download_concurrency(),
            retry_delay_ms: default_retry_delay_ms(),
            writer_ids: Vec::new(),
        }
    }
}

fn default_registry_endpoint() -> String {
    DEFAULT_REGISTRY_ENDPOINT.to_string()
}

fn default_registry_timeout_ms() -> u64 {
    10_000
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_download_concurrency() -> usize {
    8
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

// =============================================================================
// Sink
// =============================================================================

/// Sink backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log every message.
    #[default]
    Logging,
    /// POST every message to `url`.
    Http,
}

/// Sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Backend.
    #[serde(default)]
    pub kind: SinkKind,

    /// Target URL of the HTTP sink.
    #[serde(default)]
    pub url: Option<String>,

    /// HTTP request timeout.
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,

    /// Log payloads of text messages (logging sink only).
    #[serde(default)]
    pub log_payloads: bool,
}

impl SinkConfig {
    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.kind == SinkKind::Http {
            match self.url.as_deref() {
                None | Some("") => return Err(ConfigError::missing_field("sink.url")),
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    return Err(ConfigError::validation(
                        "sink.url",
                        format!("'{}' is not an http(s) URL", url),
                    ));
                }
                Some(_) => {}
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::validation("sink.timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            url: None,
            timeout_ms: default_sink_timeout_ms(),
            log_payloads: false,
        }
    }
}

fn default_sink_timeout_ms() -> u64 {
    5_000
}

// =============================================================================
// Source
// =============================================================================

/// Source backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic samples and events.
    #[default]
    Simulated,
}

/// Source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Backend.
    #[serde(default)]
    pub kind: SourceKind,

    /// Tick interval for writers that only publish events.
    #[serde(default = "default_source_interval_ms")]
    pub default_interval_ms: u64,

    /// Emit one event every this many ticks.
    #[serde(default = "default_event_every")]
    pub event_every: u32,
}

impl SourceConfig {
    /// Returns the default tick interval.
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }

    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_interval_ms == 0 {
            return Err(ConfigError::validation(
                "source.default_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.event_every == 0 {
            return Err(ConfigError::validation("source.event_every", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            default_interval_ms: default_source_interval_ms(),
            event_every: default_event_every(),
        }
    }
}

fn default_source_interval_ms() -> u64 {
    1_000
}

fn default_event_every() -> u32 {
    10
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include targets in logs.
    #[serde(default = "default_enabled")]
    pub with_target: bool,

    /// Include file/line in logs.
    #[serde(default)]
    pub with_file: bool,

    /// Include thread IDs in logs.
    #[serde(default)]
    pub with_thread_ids: bool,
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            with_target: true,
            with_file: false,
            with_thread_ids: false,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Minimal single-line output.
    Compact,
    /// JSON for log aggregation.
    Json,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opcpub_core::model::MessageEncoding;

    fn config_with_writers(writers: Vec<DataSetWriter>) -> PublisherConfig {
        let mut config = PublisherConfig::new(WriterGroup::new("line-1"));
        config.writers = writers;
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PublisherConfig::new(WriterGroup::new("line-1"));
        assert!(config.validate().is_ok());
        assert_eq!(config.publisher.id, "opcpub");
        assert_eq!(config.registry.kind, RegistryKind::Memory);
        assert_eq!(config.sink.kind, SinkKind::Logging);
    }

    #[test]
    fn test_duplicate_writer_rejected() {
        let config = config_with_writers(vec![
            DataSetWriter::new("w1", "line-1", "opc.tcp://a"),
            DataSetWriter::new("w1", "line-1", "opc.tcp://b"),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateWriterId { .. })
        ));
    }

    #[test]
    fn test_foreign_writer_rejected() {
        let config = config_with_writers(vec![DataSetWriter::new("w1", "line-2", "opc.tcp://a")]);
        assert!(matches!(config.validate(), Err(ConfigError::ForeignWriter { .. })));
    }

    #[test]
    fn test_batch_size_zero_rejected() {
        let mut config = PublisherConfig::new(WriterGroup::new("line-1"));
        config.writer_group.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_http_sink_requires_url() {
        let mut config = PublisherConfig::new(WriterGroup::new("line-1"));
        config.sink.kind = SinkKind::Http;
        assert!(matches!(config.validate(), Err(ConfigError::MissingField { .. })));

        config.sink.url = Some("ftp://collector".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        config.sink.url = Some("http://collector:8080/ingest".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_registry_requires_http_endpoint() {
        let mut config = PublisherConfig::new(WriterGroup::new("line-1"));
        config.registry.kind = RegistryKind::Http;
        assert!(config.validate().is_err());

        config.registry.endpoint = "https://registry.local/api".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_download_concurrency_range() {
        let mut config = PublisherConfig::new(WriterGroup::new("line-1"));
        config.registry.download_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_seed_writer_ids_deduplicates() {
        let mut config = config_with_writers(vec![
            DataSetWriter::new("w1", "line-1", "opc.tcp://a"),
            DataSetWriter::new("w2", "line-1", "opc.tcp://a"),
        ]);
        config.registry.writer_ids = vec!["w2".to_string(), "w3".to_string()];

        let ids: Vec<String> = config
            .seed_writer_ids()
            .into_iter()
            .map(|id| id.into_inner())
            .collect();
        assert_eq!(ids, ["w1", "w2", "w3"]);
    }

    #[test]
    fn test_derived_runtime_settings() {
        let mut group = WriterGroup::new("line-1");
        group.encoding = MessageEncoding::Uadp;
        group.writers.push(DataSetWriter::new("w1", "line-1", "opc.tcp://a"));

        let mut config = PublisherConfig::new(group);
        config.publisher.id = "press-7".to_string();
        config.publisher.queue_capacity = 64;
        config.registry.retry_delay_ms = 250;

        let model = config.writer_group_model();
        assert!(model.writers.is_empty());
        assert_eq!(model.encoding, MessageEncoding::Uadp);

        let engine = config.engine_config();
        assert_eq!(engine.queue_capacity, 64);
        assert_eq!(engine.publisher_id.as_deref(), Some("press-7"));

        let loader = config.loader_config();
        assert_eq!(loader.retry_delay, Duration::from_millis(250));
        assert_eq!(loader.registry_endpoint, DEFAULT_REGISTRY_ENDPOINT);
        assert_eq!(config.seed_writer_ids().len(), 1);
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }
}
