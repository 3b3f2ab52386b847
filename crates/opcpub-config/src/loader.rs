// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and pick the format from its extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse YAML, TOML or JSON into [`PublisherConfig`]
//! 4. Apply `OPCPUB_*` environment overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! OPCPUB_PUBLISHER_ID=press-7
//! OPCPUB_REGISTRY_ENDPOINT=https://registry.plant.local/api
//! OPCPUB_PUBLISHING_INTERVAL_MS=250
//! OPCPUB_SINK_URL=http://collector:8080/ingest
//! OPCPUB_LOG_LEVEL=debug
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogFormat, LogLevel, PublisherConfig};

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`PublisherConfig`] from files or strings.
///
/// # Examples
///
/// ```no_run
/// use opcpub_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("publisher.yaml").unwrap();
/// println!("{}", config.writer_group.id);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve placeholders and apply overrides.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `OPCPUB` prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: "OPCPUB".to_string(),
            resolve_env_vars: true,
        }
    }

    /// Creates a builder for configuring the loader.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable handling.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Returns the environment variable prefix.
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Loads configuration from a file. The format follows the extension:
    /// `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<PublisherConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse_content(&content, format, path)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;

        info!(
            writer_group = %config.writer_group.id,
            writers = config.all_writers().count(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<PublisherConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config: PublisherConfig = parse_str(&content, format)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(
        &self,
        content: &str,
        format: ConfigFormat,
        path: &Path,
    ) -> ConfigResult<PublisherConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })
    }

    /// Replaces `${VAR}` and `${VAR:default}` with environment values.
    ///
    /// Unknown variables without a default are left in place.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut chars = content.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' || chars.peek() != Some(&'{') {
                result.push(c);
                continue;
            }
            chars.next();

            let mut placeholder = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                placeholder.push(c);
            }

            if !closed {
                result.push_str("${");
                result.push_str(&placeholder);
                continue;
            }

            let (name, default) = match placeholder.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (placeholder.as_str(), None),
            };

            match (env::var(name), default) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!(variable = name, "Environment variable not found");
                    result.push_str("${");
                    result.push_str(name);
                    result.push('}');
                }
            }
        }

        result
    }

    /// Applies `{PREFIX}_*` overrides.
    fn apply_env_overrides(&self, config: &mut PublisherConfig) -> ConfigResult<()> {
        if let Some(value) = self.env("PUBLISHER_ID") {
            config.publisher.id = value;
        }
        if let Some(value) = self.parsed_env::<usize>("QUEUE_CAPACITY", "expected a positive integer")? {
            config.publisher.queue_capacity = value;
        }

        if let Some(value) = self.env("REGISTRY_ENDPOINT") {
            config.registry.endpoint = value;
        }
        if let Some(value) = self.env("REGISTRY_API_KEY") {
            config.registry.api_key = Some(value);
        }

        if let Some(value) = self.parsed_env::<u64>("PUBLISHING_INTERVAL_MS", "expected milliseconds")? {
            config.writer_group.publishing_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.parsed_env::<usize>("BATCH_SIZE", "expected a positive integer")? {
            config.writer_group.batch_size = value;
        }
        if let Some(value) = self.parsed_env::<usize>("MAX_MESSAGE_SIZE", "expected a size in bytes")? {
            config.writer_group.max_network_message_size = value;
        }

        if let Some(value) = self.env("SINK_URL") {
            config.sink.url = Some(value);
        }
        if let Some(value) = self.env("LOG_PAYLOADS") {
            config.sink.log_payloads = parse_bool(&value);
        }

        if let Some(value) = self.env("LOG_LEVEL") {
            match parse_log_level(&value) {
                Some(level) => config.logging.level = level,
                None => warn!(value = %value, "Ignoring unknown log level override"),
            }
        }
        if let Some(value) = self.env("LOG_FORMAT") {
            match parse_log_format(&value) {
                Some(format) => config.logging.format = format,
                None => warn!(value = %value, "Ignoring unknown log format override"),
            }
        }

        Ok(())
    }

    fn env_name(&self, key: &str) -> String {
        format!("{}_{}", self.env_prefix, key)
    }

    fn env(&self, key: &str) -> Option<String> {
        let name = self.env_name(key);
        let value = env::var(&name).ok()?;
        debug!(variable = %name, "Applying environment override");
        Some(value)
    }

    fn parsed_env<T: FromStr>(&self, key: &str, expected: &str) -> ConfigResult<Option<T>> {
        match self.env(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::invalid_env_var(self.env_name(key), expected)),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for [`ConfigLoader`].
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
}

impl ConfigLoaderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables environment variable handling.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Builds the loader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(enabled) = self.resolve_env_vars {
            loader.resolve_env_vars = enabled;
        }
        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// ConfigWatcher
// =============================================================================

/// Polls a configuration file's modification time.
///
/// The runtime uses it to pick up writer definitions edited in place.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    loader: ConfigLoader,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Creates a watcher for `path`. The current modification time becomes
    /// the baseline.
    pub fn new(path: impl Into<PathBuf>, loader: ConfigLoader) -> Self {
        let path = path.into();
        let last_modified = modified_time(&path);
        Self {
            path,
            loader,
            last_modified,
        }
    }

    /// Returns the watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the file was modified since the last call.
    pub fn has_changed(&mut self) -> bool {
        let Some(modified) = modified_time(&self.path) else {
            return false;
        };

        match self.last_modified {
            Some(last) if modified <= last => false,
            _ => {
                self.last_modified = Some(modified);
                true
            }
        }
    }

    /// Reloads the configuration if the file changed.
    pub fn reload_if_changed(&mut self) -> ConfigResult<Option<PublisherConfig>> {
        if self.has_changed() {
            self.reload().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Reloads the configuration unconditionally.
    pub fn reload(&self) -> ConfigResult<PublisherConfig> {
        self.loader.load(&self.path)
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

fn parse_log_level(value: &str) -> Option<LogLevel> {
    match value.to_lowercase().as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "text" | "pretty" => Some(LogFormat::Text),
        "compact" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<PublisherConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the given format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<PublisherConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RegistryKind, SinkKind};
    use opcpub_core::model::{MessageEncoding, MessageSchema, OrderingMode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
publisher:
  id: press-7
  queue_capacity: 512

registry:
  kind: memory
  debounce_ms: 50

writer_group:
  id: line-1
  name: Line 1
  encoding: uadp
  schema: pubsub
  batch_size: 20
  publishing_interval: 250
  keep_alive_time: 5000
  max_network_message_size: 4096
  ordering: by_writer

writers:
  - id: w1
    writer_group_id: line-1
    source:
      endpoint_url: opc.tcp://plc-1:4840
      variables:
        - node_id: "ns=2;s=Temperature"
          display_name: Temperature
          sampling_interval: 100

sink:
  kind: logging
  log_payloads: true

logging:
  level: debug
  format: json
"#;

    const TOML: &str = r#"
[publisher]
id = "press-8"

[writer_group]
id = "line-2"
encoding = "json"
schema = "samples"
batch_size = 1
publishing_interval = 1000

[[writers]]
id = "w9"
writer_group_id = "line-2"

[writers.source]
endpoint_url = "opc.tcp://plc-9:4840"

[[writers.source.events]]
event_notifier = "i=2253"
selected_fields = ["EventId", "Message", "Severity"]

[sink]
kind = "http"
url = "http://collector:8080/ingest"
"#;

    fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write_temp(YAML, ".yaml");
        let config = ConfigLoader::new().with_env_vars(false).load(file.path()).unwrap();

        assert_eq!(config.publisher.id, "press-7");
        assert_eq!(config.publisher.queue_capacity, 512);
        assert_eq!(config.registry.kind, RegistryKind::Memory);
        assert_eq!(config.registry.debounce_ms, 50);

        let group = &config.writer_group;
        assert_eq!(group.id.as_str(), "line-1");
        assert_eq!(group.encoding, MessageEncoding::Uadp);
        assert_eq!(group.schema, MessageSchema::PubSub);
        assert_eq!(group.batch_size, 20);
        assert_eq!(group.publishing_interval, Duration::from_millis(250));
        assert_eq!(group.keep_alive_time, Some(Duration::from_secs(5)));
        assert_eq!(group.ordering, OrderingMode::ByWriter);

        assert_eq!(config.writers.len(), 1);
        let variable = &config.writers[0].source.variables[0];
        assert_eq!(variable.node_id, "ns=2;s=Temperature");
        assert_eq!(variable.sampling_interval, Duration::from_millis(100));

        assert!(config.sink.log_payloads);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_toml() {
        let file = write_temp(TOML, ".toml");
        let config = ConfigLoader::new().with_env_vars(false).load(file.path()).unwrap();

        assert_eq!(config.writer_group.schema, MessageSchema::Samples);
        assert!(!config.writer_group.is_batched());
        assert_eq!(config.writers[0].source.events[0].selected_fields.len(), 3);
        assert_eq!(config.sink.kind, SinkKind::Http);
        assert_eq!(config.writer_group.keep_alive_time, None);
    }

    #[test]
    fn test_load_json() {
        let json = r#"{
            "writer_group": { "id": "line-3", "batch_size": 5 },
            "writers": [
                { "id": "w1", "writer_group_id": "line-3", "source": { "endpoint_url": "opc.tcp://a" } }
            ]
        }"#;
        let file = write_temp(json, ".json");
        let config = ConfigLoader::new().with_env_vars(false).load(file.path()).unwrap();

        assert_eq!(config.writer_group.batch_size, 5);
        assert_eq!(config.publisher.id, "opcpub");
        assert!(config.writers[0].enabled);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let file = write_temp("writer_group: [not, a, map", ".yaml");
        let err = ConfigLoader::new().with_env_vars(false).load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{:?}", err);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        let toml = r#"
[writer_group]
id = "line-1"

[[writers]]
id = "w1"
writer_group_id = "line-2"
source = { endpoint_url = "opc.tcp://a" }
"#;
        let err = ConfigLoader::new()
            .with_env_vars(false)
            .load_from_str(toml, ConfigFormat::Toml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ForeignWriter { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = "[writer_group]\nid = \"g\"\n\n[sink]\nkind = \"logging\"\nbogus = 1\n";
        assert!(ConfigLoader::new()
            .with_env_vars(false)
            .load_from_str(toml, ConfigFormat::Toml)
            .is_err());
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("p.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("p.TOML")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("p.json")).unwrap(), ConfigFormat::Json);
        assert!(matches!(
            ConfigFormat::from_path(Path::new("publisher")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        assert_eq!(ConfigFormat::Toml.extension(), "toml");
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let loader = ConfigLoader::new();
        let resolved =
            loader.resolve_env_placeholders("endpoint: ${OPCPUB_TEST_UNSET_ENDPOINT:http://fallback}");
        assert_eq!(resolved, "endpoint: http://fallback");
    }

    #[test]
    fn test_env_placeholder_resolution() {
        env::set_var("OPCPUB_TEST_PLACEHOLDER_ID", "press-42");
        let loader = ConfigLoader::new();
        assert_eq!(
            loader.resolve_env_placeholders("id: ${OPCPUB_TEST_PLACEHOLDER_ID:unused}"),
            "id: press-42"
        );
        assert_eq!(
            loader.resolve_env_placeholders("id: ${OPCPUB_TEST_PLACEHOLDER_MISSING}"),
            "id: ${OPCPUB_TEST_PLACEHOLDER_MISSING}"
        );
        assert_eq!(loader.resolve_env_placeholders("cost: ${unterminated"), "cost: ${unterminated");
    }

    #[test]
    fn test_env_overrides() {
        let prefix = "OPCPUB_TEST_OVERRIDE";
        env::set_var(format!("{}_PUBLISHER_ID", prefix), "from-env");
        env::set_var(format!("{}_PUBLISHING_INTERVAL_MS", prefix), "125");
        env::set_var(format!("{}_LOG_LEVEL", prefix), "warning");
        env::set_var(format!("{}_LOG_FORMAT", prefix), "compact");

        let config = ConfigLoader::new()
            .with_env_prefix(prefix)
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();

        assert_eq!(config.publisher.id, "from-env");
        assert_eq!(config.writer_group.publishing_interval, Duration::from_millis(125));
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_invalid_env_override() {
        let prefix = "OPCPUB_TEST_BAD_OVERRIDE";
        env::set_var(format!("{}_BATCH_SIZE", prefix), "many");

        let err = ConfigLoader::new()
            .with_env_prefix(prefix)
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_bool("Yes"));
        assert!(parse_bool("enabled"));
        assert!(!parse_bool("off"));
        assert_eq!(parse_log_level("TRACE"), Some(LogLevel::Trace));
        assert_eq!(parse_log_level("loud"), None);
        assert_eq!(parse_log_format("pretty"), Some(LogFormat::Text));
    }

    #[test]
    fn test_loader_builder() {
        let loader = ConfigLoader::builder()
            .env_prefix("PRESS")
            .resolve_env_vars(false)
            .build();
        assert_eq!(loader.env_prefix(), "PRESS");
        assert!(!loader.resolve_env_vars);
    }

    #[test]
    fn test_file_not_found() {
        let result = ConfigLoader::new().load("/nonexistent/opcpub/publisher.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_config_watcher_detects_rewrite() {
        let file = write_temp(YAML, ".yaml");
        let loader = ConfigLoader::new().with_env_vars(false);
        let mut watcher = ConfigWatcher::new(file.path(), loader);

        assert!(!watcher.has_changed());
        assert!(watcher.reload_if_changed().unwrap().is_none());

        let later = SystemTime::now() + Duration::from_secs(5);
        let handle = fs::OpenOptions::new().write(true).open(file.path()).unwrap();
        handle.set_modified(later).unwrap();

        let reloaded = watcher.reload_if_changed().unwrap().expect("change detected");
        assert_eq!(reloaded.publisher.id, "press-7");
        assert!(!watcher.has_changed());
    }
}
