// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcpub-config
//!
//! Configuration management for the opcpub writer-group publisher.
//!
//! ## Features
//!
//! - **Schema Definition**: publisher, registry, writer group, writers, sink,
//!   source and logging sections with validation
//! - **Multi-Format Support**: YAML, TOML, and JSON configuration files
//! - **Environment Overrides**: `${VAR:default}` placeholders and `OPCPUB_*` variables
//! - **Hot Reload**: modification-time polling through [`ConfigWatcher`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use opcpub_config::loader::load_config;
//!
//! let config = load_config("publisher.yaml").unwrap();
//!
//! println!("Writer group: {}", config.writer_group.id);
//! println!("Writers: {}", config.all_writers().count());
//! ```
//!
//! ## Configuration Schema
//!
//! - `publisher` - publisher id, queue capacity, reconnect backoff
//! - `registry` - where writer definitions come from
//! - `writer_group` - cadence, encoding, schema, size limit, header profile
//! - `writers` - writer definitions served by the in-memory registry
//! - `sink` - where network messages go
//! - `source` - where samples come from
//! - `logging` - logging configuration

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};

pub use schema::{
    LogFormat, LogLevel, LoggingConfig, PublisherConfig, PublisherSection, RegistryConfig,
    RegistryKind, SinkConfig, SinkKind, SourceConfig, SourceKind,
};

pub use loader::{
    load_config, load_config_str, ConfigFormat, ConfigLoader, ConfigLoaderBuilder, ConfigWatcher,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

// =============================================================================
// Prelude
// =============================================================================

/// Convenience re-exports for common use cases.
pub mod prelude {
    pub use crate::error::{ConfigError, ConfigResult};
    pub use crate::loader::{load_config, ConfigLoader};
    pub use crate::schema::{PublisherConfig, RegistryKind, SinkKind};
}
