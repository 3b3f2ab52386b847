// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcpub-bin
//!
//! CLI binary for the opcpub writer-group publisher.
//!
//! This crate provides the main binary entry point, including:
//!
//! - CLI argument parsing with clap
//! - Publisher runtime orchestration and config hot reload
//! - Graceful shutdown handling
//! - Logging initialization
//! - Command implementations (run, validate, version)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                             │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │    cli.rs   │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!                          │
//!            ┌─────────────┼─────────────┐
//!            ▼             ▼             ▼
//!     ┌────────────┐ ┌───────────┐ ┌───────────┐
//!     │   engine   │ │  loader   │ │ shutdown  │
//!     │ (opcpub-   │ │ (registry │ │           │
//!     │  engine)   │ │  sync)    │ │           │
//!     └────────────┘ └───────────┘ └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the publisher (default command)
//! opcpub
//!
//! # Start with a custom config
//! opcpub -c /etc/opcpub/publisher.yaml
//!
//! # Validate configuration
//! opcpub validate --strict
//!
//! # Show version
//! opcpub version
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{PublisherRuntime, RunningPublisher, RuntimeBuilder};
pub use shutdown::{ShutdownCoordinator, ShutdownGuard};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
