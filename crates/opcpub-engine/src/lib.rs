// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcpub-engine
//!
//! Runtime half of the opcpub data plane.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  add/remove   ┌─────────────────────────────────────┐
//! │ WriterRegistry   │──────────────▶│          WriterGroupEngine          │
//! │ Loader           │               │                                     │
//! └────────▲─────────┘               │  ┌────────────┐   ┌──────────────┐  │
//!          │ GET /v2/writers/{id}    │  │ writer     │──▶│  collector   │  │
//! ┌────────┴─────────┐               │  │ tasks (N)  │   │ (batch/tick) │  │
//! │ RegistryClient   │               │  └─────▲──────┘   └──────┬───────┘  │
//! └──────────────────┘               │        │                 │ encode   │
//!                                    └────────┼─────────────────┼─────────┘
//!                                             │                 ▼
//!                                    ┌────────┴───────┐  ┌──────────────────┐
//!                                    │ DataSetSource  │  │NetworkMessageSink│
//!                                    └────────────────┘  └──────────────────┘
//! ```
//!
//! - [`source`]: protocol sources and their subscriptions
//! - [`subscription`]: the per-writer task assigning sequence numbers
//! - [`engine`]: the writer-group collect/encode/publish loop
//! - [`sink`]: publishing sinks
//! - [`registry`]: registry clients
//! - [`loader`]: debounced registry reconciliation

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Collaborators
// =============================================================================

pub mod registry;
pub mod sink;
pub mod source;

// =============================================================================
// Runtime
// =============================================================================

pub mod engine;
pub mod loader;
pub mod subscription;

// =============================================================================
// Re-exports
// =============================================================================

pub use engine::{
    EngineConfig, EngineState, EngineStats, WriterGroupEngine, WriterGroupEngineBuilder,
    WriterSetController,
};
pub use loader::{LoadState, LoaderConfig, ReconcileReport, WriterRegistryLoader};
pub use registry::{HttpRegistryClient, InMemoryRegistry, RegistryClient};
pub use sink::{ChannelSink, HttpMessageSink, LoggingSink, MockMessageSink, NetworkMessageSink};
pub use source::{
    ChannelSource, DataSetSource, SimulatedSource, SourceEvent, SourceHandle, SourceSubscription,
};
pub use subscription::{DataSetWriterSubscription, Undelivered};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
