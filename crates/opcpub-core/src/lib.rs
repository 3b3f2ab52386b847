// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcpub-core
//!
//! Core abstractions and shared types for the opcpub writer-group publisher.
//!
//! This crate provides the foundational types used across all opcpub
//! components:
//!
//! - **Types**: identifiers (`WriterGroupId`, `DataSetWriterId`), `Variant`, `DataValue`
//! - **Model**: `WriterGroup`, `DataSetWriter` and their content masks
//! - **Message**: `Notification` and `NetworkMessage`
//! - **State**: item/writer/group states and the `StateReporter` interfaces
//! - **Error**: unified error hierarchy
//! - **Trigger**: single-slot debounce trigger
//! - **Backoff**: exponential reconnect delays
//!
//! ## Example
//!
//! ```rust,ignore
//! use opcpub_core::message::Notification;
//! use opcpub_core::types::{DataSetWriterId, DataValue, Variant};
//!
//! let notification = Notification::sample(
//!     DataSetWriterId::new("writer-1"),
//!     1,
//!     "ns=2;s=Temperature",
//!     DataValue::good(Variant::Double(25.5)),
//! );
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod types;
pub mod model;
pub mod message;

// =============================================================================
// Runtime Support Modules
// =============================================================================

pub mod state;
pub mod trigger;
pub mod backoff;

// =============================================================================
// Re-exports
// =============================================================================

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use error::{
    ConfigError, EncodingError, EngineError, PublisherError, RegistryError, Result, SinkError,
    SourceError,
};
pub use message::{NetworkMessage, NetworkMessageKind, Notification, NotificationPayload};
pub use model::{
    DataSetContentMask, DataSetFieldContentMask, DataSetSource, DataSetWriter, MessageEncoding,
    MessageSchema, MessageSettings, NetworkMessageContentMask, OrderingMode, PublishedEvent,
    PublishedVariable, SecurityMode, SecuritySettings, WriterGroup,
};
pub use state::{
    CompositeStateReporter, GroupState, ItemState, NoopStateReporter, StateReporter,
    StatusRegistry, StatusSnapshot, TracingStateReporter, WriterState,
};
pub use trigger::DebounceTrigger;
pub use types::{DataSetWriterId, DataValue, EventField, StatusCode, Variant, WriterGroupId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
