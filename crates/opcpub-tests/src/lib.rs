// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcpub Integration Tests
//!
//! Integration tests for the opcpub writer-group publisher, plus the shared
//! utilities they are built from.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Pre-built writers, groups and notifications
//!   - `builders`: Builders for writer groups and data-set writers
//!   - `assertions`: Assertions over published network messages
//!   - `mocks`: Recording writer-set controller
//!   - `harness`: Registry, loader, engine and sink wired together
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p opcpub-tests
//!
//! # Run a specific suite
//! cargo test -p opcpub-tests --test integration_pipeline
//! cargo test -p opcpub-tests --test integration_encoding
//! cargo test -p opcpub-tests --test integration_config
//! ```
//!
//! ## Using the Harness
//!
//! ```rust,ignore
//! use opcpub_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = PublisherHarness::start(GroupFixtures::batched(10), [WriterFixtures::writer("w1")]).await;
//!     harness.source.handle("w1").sample("n1", DataValue::good(Variant::Int32(1)));
//!     eventually(|| harness.sink.notification_count() == 1).await;
//!     harness.stop().await;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::builders::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{eventually, init_test_logging, temp_test_dir};
}
