// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcpub-encoding
//!
//! Network message encoding for the opcpub writer-group publisher.
//!
//! - **Encoder**: [`NetworkMessageEncoder`] turns notifications into
//!   size-bounded network messages, one per notification or batched
//! - **Formats**: OPC UA JSON mapping and a simplified UADP binary layout,
//!   each in the PubSub and Samples schema
//! - **Decoder**: [`decode`] restores notifications from a payload
//! - **Stats**: lock-free running counters ([`EncoderStats`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use opcpub_encoding::{EncodingContext, NetworkMessageEncoder};
//!
//! let encoder = NetworkMessageEncoder::new();
//! let ctx = EncodingContext::for_group(&group, Some("publisher-1".into()));
//! for message in encoder.encode_batch(&ctx, notifications) {
//!     sink.send(&[message]).await?;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod decoder;
pub mod encoder;
pub mod json;
pub mod stats;

mod format;
mod uadp;

pub use context::{ContentMask, EncodingContext};
pub use decoder::{decode, decode_message};
pub use encoder::{apply_ordering, NetworkMessageEncoder};
pub use json::{variant_from_json, variant_to_json};
pub use stats::EncoderStats;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
