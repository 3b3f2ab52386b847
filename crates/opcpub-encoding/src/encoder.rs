// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Network message encoder.
//!
//! # Architecture
//!
//! ```text
//! Vec<Notification>
//!        │ order (Arrival / ByWriter / BySequence)
//!        ▼
//! ┌────────────────┐   encode_item    ┌─────────┐   accepts?   ┌──────────┐
//! │ notification   │ ───────────────▶ │ item    │ ───────────▶ │ Frame    │──▶ NetworkMessage
//! └────────────────┘                  └─────────┘   (exact     └──────────┘
//!                                          │         size)
//!                                          └── alone too large ──▶ dropped + counted
//! ```
//!
//! The encoder holds no per-call state; its counters and network message
//! sequence are atomics, so a single instance can be shared by concurrent
//! encode calls.

use bytes::Bytes;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use opcpub_core::message::{NetworkMessage, NetworkMessageKind, Notification};
use opcpub_core::model::OrderingMode;

use crate::context::EncodingContext;
use crate::format::{wire_format, Frame, WireFormat};
use crate::stats::{EncoderCounters, EncoderStats};

/// Turns notifications into size-bounded network messages.
pub struct NetworkMessageEncoder {
    counters: EncoderCounters,
    sequence: AtomicU32,
}

impl NetworkMessageEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self {
            counters: EncoderCounters::default(),
            sequence: AtomicU32::new(0),
        }
    }

    /// Encodes one network message per notification.
    ///
    /// Notifications whose message alone exceeds `max_message_size` are
    /// dropped and counted.
    pub fn encode(&self, ctx: &EncodingContext, notifications: Vec<Notification>) -> Vec<NetworkMessage> {
        self.run(ctx, notifications, false)
    }

    /// Packs notifications into as few network messages as `max_message_size`
    /// allows, preserving the configured ordering.
    pub fn encode_batch(&self, ctx: &EncodingContext, notifications: Vec<Notification>) -> Vec<NetworkMessage> {
        self.run(ctx, notifications, true)
    }

    /// Encodes a keep-alive network message.
    pub fn encode_keep_alive(&self, ctx: &EncodingContext) -> NetworkMessage {
        let format = wire_format(ctx.encoding);
        let message_id = new_message_id();
        let sequence_number = self.next_sequence();
        let payload = format.keep_alive(ctx, &message_id, sequence_number);
        self.counters.record_message(0, payload.len());

        NetworkMessage {
            message_id,
            writer_group_id: ctx.writer_group_id.clone(),
            sequence_number,
            encoding: ctx.encoding,
            schema: ctx.schema,
            kind: NetworkMessageKind::KeepAlive,
            notification_count: 0,
            payload: Bytes::from(payload),
            created_at: Utc::now(),
        }
    }

    /// Returns a snapshot of the running counters.
    pub fn stats(&self) -> EncoderStats {
        self.counters.snapshot()
    }

    fn run(&self, ctx: &EncodingContext, notifications: Vec<Notification>, batched: bool) -> Vec<NetworkMessage> {
        if notifications.is_empty() {
            return Vec::new();
        }

        let format = wire_format(ctx.encoding);
        let notifications = apply_ordering(notifications, ctx.ordering);
        self.counters.record_input(notifications.len());

        let mut messages = Vec::new();
        let mut frame = new_frame(format, ctx, batched);

        for notification in &notifications {
            let item = match format.encode_item(ctx, notification) {
                Ok(item) => item,
                Err(e) => {
                    self.counters.record_dropped();
                    tracing::warn!(
                        writer_id = %notification.writer_id,
                        sequence_number = notification.sequence_number,
                        error = %e,
                        "Failed to encode notification, dropping"
                    );
                    continue;
                }
            };

            if !frame.is_empty() && !frame.accepts(format, ctx, &item, &notification.writer_id) {
                let full = std::mem::replace(&mut frame, new_frame(format, ctx, batched));
                messages.push(self.finish(format, ctx, full));
            }

            if frame.accepts(format, ctx, &item, &notification.writer_id) {
                frame.push(item, notification.writer_id.clone());
            } else {
                self.counters.record_dropped();
                tracing::warn!(
                    writer_id = %notification.writer_id,
                    sequence_number = notification.sequence_number,
                    size = frame.size_with(format, ctx, &item, &notification.writer_id),
                    max_message_size = ctx.max_message_size,
                    "Notification exceeds max message size, dropping"
                );
            }
        }

        if !frame.is_empty() {
            messages.push(self.finish(format, ctx, frame));
        }

        tracing::trace!(
            group_id = %ctx.writer_group_id,
            notifications = notifications.len(),
            messages = messages.len(),
            batched,
            "Encoded notifications"
        );
        messages
    }

    fn finish(&self, format: &dyn WireFormat, ctx: &EncodingContext, frame: Frame) -> NetworkMessage {
        let sequence_number = self.next_sequence();
        let payload = format.assemble(ctx, &frame, sequence_number);
        debug_assert_eq!(payload.len(), frame.size(format, ctx));
        self.counters.record_message(frame.len(), payload.len());

        NetworkMessage {
            message_id: frame.message_id().to_string(),
            writer_group_id: ctx.writer_group_id.clone(),
            sequence_number,
            encoding: ctx.encoding,
            schema: ctx.schema,
            kind: NetworkMessageKind::Data,
            notification_count: frame.len(),
            payload: Bytes::from(payload),
            created_at: Utc::now(),
        }
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

impl Default for NetworkMessageEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NetworkMessageEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMessageEncoder")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}

fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

fn new_frame(format: &dyn WireFormat, ctx: &EncodingContext, batched: bool) -> Frame {
    let message_id = new_message_id();
    let header_size = format.header_size(ctx, &message_id, batched);
    Frame::new(message_id, header_size, batched)
}

/// Orders notifications for encoding. Sorting is stable, so `ByWriter`
/// keeps arrival order for equal sequence numbers within a writer.
pub fn apply_ordering(mut notifications: Vec<Notification>, ordering: OrderingMode) -> Vec<Notification> {
    match ordering {
        OrderingMode::Arrival => {}
        OrderingMode::ByWriter => notifications.sort_by(|a, b| {
            a.writer_id
                .cmp(&b.writer_id)
                .then(a.sequence_number.cmp(&b.sequence_number))
        }),
        OrderingMode::BySequence => notifications.sort_by_key(|n| n.sequence_number),
    }
    notifications
}
