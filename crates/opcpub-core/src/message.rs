// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notifications and network messages.
//!
//! ```text
//! DataSetWriter subscription ──▶ Notification ──▶ Encoder ──▶ NetworkMessage ──▶ Sink
//! ```
//!
//! A [`Notification`] is produced once by a writer subscription and consumed
//! once by the encoder. A [`NetworkMessage`] is immutable once produced; its
//! payload is a reference-counted [`Bytes`] buffer so sinks can fan it out
//! without copying.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::model::{MessageEncoding, MessageSchema};
use crate::types::{DataSetWriterId, DataValue, EventField, WriterGroupId};

// =============================================================================
// Notification
// =============================================================================

/// Payload of a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    /// A sampled variable value.
    Sample(DataValue),
    /// An event instance with its selected fields.
    Event(Vec<EventField>),
}

/// A single sampled value or event instance produced by a writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Writer that produced the notification.
    pub writer_id: DataSetWriterId,
    /// Per-writer monotonic sequence number.
    pub sequence_number: u32,
    /// When the notification was produced.
    pub timestamp: DateTime<Utc>,
    /// Node id of the variable or event notifier.
    pub node_id: String,
    /// Optional display name of the item.
    pub display_name: Option<String>,
    /// Sample or event payload.
    pub payload: NotificationPayload,
}

impl Notification {
    /// Creates a sample notification timestamped now.
    pub fn sample(
        writer_id: DataSetWriterId,
        sequence_number: u32,
        node_id: impl Into<String>,
        value: DataValue,
    ) -> Self {
        Self {
            writer_id,
            sequence_number,
            timestamp: Utc::now(),
            node_id: node_id.into(),
            display_name: None,
            payload: NotificationPayload::Sample(value),
        }
    }

    /// Creates an event notification timestamped now.
    pub fn event(
        writer_id: DataSetWriterId,
        sequence_number: u32,
        event_notifier: impl Into<String>,
        fields: Vec<EventField>,
    ) -> Self {
        Self {
            writer_id,
            sequence_number,
            timestamp: Utc::now(),
            node_id: event_notifier.into(),
            display_name: None,
            payload: NotificationPayload::Event(fields),
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns `true` for event notifications.
    #[inline]
    pub fn is_event(&self) -> bool {
        matches!(self.payload, NotificationPayload::Event(_))
    }

    /// Returns the field name used when the notification is laid out in a
    /// data-set message payload.
    pub fn field_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.node_id)
    }
}

// =============================================================================
// NetworkMessage
// =============================================================================

/// Kind of network message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkMessageKind {
    /// Carries data-set messages.
    Data,
    /// Carries no data; signals the publisher is alive.
    KeepAlive,
}

impl NetworkMessageKind {
    /// Returns the message type string used on the wire.
    pub fn message_type(&self) -> &'static str {
        match self {
            NetworkMessageKind::Data => "ua-data",
            NetworkMessageKind::KeepAlive => "ua-keepalive",
        }
    }
}

/// An encoded, transport-ready network message.
#[derive(Clone, PartialEq)]
pub struct NetworkMessage {
    /// Unique message id.
    pub message_id: String,
    /// Group that produced the message.
    pub writer_group_id: WriterGroupId,
    /// Encoder-wide network message sequence number.
    pub sequence_number: u32,
    /// Wire encoding of the payload.
    pub encoding: MessageEncoding,
    /// Message schema of the payload.
    pub schema: MessageSchema,
    /// Data or keep-alive.
    pub kind: NetworkMessageKind,
    /// Number of notifications encoded in the payload.
    pub notification_count: usize,
    /// Encoded bytes.
    pub payload: Bytes,
    /// When the message was encoded.
    pub created_at: DateTime<Utc>,
}

impl NetworkMessage {
    /// Returns the payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the MIME content type of the payload.
    #[inline]
    pub fn content_type(&self) -> &'static str {
        self.encoding.content_type()
    }

    /// Returns `true` for keep-alive messages.
    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.kind == NetworkMessageKind::KeepAlive
    }
}

impl fmt::Debug for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMessage")
            .field("message_id", &self.message_id)
            .field("writer_group_id", &self.writer_group_id)
            .field("sequence_number", &self.sequence_number)
            .field("encoding", &self.encoding)
            .field("schema", &self.schema)
            .field("kind", &self.kind)
            .field("notification_count", &self.notification_count)
            .field("size", &self.payload.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variant;

    #[test]
    fn test_sample_notification() {
        let n = Notification::sample(
            DataSetWriterId::new("w1"),
            7,
            "ns=2;s=Temp",
            DataValue::good(Variant::Double(1.5)),
        );
        assert!(!n.is_event());
        assert_eq!(n.field_name(), "ns=2;s=Temp");

        let n = n.with_display_name("Temp");
        assert_eq!(n.field_name(), "Temp");
    }

    #[test]
    fn test_event_notification() {
        let n = Notification::event(
            DataSetWriterId::new("w1"),
            1,
            "ns=0;i=2253",
            vec![EventField::new("Message", "overheat")],
        );
        assert!(n.is_event());
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(NetworkMessageKind::Data.message_type(), "ua-data");
        assert_eq!(NetworkMessageKind::KeepAlive.message_type(), "ua-keepalive");
    }
}
