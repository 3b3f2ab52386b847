// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Writer group and data-set writer configuration model.
//!
//! A [`WriterGroup`] owns a list of [`DataSetWriter`]s and carries the
//! settings shared by all of them: cadence, encoding, schema, size limit and
//! header profile. Writers are addressable on their own so the registry loader
//! can add and remove them one at a time.
//!
//! All types deserialize from the registry's JSON documents and from the
//! publisher configuration file; durations are expressed in milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::types::{DataSetWriterId, WriterGroupId};

// =============================================================================
// Encoding Settings
// =============================================================================

/// Wire encoding of network messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    /// OPC UA JSON mapping.
    #[default]
    Json,
    /// OPC UA binary (UADP) mapping.
    Uadp,
}

impl MessageEncoding {
    /// Returns the MIME content type of payloads in this encoding.
    pub fn content_type(&self) -> &'static str {
        match self {
            MessageEncoding::Json => "application/json",
            MessageEncoding::Uadp => "application/opcua+uadp",
        }
    }
}

impl fmt::Display for MessageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageEncoding::Json => write!(f, "json"),
            MessageEncoding::Uadp => write!(f, "uadp"),
        }
    }
}

/// Message schema used to lay out notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSchema {
    /// Standard PubSub network messages holding data-set messages.
    #[default]
    PubSub,
    /// Flat monitored-item samples, one object per notification.
    Samples,
}

impl fmt::Display for MessageSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSchema::PubSub => write!(f, "pubsub"),
            MessageSchema::Samples => write!(f, "samples"),
        }
    }
}

/// Ordering of data-set messages inside a network message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    /// Keep the order in which notifications arrived.
    #[default]
    Arrival,
    /// Group by writer id, then by sequence number within a writer.
    ByWriter,
    /// Order by sequence number.
    BySequence,
}

// =============================================================================
// Content Masks
// =============================================================================

/// Network message header profile.
///
/// Controls which optional network-level header fields are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkMessageContentMask {
    /// Emit the publisher id.
    pub publisher_id: bool,
    /// Emit the writer group id.
    pub writer_group_id: bool,
    /// Emit the network message sequence number (binary encoding only).
    pub sequence_number: bool,
    /// Emit the payload header listing the writers of the contained messages.
    pub payload_header: bool,
}

impl NetworkMessageContentMask {
    /// All header fields enabled.
    pub fn full() -> Self {
        Self {
            publisher_id: true,
            writer_group_id: true,
            sequence_number: true,
            payload_header: true,
        }
    }

    /// No optional header fields.
    pub fn minimal() -> Self {
        Self {
            publisher_id: false,
            writer_group_id: false,
            sequence_number: false,
            payload_header: false,
        }
    }
}

impl Default for NetworkMessageContentMask {
    fn default() -> Self {
        Self::full()
    }
}

/// Data-set message header content mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSetContentMask {
    /// Emit the data-set writer id.
    pub writer_id: bool,
    /// Emit the per-writer sequence number.
    pub sequence_number: bool,
    /// Emit the notification timestamp.
    pub timestamp: bool,
    /// Emit the node id and display name of the notification.
    pub node_info: bool,
}

impl DataSetContentMask {
    /// All header fields enabled.
    pub fn full() -> Self {
        Self {
            writer_id: true,
            sequence_number: true,
            timestamp: true,
            node_info: true,
        }
    }

    /// No optional header fields.
    pub fn minimal() -> Self {
        Self {
            writer_id: false,
            sequence_number: false,
            timestamp: false,
            node_info: false,
        }
    }
}

impl Default for DataSetContentMask {
    fn default() -> Self {
        Self::full()
    }
}

/// Field content mask: which parts of a sampled `DataValue` are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSetFieldContentMask {
    /// Emit the status code.
    pub status_code: bool,
    /// Emit the source timestamp.
    pub source_timestamp: bool,
    /// Emit the server timestamp.
    pub server_timestamp: bool,
    /// Emit the bare value without the `DataValue` wrapper.
    ///
    /// When set, the other flags are ignored.
    pub raw_data: bool,
}

impl DataSetFieldContentMask {
    /// Full `DataValue` with status and both timestamps.
    pub fn full() -> Self {
        Self {
            status_code: true,
            source_timestamp: true,
            server_timestamp: true,
            raw_data: false,
        }
    }

    /// Bare values only.
    pub fn raw() -> Self {
        Self {
            status_code: false,
            source_timestamp: false,
            server_timestamp: false,
            raw_data: true,
        }
    }
}

impl Default for DataSetFieldContentMask {
    fn default() -> Self {
        Self::full()
    }
}

// =============================================================================
// Security
// =============================================================================

/// Message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,
    /// Messages are signed.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

/// Security settings of a writer group.
///
/// Carried through to the transport; the encoder does not sign or encrypt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Security mode.
    pub mode: SecurityMode,
    /// Security policy URI.
    pub policy_uri: Option<String>,
    /// Security key group id.
    pub key_group_id: Option<String>,
}

// =============================================================================
// DataSetWriter
// =============================================================================

/// A published variable of a data-set source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedVariable {
    /// Node id of the variable.
    pub node_id: String,

    /// Optional display name used as the field name.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Sampling interval.
    #[serde(default = "default_sampling_interval", with = "duration_millis")]
    pub sampling_interval: Duration,
}

impl PublishedVariable {
    /// Creates a published variable with the default sampling interval.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: None,
            sampling_interval: default_sampling_interval(),
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// A published event source of a data-set source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Node id of the event notifier.
    pub event_notifier: String,

    /// Optional display name.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Names of the selected event fields.
    #[serde(default)]
    pub selected_fields: Vec<String>,
}

/// Where a writer's data comes from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSetSource {
    /// Endpoint URL of the server to subscribe to.
    pub endpoint_url: String,

    /// Published variables.
    #[serde(default)]
    pub variables: Vec<PublishedVariable>,

    /// Published events.
    #[serde(default)]
    pub events: Vec<PublishedEvent>,
}

/// Per-writer message settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    /// Number of delta frames between key frames.
    pub key_frame_count: u32,
    /// Major meta-data version.
    pub meta_data_major_version: u32,
    /// Minor meta-data version.
    pub meta_data_minor_version: u32,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            key_frame_count: 1,
            meta_data_major_version: 1,
            meta_data_minor_version: 0,
        }
    }
}

/// A data-set writer: one logical stream of notifications from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSetWriter {
    /// Writer id.
    pub id: DataSetWriterId,

    /// Owning writer group.
    pub writer_group_id: WriterGroupId,

    /// Optional human readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Data-set source description.
    pub source: DataSetSource,

    /// Field content mask.
    #[serde(default)]
    pub field_content_mask: DataSetFieldContentMask,

    /// Data-set message content mask.
    #[serde(default)]
    pub data_set_content_mask: DataSetContentMask,

    /// Message settings.
    #[serde(default)]
    pub message_settings: MessageSettings,

    /// Whether the writer publishes.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DataSetWriter {
    /// Creates an enabled writer with an empty source.
    pub fn new(
        id: impl Into<DataSetWriterId>,
        writer_group_id: impl Into<WriterGroupId>,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            writer_group_id: writer_group_id.into(),
            name: None,
            source: DataSetSource {
                endpoint_url: endpoint_url.into(),
                variables: Vec::new(),
                events: Vec::new(),
            },
            field_content_mask: DataSetFieldContentMask::default(),
            data_set_content_mask: DataSetContentMask::default(),
            message_settings: MessageSettings::default(),
            enabled: true,
        }
    }

    /// Adds a published variable.
    pub fn with_variable(mut self, variable: PublishedVariable) -> Self {
        self.source.variables.push(variable);
        self
    }

    /// Adds a published event.
    pub fn with_event(mut self, event: PublishedEvent) -> Self {
        self.source.events.push(event);
        self
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Number of published items (variables and events).
    pub fn item_count(&self) -> usize {
        self.source.variables.len() + self.source.events.len()
    }
}

// =============================================================================
// WriterGroup
// =============================================================================

/// A writer group: a set of writers sharing cadence, encoding and transport
/// settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterGroup {
    /// Group id.
    pub id: WriterGroupId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Relative priority among groups of the publisher.
    #[serde(default)]
    pub priority: u8,

    /// Wire encoding.
    #[serde(default)]
    pub encoding: MessageEncoding,

    /// Message schema.
    #[serde(default)]
    pub schema: MessageSchema,

    /// Number of notifications that triggers a publish before the interval elapses.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "duration_millis")]
    pub publishing_interval: Duration,

    /// Keep-alive time; `None` disables keep-alive messages.
    #[serde(default, with = "option_duration_millis")]
    pub keep_alive_time: Option<Duration>,

    /// Maximum network message size in bytes; `0` means unbounded.
    #[serde(default = "default_max_network_message_size")]
    pub max_network_message_size: usize,

    /// Security settings.
    #[serde(default)]
    pub security: SecuritySettings,

    /// Network message header profile.
    #[serde(default)]
    pub header_profile: NetworkMessageContentMask,

    /// Ordering of data-set messages within a network message.
    #[serde(default)]
    pub ordering: OrderingMode,

    /// Writers configured with the group.
    #[serde(default)]
    pub writers: Vec<DataSetWriter>,
}

impl WriterGroup {
    /// Creates a group with default settings and no writers.
    pub fn new(id: impl Into<WriterGroupId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            priority: 0,
            encoding: MessageEncoding::default(),
            schema: MessageSchema::default(),
            batch_size: default_batch_size(),
            publishing_interval: default_publishing_interval(),
            keep_alive_time: None,
            max_network_message_size: default_max_network_message_size(),
            security: SecuritySettings::default(),
            header_profile: NetworkMessageContentMask::default(),
            ordering: OrderingMode::default(),
            writers: Vec::new(),
        }
    }

    /// Returns `true` if notifications are packed into batched messages.
    pub fn is_batched(&self) -> bool {
        self.batch_size > 1
    }
}

// =============================================================================
// Defaults & Serde Helpers
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_batch_size() -> usize {
    50
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_network_message_size() -> usize {
    256 * 1024
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.filter(|m| *m > 0).map(Duration::from_millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_deserialize_defaults() {
        let json = r#"{
            "id": "w1",
            "writer_group_id": "g1",
            "source": {
                "endpoint_url": "opc.tcp://localhost:4840",
                "variables": [{ "node_id": "ns=2;s=Temp", "sampling_interval": 250 }]
            }
        }"#;

        let writer: DataSetWriter = serde_json::from_str(json).unwrap();
        assert_eq!(writer.id.as_str(), "w1");
        assert!(writer.enabled);
        assert_eq!(writer.field_content_mask, DataSetFieldContentMask::full());
        assert_eq!(
            writer.source.variables[0].sampling_interval,
            Duration::from_millis(250)
        );
        assert_eq!(writer.item_count(), 1);
    }

    #[test]
    fn test_group_deserialize() {
        let json = r#"{
            "id": "g1",
            "encoding": "uadp",
            "schema": "samples",
            "batch_size": 10,
            "publishing_interval": 500,
            "keep_alive_time": 5000,
            "ordering": "by_writer"
        }"#;

        let group: WriterGroup = serde_json::from_str(json).unwrap();
        assert_eq!(group.encoding, MessageEncoding::Uadp);
        assert_eq!(group.schema, MessageSchema::Samples);
        assert_eq!(group.publishing_interval, Duration::from_millis(500));
        assert_eq!(group.keep_alive_time, Some(Duration::from_secs(5)));
        assert_eq!(group.ordering, OrderingMode::ByWriter);
        assert!(group.is_batched());
    }

    #[test]
    fn test_zero_keep_alive_disables() {
        let json = r#"{ "id": "g1", "keep_alive_time": 0 }"#;
        let group: WriterGroup = serde_json::from_str(json).unwrap();
        assert!(group.keep_alive_time.is_none());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(MessageEncoding::Json.content_type(), "application/json");
        assert_eq!(MessageEncoding::Uadp.content_type(), "application/opcua+uadp");
    }

    #[test]
    fn test_writer_builder() {
        let writer = DataSetWriter::new("w1", "g1", "opc.tcp://plc:4840")
            .with_variable(PublishedVariable::new("ns=2;s=A").with_display_name("A"))
            .with_enabled(false);

        assert!(!writer.enabled);
        assert_eq!(writer.source.variables[0].display_name.as_deref(), Some("A"));
    }
}
