// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Builders for writer groups and data-set writers with test-friendly
//! defaults: group `g1`, no size limit, one-minute interval.

use std::time::Duration;

use opcpub_core::model::{
    DataSetWriter, MessageEncoding, MessageSchema, OrderingMode, PublishedEvent, PublishedVariable,
    WriterGroup,
};

// =============================================================================
// WriterGroup Builder
// =============================================================================

/// Builder for [`WriterGroup`] instances.
#[derive(Debug, Clone)]
pub struct GroupBuilder {
    group: WriterGroup,
}

impl Default for GroupBuilder {
    fn default() -> Self {
        Self::new("g1")
    }
}

impl GroupBuilder {
    /// Create a builder for the given group id.
    pub fn new(id: impl Into<String>) -> Self {
        let mut group = WriterGroup::new(id.into());
        group.publishing_interval = Duration::from_secs(60);
        group.max_network_message_size = 0;
        Self { group }
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.group.batch_size = batch_size;
        self
    }

    /// Set the publishing interval in milliseconds.
    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.group.publishing_interval = Duration::from_millis(ms);
        self
    }

    /// Set the keep-alive time in milliseconds.
    pub fn keep_alive_ms(mut self, ms: u64) -> Self {
        self.group.keep_alive_time = Some(Duration::from_millis(ms));
        self
    }

    /// Set the wire encoding.
    pub fn encoding(mut self, encoding: MessageEncoding) -> Self {
        self.group.encoding = encoding;
        self
    }

    /// Set the message schema.
    pub fn schema(mut self, schema: MessageSchema) -> Self {
        self.group.schema = schema;
        self
    }

    /// Set the maximum network message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.group.max_network_message_size = size;
        self
    }

    /// Set the ordering mode.
    pub fn ordering(mut self, ordering: OrderingMode) -> Self {
        self.group.ordering = ordering;
        self
    }

    /// Build the group.
    pub fn build(self) -> WriterGroup {
        self.group
    }
}

// =============================================================================
// DataSetWriter Builder
// =============================================================================

/// Builder for [`DataSetWriter`] instances.
#[derive(Debug, Clone)]
pub struct WriterBuilder {
    writer: DataSetWriter,
}

impl WriterBuilder {
    /// Create an enabled writer in group `g1`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            writer: DataSetWriter::new(id.into(), "g1", "opc.tcp://plc.test:4840"),
        }
    }

    /// Move the writer to another group.
    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.writer.writer_group_id = group_id.into().into();
        self
    }

    /// Set the source endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.writer.source.endpoint_url = url.into();
        self
    }

    /// Publish a variable.
    pub fn variable(mut self, node_id: impl Into<String>) -> Self {
        self.writer = self.writer.with_variable(PublishedVariable::new(node_id));
        self
    }

    /// Publish an event notifier.
    pub fn event(mut self, event_notifier: impl Into<String>) -> Self {
        self.writer = self.writer.with_event(PublishedEvent {
            event_notifier: event_notifier.into(),
            display_name: None,
            selected_fields: vec!["Message".to_string(), "Severity".to_string()],
        });
        self
    }

    /// Disable the writer.
    pub fn disabled(mut self) -> Self {
        self.writer.enabled = false;
        self
    }

    /// Build the writer.
    pub fn build(self) -> DataSetWriter {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let group = GroupBuilder::new("line-1").batch_size(5).interval_ms(20).build();
        assert_eq!(group.id.as_str(), "line-1");
        assert_eq!(group.batch_size, 5);
        assert!(group.is_batched());

        let writer = WriterBuilder::new("w1").group("line-1").variable("ns=2;s=A").event("i=2253").build();
        assert_eq!(writer.writer_group_id.as_str(), "line-1");
        assert_eq!(writer.item_count(), 2);
        assert!(writer.enabled);
    }
}
