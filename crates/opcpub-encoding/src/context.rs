// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Encoding context: everything the encoder needs to know about the group
//! besides the notifications themselves.

use std::collections::HashMap;

use opcpub_core::model::{
    DataSetContentMask, DataSetFieldContentMask, MessageEncoding, MessageSchema,
    NetworkMessageContentMask, OrderingMode, WriterGroup,
};
use opcpub_core::types::{DataSetWriterId, WriterGroupId};

/// Data-set and field content masks of one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentMask {
    /// Data-set message header mask.
    pub data_set: DataSetContentMask,
    /// Field mask.
    pub field: DataSetFieldContentMask,
}

impl ContentMask {
    /// Everything enabled; the only mask the decoder fully round-trips.
    pub fn full() -> Self {
        Self {
            data_set: DataSetContentMask::full(),
            field: DataSetFieldContentMask::full(),
        }
    }
}

/// Settings for one encode call.
#[derive(Debug, Clone)]
pub struct EncodingContext {
    /// Group that owns the notifications.
    pub writer_group_id: WriterGroupId,
    /// Wire encoding.
    pub encoding: MessageEncoding,
    /// Message schema.
    pub schema: MessageSchema,
    /// Publisher id emitted when the header profile asks for it.
    pub publisher_id: Option<String>,
    /// Network message header profile.
    pub header_profile: NetworkMessageContentMask,
    /// Mask applied to writers without an entry in `writer_masks`.
    pub content_mask: ContentMask,
    /// Per-writer masks.
    pub writer_masks: HashMap<DataSetWriterId, ContentMask>,
    /// Ordering of data-set messages.
    pub ordering: OrderingMode,
    /// Maximum payload size in bytes, `0` for unbounded.
    pub max_message_size: usize,
}

impl EncodingContext {
    /// Creates a JSON/PubSub context with full masks and no size limit.
    pub fn new(writer_group_id: impl Into<WriterGroupId>) -> Self {
        Self {
            writer_group_id: writer_group_id.into(),
            encoding: MessageEncoding::Json,
            schema: MessageSchema::PubSub,
            publisher_id: None,
            header_profile: NetworkMessageContentMask::full(),
            content_mask: ContentMask::full(),
            writer_masks: HashMap::new(),
            ordering: OrderingMode::Arrival,
            max_message_size: 0,
        }
    }

    /// Builds the context of a writer group, taking per-writer masks from
    /// the group's configured writers.
    pub fn for_group(group: &WriterGroup, publisher_id: Option<String>) -> Self {
        let writer_masks = group
            .writers
            .iter()
            .map(|w| {
                (
                    w.id.clone(),
                    ContentMask {
                        data_set: w.data_set_content_mask,
                        field: w.field_content_mask,
                    },
                )
            })
            .collect();

        Self {
            writer_group_id: group.id.clone(),
            encoding: group.encoding,
            schema: group.schema,
            publisher_id,
            header_profile: group.header_profile,
            content_mask: ContentMask::full(),
            writer_masks,
            ordering: group.ordering,
            max_message_size: group.max_network_message_size,
        }
    }

    /// Sets the encoding.
    pub fn with_encoding(mut self, encoding: MessageEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the schema.
    pub fn with_schema(mut self, schema: MessageSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the publisher id.
    pub fn with_publisher_id(mut self, publisher_id: impl Into<String>) -> Self {
        self.publisher_id = Some(publisher_id.into());
        self
    }

    /// Sets the header profile.
    pub fn with_header_profile(mut self, header_profile: NetworkMessageContentMask) -> Self {
        self.header_profile = header_profile;
        self
    }

    /// Sets the default content mask.
    pub fn with_content_mask(mut self, mask: ContentMask) -> Self {
        self.content_mask = mask;
        self
    }

    /// Sets the ordering.
    pub fn with_ordering(mut self, ordering: OrderingMode) -> Self {
        self.ordering = ordering;
        self
    }

    /// Sets the maximum message size.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Returns the content mask of a writer.
    pub fn mask_for(&self, writer_id: &DataSetWriterId) -> ContentMask {
        self.writer_masks
            .get(writer_id)
            .copied()
            .unwrap_or(self.content_mask)
    }

    /// Returns `true` if `size` fits under the configured limit.
    #[inline]
    pub fn fits(&self, size: usize) -> bool {
        self.max_message_size == 0 || size <= self.max_message_size
    }

    /// Returns the publisher id if the header profile emits it.
    pub(crate) fn header_publisher_id(&self) -> Option<&str> {
        if self.header_profile.publisher_id {
            self.publisher_id.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcpub_core::model::DataSetWriter;

    #[test]
    fn test_fits() {
        let ctx = EncodingContext::new("g1");
        assert!(ctx.fits(usize::MAX));

        let ctx = ctx.with_max_message_size(100);
        assert!(ctx.fits(100));
        assert!(!ctx.fits(101));
    }

    #[test]
    fn test_for_group_masks() {
        let mut group = WriterGroup::new("g1");
        let mut writer = DataSetWriter::new("w1", "g1", "opc.tcp://localhost:4840");
        writer.field_content_mask = DataSetFieldContentMask::raw();
        group.writers.push(writer);

        let ctx = EncodingContext::for_group(&group, Some("pub-1".into()));
        assert!(ctx.mask_for(&"w1".into()).field.raw_data);
        assert!(!ctx.mask_for(&"w2".into()).field.raw_data);
        assert_eq!(ctx.header_publisher_id(), Some("pub-1"));
    }
}
