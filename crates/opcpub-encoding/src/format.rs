// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire format abstraction shared by the JSON and UADP encodings.
//!
//! A network message is built as a [`Frame`]: a header whose size is fixed
//! once the message id is known, plus individually encoded data-set messages.
//! Each format reports the exact byte size of a frame before assembling it,
//! which is what makes the `max_message_size` bound exact.

use opcpub_core::error::EncodingError;
use opcpub_core::message::Notification;
use opcpub_core::model::MessageEncoding;
use opcpub_core::types::DataSetWriterId;

use crate::context::EncodingContext;
use crate::json::JsonFormat;
use crate::uadp::UadpFormat;

/// One wire encoding.
pub(crate) trait WireFormat: Send + Sync {
    /// Encodes a single data-set message (or monitored-item message).
    fn encode_item(
        &self,
        ctx: &EncodingContext,
        notification: &Notification,
    ) -> Result<Vec<u8>, EncodingError>;

    /// Size of everything in a frame that does not depend on its items.
    fn header_size(&self, ctx: &EncodingContext, message_id: &str, batched: bool) -> usize;

    /// Size of the item-dependent part of `frame`, optionally with one more
    /// item of `(item_len, writer_id_len)` appended.
    fn body_size(&self, ctx: &EncodingContext, frame: &Frame, extra: Option<(usize, usize)>) -> usize;

    /// Whether `frame` can structurally hold one more item of `item_len` bytes.
    fn can_hold(&self, _frame: &Frame, _item_len: usize) -> bool {
        true
    }

    /// Assembles the frame into the wire payload.
    fn assemble(&self, ctx: &EncodingContext, frame: &Frame, sequence_number: u32) -> Vec<u8>;

    /// Encodes a keep-alive message.
    fn keep_alive(&self, ctx: &EncodingContext, message_id: &str, sequence_number: u32) -> Vec<u8>;
}

/// Returns the format implementation of an encoding.
pub(crate) fn wire_format(encoding: MessageEncoding) -> &'static dyn WireFormat {
    static JSON: JsonFormat = JsonFormat;
    static UADP: UadpFormat = UadpFormat;
    match encoding {
        MessageEncoding::Json => &JSON,
        MessageEncoding::Uadp => &UADP,
    }
}

/// A network message under construction.
#[derive(Debug)]
pub(crate) struct Frame {
    message_id: String,
    header_size: usize,
    batched: bool,
    items: Vec<Vec<u8>>,
    writer_ids: Vec<DataSetWriterId>,
    item_bytes: usize,
    max_item: usize,
}

impl Frame {
    pub(crate) fn new(message_id: String, header_size: usize, batched: bool) -> Self {
        Self {
            message_id,
            header_size,
            batched,
            items: Vec::new(),
            writer_ids: Vec::new(),
            item_bytes: 0,
            max_item: 0,
        }
    }

    pub(crate) fn message_id(&self) -> &str {
        &self.message_id
    }

    pub(crate) fn header_size(&self) -> usize {
        self.header_size
    }

    pub(crate) fn is_batched(&self) -> bool {
        self.batched
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    pub(crate) fn writer_ids(&self) -> &[DataSetWriterId] {
        &self.writer_ids
    }

    pub(crate) fn item_bytes(&self) -> usize {
        self.item_bytes
    }

    pub(crate) fn max_item(&self) -> usize {
        self.max_item
    }

    /// Exact payload size of the frame as it stands.
    pub(crate) fn size(&self, format: &dyn WireFormat, ctx: &EncodingContext) -> usize {
        self.header_size + format.body_size(ctx, self, None)
    }

    /// Exact payload size if `item` were appended.
    pub(crate) fn size_with(
        &self,
        format: &dyn WireFormat,
        ctx: &EncodingContext,
        item: &[u8],
        writer_id: &DataSetWriterId,
    ) -> usize {
        self.header_size + format.body_size(ctx, self, Some((item.len(), writer_id.as_str().len())))
    }

    /// Returns `true` if `item` can be appended without breaking the size
    /// limit or the format's structural limits.
    pub(crate) fn accepts(
        &self,
        format: &dyn WireFormat,
        ctx: &EncodingContext,
        item: &[u8],
        writer_id: &DataSetWriterId,
    ) -> bool {
        if !self.batched && !self.is_empty() {
            return false;
        }
        format.can_hold(self, item.len()) && ctx.fits(self.size_with(format, ctx, item, writer_id))
    }

    pub(crate) fn push(&mut self, item: Vec<u8>, writer_id: DataSetWriterId) {
        self.item_bytes += item.len();
        self.max_item = self.max_item.max(item.len());
        self.items.push(item);
        self.writer_ids.push(writer_id);
    }
}
