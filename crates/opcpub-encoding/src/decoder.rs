// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Network message decoder.
//!
//! The inverse of [`NetworkMessageEncoder`](crate::NetworkMessageEncoder),
//! used by subscribers and tests. Header fields left out by a reduced content
//! mask decode to defaults (empty writer id, sequence number `0`, Unix epoch
//! timestamp), so exact round trips require the full content mask.

use opcpub_core::error::EncodingError;
use opcpub_core::message::{NetworkMessage, Notification};
use opcpub_core::model::{MessageEncoding, MessageSchema};

use crate::{json, uadp};

/// Decodes a payload into the notifications it carries.
///
/// Keep-alive messages decode to an empty list.
pub fn decode(
    payload: &[u8],
    encoding: MessageEncoding,
    schema: MessageSchema,
) -> Result<Vec<Notification>, EncodingError> {
    match encoding {
        MessageEncoding::Json => json::decode(payload, schema),
        MessageEncoding::Uadp => uadp::decode(payload),
    }
}

/// Decodes a network message produced by the encoder.
pub fn decode_message(message: &NetworkMessage) -> Result<Vec<Notification>, EncodingError> {
    decode(&message.payload, message.encoding, message.schema)
}
