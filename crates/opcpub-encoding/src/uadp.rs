// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simplified UADP binary wire format.
//!
//! # Network message layout
//!
//! ```text
//! ┌────────┬─────────┬──────────────┬──────────┬──────────┬───────┬────────────┬─────────┬──────────────┐
//! │ flags  │ ext     │ publisher id │ group id │ sequence │ count │ writer ids │ sizes   │ data-set     │
//! │ u8     │ u8      │ string?      │ u16?     │ u16?     │ u8    │ string[]?  │ u16[]?  │ messages     │
//! └────────┴─────────┴──────────────┴──────────┴──────────┴───────┴────────────┴─────────┴──────────────┘
//! ```
//!
//! Sizes are present only when the message holds more than one data-set
//! message. Strings are an `i32` length followed by UTF-8 bytes (`-1` for
//! null). All integers are little-endian.
//!
//! # Data-set message layout
//!
//! ```text
//! flags u8 │ sequence u32? │ timestamp i64? │ node id string? │ display name string? │ payload
//! ```
//!
//! A sample payload is a variant (raw data) or a `DataValue` mask byte
//! followed by the variant, status and timestamps it announces. An event
//! payload is a `u16` field count followed by `(name, variant)` pairs.

use chrono::{DateTime, Utc};

use opcpub_core::error::EncodingError;
use opcpub_core::message::{Notification, NotificationPayload};
use opcpub_core::model::MessageSchema;
use opcpub_core::types::{DataSetWriterId, DataValue, EventField, StatusCode, Variant};

use crate::context::EncodingContext;
use crate::format::{Frame, WireFormat};

const VERSION: u8 = 0x01;
const FLAG_PUBLISHER_ID: u8 = 0x10;
const FLAG_GROUP_ID: u8 = 0x20;
const FLAG_PAYLOAD_HEADER: u8 = 0x40;
const FLAG_EXTENDED: u8 = 0x80;

const EXT_SAMPLES: u8 = 0x01;
const EXT_KEEP_ALIVE: u8 = 0x02;
const EXT_SEQUENCE: u8 = 0x04;

const DS_SEQUENCE: u8 = 0x01;
const DS_TIMESTAMP: u8 = 0x02;
const DS_NODE_ID: u8 = 0x04;
const DS_DISPLAY_NAME: u8 = 0x08;
const DS_EVENT: u8 = 0x10;
const DS_RAW: u8 = 0x20;

const DV_STATUS: u8 = 0x01;
const DV_SOURCE_TS: u8 = 0x02;
const DV_SERVER_TS: u8 = 0x04;

const MAX_MESSAGES: usize = u8::MAX as usize;

/// 100 ns ticks between 1601-01-01 and 1970-01-01.
const TICKS_TO_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// UADP encoding.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UadpFormat;

impl WireFormat for UadpFormat {
    fn encode_item(
        &self,
        ctx: &EncodingContext,
        notification: &Notification,
    ) -> Result<Vec<u8>, EncodingError> {
        let mask = ctx.mask_for(&notification.writer_id);
        let mut w = BinaryWriter::with_capacity(64);

        let mut flags = 0u8;
        if mask.data_set.sequence_number {
            flags |= DS_SEQUENCE;
        }
        if mask.data_set.timestamp {
            flags |= DS_TIMESTAMP;
        }
        if mask.data_set.node_info {
            flags |= DS_NODE_ID;
            if notification.display_name.is_some() {
                flags |= DS_DISPLAY_NAME;
            }
        }
        match &notification.payload {
            NotificationPayload::Event(_) => flags |= DS_EVENT,
            NotificationPayload::Sample(_) if mask.field.raw_data => flags |= DS_RAW,
            NotificationPayload::Sample(_) => {}
        }

        w.write_u8(flags);
        if flags & DS_SEQUENCE != 0 {
            w.write_u32(notification.sequence_number);
        }
        if flags & DS_TIMESTAMP != 0 {
            w.write_i64(to_ticks(&notification.timestamp));
        }
        if flags & DS_NODE_ID != 0 {
            w.write_string(Some(&notification.node_id))?;
        }
        if flags & DS_DISPLAY_NAME != 0 {
            w.write_string(notification.display_name.as_deref())?;
        }

        match &notification.payload {
            NotificationPayload::Sample(value) if mask.field.raw_data => {
                w.write_variant(&value.value)?;
            }
            NotificationPayload::Sample(value) => {
                let mut dv_flags = 0u8;
                if mask.field.status_code && !value.status.is_good() {
                    dv_flags |= DV_STATUS;
                }
                if mask.field.source_timestamp && value.source_timestamp.is_some() {
                    dv_flags |= DV_SOURCE_TS;
                }
                if mask.field.server_timestamp && value.server_timestamp.is_some() {
                    dv_flags |= DV_SERVER_TS;
                }
                w.write_u8(dv_flags);
                w.write_variant(&value.value)?;
                if dv_flags & DV_STATUS != 0 {
                    w.write_u32(value.status.bits());
                }
                if let Some(ts) = value.source_timestamp.filter(|_| dv_flags & DV_SOURCE_TS != 0) {
                    w.write_i64(to_ticks(&ts));
                }
                if let Some(ts) = value.server_timestamp.filter(|_| dv_flags & DV_SERVER_TS != 0) {
                    w.write_i64(to_ticks(&ts));
                }
            }
            NotificationPayload::Event(fields) => {
                let count = u16::try_from(fields.len())
                    .map_err(|_| EncodingError::serialization("too many event fields"))?;
                w.write_u16(count);
                for field in fields {
                    w.write_string(Some(&field.name))?;
                    w.write_variant(&field.value)?;
                }
            }
        }

        Ok(w.into_inner())
    }

    fn header_size(&self, ctx: &EncodingContext, _message_id: &str, _batched: bool) -> usize {
        let mut size = 2; // flags + extended flags
        if let Some(publisher_id) = ctx.header_publisher_id() {
            size += 4 + publisher_id.len();
        }
        if ctx.header_profile.writer_group_id {
            size += 2;
        }
        if ctx.header_profile.sequence_number {
            size += 2;
        }
        size + 1 // message count
    }

    fn body_size(&self, ctx: &EncodingContext, frame: &Frame, extra: Option<(usize, usize)>) -> usize {
        let mut count = frame.len();
        let mut bytes = frame.item_bytes();
        let mut ids: usize = if ctx.header_profile.payload_header {
            frame.writer_ids().iter().map(|id| 4 + id.as_str().len()).sum()
        } else {
            0
        };
        if let Some((item_len, id_len)) = extra {
            count += 1;
            bytes += item_len;
            if ctx.header_profile.payload_header {
                ids += 4 + id_len;
            }
        }
        let sizes = if count > 1 { 2 * count } else { 0 };
        ids + sizes + bytes
    }

    fn can_hold(&self, frame: &Frame, item_len: usize) -> bool {
        if frame.len() >= MAX_MESSAGES {
            return false;
        }
        // Multi-message frames carry u16 sizes.
        frame.is_empty() || (item_len <= u16::MAX as usize && frame.max_item() <= u16::MAX as usize)
    }

    fn assemble(&self, ctx: &EncodingContext, frame: &Frame, sequence_number: u32) -> Vec<u8> {
        let mut w = BinaryWriter::with_capacity(frame.header_size() + frame.item_bytes() + 64);
        write_network_header(&mut w, ctx, sequence_number, false, frame.len());

        if ctx.header_profile.payload_header {
            for id in frame.writer_ids() {
                w.write_string_unchecked(id.as_str());
            }
        }
        if frame.len() > 1 {
            for item in frame.items() {
                w.write_u16(item.len() as u16);
            }
        }
        for item in frame.items() {
            w.write_bytes(item);
        }
        w.into_inner()
    }

    fn keep_alive(&self, ctx: &EncodingContext, _message_id: &str, sequence_number: u32) -> Vec<u8> {
        let mut w = BinaryWriter::with_capacity(16);
        write_network_header(&mut w, ctx, sequence_number, true, 0);
        w.into_inner()
    }
}

fn write_network_header(
    w: &mut BinaryWriter,
    ctx: &EncodingContext,
    sequence_number: u32,
    keep_alive: bool,
    count: usize,
) {
    let publisher_id = ctx.header_publisher_id();

    let mut flags = VERSION | FLAG_EXTENDED;
    if publisher_id.is_some() {
        flags |= FLAG_PUBLISHER_ID;
    }
    if ctx.header_profile.writer_group_id {
        flags |= FLAG_GROUP_ID;
    }
    if ctx.header_profile.payload_header {
        flags |= FLAG_PAYLOAD_HEADER;
    }

    let mut ext = 0u8;
    if ctx.schema == MessageSchema::Samples {
        ext |= EXT_SAMPLES;
    }
    if keep_alive {
        ext |= EXT_KEEP_ALIVE;
    }
    if ctx.header_profile.sequence_number {
        ext |= EXT_SEQUENCE;
    }

    w.write_u8(flags);
    w.write_u8(ext);
    if let Some(publisher_id) = publisher_id {
        w.write_string_unchecked(publisher_id);
    }
    if ctx.header_profile.writer_group_id {
        w.write_u16(ctx.writer_group_id.wire_id());
    }
    if ctx.header_profile.sequence_number {
        w.write_u16((sequence_number & 0xffff) as u16);
    }
    w.write_u8(count as u8);
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a UADP payload produced by [`UadpFormat`].
pub(crate) fn decode(payload: &[u8]) -> Result<Vec<Notification>, EncodingError> {
    let mut r = BinaryReader::new(payload);

    let flags = r.read_u8()?;
    if flags & 0x0f != VERSION {
        return Err(EncodingError::decode(0, format!("unsupported UADP version {}", flags & 0x0f)));
    }
    let ext = if flags & FLAG_EXTENDED != 0 { r.read_u8()? } else { 0 };
    if flags & FLAG_PUBLISHER_ID != 0 {
        r.read_string()?;
    }
    if flags & FLAG_GROUP_ID != 0 {
        r.read_u16()?;
    }
    if ext & EXT_SEQUENCE != 0 {
        r.read_u16()?;
    }

    let count = r.read_u8()? as usize;
    if ext & EXT_KEEP_ALIVE != 0 || count == 0 {
        return Ok(Vec::new());
    }

    let writer_ids = if flags & FLAG_PAYLOAD_HEADER != 0 {
        (0..count)
            .map(|_| -> Result<DataSetWriterId, EncodingError> {
                Ok(DataSetWriterId::new(r.read_string()?.unwrap_or_default()))
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![DataSetWriterId::new(""); count]
    };

    let sizes = if count > 1 {
        (0..count)
            .map(|_| r.read_u16().map(usize::from))
            .collect::<Result<Vec<_>, EncodingError>>()?
    } else {
        vec![r.remaining()]
    };

    let mut notifications = Vec::with_capacity(count);
    for (writer_id, size) in writer_ids.into_iter().zip(sizes) {
        let offset = r.position();
        let body = r.read_slice(size)?;
        notifications.push(decode_data_set_message(body, offset, writer_id)?);
    }
    Ok(notifications)
}

fn decode_data_set_message(
    body: &[u8],
    base_offset: usize,
    writer_id: DataSetWriterId,
) -> Result<Notification, EncodingError> {
    let mut r = BinaryReader::with_offset(body, base_offset);
    let flags = r.read_u8()?;

    let sequence_number = if flags & DS_SEQUENCE != 0 { r.read_u32()? } else { 0 };
    let timestamp = if flags & DS_TIMESTAMP != 0 {
        from_ticks(r.read_i64()?, r.position())?
    } else {
        DateTime::<Utc>::default()
    };
    let node_id = if flags & DS_NODE_ID != 0 {
        r.read_string()?.unwrap_or_default()
    } else {
        String::new()
    };
    let display_name = if flags & DS_DISPLAY_NAME != 0 {
        r.read_string()?
    } else {
        None
    };

    let payload = if flags & DS_EVENT != 0 {
        let count = r.read_u16()?;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = r.read_string()?.unwrap_or_default();
            let value = r.read_variant()?;
            fields.push(EventField { name, value });
        }
        NotificationPayload::Event(fields)
    } else if flags & DS_RAW != 0 {
        NotificationPayload::Sample(DataValue::good(r.read_variant()?))
    } else {
        let dv_flags = r.read_u8()?;
        let value = r.read_variant()?;
        let status = if dv_flags & DV_STATUS != 0 {
            StatusCode(r.read_u32()?)
        } else {
            StatusCode::GOOD
        };
        let source_timestamp = if dv_flags & DV_SOURCE_TS != 0 {
            Some(from_ticks(r.read_i64()?, r.position())?)
        } else {
            None
        };
        let server_timestamp = if dv_flags & DV_SERVER_TS != 0 {
            Some(from_ticks(r.read_i64()?, r.position())?)
        } else {
            None
        };
        NotificationPayload::Sample(DataValue {
            value,
            status,
            source_timestamp,
            server_timestamp,
        })
    };

    if r.remaining() != 0 {
        return Err(EncodingError::decode(r.position(), "trailing bytes in data-set message"));
    }

    Ok(Notification {
        writer_id,
        sequence_number,
        timestamp,
        node_id,
        display_name,
        payload,
    })
}

// =============================================================================
// Timestamps
// =============================================================================

fn to_ticks(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp()
        .saturating_mul(10_000_000)
        .saturating_add(i64::from(ts.timestamp_subsec_nanos() / 100))
        .saturating_add(TICKS_TO_UNIX_EPOCH)
}

fn from_ticks(ticks: i64, offset: usize) -> Result<DateTime<Utc>, EncodingError> {
    let unix = ticks - TICKS_TO_UNIX_EPOCH;
    let secs = unix.div_euclid(10_000_000);
    let nanos = (unix.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| EncodingError::decode(offset, format!("timestamp out of range: {}", ticks)))
}

// =============================================================================
// Binary Writer / Reader
// =============================================================================

struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn write_string(&mut self, s: Option<&str>) -> Result<(), EncodingError> {
        match s {
            None => self.write_i32(-1),
            Some(s) => self.write_byte_string(s.as_bytes())?,
        }
        Ok(())
    }

    /// Writes ids and header strings whose length is bounded by configuration.
    fn write_string_unchecked(&mut self, s: &str) {
        self.write_i32(i32::try_from(s.len()).unwrap_or(i32::MAX));
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn write_byte_string(&mut self, bytes: &[u8]) -> Result<(), EncodingError> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| EncodingError::serialization("string exceeds i32 length"))?;
        self.write_i32(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn write_variant(&mut self, variant: &Variant) -> Result<(), EncodingError> {
        self.write_u8(variant.type_id());
        match variant {
            Variant::Null => {}
            Variant::Boolean(v) => self.write_u8(u8::from(*v)),
            Variant::SByte(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Variant::Byte(v) => self.write_u8(*v),
            Variant::Int16(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Variant::UInt16(v) => self.write_u16(*v),
            Variant::Int32(v) => self.write_i32(*v),
            Variant::UInt32(v) => self.write_u32(*v),
            Variant::Int64(v) => self.write_i64(*v),
            Variant::UInt64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Variant::Float(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Variant::Double(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            Variant::String(v) | Variant::Guid(v) => self.write_string(Some(v))?,
            Variant::DateTime(v) => self.write_i64(to_ticks(v)),
            Variant::ByteString(v) => self.write_byte_string(v)?,
        }
        Ok(())
    }
}

struct BinaryReader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> BinaryReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self::with_offset(buf, 0)
    }

    fn with_offset(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn position(&self) -> usize {
        self.base + self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < len {
            return Err(EncodingError::decode(
                self.position(),
                format!("need {} bytes, {} left", len, self.remaining()),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], EncodingError> {
        let slice = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, EncodingError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, EncodingError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32, EncodingError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, EncodingError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_byte_string(&mut self) -> Result<Option<Vec<u8>>, EncodingError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.read_slice(len as usize)?.to_vec()))
    }

    fn read_string(&mut self) -> Result<Option<String>, EncodingError> {
        let offset = self.position();
        match self.read_byte_string()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| EncodingError::decode(offset, e.to_string())),
        }
    }

    fn read_variant(&mut self) -> Result<Variant, EncodingError> {
        let offset = self.position();
        let type_id = self.read_u8()?;
        let variant = match type_id {
            0 => Variant::Null,
            1 => Variant::Boolean(self.read_u8()? != 0),
            2 => Variant::SByte(i8::from_le_bytes(self.read_array()?)),
            3 => Variant::Byte(self.read_u8()?),
            4 => Variant::Int16(i16::from_le_bytes(self.read_array()?)),
            5 => Variant::UInt16(self.read_u16()?),
            6 => Variant::Int32(self.read_i32()?),
            7 => Variant::UInt32(self.read_u32()?),
            8 => Variant::Int64(self.read_i64()?),
            9 => Variant::UInt64(u64::from_le_bytes(self.read_array()?)),
            10 => Variant::Float(f32::from_le_bytes(self.read_array()?)),
            11 => Variant::Double(f64::from_le_bytes(self.read_array()?)),
            12 => Variant::String(self.read_string()?.unwrap_or_default()),
            13 => Variant::DateTime(from_ticks(self.read_i64()?, offset)?),
            14 => Variant::Guid(self.read_string()?.unwrap_or_default()),
            15 => Variant::ByteString(self.read_byte_string()?.unwrap_or_default()),
            other => {
                return Err(EncodingError::decode(offset, format!("unsupported built-in type {}", other)));
            }
        };
        Ok(variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ticks_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 59).unwrap()
            + chrono::Duration::microseconds(123_456);
        let ticks = to_ticks(&ts);
        assert_eq!(from_ticks(ticks, 0).unwrap(), ts);

        let epoch = DateTime::<Utc>::default();
        assert_eq!(to_ticks(&epoch), TICKS_TO_UNIX_EPOCH);
    }

    #[test]
    fn test_variant_binary_round_trip() {
        let values = vec![
            Variant::Null,
            Variant::Boolean(false),
            Variant::SByte(-1),
            Variant::UInt16(65535),
            Variant::Int64(-42),
            Variant::Float(3.5),
            Variant::Double(f64::MAX),
            Variant::String("ü".into()),
            Variant::ByteString(vec![9, 8, 7]),
        ];

        for value in values {
            let mut w = BinaryWriter::with_capacity(16);
            w.write_variant(&value).unwrap();
            let bytes = w.into_inner();
            let mut r = BinaryReader::new(&bytes);
            assert_eq!(r.read_variant().unwrap(), value);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn test_null_string() {
        let mut w = BinaryWriter::with_capacity(4);
        w.write_string(None).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes, (-1i32).to_le_bytes());
        assert_eq!(BinaryReader::new(&bytes).read_string().unwrap(), None);
    }

    #[test]
    fn test_truncated_input_reports_offset() {
        let err = decode(&[VERSION | FLAG_EXTENDED, 0, 2]).unwrap_err();
        assert!(matches!(err, EncodingError::Decode { offset: 3, .. }));
    }

    #[test]
    fn test_bad_version() {
        let err = decode(&[0x02]).unwrap_err();
        assert!(err.to_string().contains("version"));
    }
}
