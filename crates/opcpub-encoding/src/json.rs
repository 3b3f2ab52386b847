// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! JSON wire format.
//!
//! # PubSub schema
//!
//! ```text
//! {"MessageId":"…","MessageType":"ua-data","PublisherId":"…","WriterGroupId":"…",
//!  "Messages":[
//!    {"DataSetWriterId":"w1","SequenceNumber":3,"Timestamp":"…","NodeId":"…",
//!     "MessageType":"ua-keyframe","Payload":{"Temp":{"Value":{"Type":11,"Body":21.5}}}}
//!  ]}
//! ```
//!
//! # Samples schema
//!
//! ```text
//! {"NodeId":"…","DisplayName":"…","DataSetWriterId":"w1","SequenceNumber":3,
//!  "Timestamp":"…","Value":{"Value":{"Type":11,"Body":21.5}}}
//! ```
//!
//! Batched samples are a JSON array of such objects.
//!
//! Messages are assembled by concatenating individually serialized data-set
//! messages between a serialized header prefix and a fixed suffix, so the
//! size of a frame is known before it is assembled.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use opcpub_core::error::EncodingError;
use opcpub_core::message::{NetworkMessageKind, Notification, NotificationPayload};
use opcpub_core::model::{DataSetFieldContentMask, MessageSchema};
use opcpub_core::types::{DataSetWriterId, DataValue, EventField, StatusCode, Variant};

use crate::context::EncodingContext;
use crate::format::{Frame, WireFormat};

const MESSAGES_OPEN: &str = ",\"Messages\":[";
const MESSAGES_CLOSE: &str = "]}";

/// JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct JsonFormat;

impl WireFormat for JsonFormat {
    fn encode_item(
        &self,
        ctx: &EncodingContext,
        notification: &Notification,
    ) -> Result<Vec<u8>, EncodingError> {
        let object = match ctx.schema {
            MessageSchema::PubSub => data_set_message(ctx, notification),
            MessageSchema::Samples => sample_message(ctx, notification),
        };
        Ok(serde_json::to_vec(&Value::Object(object))?)
    }

    fn header_size(&self, ctx: &EncodingContext, message_id: &str, batched: bool) -> usize {
        match ctx.schema {
            MessageSchema::PubSub => {
                network_prefix(ctx, message_id).len() + MESSAGES_CLOSE.len()
            }
            MessageSchema::Samples if batched => 2,
            MessageSchema::Samples => 0,
        }
    }

    fn body_size(&self, _ctx: &EncodingContext, frame: &Frame, extra: Option<(usize, usize)>) -> usize {
        let (count, bytes) = match extra {
            Some((len, _)) => (frame.len() + 1, frame.item_bytes() + len),
            None => (frame.len(), frame.item_bytes()),
        };
        bytes + count.saturating_sub(1)
    }

    fn assemble(&self, ctx: &EncodingContext, frame: &Frame, _sequence_number: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.header_size() + frame.item_bytes() + frame.len());
        match ctx.schema {
            MessageSchema::PubSub => {
                out.extend_from_slice(network_prefix(ctx, frame.message_id()).as_bytes());
                join_items(&mut out, frame);
                out.extend_from_slice(MESSAGES_CLOSE.as_bytes());
            }
            MessageSchema::Samples if frame.is_batched() => {
                out.push(b'[');
                join_items(&mut out, frame);
                out.push(b']');
            }
            MessageSchema::Samples => join_items(&mut out, frame),
        }
        out
    }

    fn keep_alive(&self, ctx: &EncodingContext, message_id: &str, _sequence_number: u32) -> Vec<u8> {
        let header = network_header(ctx, message_id, NetworkMessageKind::KeepAlive);
        Value::Object(header).to_string().into_bytes()
    }
}

fn join_items(out: &mut Vec<u8>, frame: &Frame) {
    for (i, item) in frame.items().iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(item);
    }
}

// =============================================================================
// Encoding
// =============================================================================

fn network_header(ctx: &EncodingContext, message_id: &str, kind: NetworkMessageKind) -> Map<String, Value> {
    let mut header = Map::new();
    header.insert("MessageId".into(), json!(message_id));
    header.insert("MessageType".into(), json!(kind.message_type()));
    if let Some(publisher_id) = ctx.header_publisher_id() {
        header.insert("PublisherId".into(), json!(publisher_id));
    }
    if ctx.header_profile.writer_group_id {
        header.insert("WriterGroupId".into(), json!(ctx.writer_group_id.as_str()));
    }
    header
}

/// Serialized network header with its closing brace replaced by the opening
/// of the `Messages` array.
fn network_prefix(ctx: &EncodingContext, message_id: &str) -> String {
    let mut prefix = Value::Object(network_header(ctx, message_id, NetworkMessageKind::Data)).to_string();
    prefix.pop();
    prefix.push_str(MESSAGES_OPEN);
    prefix
}

fn data_set_message(ctx: &EncodingContext, n: &Notification) -> Map<String, Value> {
    let mask = ctx.mask_for(&n.writer_id);
    let mut msg = Map::new();

    if mask.data_set.writer_id {
        msg.insert("DataSetWriterId".into(), json!(n.writer_id.as_str()));
    }
    if mask.data_set.sequence_number {
        msg.insert("SequenceNumber".into(), json!(n.sequence_number));
    }
    if mask.data_set.timestamp {
        msg.insert("Timestamp".into(), json!(format_timestamp(&n.timestamp)));
    }
    if mask.data_set.node_info {
        msg.insert("NodeId".into(), json!(n.node_id));
        if let Some(name) = &n.display_name {
            msg.insert("DisplayName".into(), json!(name));
        }
    }

    let mut payload = Map::new();
    match &n.payload {
        NotificationPayload::Sample(value) => {
            msg.insert("MessageType".into(), json!("ua-keyframe"));
            payload.insert(n.field_name().to_string(), data_value_to_json(value, &mask.field));
        }
        NotificationPayload::Event(fields) => {
            msg.insert("MessageType".into(), json!("ua-event"));
            for field in fields {
                payload.insert(field.name.clone(), variant_to_json(&field.value));
            }
        }
    }
    msg.insert("Payload".into(), Value::Object(payload));
    msg
}

fn sample_message(ctx: &EncodingContext, n: &Notification) -> Map<String, Value> {
    let mask = ctx.mask_for(&n.writer_id);
    let mut msg = Map::new();

    msg.insert("NodeId".into(), json!(n.node_id));
    if mask.data_set.node_info {
        if let Some(name) = &n.display_name {
            msg.insert("DisplayName".into(), json!(name));
        }
    }
    if mask.data_set.writer_id {
        msg.insert("DataSetWriterId".into(), json!(n.writer_id.as_str()));
    }
    if mask.data_set.sequence_number {
        msg.insert("SequenceNumber".into(), json!(n.sequence_number));
    }
    if mask.data_set.timestamp {
        msg.insert("Timestamp".into(), json!(format_timestamp(&n.timestamp)));
    }

    match &n.payload {
        NotificationPayload::Sample(value) => {
            msg.insert("Value".into(), data_value_to_json(value, &mask.field));
        }
        NotificationPayload::Event(fields) => {
            msg.insert("Event".into(), event_to_json(fields));
        }
    }
    msg
}

fn event_to_json(fields: &[EventField]) -> Value {
    let mut object = Map::new();
    for field in fields {
        object.insert(field.name.clone(), variant_to_json(&field.value));
    }
    Value::Object(object)
}

fn data_value_to_json(value: &DataValue, mask: &DataSetFieldContentMask) -> Value {
    if mask.raw_data {
        return variant_to_json(&value.value);
    }

    let mut object = Map::new();
    object.insert("Value".into(), variant_to_json(&value.value));
    if mask.status_code && !value.status.is_good() {
        object.insert("StatusCode".into(), json!(value.status.bits()));
    }
    if mask.source_timestamp {
        if let Some(ts) = &value.source_timestamp {
            object.insert("SourceTimestamp".into(), json!(format_timestamp(ts)));
        }
    }
    if mask.server_timestamp {
        if let Some(ts) = &value.server_timestamp {
            object.insert("ServerTimestamp".into(), json!(format_timestamp(ts)));
        }
    }
    Value::Object(object)
}

/// Encodes a variant in the reversible `{"Type": id, "Body": value}` form.
pub fn variant_to_json(variant: &Variant) -> Value {
    let body = match variant {
        Variant::Null => return json!({ "Type": Variant::NULL_TYPE_ID }),
        Variant::Boolean(v) => json!(v),
        Variant::SByte(v) => json!(v),
        Variant::Byte(v) => json!(v),
        Variant::Int16(v) => json!(v),
        Variant::UInt16(v) => json!(v),
        Variant::Int32(v) => json!(v),
        Variant::UInt32(v) => json!(v),
        Variant::Int64(v) => json!(v.to_string()),
        Variant::UInt64(v) => json!(v.to_string()),
        Variant::Float(v) => float_to_json(f64::from(*v)),
        Variant::Double(v) => float_to_json(*v),
        Variant::String(v) | Variant::Guid(v) => json!(v),
        Variant::DateTime(v) => json!(format_timestamp(v)),
        Variant::ByteString(v) => json!(BASE64.encode(v)),
    };
    json!({ "Type": variant.type_id(), "Body": body })
}

fn float_to_json(v: f64) -> Value {
    if v.is_nan() {
        json!("NaN")
    } else if v == f64::INFINITY {
        json!("Infinity")
    } else if v == f64::NEG_INFINITY {
        json!("-Infinity")
    } else {
        json!(v)
    }
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a JSON payload produced by [`JsonFormat`].
pub(crate) fn decode(payload: &[u8], schema: MessageSchema) -> Result<Vec<Notification>, EncodingError> {
    let root: Value = serde_json::from_slice(payload)
        .map_err(|e| EncodingError::decode(0, e.to_string()))?;

    match schema {
        MessageSchema::PubSub => {
            let object = root
                .as_object()
                .ok_or_else(|| EncodingError::decode(0, "network message is not an object"))?;
            if object.get("MessageType").and_then(Value::as_str) == Some("ua-keepalive") {
                return Ok(Vec::new());
            }
            let messages = object
                .get("Messages")
                .and_then(Value::as_array)
                .ok_or_else(|| EncodingError::decode(0, "missing Messages array"))?;
            messages.iter().map(decode_data_set_message).collect()
        }
        MessageSchema::Samples => match root {
            Value::Array(items) => items.iter().map(decode_sample_message).collect(),
            Value::Object(ref object)
                if object.get("MessageType").and_then(Value::as_str) == Some("ua-keepalive") =>
            {
                Ok(Vec::new())
            }
            other => Ok(vec![decode_sample_message(&other)?]),
        },
    }
}

fn decode_header(object: &Map<String, Value>) -> Result<(DataSetWriterId, u32, DateTime<Utc>), EncodingError> {
    let writer_id = object
        .get("DataSetWriterId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let sequence_number = match object.get("SequenceNumber") {
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| EncodingError::decode(0, "invalid SequenceNumber"))?,
        None => 0,
    };
    let timestamp = match object.get("Timestamp") {
        Some(v) => parse_timestamp(v)?,
        None => DateTime::<Utc>::default(),
    };
    Ok((DataSetWriterId::new(writer_id), sequence_number, timestamp))
}

fn decode_data_set_message(value: &Value) -> Result<Notification, EncodingError> {
    let object = value
        .as_object()
        .ok_or_else(|| EncodingError::decode(0, "data-set message is not an object"))?;
    let (writer_id, sequence_number, timestamp) = decode_header(object)?;
    let display_name = object
        .get("DisplayName")
        .and_then(Value::as_str)
        .map(str::to_string);
    let payload = object
        .get("Payload")
        .and_then(Value::as_object)
        .ok_or_else(|| EncodingError::decode(0, "missing Payload"))?;

    let is_event = object.get("MessageType").and_then(Value::as_str) == Some("ua-event");
    let (node_id, payload) = if is_event {
        let node_id = object.get("NodeId").and_then(Value::as_str).unwrap_or_default();
        (node_id.to_string(), NotificationPayload::Event(decode_event_fields(payload)?))
    } else {
        let (field_name, field) = payload
            .iter()
            .next()
            .ok_or_else(|| EncodingError::decode(0, "empty Payload"))?;
        let node_id = object
            .get("NodeId")
            .and_then(Value::as_str)
            .unwrap_or(field_name);
        (node_id.to_string(), NotificationPayload::Sample(data_value_from_json(field)?))
    };

    Ok(Notification {
        writer_id,
        sequence_number,
        timestamp,
        node_id,
        display_name,
        payload,
    })
}

fn decode_sample_message(value: &Value) -> Result<Notification, EncodingError> {
    let object = value
        .as_object()
        .ok_or_else(|| EncodingError::decode(0, "sample message is not an object"))?;
    let (writer_id, sequence_number, timestamp) = decode_header(object)?;
    let node_id = object
        .get("NodeId")
        .and_then(Value::as_str)
        .ok_or_else(|| EncodingError::decode(0, "missing NodeId"))?;
    let display_name = object
        .get("DisplayName")
        .and_then(Value::as_str)
        .map(str::to_string);

    let payload = if let Some(value) = object.get("Value") {
        NotificationPayload::Sample(data_value_from_json(value)?)
    } else if let Some(Value::Object(fields)) = object.get("Event") {
        NotificationPayload::Event(decode_event_fields(fields)?)
    } else {
        return Err(EncodingError::decode(0, "missing Value or Event"));
    };

    Ok(Notification {
        writer_id,
        sequence_number,
        timestamp,
        node_id: node_id.to_string(),
        display_name,
        payload,
    })
}

fn decode_event_fields(fields: &Map<String, Value>) -> Result<Vec<EventField>, EncodingError> {
    fields
        .iter()
        .map(|(name, value)| {
            Ok(EventField {
                name: name.clone(),
                value: variant_from_json(value)?,
            })
        })
        .collect()
}

fn data_value_from_json(value: &Value) -> Result<DataValue, EncodingError> {
    let object = value
        .as_object()
        .ok_or_else(|| EncodingError::decode(0, "field is not an object"))?;

    // Bare variants carry "Type" at the top level.
    let Some(inner) = object.get("Value") else {
        return Ok(DataValue::good(variant_from_json(value)?));
    };

    let status = match object.get("StatusCode") {
        Some(code) => code
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .map(StatusCode)
            .ok_or_else(|| EncodingError::decode(0, "invalid StatusCode"))?,
        None => StatusCode::GOOD,
    };

    Ok(DataValue {
        value: variant_from_json(inner)?,
        status,
        source_timestamp: object.get("SourceTimestamp").map(parse_timestamp).transpose()?,
        server_timestamp: object.get("ServerTimestamp").map(parse_timestamp).transpose()?,
    })
}

/// Decodes a variant from the `{"Type": id, "Body": value}` form.
pub fn variant_from_json(value: &Value) -> Result<Variant, EncodingError> {
    let type_id = value
        .get("Type")
        .and_then(Value::as_u64)
        .ok_or_else(|| EncodingError::decode(0, "variant without Type"))?;
    if type_id == u64::from(Variant::NULL_TYPE_ID) {
        return Ok(Variant::Null);
    }
    let body = value
        .get("Body")
        .ok_or_else(|| EncodingError::decode(0, "variant without Body"))?;
    let invalid = || EncodingError::decode(0, format!("invalid Body for type {}", type_id));

    let variant = match type_id {
        1 => Variant::Boolean(body.as_bool().ok_or_else(invalid)?),
        2 => Variant::SByte(int_body(body).ok_or_else(invalid)?),
        3 => Variant::Byte(uint_body(body).ok_or_else(invalid)?),
        4 => Variant::Int16(int_body(body).ok_or_else(invalid)?),
        5 => Variant::UInt16(uint_body(body).ok_or_else(invalid)?),
        6 => Variant::Int32(int_body(body).ok_or_else(invalid)?),
        7 => Variant::UInt32(uint_body(body).ok_or_else(invalid)?),
        8 => Variant::Int64(int_body(body).ok_or_else(invalid)?),
        9 => Variant::UInt64(uint_body(body).ok_or_else(invalid)?),
        10 => Variant::Float(float_body(body).ok_or_else(invalid)? as f32),
        11 => Variant::Double(float_body(body).ok_or_else(invalid)?),
        12 => Variant::String(body.as_str().ok_or_else(invalid)?.to_string()),
        13 => Variant::DateTime(parse_timestamp(body)?),
        14 => Variant::Guid(body.as_str().ok_or_else(invalid)?.to_string()),
        15 => {
            let text = body.as_str().ok_or_else(invalid)?;
            Variant::ByteString(BASE64.decode(text).map_err(|e| EncodingError::decode(0, e.to_string()))?)
        }
        other => {
            return Err(EncodingError::decode(0, format!("unsupported built-in type {}", other)));
        }
    };
    Ok(variant)
}

fn int_body<T: TryFrom<i64>>(body: &Value) -> Option<T> {
    let v = match body {
        Value::String(s) => s.parse::<i64>().ok()?,
        other => other.as_i64()?,
    };
    T::try_from(v).ok()
}

fn uint_body<T: TryFrom<u64>>(body: &Value) -> Option<T> {
    let v = match body {
        Value::String(s) => s.parse::<u64>().ok()?,
        other => other.as_u64()?,
    };
    T::try_from(v).ok()
}

fn float_body(body: &Value) -> Option<f64> {
    match body {
        Value::String(s) => match s.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        other => other.as_f64(),
    }
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, EncodingError> {
    let text = value
        .as_str()
        .ok_or_else(|| EncodingError::decode(0, "timestamp is not a string"))?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EncodingError::decode(0, format!("invalid timestamp '{}': {}", text, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_variant_json_forms() {
        assert_eq!(variant_to_json(&Variant::Double(1.5)).to_string(), r#"{"Type":11,"Body":1.5}"#);
        assert_eq!(variant_to_json(&Variant::Int64(-7)).to_string(), r#"{"Type":8,"Body":"-7"}"#);
        assert_eq!(variant_to_json(&Variant::Null).to_string(), r#"{"Type":0}"#);
        assert_eq!(
            variant_to_json(&Variant::ByteString(vec![1, 2, 3])).to_string(),
            r#"{"Type":15,"Body":"AQID"}"#
        );
    }

    #[test]
    fn test_variant_reversible() {
        let values = vec![
            Variant::Null,
            Variant::Boolean(true),
            Variant::SByte(-5),
            Variant::Byte(200),
            Variant::Int16(-300),
            Variant::UInt16(60000),
            Variant::Int32(-70000),
            Variant::UInt32(4_000_000_000),
            Variant::Int64(i64::MIN),
            Variant::UInt64(u64::MAX),
            Variant::Float(1.25),
            Variant::Double(-0.1),
            Variant::String("héllo \"quoted\"".into()),
            Variant::DateTime(ts()),
            Variant::Guid("72962b91-fa75-4ae6-8d28-b404dc7daf63".into()),
            Variant::ByteString(vec![0, 255, 16]),
            Variant::Double(f64::INFINITY),
        ];

        for value in values {
            let decoded = variant_from_json(&variant_to_json(&value)).unwrap();
            assert_eq!(decoded, value);
        }

        let nan = variant_from_json(&variant_to_json(&Variant::Float(f32::NAN))).unwrap();
        assert!(matches!(nan, Variant::Float(v) if v.is_nan()));
    }

    #[test]
    fn test_variant_rejects_unknown_type() {
        let err = variant_from_json(&json!({"Type": 99, "Body": 1})).unwrap_err();
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_raw_data_value() {
        let value = DataValue::good(Variant::Int32(4));
        let raw = data_value_to_json(&value, &DataSetFieldContentMask::raw());
        assert_eq!(raw, json!({"Type": 6, "Body": 4}));
        assert_eq!(data_value_from_json(&raw).unwrap(), value);
    }

    #[test]
    fn test_status_omitted_when_good() {
        let value = DataValue::good(Variant::Int32(4)).source_timestamp(ts());
        let encoded = data_value_to_json(&value, &DataSetFieldContentMask::full());
        assert!(encoded.get("StatusCode").is_none());
        assert!(encoded.get("SourceTimestamp").is_some());

        let bad = DataValue::with_status(Variant::Null, StatusCode::BAD_COMMUNICATION_ERROR);
        let encoded = data_value_to_json(&bad, &DataSetFieldContentMask::full());
        assert_eq!(encoded["StatusCode"], json!(0x8005_0000u32));
        assert_eq!(data_value_from_json(&encoded).unwrap(), bad);
    }

    #[test]
    fn test_prefix_is_valid_json_once_closed() {
        let ctx = EncodingContext::new("g1").with_publisher_id("pub");
        let mut text = network_prefix(&ctx, "id-1");
        text.push_str(MESSAGES_CLOSE);

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["MessageType"], "ua-data");
        assert_eq!(value["PublisherId"], "pub");
        assert_eq!(value["WriterGroupId"], "g1");
        assert_eq!(value["Messages"], json!([]));
    }
}
