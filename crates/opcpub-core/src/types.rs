// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for opcpub.
//!
//! Identifiers, the OPC UA built-in value model (`Variant`) and the sampled
//! value container (`DataValue`) shared by the encoder, the engine and the
//! data sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

// =============================================================================
// Identifiers
// =============================================================================

/// A unique identifier for a writer group.
///
/// # Examples
///
/// ```
/// use opcpub_core::types::WriterGroupId;
///
/// let id = WriterGroupId::new("line-1");
/// assert_eq!(id.as_str(), "line-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterGroupId(String);

impl WriterGroupId {
    /// Creates a new writer group ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the 16 bit wire identifier used in binary network message headers.
    ///
    /// The value is a FNV-1a hash of the string id folded to 16 bits, so it is
    /// stable across restarts and publishers.
    pub fn wire_id(&self) -> u16 {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in self.0.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        ((hash >> 16) ^ (hash & 0xffff)) as u16
    }
}

impl fmt::Display for WriterGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WriterGroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WriterGroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for WriterGroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A unique identifier for a data-set writer.
///
/// Writer ids are addressable on their own so that writers can be added to
/// and removed from a running group one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSetWriterId(String);

impl DataSetWriterId {
    /// Creates a new data-set writer ID.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID and returns the inner string.
    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DataSetWriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DataSetWriterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DataSetWriterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DataSetWriterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Variant
// =============================================================================

/// An OPC UA built-in scalar value.
///
/// Each variant maps to a built-in type id (see [`Variant::type_id`]) that both
/// wire encodings carry next to the value, so a decoder can restore the exact
/// type.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    /// No value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Signed 8-bit integer.
    SByte(i8),
    /// Unsigned 8-bit integer.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// GUID in its canonical string form.
    Guid(String),
    /// Opaque byte string.
    ByteString(Vec<u8>),
}

impl Variant {
    /// Built-in type id of `Null`.
    pub const NULL_TYPE_ID: u8 = 0;

    /// Returns the OPC UA built-in type id.
    ///
    /// # Examples
    ///
    /// ```
    /// use opcpub_core::types::Variant;
    ///
    /// assert_eq!(Variant::Double(1.0).type_id(), 11);
    /// assert_eq!(Variant::Boolean(true).type_id(), 1);
    /// ```
    pub fn type_id(&self) -> u8 {
        match self {
            Variant::Null => Self::NULL_TYPE_ID,
            Variant::Boolean(_) => 1,
            Variant::SByte(_) => 2,
            Variant::Byte(_) => 3,
            Variant::Int16(_) => 4,
            Variant::UInt16(_) => 5,
            Variant::Int32(_) => 6,
            Variant::UInt32(_) => 7,
            Variant::Int64(_) => 8,
            Variant::UInt64(_) => 9,
            Variant::Float(_) => 10,
            Variant::Double(_) => 11,
            Variant::String(_) => 12,
            Variant::DateTime(_) => 13,
            Variant::Guid(_) => 14,
            Variant::ByteString(_) => 15,
        }
    }

    /// Returns the type name of this value.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Null => "Null",
            Variant::Boolean(_) => "Boolean",
            Variant::SByte(_) => "SByte",
            Variant::Byte(_) => "Byte",
            Variant::Int16(_) => "Int16",
            Variant::UInt16(_) => "UInt16",
            Variant::Int32(_) => "Int32",
            Variant::UInt32(_) => "UInt32",
            Variant::Int64(_) => "Int64",
            Variant::UInt64(_) => "UInt64",
            Variant::Float(_) => "Float",
            Variant::Double(_) => "Double",
            Variant::String(_) => "String",
            Variant::DateTime(_) => "DateTime",
            Variant::Guid(_) => "Guid",
            Variant::ByteString(_) => "ByteString",
        }
    }

    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Variant::SByte(v) => Some(f64::from(*v)),
            Variant::Byte(v) => Some(f64::from(*v)),
            Variant::Int16(v) => Some(f64::from(*v)),
            Variant::UInt16(v) => Some(f64::from(*v)),
            Variant::Int32(v) => Some(f64::from(*v)),
            Variant::UInt32(v) => Some(f64::from(*v)),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Float(v) => Some(f64::from(*v)),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get this value as a string reference.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) | Variant::Guid(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => write!(f, "null"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::SByte(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) | Variant::Guid(v) => write!(f, "{}", v),
            Variant::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Variant::ByteString(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int64(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

// =============================================================================
// StatusCode
// =============================================================================

/// An OPC UA status code.
///
/// Only the severity bits are interpreted; the rest is carried through
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Good.
    pub const GOOD: StatusCode = StatusCode(0);
    /// Uncertain, no further detail.
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    /// Bad, no further detail.
    pub const BAD: StatusCode = StatusCode(0x8000_0000);
    /// Bad, the communication with the data source failed.
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    /// Bad, the node id refers to a node that does not exist.
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);

    /// Returns the raw 32-bit code.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if the severity is good.
    #[inline]
    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A sampled value with its status and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    /// The sampled value.
    pub value: Variant,
    /// Quality of the sample.
    pub status: StatusCode,
    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Timestamp assigned by the server that produced the sample.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good data value without timestamps.
    pub fn good(value: Variant) -> Self {
        Self {
            value,
            status: StatusCode::GOOD,
            source_timestamp: None,
            server_timestamp: None,
        }
    }

    /// Creates a data value with the given status.
    pub fn with_status(value: Variant, status: StatusCode) -> Self {
        Self {
            value,
            status,
            source_timestamp: None,
            server_timestamp: None,
        }
    }

    /// Sets the source timestamp.
    pub fn source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    /// Sets the server timestamp.
    pub fn server_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }
}

/// A single named field of an event notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    /// Field name (browse path of the selected event field).
    pub name: String,
    /// Field value.
    pub value: Variant,
}

impl EventField {
    /// Creates a new event field.
    pub fn new(name: impl Into<String>, value: impl Into<Variant>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_id() {
        let id = DataSetWriterId::new("writer-1");
        assert_eq!(id.as_str(), "writer-1");
        assert_eq!(id.to_string(), "writer-1");

        let id2: DataSetWriterId = "writer-1".into();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_writer_id_ordering() {
        let mut ids = vec![
            DataSetWriterId::new("b"),
            DataSetWriterId::new("a"),
            DataSetWriterId::new("c"),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[2].as_str(), "c");
    }

    #[test]
    fn test_group_wire_id_is_stable() {
        let a = WriterGroupId::new("line-1");
        let b = WriterGroupId::new("line-1");
        let c = WriterGroupId::new("line-2");
        assert_eq!(a.wire_id(), b.wire_id());
        assert_ne!(a.wire_id(), c.wire_id());
    }

    #[test]
    fn test_variant_type_ids() {
        assert_eq!(Variant::Null.type_id(), 0);
        assert_eq!(Variant::Int32(1).type_id(), 6);
        assert_eq!(Variant::String("x".into()).type_id(), 12);
        assert_eq!(Variant::ByteString(vec![1]).type_id(), 15);
    }

    #[test]
    fn test_variant_conversions() {
        assert_eq!(Variant::Int16(-3).as_f64(), Some(-3.0));
        assert_eq!(Variant::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(Variant::String("x".into()).as_f64(), None);
        assert_eq!(Variant::Guid("g".into()).as_str(), Some("g"));
        assert_eq!(Variant::from(2.5).type_name(), "Double");
    }

    #[test]
    fn test_status_code_severity() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::UNCERTAIN.is_uncertain());
        assert!(StatusCode::BAD_COMMUNICATION_ERROR.is_bad());
        assert!(!StatusCode::BAD.is_good());
        assert_eq!(StatusCode::BAD.to_string(), "0x80000000");
    }

    #[test]
    fn test_data_value_builder() {
        let now = Utc::now();
        let value = DataValue::good(Variant::Double(1.0)).source_timestamp(now);
        assert_eq!(value.status, StatusCode::GOOD);
        assert_eq!(value.source_timestamp, Some(now));
        assert!(value.server_timestamp.is_none());
    }
}
