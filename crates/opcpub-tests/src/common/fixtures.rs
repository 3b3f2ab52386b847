// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built test data shared by the integration suites.

use chrono::{DateTime, TimeZone, Utc};

use opcpub_core::message::Notification;
use opcpub_core::model::{DataSetWriter, MessageEncoding, MessageSchema, WriterGroup};
use opcpub_core::types::{DataSetWriterId, DataValue, EventField, StatusCode, Variant};

use super::builders::{GroupBuilder, WriterBuilder};

// =============================================================================
// Writer Groups
// =============================================================================

/// Writer group fixtures.
pub struct GroupFixtures;

impl GroupFixtures {
    /// A batched JSON group that flushes on batch size only.
    pub fn batched(batch_size: usize) -> WriterGroup {
        GroupBuilder::new("g1").batch_size(batch_size).build()
    }

    /// A group that publishes one message per notification.
    pub fn unbatched() -> WriterGroup {
        GroupBuilder::new("g1").batch_size(1).build()
    }

    /// A group that flushes on a short interval.
    pub fn fast_interval(interval_ms: u64) -> WriterGroup {
        GroupBuilder::new("g1").batch_size(1_000).interval_ms(interval_ms).build()
    }

    /// Every encoding/schema combination.
    pub fn wire_formats() -> Vec<(MessageEncoding, MessageSchema)> {
        vec![
            (MessageEncoding::Json, MessageSchema::PubSub),
            (MessageEncoding::Json, MessageSchema::Samples),
            (MessageEncoding::Uadp, MessageSchema::PubSub),
            (MessageEncoding::Uadp, MessageSchema::Samples),
        ]
    }
}

// =============================================================================
// Writers
// =============================================================================

/// Data-set writer fixtures.
pub struct WriterFixtures;

impl WriterFixtures {
    /// An enabled writer in group `g1` with one variable.
    pub fn writer(id: &str) -> DataSetWriter {
        WriterBuilder::new(id).variable("ns=2;s=Value").build()
    }

    /// `count` writers named `w1..=wN`.
    pub fn writers(count: usize) -> Vec<DataSetWriter> {
        (1..=count).map(|i| Self::writer(&format!("w{}", i))).collect()
    }

    /// A writer that belongs to another group.
    pub fn foreign(id: &str) -> DataSetWriter {
        WriterBuilder::new(id).group("other-group").variable("ns=2;s=Value").build()
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Notification fixtures with fixed timestamps.
pub struct NotificationFixtures;

impl NotificationFixtures {
    /// Fixed timestamp used by all fixtures.
    pub fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    /// A good double sample.
    pub fn sample(writer: &str, sequence_number: u32) -> Notification {
        Notification::sample(
            DataSetWriterId::new(writer),
            sequence_number,
            "ns=2;s=Value",
            DataValue::good(Variant::Double(f64::from(sequence_number))).source_timestamp(Self::timestamp()),
        )
        .with_timestamp(Self::timestamp())
    }

    /// A mix of samples and events covering the common variant types.
    pub fn mixed() -> Vec<Notification> {
        let ts = Self::timestamp();
        vec![
            Notification::sample(
                DataSetWriterId::new("w1"),
                1,
                "ns=2;s=Temperature",
                DataValue::good(Variant::Double(21.5)).source_timestamp(ts),
            )
            .with_display_name("Temperature")
            .with_timestamp(ts),
            Notification::sample(
                DataSetWriterId::new("w1"),
                2,
                "ns=2;s=Running",
                DataValue::good(Variant::Boolean(true)).source_timestamp(ts),
            )
            .with_timestamp(ts),
            Notification::sample(
                DataSetWriterId::new("w2"),
                1,
                "ns=2;s=Mode",
                DataValue::with_status(Variant::String("auto".into()), StatusCode::UNCERTAIN)
                    .source_timestamp(ts),
            )
            .with_timestamp(ts),
            Notification::event(
                DataSetWriterId::new("w2"),
                2,
                "i=2253",
                vec![
                    EventField::new("Message", "Door opened"),
                    EventField::new("Severity", 500i32),
                ],
            )
            .with_timestamp(ts),
        ]
    }
}
