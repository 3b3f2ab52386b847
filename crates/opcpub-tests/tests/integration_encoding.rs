// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Encoding Integration Tests
//!
//! Encoder and decoder across every encoding/schema combination, and the
//! engine publishing decodable messages.

use opcpub_core::model::{MessageEncoding, OrderingMode};
use opcpub_core::types::{DataValue, Variant};
use opcpub_encoding::{apply_ordering, decode, decode_message, EncodingContext, NetworkMessageEncoder};

use opcpub_tests::prelude::*;

fn contexts() -> Vec<EncodingContext> {
    GroupFixtures::wire_formats()
        .into_iter()
        .map(|(encoding, schema)| {
            EncodingContext::new("g1")
                .with_encoding(encoding)
                .with_schema(schema)
                .with_publisher_id("pub-1")
        })
        .collect()
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_encoding_round_trip_batched_and_single() {
    for ctx in contexts() {
        let encoder = NetworkMessageEncoder::new();

        let batched = encoder.encode_batch(&ctx, NotificationFixtures::mixed());
        assert_eq!(batched.len(), 1, "{:?}/{:?}", ctx.encoding, ctx.schema);
        assert_eq!(batched.decode_all(), NotificationFixtures::mixed());

        let single = encoder.encode(&ctx, NotificationFixtures::mixed());
        assert_eq!(single.len(), 4);
        assert_eq!(single.decode_all(), NotificationFixtures::mixed());
    }
}

#[test]
fn test_encoding_messages_carry_group_metadata() {
    for ctx in contexts() {
        let encoder = NetworkMessageEncoder::new();
        let messages = encoder.encode(&ctx, vec![NotificationFixtures::sample("w1", 1)]);

        assert_eq!(messages[0].writer_group_id.as_str(), "g1");
        assert_eq!(messages[0].encoding, ctx.encoding);
        assert_eq!(messages[0].schema, ctx.schema);
        assert_eq!(messages[0].content_type(), ctx.encoding.content_type());
    }
}

// =============================================================================
// Size Limits
// =============================================================================

#[test]
fn test_encoding_exact_size_boundary() {
    for ctx in contexts() {
        let size = NetworkMessageEncoder::new().encode(&ctx, vec![NotificationFixtures::sample("w1", 1)])[0].size();

        for limit in [size, size + 1] {
            let encoder = NetworkMessageEncoder::new();
            let messages = encoder.encode(
                &ctx.clone().with_max_message_size(limit),
                vec![NotificationFixtures::sample("w1", 1)],
            );
            assert_eq!(messages.len(), 1, "limit {} must admit {} bytes", limit, size);
            assert_eq!(messages[0].size(), size);
        }

        let encoder = NetworkMessageEncoder::new();
        let below = ctx.clone().with_max_message_size(size - 1);
        assert!(encoder.encode(&below, vec![NotificationFixtures::sample("w1", 1)]).is_empty());
        assert_eq!(encoder.stats().notifications_dropped, 1);
    }
}

#[test]
fn test_encoding_batches_split_under_limit() {
    for ctx in contexts() {
        let encoder = NetworkMessageEncoder::new();
        let ctx = ctx.with_max_message_size(600);
        let notifications = (1..=30)
            .map(|i| NotificationFixtures::sample(if i % 2 == 0 { "w2" } else { "w1" }, i))
            .collect();

        let messages = encoder.encode_batch(&ctx, notifications);

        assert!(messages.len() > 1);
        messages.assert_within_size(600);
        messages.assert_writer_sequences_increase();
        assert_eq!(messages.decode_all().len(), 30);
    }
}

#[test]
fn test_encoding_by_writer_split() {
    for ctx in contexts() {
        let ctx = ctx.with_ordering(OrderingMode::ByWriter);
        let arrival = vec![
            NotificationFixtures::sample("A", 1),
            NotificationFixtures::sample("B", 1),
            NotificationFixtures::sample("A", 2),
            NotificationFixtures::sample("B", 2),
            NotificationFixtures::sample("A", 3),
        ];

        let first_four = apply_ordering(arrival.clone(), OrderingMode::ByWriter)[..4].to_vec();
        let limit = NetworkMessageEncoder::new().encode_batch(&ctx, first_four)[0].size();

        let messages = NetworkMessageEncoder::new().encode_batch(&ctx.clone().with_max_message_size(limit), arrival);
        assert_eq!(messages.len(), 2);

        let first = decode(&messages[0].payload, ctx.encoding, ctx.schema).expect("first message decodes");
        assert_eq!(notification_labels(&first), vec!["A1", "A2", "A3", "B1"]);
        let second = decode_message(&messages[1]).expect("second message decodes");
        assert_eq!(notification_labels(&second), vec!["B2"]);
    }
}

#[test]
fn test_encoding_ordering_modes() {
    let input = vec![
        NotificationFixtures::sample("b", 2),
        NotificationFixtures::sample("a", 3),
        NotificationFixtures::sample("b", 1),
        NotificationFixtures::sample("a", 1),
    ];

    let arrival = apply_ordering(input.clone(), OrderingMode::Arrival);
    assert_eq!(notification_labels(&arrival), vec!["b2", "a3", "b1", "a1"]);

    let by_writer = apply_ordering(input.clone(), OrderingMode::ByWriter);
    assert_eq!(notification_labels(&by_writer), vec!["a1", "a3", "b1", "b2"]);

    let by_sequence = apply_ordering(input, OrderingMode::BySequence);
    let sequences: Vec<u32> = by_sequence.iter().map(|n| n.sequence_number).collect();
    assert_eq!(sequences, vec![1, 1, 2, 3]);
}

// =============================================================================
// Engine Output
// =============================================================================

#[tokio::test]
async fn test_engine_publishes_decodable_uadp() {
    let group = GroupBuilder::new("g1").batch_size(3).encoding(MessageEncoding::Uadp).build();
    let harness = PublisherHarness::start(group, WriterFixtures::writers(1)).await;

    let handle = harness.source.handle("w1");
    handle.sample("ns=2;s=Value", DataValue::good(Variant::Double(1.25)));
    handle.sample("ns=2;s=Value", DataValue::good(Variant::String("run".into())));
    handle.sample("ns=2;s=Value", DataValue::good(Variant::Boolean(false)));

    eventually(|| harness.sink.notification_count() == 3).await;
    let messages = harness.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages.labels(), vec!["w11", "w12", "w13"]);

    let values: Vec<Variant> = messages
        .decode_all()
        .into_iter()
        .filter_map(|n| match n.payload {
            opcpub_core::NotificationPayload::Sample(v) => Some(v.value),
            opcpub_core::NotificationPayload::Event(_) => None,
        })
        .collect();
    assert_eq!(
        values,
        vec![Variant::Double(1.25), Variant::String("run".into()), Variant::Boolean(false)]
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_engine_drops_oversized_notifications() {
    let group = GroupBuilder::new("g1").batch_size(1).max_message_size(64).build();
    let harness = PublisherHarness::start(group, WriterFixtures::writers(1)).await;

    harness
        .source
        .handle("w1")
        .sample("ns=2;s=Value", DataValue::good(Variant::String("x".repeat(512))));

    eventually(|| harness.engine.stats().encoder.notifications_dropped == 1).await;
    assert_eq!(harness.sink.data_message_count(), 0);

    harness.stop().await;
}
