// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Assertions over published network messages.

use opcpub_core::message::{NetworkMessage, Notification};
use opcpub_encoding::decode_message;

/// Assertion extensions for a list of published messages.
pub trait MessageAssertions {
    /// Decode every data message, in publish order.
    fn decode_all(&self) -> Vec<Notification>;

    /// `writer_id` and sequence number of every decoded notification,
    /// concatenated (`"w1" + 3` becomes `"w13"`).
    fn labels(&self) -> Vec<String>;

    /// Assert that no payload exceeds `limit` bytes.
    fn assert_within_size(&self, limit: usize);

    /// Assert that sequence numbers of each writer strictly increase.
    fn assert_writer_sequences_increase(&self);
}

impl MessageAssertions for [NetworkMessage] {
    fn decode_all(&self) -> Vec<Notification> {
        self.iter()
            .filter(|m| !m.is_keep_alive())
            .flat_map(|m| decode_message(m).expect("published message decodes"))
            .collect()
    }

    fn labels(&self) -> Vec<String> {
        notification_labels(&self.decode_all())
    }

    fn assert_within_size(&self, limit: usize) {
        for message in self {
            assert!(
                message.size() <= limit,
                "message {} is {} bytes, limit is {}",
                message.message_id,
                message.size(),
                limit
            );
        }
    }

    fn assert_writer_sequences_increase(&self) {
        let notifications = self.decode_all();
        let mut last: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
        for n in &notifications {
            if let Some(previous) = last.insert(n.writer_id.as_str(), n.sequence_number) {
                assert!(
                    n.sequence_number > previous,
                    "writer {} went from {} to {}",
                    n.writer_id,
                    previous,
                    n.sequence_number
                );
            }
        }
    }
}

/// Labels of notifications, see [`MessageAssertions::labels`].
pub fn notification_labels(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .map(|n| format!("{}{}", n.writer_id, n.sequence_number))
        .collect()
}
