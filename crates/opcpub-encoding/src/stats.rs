// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Running encoder counters.

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the encoder counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EncoderStats {
    /// Notifications handed to the encoder.
    pub notifications_processed: u64,
    /// Notifications dropped because they did not fit a message on their own.
    pub notifications_dropped: u64,
    /// Network messages produced (keep-alives included).
    pub messages_processed: u64,
    /// Total payload bytes produced.
    pub bytes_encoded: u64,
    /// Average number of notifications per network message.
    pub average_notifications_per_message: f64,
    /// Average network message size in bytes.
    pub average_message_size: f64,
}

impl EncoderStats {
    /// Returns the counters as a JSON object for diagnostics endpoints.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "notifications_processed": self.notifications_processed,
            "notifications_dropped": self.notifications_dropped,
            "messages_processed": self.messages_processed,
            "bytes_encoded": self.bytes_encoded,
            "average_notifications_per_message": self.average_notifications_per_message,
            "average_message_size": self.average_message_size,
        })
    }
}

/// Lock-free counters shared by concurrent encode calls.
#[derive(Debug, Default)]
pub(crate) struct EncoderCounters {
    notifications_processed: AtomicU64,
    notifications_encoded: AtomicU64,
    notifications_dropped: AtomicU64,
    messages_processed: AtomicU64,
    bytes_encoded: AtomicU64,
}

impl EncoderCounters {
    pub(crate) fn record_input(&self, count: usize) {
        self.notifications_processed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self, notifications: usize, bytes: usize) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.notifications_encoded
            .fetch_add(notifications as u64, Ordering::Relaxed);
        self.bytes_encoded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EncoderStats {
        let messages = self.messages_processed.load(Ordering::Relaxed);
        let encoded = self.notifications_encoded.load(Ordering::Relaxed);
        let bytes = self.bytes_encoded.load(Ordering::Relaxed);

        let (avg_notifications, avg_size) = if messages > 0 {
            (encoded as f64 / messages as f64, bytes as f64 / messages as f64)
        } else {
            (0.0, 0.0)
        };

        EncoderStats {
            notifications_processed: self.notifications_processed.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            messages_processed: messages,
            bytes_encoded: bytes,
            average_notifications_per_message: avg_notifications,
            average_message_size: avg_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages() {
        let counters = EncoderCounters::default();
        assert_eq!(counters.snapshot().average_message_size, 0.0);

        counters.record_input(5);
        counters.record_message(3, 300);
        counters.record_message(1, 100);
        counters.record_dropped();

        let stats = counters.snapshot();
        assert_eq!(stats.notifications_processed, 5);
        assert_eq!(stats.notifications_dropped, 1);
        assert_eq!(stats.messages_processed, 2);
        assert_eq!(stats.average_notifications_per_message, 2.0);
        assert_eq!(stats.average_message_size, 200.0);
        assert_eq!(stats.to_json()["bytes_encoded"], 400);
    }
}
