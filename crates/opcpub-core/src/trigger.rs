// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Single-slot debounce trigger.
//!
//! Any number of [`DebounceTrigger::trigger`] calls made while nobody is
//! waiting collapse into one stored wake-up. The waiter then sleeps for the
//! debounce delay so that a burst of change notifications arriving right
//! after the first one is folded into the same pass.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// A coalescing wake-up signal with a debounce delay.
#[derive(Debug)]
pub struct DebounceTrigger {
    notify: Notify,
    armed: AtomicBool,
    delay: Duration,
    triggers: AtomicU64,
    fires: AtomicU64,
}

impl DebounceTrigger {
    /// Creates a trigger with the given debounce delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            notify: Notify::new(),
            armed: AtomicBool::new(false),
            delay,
            triggers: AtomicU64::new(0),
            fires: AtomicU64::new(0),
        }
    }

    /// Requests a pass. Never blocks.
    pub fn trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
        if !self.armed.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Waits until triggered, then waits out the debounce delay.
    ///
    /// Triggers arriving during the delay are absorbed into this wake-up.
    pub async fn wait(&self) {
        self.notify.notified().await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.armed.store(false, Ordering::Release);
        self.fires.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `true` if a wake-up is pending.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Returns the debounce delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of `trigger` calls so far.
    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    /// Number of completed wake-ups so far.
    pub fn fire_count(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }
}

impl Default for DebounceTrigger {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_fire() {
        let trigger = Arc::new(DebounceTrigger::new(Duration::from_millis(50)));

        for _ in 0..10 {
            trigger.trigger();
        }
        assert!(trigger.is_armed());

        trigger.wait().await;
        assert_eq!(trigger.trigger_count(), 10);
        assert_eq!(trigger.fire_count(), 1);
        assert!(!trigger.is_armed());

        let pending = tokio::time::timeout(Duration::from_millis(200), trigger.wait()).await;
        assert!(pending.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_delay_is_absorbed() {
        let trigger = Arc::new(DebounceTrigger::new(Duration::from_millis(100)));
        trigger.trigger();

        let waiter = {
            let trigger = trigger.clone();
            tokio::spawn(async move { trigger.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();
        waiter.await.unwrap();

        assert_eq!(trigger.fire_count(), 1);
        assert_eq!(trigger.trigger_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_after_fire_wakes_again() {
        let trigger = DebounceTrigger::new(Duration::ZERO);
        trigger.trigger();
        trigger.wait().await;
        trigger.trigger();
        trigger.wait().await;
        assert_eq!(trigger.fire_count(), 2);
    }
}
