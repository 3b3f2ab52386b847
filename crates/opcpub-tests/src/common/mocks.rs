// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! A [`WriterSetController`] that records every mutation, for driving the
//! registry loader without an engine behind it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use opcpub_core::error::EngineError;
use opcpub_core::model::DataSetWriter;
use opcpub_core::types::{DataSetWriterId, WriterGroupId};
use opcpub_engine::WriterSetController;

// =============================================================================
// RecordingController
// =============================================================================

/// Records add/remove calls and keeps a live set like the engine does.
#[derive(Debug)]
pub struct RecordingController {
    group_id: WriterGroupId,
    live: Mutex<Vec<DataSetWriter>>,
    add_calls: Mutex<Vec<Vec<DataSetWriterId>>>,
    remove_calls: Mutex<Vec<Vec<DataSetWriterId>>>,
    fail_next_adds: AtomicU32,
}

impl RecordingController {
    /// Create a controller for group `g1`.
    pub fn new() -> Arc<Self> {
        Self::for_group("g1")
    }

    /// Create a controller for the given group.
    pub fn for_group(group_id: impl Into<WriterGroupId>) -> Arc<Self> {
        Arc::new(Self {
            group_id: group_id.into(),
            live: Mutex::new(Vec::new()),
            add_calls: Mutex::new(Vec::new()),
            remove_calls: Mutex::new(Vec::new()),
            fail_next_adds: AtomicU32::new(0),
        })
    }

    /// Make the next `count` add calls fail.
    pub fn fail_next_adds(&self, count: u32) {
        self.fail_next_adds.store(count, Ordering::SeqCst);
    }

    /// Ids passed to each add call, in call order.
    pub fn add_calls(&self) -> Vec<Vec<DataSetWriterId>> {
        self.add_calls.lock().clone()
    }

    /// Ids passed to each remove call, in call order.
    pub fn remove_calls(&self) -> Vec<Vec<DataSetWriterId>> {
        self.remove_calls.lock().clone()
    }

    /// Number of add calls that included `writer_id`.
    pub fn adds_of(&self, writer_id: &str) -> usize {
        let id = DataSetWriterId::new(writer_id);
        self.add_calls.lock().iter().filter(|call| call.contains(&id)).count()
    }

    /// The live definition of a writer.
    pub fn live_writer(&self, writer_id: &str) -> Option<DataSetWriter> {
        self.live.lock().iter().find(|w| w.id.as_str() == writer_id).cloned()
    }
}

#[async_trait]
impl WriterSetController for RecordingController {
    fn writer_group_id(&self) -> &WriterGroupId {
        &self.group_id
    }

    fn writer_ids(&self) -> Vec<DataSetWriterId> {
        let mut ids: Vec<_> = self.live.lock().iter().map(|w| w.id.clone()).collect();
        ids.sort();
        ids
    }

    async fn add_writers(&self, writers: Vec<DataSetWriter>) -> Result<usize, EngineError> {
        let ids: Vec<_> = writers.iter().map(|w| w.id.clone()).collect();
        self.add_calls.lock().push(ids);

        let pending = self.fail_next_adds.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next_adds.store(pending - 1, Ordering::SeqCst);
            return Err(EngineError::ShuttingDown);
        }

        let mut live = self.live.lock();
        let count = writers.len();
        for writer in writers {
            live.retain(|w| w.id != writer.id);
            live.push(writer);
        }
        Ok(count)
    }

    async fn remove_writers(&self, writer_ids: Vec<DataSetWriterId>) -> Result<usize, EngineError> {
        let mut live = self.live.lock();
        let before = live.len();
        live.retain(|w| !writer_ids.contains(&w.id));
        self.remove_calls.lock().push(writer_ids);
        Ok(before - live.len())
    }
}
