// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Registry of live streams and their state machines

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::model::Stream;

use super::CycleStateMachine;

/// A registered stream with its exclusively owned state machine
pub struct StreamEntry {
    pub stream: Stream,
    pub machine: CycleStateMachine,
}

pub type SharedEntry = Arc<Mutex<StreamEntry>>;

/// Streams by id.
///
/// The map lock is only held to look up, insert or remove entries; each
/// entry has its own lock so streams never contend with each other.
#[derive(Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<String, SharedEntry>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stream: Stream, machine: CycleStateMachine) -> SharedEntry {
        let stream_id = stream.stream_id.clone();
        let entry = Arc::new(Mutex::new(StreamEntry { stream, machine }));
        self.streams.write().insert(stream_id, entry.clone());
        entry
    }

    pub fn get(&self, stream_id: &str) -> Option<SharedEntry> {
        self.streams.read().get(stream_id).cloned()
    }

    pub fn remove(&self, stream_id: &str) -> Option<SharedEntry> {
        self.streams.write().remove(stream_id)
    }

    /// Snapshot of all entries, safe to iterate without holding the map lock
    pub fn entries(&self) -> Vec<SharedEntry> {
        self.streams.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}
