// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Cycle lifecycle - per-stream state machine, observers and registry

mod observer;
mod registry;
mod state_machine;

pub use observer::*;
pub use registry::*;
pub use state_machine::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a stream's current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    WaitingStart,
    Active,
    Stopping,
    Stopped,
    Aborted,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::WaitingStart => "waiting_start",
            CycleState::Active => "active",
            CycleState::Stopping => "stopping",
            CycleState::Stopped => "stopped",
            CycleState::Aborted => "aborted",
        }
    }

    /// States that accept a fresh CYCLE_START
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            CycleState::WaitingStart | CycleState::Stopped | CycleState::Aborted
        )
    }

    /// A cycle is open and collecting samples
    pub fn is_running(&self) -> bool {
        matches!(self, CycleState::Active | CycleState::Stopping)
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleEvent {
    RegisterStream,
    CycleStart,
    SampleReceived,
    CycleStop,
    CyclePause,
    CycleResume,
    Timeout,
    ConnectionLost,
    ManualAbort,
}

impl CycleEvent {
    pub const ALL: [CycleEvent; 9] = [
        CycleEvent::RegisterStream,
        CycleEvent::CycleStart,
        CycleEvent::SampleReceived,
        CycleEvent::CycleStop,
        CycleEvent::CyclePause,
        CycleEvent::CycleResume,
        CycleEvent::Timeout,
        CycleEvent::ConnectionLost,
        CycleEvent::ManualAbort,
    ];
}

/// An actual state change of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub stream_id: String,
    pub old_state: CycleState,
    pub new_state: CycleState,
    pub cycle_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of a stream's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub state: CycleState,
    pub cycle_id: Option<String>,
    pub cycle_number: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub sample_count: u64,
    pub last_sample_time: Option<DateTime<Utc>>,
}
