// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Event bus for live subscribers

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::Alert;
use crate::cycle::CycleState;
use crate::model::{AbortReason, Sample};
use crate::streaming::EventSink;

/// Payload pushed to live subscribers, tagged by `type` with the body in `data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    StateChange {
        old_state: CycleState,
        new_state: CycleState,
        cycle_id: Option<String>,
    },
    CycleComplete {
        cycle_id: String,
        cycle_number: u32,
        sample_count: u64,
        duration_sec: f64,
        abort_reason: Option<AbortReason>,
    },
    Samples {
        sample_count: usize,
        /// First few samples of the batch only
        samples: Vec<Sample>,
    },
    AnalysisResult {
        cycle_id: String,
        health_score: f64,
        anomaly_flag: bool,
        alerts: Vec<Alert>,
        top_3_sensors: Vec<(String, f64)>,
    },
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::StateChange { .. } => "state_change",
            LiveEvent::CycleComplete { .. } => "cycle_complete",
            LiveEvent::Samples { .. } => "samples",
            LiveEvent::AnalysisResult { .. } => "analysis_result",
        }
    }
}

/// Event as delivered on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub stream_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LiveEvent,
}

/// Fan-out of live events. Publishing never blocks; receivers that fall
/// behind skip the oldest messages.
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    /// Publish and return the event id. Succeeds with no subscribers.
    pub fn publish(&self, stream_id: &str, event: LiveEvent) -> u64 {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(Event {
            id,
            stream_id: stream_id.to_string(),
            timestamp: Utc::now(),
            event,
        });
        id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn broadcast(&self, stream_id: &str, event: LiveEvent) {
        self.publish(stream_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish("s-1", LiveEvent::Samples { sample_count: 0, samples: vec![] }), 0);
        assert_eq!(bus.publish("s-1", LiveEvent::Samples { sample_count: 0, samples: vec![] }), 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for n in 0..5 {
            bus.publish("s-1", LiveEvent::Samples { sample_count: n, samples: vec![] });
        }

        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(3))));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.id, 3);
    }

    #[test]
    fn test_wire_shape() {
        let event = Event {
            id: 7,
            stream_id: "s-1".into(),
            timestamp: Utc::now(),
            event: LiveEvent::CycleComplete {
                cycle_id: "c-1".into(),
                cycle_number: 2,
                sample_count: 8,
                duration_sec: 12.5,
                abort_reason: None,
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cycle_complete");
        assert_eq!(json["stream_id"], "s-1");
        assert_eq!(json["data"]["sample_count"], 8);
        assert_eq!(event.event.kind(), "cycle_complete");

        let state = serde_json::to_value(LiveEvent::StateChange {
            old_state: CycleState::Active,
            new_state: CycleState::Stopping,
            cycle_id: Some("c-1".into()),
        })
        .unwrap();
        assert_eq!(state["type"], "state_change");
        assert_eq!(state["data"]["new_state"], serde_json::to_value(CycleState::Stopping).unwrap());
    }
}
