// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Per-stream cycle state machine
//!
//! ```text
//! IDLE -> WAITING_START -> ACTIVE -> STOPPING -> STOPPED
//!                            |          |
//!                            +----------+------> ABORTED
//! ```
//!
//! STOPPED and ABORTED accept a new CYCLE_START. Events that do not apply to
//! the current state are ignored.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CycleConfig;
use crate::model::{AbortReason, Cycle};

use super::{CycleEvent, CycleObserver, CycleState, StateChange, StreamStatus};

const PAUSED_AT: &str = "paused_at";

pub struct CycleStateMachine {
    stream_id: String,
    dataset_id: String,
    state: CycleState,
    cycle: Option<Cycle>,
    cycle_counter: u32,
    last_sample_time: Option<DateTime<Utc>>,
    stop_signal_time: Option<DateTime<Utc>>,
    finalized: bool,
    grace_period: Duration,
    sample_timeout: Duration,
    observer: Arc<dyn CycleObserver>,
}

impl CycleStateMachine {
    pub fn new(
        stream_id: &str,
        dataset_id: &str,
        config: &CycleConfig,
        observer: Arc<dyn CycleObserver>,
    ) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            dataset_id: dataset_id.to_string(),
            state: CycleState::Idle,
            cycle: None,
            cycle_counter: 0,
            last_sample_time: None,
            stop_signal_time: None,
            finalized: false,
            grace_period: config.grace_period(),
            sample_timeout: config.sample_timeout(),
            observer,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// The open cycle, or the last finalized one
    pub fn current_cycle(&self) -> Option<&Cycle> {
        self.cycle.as_ref()
    }

    /// Cycle id that incoming samples belong to, if a cycle is open
    pub fn active_cycle_id(&self) -> Option<&str> {
        if self.state.is_running() {
            self.cycle.as_ref().map(|c| c.cycle_id.as_str())
        } else {
            None
        }
    }

    /// Whether a sample arriving at `now` finalizes the cycle
    pub fn closes_on_sample(&self, now: DateTime<Utc>) -> bool {
        self.state == CycleState::Stopping && self.grace_elapsed(now)
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            stream_id: self.stream_id.clone(),
            state: self.state,
            cycle_id: self.cycle.as_ref().map(|c| c.cycle_id.clone()),
            cycle_number: self.cycle.as_ref().map(|c| c.cycle_number),
            start_time: self.cycle.as_ref().map(|c| c.start_time),
            sample_count: self.cycle.as_ref().map_or(0, |c| c.sample_count),
            last_sample_time: self.last_sample_time,
        }
    }

    /// Apply an event at wall-clock time
    pub fn transition(&mut self, event: CycleEvent, metadata: Option<Map<String, Value>>) -> bool {
        self.transition_at(event, metadata, Utc::now())
    }

    /// Apply an event at `now`. Returns `false` when the event is a no-op.
    pub fn transition_at(
        &mut self,
        event: CycleEvent,
        metadata: Option<Map<String, Value>>,
        now: DateTime<Utc>,
    ) -> bool {
        use CycleEvent::*;
        use CycleState::*;

        match (event, self.state) {
            (RegisterStream, Idle) => {
                self.set_state(WaitingStart, now);
                true
            }
            (CycleStart, state) if state.can_start() => {
                self.start_cycle(metadata.unwrap_or_default(), now);
                true
            }
            (SampleReceived, Active) => {
                self.record_sample(now);
                true
            }
            (SampleReceived, Stopping) => {
                self.record_sample(now);
                if self.grace_elapsed(now) {
                    self.set_state(Stopped, now);
                    self.finalize(now);
                }
                true
            }
            (CycleStop, Active) => {
                self.stop_signal_time = Some(now);
                if let Some(cycle) = self.cycle.as_mut() {
                    cycle.stop_time = Some(now);
                }
                self.set_state(Stopping, now);
                true
            }
            (CyclePause, Active) => {
                if let Some(cycle) = self.cycle.as_mut() {
                    cycle.metadata.insert(
                        PAUSED_AT.to_string(),
                        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                }
                true
            }
            (CycleResume, Active) => {
                if let Some(cycle) = self.cycle.as_mut() {
                    cycle.metadata.remove(PAUSED_AT);
                }
                true
            }
            (Timeout, Active) => {
                self.abort(AbortReason::SampleTimeout, now);
                true
            }
            (Timeout, Stopping) if self.grace_elapsed(now) => {
                self.set_state(Stopped, now);
                self.finalize(now);
                true
            }
            (ConnectionLost, Active | Stopping) => {
                self.abort(AbortReason::ConnectionLost, now);
                true
            }
            (ManualAbort, Active | Stopping) => {
                self.abort(AbortReason::ManualAbort, now);
                true
            }
            (event, state) => {
                debug!(
                    "Stream {}: ignoring {:?} in state {}",
                    self.stream_id, event, state
                );
                false
            }
        }
    }

    /// Liveness check at wall-clock time
    pub fn tick(&mut self) -> bool {
        self.tick_at(Utc::now())
    }

    /// Fire TIMEOUT when ACTIVE has been silent too long or STOPPING has
    /// outlived its grace period. Returns whether a timeout fired.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CycleState::Active => {
                let last_activity = self
                    .last_sample_time
                    .or_else(|| self.cycle.as_ref().map(|c| c.start_time))
                    .unwrap_or(now);
                if now - last_activity > self.sample_timeout {
                    warn!(
                        "Stream {}: no samples for {}s, aborting cycle",
                        self.stream_id,
                        (now - last_activity).num_seconds()
                    );
                    return self.transition_at(CycleEvent::Timeout, None, now);
                }
                false
            }
            CycleState::Stopping if self.grace_elapsed(now) => {
                self.transition_at(CycleEvent::Timeout, None, now)
            }
            _ => false,
        }
    }

    fn grace_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.stop_signal_time
            .map_or(false, |stop| now - stop >= self.grace_period)
    }

    fn start_cycle(&mut self, metadata: Map<String, Value>, now: DateTime<Utc>) {
        self.cycle_counter += 1;

        let mut cycle = Cycle::new(
            Uuid::new_v4().to_string(),
            &self.stream_id,
            &self.dataset_id,
            self.cycle_counter,
            now,
        );
        cycle.metadata = metadata;

        info!(
            "Stream {}: cycle {} started ({})",
            self.stream_id, cycle.cycle_number, cycle.cycle_id
        );

        self.cycle = Some(cycle);
        self.last_sample_time = None;
        self.stop_signal_time = None;
        self.finalized = false;
        self.set_state(CycleState::Active, now);
    }

    fn record_sample(&mut self, now: DateTime<Utc>) {
        self.last_sample_time = Some(now);
        if let Some(cycle) = self.cycle.as_mut() {
            cycle.sample_count += 1;
        }
    }

    fn abort(&mut self, reason: AbortReason, now: DateTime<Utc>) {
        if let Some(cycle) = self.cycle.as_mut() {
            cycle.abort_reason = Some(reason);
        }
        warn!("Stream {}: cycle aborted ({})", self.stream_id, reason.as_str());
        self.set_state(CycleState::Aborted, now);
        self.finalize(now);
    }

    fn set_state(&mut self, new_state: CycleState, now: DateTime<Utc>) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        self.state = new_state;

        debug!("Stream {}: {} -> {}", self.stream_id, old_state, new_state);

        self.observer.on_state_change(&StateChange {
            stream_id: self.stream_id.clone(),
            old_state,
            new_state,
            cycle_id: self.cycle.as_ref().map(|c| c.cycle_id.clone()),
            timestamp: now,
        });
    }

    fn finalize(&mut self, now: DateTime<Utc>) {
        if self.finalized {
            return;
        }
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };

        self.finalized = true;
        cycle.end_time = Some(now.max(cycle.start_time));

        info!(
            "Stream {}: cycle {} finalized with {} samples",
            self.stream_id, cycle.cycle_number, cycle.sample_count
        );

        self.observer.on_cycle_complete(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::testing::RecordingObserver;

    fn machine() -> (CycleStateMachine, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let sm = CycleStateMachine::new("stream-1", "ds-1", &CycleConfig::default(), observer.clone());
        (sm, observer)
    }

    /// Drive a fresh machine into `state`
    fn machine_in(state: CycleState, t0: DateTime<Utc>) -> (CycleStateMachine, Arc<RecordingObserver>) {
        let (mut sm, observer) = machine();
        let steps: &[CycleEvent] = match state {
            CycleState::Idle => &[],
            CycleState::WaitingStart => &[CycleEvent::RegisterStream],
            CycleState::Active => &[CycleEvent::RegisterStream, CycleEvent::CycleStart],
            CycleState::Stopping => &[
                CycleEvent::RegisterStream,
                CycleEvent::CycleStart,
                CycleEvent::CycleStop,
            ],
            CycleState::Stopped => &[
                CycleEvent::RegisterStream,
                CycleEvent::CycleStart,
                CycleEvent::CycleStop,
            ],
            CycleState::Aborted => &[
                CycleEvent::RegisterStream,
                CycleEvent::CycleStart,
                CycleEvent::ManualAbort,
            ],
        };
        for event in steps {
            sm.transition_at(*event, None, t0);
        }
        if state == CycleState::Stopped {
            sm.tick_at(t0 + Duration::seconds(10));
        }
        assert_eq!(sm.state(), state);
        (sm, observer)
    }

    fn expected(event: CycleEvent, state: CycleState) -> Option<CycleState> {
        use CycleEvent::*;
        use CycleState::*;
        match (event, state) {
            (RegisterStream, Idle) => Some(WaitingStart),
            (CycleStart, WaitingStart | Stopped | Aborted) => Some(Active),
            (SampleReceived, Active) => Some(Active),
            (SampleReceived, Stopping) => Some(Stopping),
            (CycleStop, Active) => Some(Stopping),
            (CyclePause | CycleResume, Active) => Some(Active),
            (Timeout, Active) => Some(Aborted),
            (ConnectionLost | ManualAbort, Active | Stopping) => Some(Aborted),
            _ => None,
        }
    }

    #[test]
    fn test_transition_table() {
        let states = [
            CycleState::Idle,
            CycleState::WaitingStart,
            CycleState::Active,
            CycleState::Stopping,
            CycleState::Stopped,
            CycleState::Aborted,
        ];

        for state in states {
            for event in CycleEvent::ALL {
                let t0 = Utc::now();
                let (mut sm, observer) = machine_in(state, t0);
                let changes_before = observer.change_count();
                let completed_before = observer.completed_count();

                // within the grace period, so TIMEOUT in STOPPING is a no-op
                let applied = sm.transition_at(event, None, t0 + Duration::seconds(1));

                match expected(event, state) {
                    Some(next) => {
                        assert!(applied, "{:?} in {:?} should apply", event, state);
                        assert_eq!(sm.state(), next, "{:?} in {:?}", event, state);
                        let changed = usize::from(next != state);
                        assert_eq!(observer.change_count(), changes_before + changed);
                        let finalizes = usize::from(next == CycleState::Aborted);
                        assert_eq!(observer.completed_count(), completed_before + finalizes);
                    }
                    None => {
                        assert!(!applied, "{:?} in {:?} should be ignored", event, state);
                        assert_eq!(sm.state(), state);
                        assert_eq!(observer.change_count(), changes_before);
                        assert_eq!(observer.completed_count(), completed_before);
                    }
                }
            }
        }
    }

    #[test]
    fn test_cycle_numbers_increase() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::WaitingStart, t0);

        for n in 1..=3u32 {
            sm.transition_at(CycleEvent::CycleStart, None, t0);
            assert_eq!(sm.current_cycle().unwrap().cycle_number, n);
            sm.transition_at(CycleEvent::ManualAbort, None, t0);
        }

        let ids: Vec<String> = observer
            .completed
            .lock()
            .iter()
            .map(|c| c.cycle_id.clone())
            .collect();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_grace_period_boundary() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::Stopping, t0);

        sm.transition_at(CycleEvent::SampleReceived, None, t0 + Duration::milliseconds(9_999));
        assert_eq!(sm.state(), CycleState::Stopping);
        assert_eq!(observer.completed_count(), 0);

        sm.transition_at(CycleEvent::SampleReceived, None, t0 + Duration::seconds(10));
        assert_eq!(sm.state(), CycleState::Stopped);
        assert_eq!(observer.completed_count(), 1);

        let cycle = &observer.completed.lock()[0];
        assert_eq!(cycle.sample_count, 2);
        assert!(cycle.is_complete());
    }

    #[test]
    fn test_finalize_fires_once() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::Stopping, t0);
        let late = t0 + Duration::seconds(30);

        assert!(sm.tick_at(late));
        for event in CycleEvent::ALL {
            if event != CycleEvent::CycleStart {
                sm.transition_at(event, None, late);
            }
        }
        sm.tick_at(late + Duration::seconds(60));

        assert_eq!(sm.state(), CycleState::Stopped);
        assert_eq!(observer.completed_count(), 1);
    }

    #[test]
    fn test_late_samples_then_tick() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::WaitingStart, t0);

        sm.transition_at(CycleEvent::CycleStart, None, t0);
        for i in 0..5 {
            sm.transition_at(CycleEvent::SampleReceived, None, t0 + Duration::milliseconds(100 * i));
        }
        let stop = t0 + Duration::seconds(1);
        sm.transition_at(CycleEvent::CycleStop, None, stop);
        for i in 1..=3 {
            sm.transition_at(CycleEvent::SampleReceived, None, stop + Duration::seconds(i));
        }
        assert_eq!(sm.state(), CycleState::Stopping);

        assert!(sm.tick_at(stop + Duration::seconds(11)));

        assert_eq!(sm.state(), CycleState::Stopped);
        let completed = observer.completed.lock();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].sample_count, 8);
        assert_eq!(completed[0].stop_time, Some(stop));
        assert!(completed[0].end_time.unwrap() >= completed[0].start_time);
    }

    #[test]
    fn test_silence_aborts_active_cycle() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::Active, t0);

        sm.transition_at(CycleEvent::SampleReceived, None, t0 + Duration::seconds(5));
        assert!(!sm.tick_at(t0 + Duration::seconds(35)));
        assert!(sm.tick_at(t0 + Duration::seconds(36)));

        assert_eq!(sm.state(), CycleState::Aborted);
        let completed = observer.completed.lock();
        assert_eq!(completed[0].abort_reason, Some(AbortReason::SampleTimeout));
    }

    #[test]
    fn test_pause_resume_annotates_metadata() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::Active, t0);
        let changes = observer.change_count();

        sm.transition_at(CycleEvent::CyclePause, None, t0);
        assert!(sm.current_cycle().unwrap().metadata.contains_key("paused_at"));

        sm.transition_at(CycleEvent::CycleResume, None, t0);
        assert!(!sm.current_cycle().unwrap().metadata.contains_key("paused_at"));
        assert_eq!(observer.change_count(), changes);
    }

    #[test]
    fn test_start_metadata_and_status() {
        let t0 = Utc::now();
        let (mut sm, _) = machine_in(CycleState::WaitingStart, t0);

        let mut metadata = Map::new();
        metadata.insert("recipe".into(), Value::from("A-17"));
        sm.transition_at(CycleEvent::CycleStart, Some(metadata), t0);
        sm.transition_at(CycleEvent::SampleReceived, None, t0);

        let status = sm.status();
        assert_eq!(status.state, CycleState::Active);
        assert_eq!(status.cycle_number, Some(1));
        assert_eq!(status.sample_count, 1);
        assert_eq!(status.last_sample_time, Some(t0));
        assert_eq!(sm.current_cycle().unwrap().metadata["recipe"], "A-17");
        assert!(sm.active_cycle_id().is_some());
    }

    #[test]
    fn test_connection_lost_while_stopping() {
        let t0 = Utc::now();
        let (mut sm, observer) = machine_in(CycleState::Stopping, t0);

        sm.transition_at(CycleEvent::ConnectionLost, None, t0 + Duration::seconds(2));
        assert_eq!(sm.state(), CycleState::Aborted);
        assert!(sm.active_cycle_id().is_none());
        let completed = observer.completed.lock();
        assert_eq!(completed[0].abort_reason, Some(AbortReason::ConnectionLost));
    }
}
