// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Live ingest engine
//!
//! Owns the stream registry and drives each stream's state machine from
//! registration, sample batches and cycle control calls. Notifications from
//! the state machines go through a channel to a dispatcher task, which
//! persists finalized cycles and runs analysis off the ingest path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisEngine;
use crate::buffer::{BatchAck, IngestTransport, Registration, TransportError};
use crate::config::{Config, CycleConfig};
use crate::cycle::{
    ChannelObserver, CycleEvent, CycleNotification, CycleObserver, CycleStateMachine,
    SharedEntry, StreamRegistry, StreamStatus,
};
use crate::db::Database;
use crate::error::{Result, VertacError};
use crate::model::{Cycle, Dataset, Sample, SensorSpec, Stream};
use crate::storage::{CycleStore, SamplePoint, SampleStore};
use crate::streaming::EventSink;

use super::{LiveEvent, Scheduler};

/// Samples echoed to live subscribers per ingested batch
const SAMPLE_PREVIEW: usize = 5;

pub struct Engine {
    cycle_config: CycleConfig,
    registry: StreamRegistry,
    cycles: Arc<dyn CycleStore>,
    samples: Arc<dyn SampleStore>,
    analysis: Arc<AnalysisEngine>,
    events: Arc<dyn EventSink>,
    observer: Arc<dyn CycleObserver>,
}

impl Engine {
    /// Build the engine and spawn its dispatcher. Must be called from within
    /// a tokio runtime.
    pub fn new(
        config: &Config,
        cycles: Arc<dyn CycleStore>,
        samples: Arc<dyn SampleStore>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let analysis = Arc::new(AnalysisEngine::new(
            config.analysis.clone(),
            cycles.clone(),
            samples.clone(),
        ));
        let (observer, notifications) = ChannelObserver::new();

        let dispatcher = Dispatcher {
            cycles: cycles.clone(),
            analysis: analysis.clone(),
            events: events.clone(),
        };
        tokio::spawn(dispatcher.run(notifications));

        Arc::new(Self {
            cycle_config: config.cycle.clone(),
            registry: StreamRegistry::new(),
            cycles,
            samples,
            analysis,
            events,
            observer: Arc::new(observer),
        })
    }

    pub fn with_database(config: &Config, db: Arc<Database>, events: Arc<dyn EventSink>) -> Arc<Self> {
        Self::new(config, db.clone(), db, events)
    }

    pub fn analysis(&self) -> &AnalysisEngine {
        &self.analysis
    }

    pub fn stream_count(&self) -> usize {
        self.registry.len()
    }

    /// Register a data source: creates its dataset and state machine
    pub fn register_stream(&self, device_name: &str, sensors: Vec<SensorSpec>) -> Result<Registration> {
        let stream_id = Uuid::new_v4().to_string();
        let dataset_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        self.cycles.save_dataset(&Dataset {
            dataset_id: dataset_id.clone(),
            name: format!("{} - live", device_name),
            device_name: device_name.to_string(),
            sensors: sensors.clone(),
            created_at: now,
        })?;

        let mut machine = CycleStateMachine::new(
            &stream_id,
            &dataset_id,
            &self.cycle_config,
            self.observer.clone(),
        );
        machine.transition_at(CycleEvent::RegisterStream, None, now);

        info!(
            "Registered stream {} for '{}' with {} sensors",
            stream_id,
            device_name,
            sensors.len()
        );

        self.registry.insert(
            Stream {
                stream_id: stream_id.clone(),
                dataset_id: dataset_id.clone(),
                device_name: device_name.to_string(),
                sensors,
                registered_at: now,
            },
            machine,
        );

        Ok(Registration::new(stream_id, dataset_id))
    }

    fn entry(&self, stream_id: &str) -> Result<SharedEntry> {
        self.registry
            .get(stream_id)
            .ok_or_else(|| VertacError::StreamNotFound(stream_id.to_string()))
    }

    /// Feed a batch: one SAMPLE_RECEIVED per sample, then store the points
    /// tagged with the cycle that was open when each sample arrived.
    ///
    /// Points up to a finalizing sample are written before that sample's
    /// transition, so the completed cycle is never read without them.
    pub fn ingest_batch(&self, stream_id: &str, samples: &[Sample]) -> Result<BatchAck> {
        let entry = self.entry(stream_id)?;
        let received_at = Utc::now();

        let mut guard = entry.lock();
        let dataset_id = guard.stream.dataset_id.clone();
        let mut points = Vec::with_capacity(samples.len());

        for sample in samples {
            points.push(SamplePoint {
                dataset_id: dataset_id.clone(),
                stream_id: stream_id.to_string(),
                cycle_id: guard.machine.active_cycle_id().map(str::to_string),
                sensor_id: sample.sensor_id.clone(),
                sensor_name: sample.sensor_name.clone(),
                value: sample.value,
                quality: sample.quality,
                latency_ms: (received_at - sample.timestamp).num_milliseconds().max(0),
                timestamp: sample.timestamp,
            });

            if guard.machine.closes_on_sample(received_at) {
                self.samples.write_points(&points)?;
                points.clear();
            }
            guard
                .machine
                .transition_at(CycleEvent::SampleReceived, None, received_at);
        }

        self.samples.write_points(&points)?;
        drop(guard);

        self.events.broadcast(
            stream_id,
            LiveEvent::Samples {
                sample_count: samples.len(),
                samples: samples.iter().take(SAMPLE_PREVIEW).cloned().collect(),
            },
        );

        debug!("Stream {}: ingested {} samples", stream_id, samples.len());

        Ok(BatchAck {
            ack_id: Uuid::new_v4().to_string(),
            buffer_status: "ok".to_string(),
            samples_received: samples.len(),
        })
    }

    fn apply(
        &self,
        stream_id: &str,
        event: CycleEvent,
        metadata: Option<Map<String, Value>>,
    ) -> Result<StreamStatus> {
        let entry = self.entry(stream_id)?;
        let mut guard = entry.lock();
        if !guard.machine.transition(event, metadata) {
            debug!(
                "Stream {}: {:?} had no effect in state {}",
                stream_id,
                event,
                guard.machine.state()
            );
        }
        Ok(guard.machine.status())
    }

    pub fn start_cycle(
        &self,
        stream_id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<StreamStatus> {
        self.apply(stream_id, CycleEvent::CycleStart, metadata)
    }

    pub fn stop_cycle(&self, stream_id: &str) -> Result<StreamStatus> {
        self.apply(stream_id, CycleEvent::CycleStop, None)
    }

    pub fn pause_cycle(&self, stream_id: &str) -> Result<StreamStatus> {
        self.apply(stream_id, CycleEvent::CyclePause, None)
    }

    pub fn resume_cycle(&self, stream_id: &str) -> Result<StreamStatus> {
        self.apply(stream_id, CycleEvent::CycleResume, None)
    }

    pub fn abort_cycle(&self, stream_id: &str) -> Result<StreamStatus> {
        self.apply(stream_id, CycleEvent::ManualAbort, None)
    }

    pub fn connection_lost(&self, stream_id: &str) -> Result<StreamStatus> {
        self.apply(stream_id, CycleEvent::ConnectionLost, None)
    }

    pub fn stream_status(&self, stream_id: &str) -> Result<StreamStatus> {
        Ok(self.entry(stream_id)?.lock().machine.status())
    }

    pub fn streams(&self) -> Vec<StreamStatus> {
        self.registry
            .entries()
            .iter()
            .map(|entry| entry.lock().machine.status())
            .collect()
    }

    /// Drop a stream. An open cycle is aborted as a lost connection.
    pub fn deregister_stream(&self, stream_id: &str) -> Result<StreamStatus> {
        let entry = self
            .registry
            .remove(stream_id)
            .ok_or_else(|| VertacError::StreamNotFound(stream_id.to_string()))?;

        let mut guard = entry.lock();
        if guard.machine.state().is_running() {
            guard.machine.transition(CycleEvent::ConnectionLost, None);
        }
        info!("Deregistered stream {}", stream_id);
        Ok(guard.machine.status())
    }

    /// Liveness pass over every stream. Returns how many timeouts fired.
    pub fn tick(&self) -> usize {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&self, now: DateTime<Utc>) -> usize {
        self.registry
            .entries()
            .iter()
            .filter(|entry| entry.lock().machine.tick_at(now))
            .count()
    }

    /// Run the liveness ticker on `scheduler`
    pub fn spawn_liveness(self: &Arc<Self>, scheduler: &Scheduler) {
        let engine = self.clone();
        scheduler.every("liveness", self.cycle_config.liveness_interval(), move || {
            let engine = engine.clone();
            async move {
                let fired = engine.tick();
                if fired > 0 {
                    debug!("Liveness tick fired {} timeouts", fired);
                }
            }
        });
    }
}

/// Consumes state machine notifications in order
struct Dispatcher {
    cycles: Arc<dyn CycleStore>,
    analysis: Arc<AnalysisEngine>,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    async fn run(self, mut notifications: mpsc::UnboundedReceiver<CycleNotification>) {
        while let Some(notification) = notifications.recv().await {
            match notification {
                CycleNotification::StateChanged(change) => {
                    self.events.broadcast(
                        &change.stream_id,
                        LiveEvent::StateChange {
                            old_state: change.old_state,
                            new_state: change.new_state,
                            cycle_id: change.cycle_id,
                        },
                    );
                }
                CycleNotification::CycleCompleted(cycle) => self.cycle_completed(cycle).await,
            }
        }
        debug!("Cycle dispatcher stopped");
    }

    async fn cycle_completed(&self, cycle: Cycle) {
        let cycles = self.cycles.clone();
        let persisted = tokio::task::spawn_blocking(move || persist_cycle(cycles.as_ref(), cycle)).await;

        let cycle = match persisted {
            Ok(Ok(cycle)) => cycle,
            Ok(Err(e)) => {
                error!("Failed to persist finalized cycle: {}", e);
                return;
            }
            Err(e) => {
                error!("Cycle persistence task failed: {}", e);
                return;
            }
        };

        let stream_id = cycle.stream_id.clone();
        self.events.broadcast(
            &stream_id,
            LiveEvent::CycleComplete {
                cycle_id: cycle.cycle_id.clone(),
                cycle_number: cycle.cycle_number,
                sample_count: cycle.sample_count,
                duration_sec: cycle.duration_secs(),
                abort_reason: cycle.abort_reason,
            },
        );

        let analysis = self.analysis.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let cycle_id = cycle.cycle_id.clone();
            match tokio::task::spawn_blocking(move || analysis.analyze_completed(&cycle)).await {
                Ok(Ok(Some(result))) => events.broadcast(
                    &stream_id,
                    LiveEvent::AnalysisResult {
                        cycle_id: result.cycle_id,
                        health_score: result.health_score,
                        anomaly_flag: result.anomaly_flag,
                        alerts: result.alerts,
                        top_3_sensors: result.top_contributors,
                    },
                ),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("Analysis of cycle {} failed: {}", cycle_id, e),
                Err(e) => error!("Analysis task for cycle {} failed: {}", cycle_id, e),
            }
        });
    }
}

/// Store a finalized cycle; the first complete cycle of a dataset becomes
/// its reference
fn persist_cycle(cycles: &dyn CycleStore, mut cycle: Cycle) -> Result<Cycle> {
    let becomes_reference =
        cycle.is_complete() && cycles.reference_cycle(&cycle.dataset_id)?.is_none();

    cycle.is_reference = cycle.is_reference || becomes_reference;
    cycles.save_cycle(&cycle)?;

    if becomes_reference {
        cycles.set_reference_cycle(&cycle.cycle_id)?;
        info!(
            "Cycle {} is now the reference of dataset {}",
            cycle.cycle_id, cycle.dataset_id
        );
    }
    Ok(cycle)
}

/// In-process transport straight into an [`Engine`], for demo runs
pub struct LocalTransport {
    engine: Arc<Engine>,
}

impl LocalTransport {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

fn rejected(e: VertacError) -> TransportError {
    TransportError::Rejected {
        status: if e.is_validation() { 404 } else { 500 },
        message: e.to_string(),
    }
}

#[async_trait]
impl IngestTransport for LocalTransport {
    async fn register(
        &self,
        device_name: &str,
        sensors: &[SensorSpec],
    ) -> std::result::Result<Registration, TransportError> {
        self.engine
            .register_stream(device_name, sensors.to_vec())
            .map_err(rejected)
    }

    async fn send_batch(
        &self,
        stream_id: &str,
        samples: &[Sample],
    ) -> std::result::Result<BatchAck, TransportError> {
        self.engine.ingest_batch(stream_id, samples).map_err(rejected)
    }
}
