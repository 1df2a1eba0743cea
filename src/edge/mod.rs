// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Edge connector - reads sensors and ships batches through the resilience buffer
//!
//! Two loops run side by side until shutdown: the read loop samples the
//! sensors and feeds the buffer, the sweep loop replays unacknowledged rows.
//! On shutdown the read loop stops producing and makes one bounded attempt
//! to flush the partial batch.

mod simulator;

pub use simulator::SensorSimulator;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::buffer::{BufferStore, DeliveryOutcome, IngestTransport, ResilienceBuffer};
use crate::config::{BufferConfig, Config, EdgeConfig};
use crate::error::Result;

pub struct EdgeConnector {
    edge: EdgeConfig,
    buffer_config: BufferConfig,
    buffer: ResilienceBuffer,
    simulator: Mutex<SensorSimulator>,
}

impl EdgeConnector {
    /// Open the durable buffer at the configured path
    pub fn new(config: &Config, transport: Arc<dyn IngestTransport>) -> Result<Self> {
        let store = BufferStore::open(&config.buffer.path)?;
        Self::with_store(&config.edge, &config.buffer, store, transport)
    }

    pub fn with_store(
        edge: &EdgeConfig,
        buffer_config: &BufferConfig,
        store: BufferStore,
        transport: Arc<dyn IngestTransport>,
    ) -> Result<Self> {
        let buffer = ResilienceBuffer::new(store, transport, buffer_config.clone())?;

        Ok(Self {
            edge: edge.clone(),
            buffer_config: buffer_config.clone(),
            buffer,
            simulator: Mutex::new(SensorSimulator::new(edge.sensors.clone())),
        })
    }

    pub fn buffer(&self) -> &ResilienceBuffer {
        &self.buffer
    }

    /// Register with the backend. A failure is not fatal: samples keep
    /// accumulating durably and the sweep loop retries registration.
    pub async fn start(&self) -> bool {
        info!(
            "Edge connector for '{}' starting ({} sensors @ {} Hz)",
            self.edge.device_name,
            self.edge.sensors.len(),
            self.edge.sample_rate_hz
        );

        match self
            .buffer
            .register(
                &self.edge.device_name,
                &self.edge.sensors,
                self.buffer_config.registration_attempts,
            )
            .await
        {
            Ok(registration) => {
                info!(
                    "Registered as stream {} (dataset {})",
                    registration.stream_id, registration.dataset_id
                );
                true
            }
            Err(e) => {
                warn!("Registration failed, buffering locally until it succeeds: {}", e);
                false
            }
        }
    }

    /// Register, then run both loops until `shutdown` fires
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let sweep_shutdown = shutdown.resubscribe();

        tokio::select! {
            _ = self.start() => {}
            _ = shutdown.recv() => {
                info!("Shutdown during registration, samples stay buffered");
                return;
            }
        }

        tokio::join!(self.read_loop(shutdown), self.sweep_loop(sweep_shutdown));

        info!("Edge connector stopped");
    }

    async fn read_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.edge.read_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let samples = self.simulator.lock().read_all(Utc::now());
                    // A flush cut short here leaves its rows `queued`
                    tokio::select! {
                        result = self.buffer.push(samples) => {
                            if let Err(e) = result {
                                error!("Failed to buffer samples: {}", e);
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        self.drain().await;
    }

    /// Final flush of the partial batch, bounded by the drain timeout.
    ///
    /// Rows of a flush cut short stay `queued` and are recovered on the next
    /// start.
    pub async fn drain(&self) -> Option<DeliveryOutcome> {
        match timeout(self.buffer_config.drain_timeout(), self.buffer.flush()).await {
            Ok(Ok(outcome)) => {
                info!("Final flush: {:?}", outcome);
                Some(outcome)
            }
            Ok(Err(e)) => {
                error!("Final flush failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Final flush did not finish within {:?}, samples stay buffered",
                    self.buffer_config.drain_timeout()
                );
                None
            }
        }
    }

    async fn sweep_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.buffer_config.sweep_interval();
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.sweep_once() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// One sweep pass, registering first when startup registration failed
    pub async fn sweep_once(&self) {
        if !self.buffer.is_registered() {
            if let Err(e) = self
                .buffer
                .register(&self.edge.device_name, &self.edge.sensors, 1)
                .await
            {
                warn!("Still unregistered: {}", e);
            }
        }

        match self.buffer.sweep().await {
            Ok(report) if report.replayed > 0 || report.purged > 0 => {
                info!(
                    "Sweep replayed {} samples, purged {}",
                    report.replayed, report.purged
                );
            }
            Ok(_) => {}
            Err(e) => error!("Sweep failed: {}", e),
        }
    }
}
