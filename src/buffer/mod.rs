// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Resilience buffer - durable, ordered, at-least-once delivery to the backend

mod store;
mod transport;

pub use store::*;
pub use transport::*;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::BufferConfig;
use crate::error::Result;
use crate::model::{Sample, SensorSpec};

/// What happened to one batch
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { count: usize },
    /// Kept durably as unacknowledged for the sweep
    Buffered { count: usize, error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub replayed: usize,
    pub purged: usize,
}

pub struct ResilienceBuffer {
    store: BufferStore,
    transport: Arc<dyn IngestTransport>,
    config: BufferConfig,
    stream_id: RwLock<Option<String>>,
    pending: Mutex<Vec<BufferedSample>>,
    last_flush: Mutex<Instant>,
}

impl ResilienceBuffer {
    /// Rows left `queued` by a previous process are handed to the sweep
    pub fn new(
        store: BufferStore,
        transport: Arc<dyn IngestTransport>,
        config: BufferConfig,
    ) -> Result<Self> {
        store.requeue_stale()?;

        Ok(Self {
            store,
            transport,
            config,
            stream_id: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
        })
    }

    pub fn store(&self) -> &BufferStore {
        &self.store
    }

    pub fn stream_id(&self) -> Option<String> {
        self.stream_id.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.stream_id.read().is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Register with bounded attempts and a fixed backoff between them
    pub async fn register(
        &self,
        device_name: &str,
        sensors: &[SensorSpec],
        attempts: u32,
    ) -> std::result::Result<Registration, TransportError> {
        let attempts = attempts.max(1);
        let mut last_error = TransportError::NotRegistered;

        for attempt in 1..=attempts {
            let result = match timeout(
                self.config.send_timeout(),
                self.transport.register(device_name, sensors),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match result {
                Ok(registration) => {
                    info!("Registered stream {}", registration.stream_id);
                    *self.stream_id.write() = Some(registration.stream_id.clone());
                    return Ok(registration);
                }
                Err(e) => {
                    warn!("Registration attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                    if attempt < attempts {
                        sleep(self.config.registration_backoff()).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Store samples durably, then flush if the batch is full or stale
    pub async fn push(&self, samples: Vec<Sample>) -> Result<Option<DeliveryOutcome>> {
        let ids = self.store.enqueue(&samples)?;

        let should_flush = {
            let mut pending = self.pending.lock();
            pending.extend(
                ids.into_iter()
                    .zip(samples)
                    .map(|(id, sample)| BufferedSample { id, sample }),
            );
            pending.len() >= self.config.batch_size
                || self.last_flush.lock().elapsed() >= self.config.flush_interval()
        };

        if should_flush {
            self.flush().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Send the partial batch now
    pub async fn flush(&self) -> Result<DeliveryOutcome> {
        let batch: Vec<BufferedSample> = std::mem::take(&mut *self.pending.lock());
        *self.last_flush.lock() = Instant::now();

        if batch.is_empty() {
            return Ok(DeliveryOutcome::Delivered { count: 0 });
        }

        let (ids, samples): (Vec<i64>, Vec<Sample>) =
            batch.into_iter().map(|b| (b.id, b.sample)).unzip();

        match self.send_with_retry(&samples).await {
            Ok(ack) => {
                self.store.mark_acked(&ids)?;
                debug!("Delivered {} samples (ack {})", samples.len(), ack.ack_id);
                Ok(DeliveryOutcome::Delivered {
                    count: samples.len(),
                })
            }
            Err(e) => {
                self.store.mark_unacked(&ids)?;
                info!("Buffered {} samples locally: {}", samples.len(), e);
                Ok(DeliveryOutcome::Buffered {
                    count: samples.len(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// Send one batch with exponential backoff on retryable failures
    pub async fn send_with_retry(
        &self,
        samples: &[Sample],
    ) -> std::result::Result<BatchAck, TransportError> {
        let stream_id = self.stream_id().ok_or(TransportError::NotRegistered)?;
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut backoff = self.config.retry_backoff();

        let mut attempt = 1;
        loop {
            let result = match timeout(
                self.config.send_timeout(),
                self.transport.send_batch(&stream_id, samples),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            match result {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Send failed: {}, retrying ({}/{}) in {:?}",
                        e, attempt, max_attempts, backoff
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replay the oldest unacknowledged rows and purge old acknowledged ones
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        if self.is_registered() {
            let rows = self.store.unacked(self.config.sweep_batch_size)?;
            if !rows.is_empty() {
                let (ids, samples): (Vec<i64>, Vec<Sample>) =
                    rows.into_iter().map(|r| (r.id, r.sample)).unzip();

                info!("Retrying {} buffered samples", samples.len());
                match self.send_with_retry(&samples).await {
                    Ok(_) => {
                        self.store.mark_acked(&ids)?;
                        report.replayed = ids.len();
                    }
                    Err(e) => warn!("Buffered replay failed: {}", e),
                }
            }
        }

        report.purged = self
            .store
            .purge_acked(chrono::Duration::days(self.config.retention_days as i64))?;
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Transport whose first `failures` sends fail, or all of them while `down`
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub failures: AtomicUsize,
        pub down: AtomicBool,
        pub reject: AtomicBool,
        pub registration_failures: AtomicUsize,
        pub send_calls: AtomicUsize,
        pub register_calls: AtomicUsize,
        pub delivered: parking_lot::Mutex<Vec<Sample>>,
    }

    impl ScriptedTransport {
        pub fn failing(times: usize) -> Self {
            let t = Self::default();
            t.failures.store(times, Ordering::SeqCst);
            t
        }

        pub fn sends(&self) -> usize {
            self.send_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IngestTransport for ScriptedTransport {
        async fn register(
            &self,
            _device_name: &str,
            _sensors: &[SensorSpec],
        ) -> std::result::Result<Registration, TransportError> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            let left = self.registration_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.registration_failures.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Network("connection refused".into()));
            }
            Ok(Registration::new("stream-1".into(), "ds-1".into()))
        }

        async fn send_batch(
            &self,
            _stream_id: &str,
            samples: &[Sample],
        ) -> std::result::Result<BatchAck, TransportError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);

            if self.reject.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected {
                    status: 404,
                    message: "Stream not found".into(),
                });
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(TransportError::Network("unreachable".into()));
            }
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::Timeout);
            }

            self.delivered.lock().extend_from_slice(samples);
            Ok(BatchAck {
                ack_id: uuid::Uuid::new_v4().to_string(),
                buffer_status: "ok".into(),
                samples_received: samples.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use chrono::Utc;

    use super::testing::ScriptedTransport;
    use super::*;

    fn config() -> BufferConfig {
        BufferConfig {
            batch_size: 4,
            flush_interval_ms: 60_000,
            ..BufferConfig::default()
        }
    }

    fn samples(n: usize) -> Vec<Sample> {
        let t0 = Utc::now();
        (0..n)
            .map(|i| Sample::new(t0 + chrono::Duration::milliseconds(i as i64 * 100), "rpm", i as f64))
            .collect()
    }

    async fn registered_buffer(transport: Arc<ScriptedTransport>) -> ResilienceBuffer {
        let buffer = ResilienceBuffer::new(BufferStore::open_in_memory().unwrap(), transport, config()).unwrap();
        buffer.register("press-01", &[], 3).await.unwrap();
        buffer
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(ScriptedTransport::failing(3));
        let buffer = registered_buffer(transport.clone()).await;

        let started = Instant::now();
        let outcome = buffer.push(samples(4)).await.unwrap();

        assert_eq!(outcome, Some(DeliveryOutcome::Delivered { count: 4 }));
        assert_eq!(transport.sends(), 4);
        // 2s + 4s + 8s of backoff
        assert!(started.elapsed() >= Duration::from_secs(14));

        assert_eq!(buffer.store().count(RowStatus::Unacked).unwrap(), 0);
        assert_eq!(buffer.store().count(RowStatus::Queued).unwrap(), 0);
        assert_eq!(buffer.store().count(RowStatus::Acked).unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_is_swept_later() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.down.store(true, Ordering::SeqCst);
        let buffer = registered_buffer(transport.clone()).await;

        let outcome = buffer.push(samples(4)).await.unwrap();
        assert!(matches!(outcome, Some(DeliveryOutcome::Buffered { count: 4, .. })));
        assert_eq!(transport.sends(), 5);
        assert_eq!(buffer.store().count(RowStatus::Unacked).unwrap(), 4);

        // still down: nothing replayed, nothing lost
        let report = buffer.sweep().await.unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(buffer.store().count(RowStatus::Unacked).unwrap(), 4);

        transport.down.store(false, Ordering::SeqCst);
        let report = buffer.sweep().await.unwrap();
        assert_eq!(report.replayed, 4);
        assert_eq!(buffer.store().count(RowStatus::Unacked).unwrap(), 0);

        let delivered: Vec<f64> = transport.delivered.lock().iter().map(|s| s.value).collect();
        assert_eq!(delivered, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.reject.store(true, Ordering::SeqCst);
        let buffer = registered_buffer(transport.clone()).await;

        let outcome = buffer.push(samples(4)).await.unwrap();
        assert!(matches!(outcome, Some(DeliveryOutcome::Buffered { .. })));
        assert_eq!(transport.sends(), 1);
        assert_eq!(buffer.store().count(RowStatus::Unacked).unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_keeps_rows() {
        let transport = Arc::new(ScriptedTransport::default());
        let buffer =
            ResilienceBuffer::new(BufferStore::open_in_memory().unwrap(), transport.clone(), config()).unwrap();

        let outcome = buffer.push(samples(4)).await.unwrap().unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Buffered {
                count: 4,
                error: TransportError::NotRegistered.to_string()
            }
        );
        assert_eq!(transport.sends(), 0);

        // the sweep does not replay until a stream id exists
        assert_eq!(buffer.sweep().await.unwrap().replayed, 0);
        buffer.register("press-01", &[], 1).await.unwrap();
        assert_eq!(buffer.sweep().await.unwrap().replayed, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_by_size_or_interval() {
        let transport = Arc::new(ScriptedTransport::default());
        let buffer = registered_buffer(transport.clone()).await;

        assert_eq!(buffer.push(samples(3)).await.unwrap(), None);
        assert_eq!(buffer.pending_len(), 3);
        // durable before any send
        assert_eq!(buffer.store().count(RowStatus::Queued).unwrap(), 3);

        assert_eq!(
            buffer.push(samples(1)).await.unwrap(),
            Some(DeliveryOutcome::Delivered { count: 4 })
        );

        buffer.push(samples(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            buffer.push(samples(1)).await.unwrap(),
            Some(DeliveryOutcome::Delivered { count: 2 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_retries_with_fixed_backoff() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.registration_failures.store(2, Ordering::SeqCst);
        let buffer =
            ResilienceBuffer::new(BufferStore::open_in_memory().unwrap(), transport.clone(), config()).unwrap();

        let started = Instant::now();
        let registration = buffer.register("press-01", &[], 3).await.unwrap();
        assert_eq!(registration.stream_id, "stream-1");
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(buffer.is_registered());

        transport.registration_failures.store(5, Ordering::SeqCst);
        let other =
            ResilienceBuffer::new(BufferStore::open_in_memory().unwrap(), transport.clone(), config()).unwrap();
        assert!(other.register("press-01", &[], 3).await.is_err());
        assert!(!other.is_registered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_recovers_queued_rows() {
        let store = BufferStore::open_in_memory().unwrap();
        store.enqueue(&samples(2)).unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        let buffer = ResilienceBuffer::new(store, transport.clone(), config()).unwrap();
        assert_eq!(buffer.store().count(RowStatus::Unacked).unwrap(), 2);

        buffer.register("press-01", &[], 1).await.unwrap();
        assert_eq!(buffer.sweep().await.unwrap().replayed, 2);
    }
}
