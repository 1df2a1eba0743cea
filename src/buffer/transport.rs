// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Ingest transport - the network path from the edge to the backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Sample, SensorSpec};

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("send timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The backend answered but refused the request
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// No stream id yet, registration has not succeeded
    #[error("stream is not registered")]
    NotRegistered,
}

impl TransportError {
    /// Only timeouts and network failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Network(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub device_name: String,
    pub sensor_count: usize,
    pub sensors: Vec<SensorSpec>,
}

/// Backend answer to a registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub stream_id: String,
    pub dataset_id: String,
    #[serde(default = "registered")]
    pub status: String,
}

fn registered() -> String {
    "registered".to_string()
}

impl Registration {
    pub fn new(stream_id: String, dataset_id: String) -> Self {
        Self {
            stream_id,
            dataset_id,
            status: registered(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub stream_id: String,
    pub samples: Vec<Sample>,
}

/// Backend acknowledgement of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAck {
    pub ack_id: String,
    #[serde(default)]
    pub buffer_status: String,
    pub samples_received: usize,
}

/// Registers a stream and delivers sample batches
#[async_trait]
pub trait IngestTransport: Send + Sync {
    async fn register(
        &self,
        device_name: &str,
        sensors: &[SensorSpec],
    ) -> Result<Registration, TransportError>;

    async fn send_batch(
        &self,
        stream_id: &str,
        samples: &[Sample],
    ) -> Result<BatchAck, TransportError>;
}

/// JSON over HTTP to the backend's live ingest routes
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response.text().await.unwrap_or_default();
            debug!("POST {} rejected with {}", url, status);
            Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl IngestTransport for HttpTransport {
    async fn register(
        &self,
        device_name: &str,
        sensors: &[SensorSpec],
    ) -> Result<Registration, TransportError> {
        let request = RegisterRequest {
            device_name: device_name.to_string(),
            sensor_count: sensors.len(),
            sensors: sensors.to_vec(),
        };
        self.post("/api/live/register", &request).await
    }

    async fn send_batch(
        &self,
        stream_id: &str,
        samples: &[Sample],
    ) -> Result<BatchAck, TransportError> {
        let request = BatchRequest {
            stream_id: stream_id.to_string(),
            samples: samples.to_vec(),
        };
        self.post("/api/live/batch", &request).await
    }
}
