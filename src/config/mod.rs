// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::model::{SensorKind, SensorSpec};
use crate::streaming::StreamingConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cycle lifecycle policy
    pub cycle: CycleConfig,

    /// Deviation detection thresholds
    pub analysis: AnalysisConfig,

    /// Edge-side resilience buffer
    pub buffer: BufferConfig,

    /// Backend database
    pub database: DatabaseConfig,

    /// Live subscriber fan-out
    pub streaming: StreamingConfig,

    /// Edge device
    pub edge: EdgeConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("vertac"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Cycle state machine policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Late samples after a stop are accepted this long before forcing STOPPED
    pub grace_period_secs: u64,

    /// Maximum silence while ACTIVE before a timeout abort
    pub sample_timeout_secs: u64,

    /// Period of the liveness tick
    pub liveness_interval_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
            sample_timeout_secs: 30,
            liveness_interval_secs: 5,
        }
    }
}

impl CycleConfig {
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_period_secs as i64)
    }

    pub fn sample_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sample_timeout_secs as i64)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }
}

/// Deviation detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Correlation deviations at or below this are not reported
    pub report_threshold: f64,

    /// Distance score above which a sensor is a warning
    pub warning_threshold: f64,

    /// Distance score above which a sensor is critical
    pub critical_threshold: f64,

    /// Savitzky-Golay window (odd)
    pub smoothing_window: usize,

    /// Savitzky-Golay polynomial order
    pub smoothing_order: usize,

    /// Root-cause contributors at or below this are dropped
    pub root_cause_threshold: f64,

    /// Batch health below this flags an anomaly
    pub batch_anomaly_health: f64,

    /// Streaming health (0-100) below this flags an anomaly
    pub streaming_anomaly_health: f64,

    pub max_recommendations: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            report_threshold: 0.2,
            warning_threshold: 0.5,
            critical_threshold: 0.7,
            smoothing_window: 11,
            smoothing_order: 3,
            root_cause_threshold: 0.3,
            batch_anomaly_health: 0.7,
            streaming_anomaly_health: 70.0,
            max_recommendations: 5,
        }
    }
}

/// Edge resilience buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Durable queue location
    pub path: PathBuf,

    pub batch_size: usize,
    pub flush_interval_ms: u64,

    pub retry_max_attempts: u32,

    /// Initial backoff, doubled after every failed attempt
    pub retry_backoff_ms: u64,

    /// Per-send timeout
    pub send_timeout_secs: u64,

    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,

    /// Acknowledged rows older than this are purged
    pub retention_days: u32,

    pub registration_attempts: u32,
    pub registration_backoff_secs: u64,

    /// Upper bound on the final flush during shutdown
    pub drain_timeout_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("edge_buffer.db"),
            batch_size: 10,
            flush_interval_ms: 1000,
            retry_max_attempts: 5,
            retry_backoff_ms: 2000,
            send_timeout_secs: 10,
            sweep_interval_secs: 30,
            sweep_batch_size: 100,
            retention_days: 7,
            registration_attempts: 3,
            registration_backoff_secs: 5,
            drain_timeout_secs: 10,
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn registration_backoff(&self) -> Duration {
        Duration::from_secs(self.registration_backoff_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database path
    pub path: PathBuf,

    /// Retention period in days
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/vertac.db"),
            retention_days: 30,
        }
    }
}

/// Edge device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub device_name: String,

    /// Base URL of the ingest backend
    pub backend_url: String,

    /// Simulator read rate
    pub sample_rate_hz: f64,

    pub sensors: Vec<SensorSpec>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            device_name: "press-01".to_string(),
            backend_url: "http://localhost:8000".to_string(),
            sample_rate_hz: 10.0,
            sensors: vec![
                SensorSpec::new("motor_speed", "Motor Speed", SensorKind::Analog, "RPM")
                    .with_limits(0.0, 3000.0),
                SensorSpec::new("temperature", "Oil Temperature", SensorKind::Temperature, "C")
                    .with_limits(-20.0, 150.0),
                SensorSpec::new("vibration", "Spindle Vibration", SensorKind::Accelerometer, "g")
                    .with_limits(-16.0, 16.0),
                SensorSpec::new("pressure", "Hydraulic Pressure", SensorKind::Pressure, "bar")
                    .with_limits(0.0, 250.0),
            ],
        }
    }
}

impl EdgeConfig {
    pub fn read_interval(&self) -> Duration {
        let hz = if self.sample_rate_hz > 0.0 { self.sample_rate_hz } else { 1.0 };
        Duration::from_secs_f64(1.0 / hz)
    }
}
