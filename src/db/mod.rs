// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! SQLite persistence for datasets, cycles, samples and deviations

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analysis::Deviation;
use crate::config::DatabaseConfig;
use crate::error::{Result, VertacError};
use crate::model::{AbortReason, Cycle, CycleSamples, Dataset, SeriesPoint};
use crate::storage::{CycleStore, SamplePoint, SampleStore};

const CYCLE_COLUMNS: &str = "cycle_id, stream_id, dataset_id, cycle_number, start_time, stop_time, \
     end_time, sample_count, is_reference, health_score, anomaly_flag, anomaly_score, \
     abort_reason, metadata";

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn cycle_from_row(row: &Row<'_>) -> rusqlite::Result<Cycle> {
    let start: String = row.get(4)?;
    let abort_reason: Option<String> = row.get(12)?;
    let metadata: String = row.get(13)?;

    Ok(Cycle {
        cycle_id: row.get(0)?,
        stream_id: row.get(1)?,
        dataset_id: row.get(2)?,
        cycle_number: row.get(3)?,
        start_time: parse_ts(4, &start)?,
        stop_time: parse_opt_ts(5, row.get(5)?)?,
        end_time: parse_opt_ts(6, row.get(6)?)?,
        sample_count: row.get::<_, i64>(7)? as u64,
        is_reference: row.get(8)?,
        health_score: row.get(9)?,
        anomaly_flag: row.get(10)?,
        anomaly_score: row.get(11)?,
        abort_reason: abort_reason.as_deref().and_then(AbortReason::parse),
        metadata: parse_json(13, &metadata)?,
    })
}

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Self::open_path(&config.path)
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;

        info!("Database opened at {:?}", path);
        Ok(db)
    }

    /// Private in-memory database, used by tests and the demo
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                dataset_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                device_name TEXT NOT NULL,
                sensors TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cycles (
                cycle_id TEXT PRIMARY KEY,
                stream_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                cycle_number INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                stop_time TEXT,
                end_time TEXT,
                sample_count INTEGER NOT NULL DEFAULT 0,
                is_reference INTEGER NOT NULL DEFAULT 0,
                health_score REAL,
                anomaly_flag INTEGER NOT NULL DEFAULT 0,
                anomaly_score REAL,
                abort_reason TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_cycles_dataset ON cycles(dataset_id, cycle_number);

            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id TEXT NOT NULL,
                stream_id TEXT NOT NULL,
                cycle_id TEXT,
                sensor_id TEXT NOT NULL,
                sensor_name TEXT NOT NULL,
                value REAL NOT NULL,
                quality REAL NOT NULL,
                latency_ms INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_samples_cycle ON samples(cycle_id, sensor_id, timestamp);

            CREATE TABLE IF NOT EXISTS deviations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id TEXT NOT NULL,
                baseline_cycle_id TEXT NOT NULL,
                sensor_id TEXT NOT NULL,
                deviation_type TEXT NOT NULL,
                severity REAL NOT NULL,
                compared_to TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deviations_cycle ON deviations(cycle_id);
        "#,
        )?;

        Ok(())
    }

    /// Delete samples older than the retention window
    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        let conn = self.conn.lock();
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);

        let deleted = conn.execute(
            "DELETE FROM samples WHERE timestamp < ?1",
            params![format_ts(&cutoff)],
        )?;

        info!("Cleaned up {} samples older than {} days", deleted, retention_days);
        Ok(deleted)
    }

    fn query_cycle(&self, sql: &str, param: &str) -> Result<Option<Cycle>> {
        let conn = self.conn.lock();
        let cycle = conn
            .query_row(sql, params![param], cycle_from_row)
            .optional()?;
        Ok(cycle)
    }
}

impl SampleStore for Database {
    fn write_points(&self, points: &[SamplePoint]) -> Result<usize> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO samples
                   (dataset_id, stream_id, cycle_id, sensor_id, sensor_name, value, quality, latency_ms, timestamp)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            )?;
            for p in points {
                stmt.execute(params![
                    p.dataset_id,
                    p.stream_id,
                    p.cycle_id,
                    p.sensor_id,
                    p.sensor_name,
                    p.value,
                    p.quality,
                    p.latency_ms,
                    format_ts(&p.timestamp),
                ])?;
            }
        }

        tx.commit()?;
        debug!("Wrote {} sample points", points.len());
        Ok(points.len())
    }

    fn query_cycle_samples(
        &self,
        cycle_id: &str,
        sensor_ids: Option<&[String]>,
    ) -> Result<CycleSamples> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sensor_id, timestamp, value, quality FROM samples \
             WHERE cycle_id = ?1 ORDER BY sensor_id, timestamp, id",
        )?;

        let rows = stmt.query_map(params![cycle_id], |row| {
            let ts: String = row.get(1)?;
            Ok((
                row.get::<_, String>(0)?,
                SeriesPoint {
                    timestamp: parse_ts(1, &ts)?,
                    value: row.get(2)?,
                    quality: row.get(3)?,
                },
            ))
        })?;

        let mut samples = CycleSamples::new();
        for row in rows {
            let (sensor_id, point) = row?;
            if let Some(filter) = sensor_ids {
                if !filter.iter().any(|s| *s == sensor_id) {
                    continue;
                }
            }
            samples.entry(sensor_id).or_default().push(point);
        }

        Ok(samples)
    }
}

impl CycleStore for Database {
    fn save_dataset(&self, dataset: &Dataset) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO datasets (dataset_id, name, device_name, sensors, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dataset.dataset_id,
                dataset.name,
                dataset.device_name,
                serde_json::to_string(&dataset.sensors)?,
                format_ts(&dataset.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>> {
        let conn = self.conn.lock();
        let dataset = conn
            .query_row(
                "SELECT dataset_id, name, device_name, sensors, created_at FROM datasets WHERE dataset_id = ?1",
                params![dataset_id],
                |row| {
                    let sensors: String = row.get(3)?;
                    let created: String = row.get(4)?;
                    Ok(Dataset {
                        dataset_id: row.get(0)?,
                        name: row.get(1)?,
                        device_name: row.get(2)?,
                        sensors: parse_json(3, &sensors)?,
                        created_at: parse_ts(4, &created)?,
                    })
                },
            )
            .optional()?;
        Ok(dataset)
    }

    fn save_cycle(&self, cycle: &Cycle) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO cycles ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                CYCLE_COLUMNS
            ),
            params![
                cycle.cycle_id,
                cycle.stream_id,
                cycle.dataset_id,
                cycle.cycle_number,
                format_ts(&cycle.start_time),
                cycle.stop_time.as_ref().map(format_ts),
                cycle.end_time.as_ref().map(format_ts),
                cycle.sample_count as i64,
                cycle.is_reference,
                cycle.health_score,
                cycle.anomaly_flag,
                cycle.anomaly_score,
                cycle.abort_reason.map(|r| r.as_str()),
                serde_json::to_string(&cycle.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn get_cycle(&self, cycle_id: &str) -> Result<Option<Cycle>> {
        self.query_cycle(
            &format!("SELECT {} FROM cycles WHERE cycle_id = ?1", CYCLE_COLUMNS),
            cycle_id,
        )
    }

    fn list_cycles(&self, dataset_id: &str) -> Result<Vec<Cycle>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cycles WHERE dataset_id = ?1 ORDER BY cycle_number",
            CYCLE_COLUMNS
        ))?;
        let cycles = stmt
            .query_map(params![dataset_id], cycle_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cycles)
    }

    fn reference_cycle(&self, dataset_id: &str) -> Result<Option<Cycle>> {
        self.query_cycle(
            &format!(
                "SELECT {} FROM cycles WHERE dataset_id = ?1 AND is_reference = 1 LIMIT 1",
                CYCLE_COLUMNS
            ),
            dataset_id,
        )
    }

    fn set_reference_cycle(&self, cycle_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let dataset_id: Option<String> = conn
            .query_row(
                "SELECT dataset_id FROM cycles WHERE cycle_id = ?1",
                params![cycle_id],
                |row| row.get(0),
            )
            .optional()?;
        let dataset_id = dataset_id.ok_or_else(|| VertacError::CycleNotFound(cycle_id.to_string()))?;

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE cycles SET is_reference = 0 WHERE dataset_id = ?1",
            params![dataset_id],
        )?;
        tx.execute(
            "UPDATE cycles SET is_reference = 1 WHERE cycle_id = ?1",
            params![cycle_id],
        )?;
        tx.commit()?;

        info!("Cycle {} is now the reference of dataset {}", cycle_id, dataset_id);
        Ok(())
    }

    fn previous_cycle(&self, cycle: &Cycle) -> Result<Option<Cycle>> {
        if cycle.cycle_number <= 1 {
            return Ok(None);
        }
        let conn = self.conn.lock();
        let previous = conn
            .query_row(
                &format!(
                    "SELECT {} FROM cycles WHERE dataset_id = ?1 AND cycle_number = ?2 LIMIT 1",
                    CYCLE_COLUMNS
                ),
                params![cycle.dataset_id, cycle.cycle_number - 1],
                cycle_from_row,
            )
            .optional()?;
        Ok(previous)
    }

    fn update_health(&self, cycle_id: &str, health_score: f64, anomaly_flag: bool) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE cycles SET health_score = ?1, anomaly_flag = ?2 WHERE cycle_id = ?3",
            params![health_score, anomaly_flag, cycle_id],
        )?;
        if updated == 0 {
            return Err(VertacError::CycleNotFound(cycle_id.to_string()));
        }
        Ok(())
    }

    fn update_anomaly(&self, cycle_id: &str, anomaly_score: f64, anomaly_flag: bool) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE cycles SET anomaly_score = ?1, anomaly_flag = ?2 WHERE cycle_id = ?3",
            params![anomaly_score, anomaly_flag, cycle_id],
        )?;
        if updated == 0 {
            return Err(VertacError::CycleNotFound(cycle_id.to_string()));
        }
        Ok(())
    }

    fn store_deviations(
        &self,
        cycle_id: &str,
        baseline_cycle_id: &str,
        deviations: &[Deviation],
    ) -> Result<()> {
        if deviations.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let now = format_ts(&Utc::now());

        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO deviations
                   (cycle_id, baseline_cycle_id, sensor_id, deviation_type, severity, compared_to, description, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            )?;
            for d in deviations {
                stmt.execute(params![
                    cycle_id,
                    baseline_cycle_id,
                    d.sensor_id,
                    d.deviation_type.as_str(),
                    d.severity,
                    d.compared_to.as_str(),
                    d.description,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Stored {} deviations for cycle {}", deviations.len(), cycle_id);
        Ok(())
    }

    fn top_contributing_sensors(&self, cycle_id: &str, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sensor_id, MAX(severity) AS worst FROM deviations WHERE cycle_id = ?1 \
             GROUP BY sensor_id ORDER BY worst DESC, sensor_id LIMIT ?2",
        )?;
        let sensors = stmt
            .query_map(params![cycle_id, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(sensors)
    }
}
