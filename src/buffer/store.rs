// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Durable SQLite queue behind the resilience buffer
//!
//! Every sample gets a row on arrival. Rows move `queued -> acked` on a
//! successful send or `queued -> unacked` on a failed one; the sweep moves
//! `unacked -> acked`.

use std::path::Path;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::db::{format_ts, parse_ts};
use crate::error::Result;
use crate::model::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    /// Stored, delivery not yet attempted
    Queued,
    /// A delivery attempt failed; waiting for the sweep
    Unacked,
    Acked,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Queued => "queued",
            RowStatus::Unacked => "unacked",
            RowStatus::Acked => "acked",
        }
    }
}

/// A sample together with its durable row id
#[derive(Debug, Clone)]
pub struct BufferedSample {
    pub id: i64,
    pub sample: Sample,
}

pub struct BufferStore {
    conn: Mutex<Connection>,
}

impl BufferStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        "#,
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        info!("Edge buffer opened at {:?}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                sensor_id TEXT NOT NULL,
                sensor_name TEXT NOT NULL,
                value REAL NOT NULL,
                unit TEXT NOT NULL,
                quality REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_samples_status ON samples(status, id);
        "#,
        )?;
        Ok(())
    }

    /// Append samples as `queued`, returning their row ids in order
    pub fn enqueue(&self, samples: &[Sample]) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let now = format_ts(&Utc::now());
        let mut ids = Vec::with_capacity(samples.len());

        {
            let mut stmt = tx.prepare_cached(
                r#"INSERT INTO samples
                   (timestamp, sensor_id, sensor_name, value, unit, quality, status, created_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'queued', ?7)"#,
            )?;
            for s in samples {
                stmt.execute(params![
                    format_ts(&s.timestamp),
                    s.sensor_id,
                    s.sensor_name,
                    s.value,
                    s.unit,
                    s.quality,
                    now,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    fn set_status(&self, ids: &[i64], status: RowStatus) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let mut updated = 0;

        // stay well below SQLite's bound parameter limit
        for chunk in ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "UPDATE samples SET status = '{}' WHERE id IN ({})",
                status.as_str(),
                placeholders
            );
            updated += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }

        tx.commit()?;
        Ok(updated)
    }

    pub fn mark_acked(&self, ids: &[i64]) -> Result<usize> {
        self.set_status(ids, RowStatus::Acked)
    }

    pub fn mark_unacked(&self, ids: &[i64]) -> Result<usize> {
        self.set_status(ids, RowStatus::Unacked)
    }

    /// Rows still `queued` from a previous process never got an answer
    pub fn requeue_stale(&self) -> Result<usize> {
        let moved = self.conn.lock().execute(
            "UPDATE samples SET status = 'unacked' WHERE status = 'queued'",
            [],
        )?;
        if moved > 0 {
            info!("Recovered {} undelivered samples from a previous run", moved);
        }
        Ok(moved)
    }

    /// Oldest unacknowledged rows first
    pub fn unacked(&self, limit: usize) -> Result<Vec<BufferedSample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, sensor_id, sensor_name, value, unit, quality FROM samples \
             WHERE status = 'unacked' ORDER BY id ASC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let ts: String = row.get(1)?;
                Ok(BufferedSample {
                    id: row.get(0)?,
                    sample: Sample {
                        timestamp: parse_ts(1, &ts)?,
                        sensor_id: row.get(2)?,
                        sensor_name: row.get(3)?,
                        value: row.get(4)?,
                        unit: row.get(5)?,
                        quality: row.get(6)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Delete acknowledged rows older than `retention`
    pub fn purge_acked(&self, retention: Duration) -> Result<usize> {
        let cutoff = format_ts(&(Utc::now() - retention));
        let purged = self.conn.lock().execute(
            "DELETE FROM samples WHERE status = 'acked' AND created_at < ?1",
            params![cutoff],
        )?;
        if purged > 0 {
            debug!("Purged {} acknowledged samples", purged);
        }
        Ok(purged)
    }

    pub fn count(&self, status: RowStatus) -> Result<usize> {
        let n: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM samples WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Sample> {
        let t0 = Utc::now();
        (0..n)
            .map(|i| Sample::new(t0 + Duration::milliseconds(i as i64), "rpm", i as f64))
            .collect()
    }

    #[test]
    fn test_status_lifecycle() {
        let store = BufferStore::open_in_memory().unwrap();
        let ids = store.enqueue(&samples(4)).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(store.count(RowStatus::Queued).unwrap(), 4);

        store.mark_unacked(&ids[..2]).unwrap();
        store.mark_acked(&ids[2..]).unwrap();
        assert_eq!(store.count(RowStatus::Unacked).unwrap(), 2);
        assert_eq!(store.count(RowStatus::Acked).unwrap(), 2);
        assert_eq!(store.count(RowStatus::Queued).unwrap(), 0);
    }

    #[test]
    fn test_unacked_oldest_first_and_bounded() {
        let store = BufferStore::open_in_memory().unwrap();
        let ids = store.enqueue(&samples(5)).unwrap();
        store.mark_unacked(&ids).unwrap();

        let rows = store.unacked(3).unwrap();
        let got: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(got, ids[..3].to_vec());
        assert_eq!(rows[1].sample.value, 1.0);
    }

    #[test]
    fn test_requeue_stale() {
        let store = BufferStore::open_in_memory().unwrap();
        store.enqueue(&samples(3)).unwrap();
        assert_eq!(store.requeue_stale().unwrap(), 3);
        assert_eq!(store.unacked(10).unwrap().len(), 3);
    }

    #[test]
    fn test_purge_only_old_acked() {
        let store = BufferStore::open_in_memory().unwrap();
        let ids = store.enqueue(&samples(2)).unwrap();
        store.mark_acked(&ids[..1]).unwrap();

        assert_eq!(store.purge_acked(Duration::days(7)).unwrap(), 0);
        assert_eq!(store.purge_acked(Duration::seconds(-1)).unwrap(), 1);
        assert_eq!(store.count(RowStatus::Queued).unwrap(), 1);
    }
}
