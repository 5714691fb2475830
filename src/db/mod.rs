// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Storage - event/alert persistence and snapshot files

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use chrono::Utc;
use tracing::{debug, info};

use crate::alerts::AlertEvent;
use crate::distance::DistanceMeasurement;
use crate::error::Result;
use crate::tracking::TrackSnapshot;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Enable persistent storage
    pub enabled: bool,

    /// Database path
    pub path: PathBuf,

    /// Snapshot image directory
    pub snapshots_dir: PathBuf,

    /// Retention period in days
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data/watchbarn.db"),
            snapshots_dir: PathBuf::from("./data/snapshots"),
            retention_days: 30,
        }
    }
}

/// Storage collaborator contract consumed by the dispatcher and the
/// pipeline. Calls are synchronous; callers that must not block wrap
/// them in `spawn_blocking` and treat failures as log-and-continue.
pub trait AlertStore: Send + Sync {
    fn record_alert(&self, event: &AlertEvent) -> Result<()>;

    fn record_track_event(
        &self,
        camera_id: &str,
        track: &TrackSnapshot,
        distance: Option<&DistanceMeasurement>,
    ) -> Result<()>;

    fn save_snapshot(&self, camera_id: &str, image: &[u8], event: &AlertEvent) -> Result<PathBuf>;
}

/// Default `AlertStore` on SQLite
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    config: DatabaseConfig,
}

impl Database {
    /// Open or create the database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&config.snapshots_dir)?;

        let conn = Connection::open(&config.path)?;

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
            config: config.clone(),
        };

        db.create_tables()?;

        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Track lifecycle events
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                camera_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                track_id INTEGER,
                class_name TEXT,
                distance REAL,
                metadata TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_camera ON events(camera_id);

            -- Fired alerts
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                rule_name TEXT NOT NULL,
                camera_id TEXT NOT NULL,
                track_id INTEGER,
                priority TEXT NOT NULL,
                message TEXT NOT NULL,
                actions TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp);
            CREATE INDEX IF NOT EXISTS idx_alerts_rule ON alerts(rule_name);
        "#,
        )?;

        Ok(())
    }

    /// Most recent alerts, newest first
    pub fn query_recent_alerts(&self, limit: usize) -> Result<Vec<StoredAlert>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, rule_name, camera_id, track_id, priority, message
             FROM alerts ORDER BY timestamp DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredAlert {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                rule_name: row.get(2)?,
                camera_id: row.get(3)?,
                track_id: row.get(4)?,
                priority: row.get(5)?,
                message: row.get(6)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Delete rows older than the retention period
    pub fn cleanup(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days as i64);

        let deleted_events = conn.execute(
            "DELETE FROM events WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        let deleted_alerts = conn.execute(
            "DELETE FROM alerts WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        info!(
            "Cleaned up {} events and {} alerts older than {} days",
            deleted_events, deleted_alerts, self.config.retention_days
        );

        Ok(deleted_events + deleted_alerts)
    }
}

impl AlertStore for Database {
    fn record_alert(&self, event: &AlertEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"INSERT INTO alerts
               (id, timestamp, rule_name, camera_id, track_id, priority, message, actions)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                event.id.to_string(),
                event.timestamp.to_rfc3339(),
                event.rule_name,
                event.camera_id,
                event.track_id.map(|id| id as i64),
                format!("{:?}", event.priority),
                event.message,
                serde_json::to_string(&event.actions)?,
            ],
        )?;

        Ok(())
    }

    fn record_track_event(
        &self,
        camera_id: &str,
        track: &TrackSnapshot,
        distance: Option<&DistanceMeasurement>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let metadata = distance
            .map(|d| serde_json::to_string(&d.references))
            .transpose()?;

        conn.execute(
            r#"INSERT INTO events
               (timestamp, camera_id, event_type, track_id, class_name, distance, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                track.last_seen.to_rfc3339(),
                camera_id,
                "track_confirmed",
                track.id as i64,
                track.class,
                distance.and_then(|d| d.distance_to_camera),
                metadata,
            ],
        )?;

        Ok(())
    }

    fn save_snapshot(&self, camera_id: &str, image: &[u8], event: &AlertEvent) -> Result<PathBuf> {
        let stamp = event.timestamp.format("%Y%m%d_%H%M%S");
        let rule = event.rule_name.replace(' ', "_");
        let track = event
            .track_id
            .map(|id| format!("_track{}", id))
            .unwrap_or_default();
        let filename = format!("{}_{}_{}{}.jpg", camera_id, rule, stamp, track);
        let path = self.config.snapshots_dir.join(filename);

        std::fs::write(&path, image)?;
        debug!("Snapshot saved: {:?}", path);
        Ok(path)
    }
}

/// A persisted alert row
#[derive(Debug, Clone)]
pub struct StoredAlert {
    pub id: String,
    pub timestamp: String,
    pub rule_name: String,
    pub camera_id: String,
    pub track_id: Option<i64>,
    pub priority: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertAction, LogSeverity, Priority};
    use uuid::Uuid;

    fn temp_config() -> DatabaseConfig {
        let dir = std::env::temp_dir().join(format!("watchbarn-test-{}", Uuid::new_v4()));
        DatabaseConfig {
            enabled: true,
            path: dir.join("test.db"),
            snapshots_dir: dir.join("snapshots"),
            retention_days: 30,
        }
    }

    fn event() -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4(),
            rule_name: "Night Intruder".to_string(),
            timestamp: Utc::now(),
            camera_id: "front".to_string(),
            track_id: Some(7),
            priority: Priority::Critical,
            message: "Intruder near front_door".to_string(),
            actions: vec![AlertAction::Log {
                severity: LogSeverity::Warning,
            }],
        }
    }

    #[test]
    fn test_alert_roundtrip() {
        let db = Database::open(&temp_config()).unwrap();
        let ev = event();
        db.record_alert(&ev).unwrap();

        let stored = db.query_recent_alerts(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].rule_name, "Night Intruder");
        assert_eq!(stored[0].track_id, Some(7));
    }

    #[test]
    fn test_snapshot_written_to_disk() {
        let db = Database::open(&temp_config()).unwrap();
        let path = db.save_snapshot("front", &[1, 2, 3, 4], &event()).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }
}
