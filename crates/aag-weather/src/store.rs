//! SQLite history of published readings.
//!
//! One row per reading in a `weather` table. The headline values get their
//! own columns for ad-hoc SQL; the full reading is kept as JSON in `data`.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::reading::SensorReading;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Store handle shared by the poller and the HTTP handlers.
pub type SharedStore = Arc<Mutex<WeatherStore>>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS weather (
        date                TEXT PRIMARY KEY,
        sky_temp_c          REAL NOT NULL,
        ambient_temp_c      REAL NOT NULL,
        rain_sensor_temp_c  REAL NOT NULL,
        rain_frequency      INTEGER NOT NULL,
        wind_speed_kph      REAL,
        pwm_percent         REAL NOT NULL,
        sky_condition       TEXT NOT NULL,
        wind_condition      TEXT NOT NULL,
        rain_condition      TEXT NOT NULL,
        safe                INTEGER NOT NULL,
        data                TEXT NOT NULL
    );";

/// SQLite-backed reading history.
pub struct WeatherStore {
    conn: Connection,
    /// `None` for in-memory stores
    path: Option<PathBuf>,
}

impl WeatherStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        log::info!("Weather store at {}", path.display());
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the store and wrap it for sharing.
    pub fn open_shared(path: &Path) -> Result<SharedStore> {
        Ok(Arc::new(Mutex::new(Self::open(path)?)))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    /// Database file on disk, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fold the WAL into the main file so a plain copy of it is complete.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))?;
        Ok(())
    }

    /// Insert a reading; a second reading with the same timestamp replaces
    /// the first.
    pub fn insert(&self, reading: &SensorReading) -> Result<()> {
        let c = &reading.conditions;
        self.conn.execute(
            "INSERT OR REPLACE INTO weather (date, sky_temp_c, ambient_temp_c, \
             rain_sensor_temp_c, rain_frequency, wind_speed_kph, pwm_percent, \
             sky_condition, wind_condition, rain_condition, safe, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                timestamp(&reading.captured_at),
                reading.sky_temp_c,
                reading.ambient_temp_c,
                reading.rain_sensor_temp_c,
                reading.rain_frequency,
                reading.wind_speed_kph,
                reading.pwm_percent,
                label(&c.sky)?,
                label(&c.wind)?,
                label(&c.rain)?,
                c.safe,
                serde_json::to_string(reading)?,
            ],
        )?;
        Ok(())
    }

    /// Most recent readings, newest first.
    pub fn latest(&self, limit: usize) -> Result<Vec<SensorReading>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM weather ORDER BY date DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        rows.map(|data| -> Result<SensorReading> { Ok(serde_json::from_str(&data?)?) })
            .collect()
    }

    /// Readings captured at or after `since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Result<Vec<SensorReading>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM weather WHERE date >= ?1 ORDER BY date ASC")?;
        let rows = stmt.query_map(params![timestamp(&since)], |row| row.get::<_, String>(0))?;
        rows.map(|data| -> Result<SensorReading> { Ok(serde_json::from_str(&data?)?) })
            .collect()
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM weather", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// Fixed-width UTC timestamps so that text order equals time order.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn label<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}
