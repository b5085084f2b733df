//! Read-only access to the cached device state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reading::{DeviceInfo, SensorReading};
use crate::state::{DeviceState, ErrorRecord, PollStatus};

/// Point-in-time view of the device state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: PollStatus,
    /// `Updated` or `Failed` for the last finished cycle
    pub last_outcome: Option<PollStatus>,
    pub reading: Option<SensorReading>,
    pub last_success: Option<DateTime<Utc>>,
    /// Seconds since the last successful poll
    pub age_secs: Option<f64>,
    /// True when there is no reading or it is older than the stale limit
    pub stale: bool,
    pub last_error: Option<ErrorRecord>,
    pub consecutive_failures: u32,
    pub device: Option<DeviceInfo>,
}

/// Cheap to clone; every clone reads the same state.
#[derive(Debug, Clone)]
pub struct QueryService {
    state: Arc<DeviceState>,
    stale_after: Duration,
}

impl QueryService {
    pub(crate) fn new(state: Arc<DeviceState>, stale_after: Duration) -> Self {
        Self { state, stale_after }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot_at(Utc::now()).await
    }

    /// Snapshot with the age computed against `now`.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Snapshot {
        let inner = self.state.inner.read().await;
        let age = inner
            .last_success
            .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO));
        Snapshot {
            status: inner.status,
            last_outcome: inner.last_outcome,
            reading: inner.latest.clone(),
            last_success: inner.last_success,
            age_secs: age.map(|a| a.as_secs_f64()),
            stale: age.map_or(true, |a| a > self.stale_after),
            last_error: inner.last_error.clone(),
            consecutive_failures: inner.consecutive_failures,
            device: inner.device.clone(),
        }
    }

    pub async fn latest(&self) -> Option<SensorReading> {
        self.state.inner.read().await.latest.clone()
    }

    /// Up to `n` readings, newest first.
    pub async fn recent(&self, n: usize) -> Vec<SensorReading> {
        let inner = self.state.inner.read().await;
        inner.history.iter().rev().take(n).cloned().collect()
    }

    /// Readings captured at or after `since`, oldest first.
    pub async fn since(&self, since: DateTime<Utc>) -> Vec<SensorReading> {
        let inner = self.state.inner.read().await;
        inner
            .history
            .iter()
            .filter(|r| r.captured_at >= since)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Conditions;
    use crate::error::AagError;
    use chrono::TimeZone;

    fn reading_at(t: DateTime<Utc>, sky: f64) -> SensorReading {
        SensorReading {
            captured_at: t,
            sky_temp_c: sky,
            ambient_temp_c: 10.0,
            rain_sensor_temp_c: 12.0,
            rain_frequency: 2600,
            ldr_kohm: 20.0,
            light_sensor_freq: None,
            supply_voltage: 12.0,
            pwm_percent: 10.0,
            wind_speed_kph: Some(4.0),
            humidity_pct: None,
            pressure_hpa: None,
            switch_open: None,
            internal_errors: [0; 4],
            conditions: Conditions::default(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 22, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn empty_state_is_stale() {
        let (_writer, query) = DeviceState::new(10, Duration::from_secs(60));
        let snap = query.snapshot_at(t0()).await;
        assert_eq!(snap.status, PollStatus::Idle);
        assert!(snap.last_outcome.is_none());
        assert!(snap.reading.is_none());
        assert!(snap.stale);
        assert!(snap.age_secs.is_none());
    }

    #[tokio::test]
    async fn publish_then_fail_keeps_reading() {
        let (writer, query) = DeviceState::new(10, Duration::from_secs(60));
        writer.publish(reading_at(t0(), -20.0)).await;

        let fresh = query.snapshot_at(t0() + chrono::Duration::seconds(30)).await;
        assert_eq!(fresh.status, PollStatus::Updated);
        assert_eq!(fresh.last_outcome, Some(PollStatus::Updated));
        assert!(!fresh.stale);
        assert_eq!(fresh.age_secs, Some(30.0));

        writer
            .record_error(&AagError::Timeout("no answer".into()), t0() + chrono::Duration::seconds(90))
            .await;
        let snap = query.snapshot_at(t0() + chrono::Duration::seconds(90)).await;
        assert_eq!(snap.status, PollStatus::Failed);
        assert_eq!(snap.reading.unwrap().sky_temp_c, -20.0);
        assert!(snap.stale);
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.last_error.unwrap().kind, "timeout");
    }

    #[tokio::test]
    async fn success_clears_error() {
        let (writer, query) = DeviceState::new(10, Duration::from_secs(60));
        writer
            .record_error(&AagError::Connection("unplugged".into()), t0())
            .await;
        writer
            .record_error(&AagError::Connection("unplugged".into()), t0())
            .await;
        assert_eq!(query.snapshot_at(t0()).await.consecutive_failures, 2);

        writer.publish(reading_at(t0(), -20.0)).await;
        let snap = query.snapshot_at(t0()).await;
        assert!(snap.last_error.is_none());
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn history_is_bounded_and_ordered() {
        let (writer, query) = DeviceState::new(3, Duration::from_secs(60));
        for i in 0..5 {
            writer
                .publish(reading_at(t0() + chrono::Duration::minutes(i), i as f64))
                .await;
        }
        let recent = query.recent(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].sky_temp_c, 4.0);
        assert_eq!(recent[2].sky_temp_c, 2.0);

        let since = query.since(t0() + chrono::Duration::minutes(3)).await;
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].sky_temp_c, 3.0);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let (writer, query) = DeviceState::new(3, Duration::from_secs(60));
        let other = query.clone();
        writer.publish(reading_at(t0(), -5.0)).await;
        assert_eq!(other.latest().await.unwrap().sky_temp_c, -5.0);
    }
}
