//! Cached device state shared between the poller and the query side.
//!
//! [`DeviceState::new`] hands out exactly one [`StateWriter`], owned by the
//! polling loop, and a cloneable [`QueryService`](crate::service::QueryService)
//! for readers. The lock is only held for in-memory updates, never across
//! device I/O.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AagError;
use crate::reading::{DeviceInfo, SensorReading};
use crate::service::QueryService;

/// Polling state machine: `Idle -> Polling -> Updated | Failed -> Idle`.
///
/// `Updated` and `Failed` only last until the cycle ends. The outcome of the
/// most recent cycle stays visible as `last_outcome` in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Idle,
    Polling,
    Updated,
    Failed,
}

/// Last failure seen by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub status: PollStatus,
    pub last_outcome: Option<PollStatus>,
    pub latest: Option<SensorReading>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorRecord>,
    pub consecutive_failures: u32,
    pub device: Option<DeviceInfo>,
    pub history: VecDeque<SensorReading>,
    pub history_size: usize,
}

/// Process-wide cache of the latest valid reading. Never persisted.
#[derive(Debug)]
pub struct DeviceState {
    pub(crate) inner: RwLock<Inner>,
}

impl DeviceState {
    /// Create an empty state and its single writer plus a query handle.
    pub fn new(history_size: usize, stale_after: Duration) -> (StateWriter, QueryService) {
        let state = Arc::new(DeviceState {
            inner: RwLock::new(Inner {
                status: PollStatus::Idle,
                last_outcome: None,
                latest: None,
                last_success: None,
                last_error: None,
                consecutive_failures: 0,
                device: None,
                history: VecDeque::with_capacity(history_size.min(4096)),
                history_size: history_size.max(1),
            }),
        });
        (
            StateWriter {
                state: state.clone(),
            },
            QueryService::new(state, stale_after),
        )
    }
}

/// Exclusive mutation handle held by the polling loop.
///
/// Not `Clone`: there is one writer per state.
#[derive(Debug)]
pub struct StateWriter {
    state: Arc<DeviceState>,
}

impl StateWriter {
    pub async fn set_status(&self, status: PollStatus) {
        self.state.inner.write().await.status = status;
    }

    pub async fn set_device(&self, device: Option<DeviceInfo>) {
        self.state.inner.write().await.device = device;
    }

    /// Replace the current reading and append it to the history.
    pub async fn publish(&self, reading: SensorReading) {
        let mut inner = self.state.inner.write().await;
        inner.last_success = Some(reading.captured_at);
        inner.last_error = None;
        inner.consecutive_failures = 0;
        inner.status = PollStatus::Updated;
        inner.last_outcome = Some(PollStatus::Updated);
        if inner.history.len() == inner.history_size {
            inner.history.pop_front();
        }
        inner.history.push_back(reading.clone());
        inner.latest = Some(reading);
    }

    /// Record a failed cycle. The previous reading is kept.
    pub async fn record_error(&self, error: &AagError, at: DateTime<Utc>) {
        let mut inner = self.state.inner.write().await;
        inner.last_error = Some(ErrorRecord {
            kind: error.kind().to_string(),
            message: error.to_string(),
            at,
        });
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.status = PollStatus::Failed;
        inner.last_outcome = Some(PollStatus::Failed);
    }
}
