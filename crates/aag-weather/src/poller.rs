//! Polling loop.
//!
//! Drives the [`FrameReader`] on a blocking thread, decodes each frame and
//! publishes the result through the [`StateWriter`]. Errors never stop the
//! loop: connection problems back off exponentially, everything else is
//! retried on the next interval.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::config::Config;
use crate::decode::Decoder;
use crate::error::AagError;
use crate::reader::{Connector, FrameReader};
use crate::reading::{DeviceInfo, RawFrame, SensorReading};
use crate::state::{PollStatus, StateWriter};
use crate::store::SharedStore;

/// Doubling delay between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// Return the current delay and double it for the next call, capped at
    /// the maximum. The first retry waits one base interval.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Outcome of one cycle, used by callers that want to count results.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    Published(Box<SensorReading>),
    Failed(AagError),
}

pub struct Poller<C: Connector + 'static> {
    reader: Arc<Mutex<FrameReader<C>>>,
    decoder: Decoder,
    writer: StateWriter,
    store: Option<SharedStore>,
    interval: Duration,
    backoff: Backoff,
    /// Wind speeds of the previous `gust_window - 1` readings
    winds: VecDeque<f64>,
    gust_window: usize,
}

impl<C: Connector + 'static> Poller<C> {
    pub fn new(reader: FrameReader<C>, writer: StateWriter, config: &Config) -> Self {
        let interval = Duration::from_secs(config.poll.interval_secs);
        Self {
            reader: Arc::new(Mutex::new(reader)),
            decoder: Decoder::new(config.constants.clone(), config.thresholds.clone()),
            writer,
            store: None,
            interval,
            backoff: Backoff::new(interval, Duration::from_secs(config.poll.max_backoff_secs)),
            winds: VecDeque::with_capacity(config.poll.gust_window),
            gust_window: config.poll.gust_window.max(1),
        }
    }

    /// Also append every published reading to `store`.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the poll interval. The backoff restarts from it.
    pub fn with_interval(mut self, interval: Duration, max_backoff: Duration) -> Self {
        self.interval = interval;
        self.backoff = Backoff::new(interval, max_backoff);
        self
    }

    /// Run one cycle and return how long to wait before the next one.
    pub async fn poll_once(&mut self) -> (CycleResult, Duration) {
        self.writer.set_status(PollStatus::Polling).await;

        let (frame, device) = self.capture().await;
        self.writer.set_device(device).await;

        let (result, delay) = match frame.and_then(|frame| self.decode(&frame)) {
            Ok(reading) => {
                log::debug!(
                    "Sky {:.2} C, ambient {:.2} C, rain {} -> {:?}",
                    reading.sky_temp_c,
                    reading.ambient_temp_c,
                    reading.rain_frequency,
                    reading.conditions
                );
                self.backoff.reset();
                self.writer.publish(reading.clone()).await;
                self.persist(&reading).await;
                (CycleResult::Published(Box::new(reading)), self.interval)
            }
            Err(e) => {
                let delay = if e.needs_backoff() {
                    self.backoff.next_delay()
                } else {
                    self.interval
                };
                log::warn!("Poll failed: {} (next attempt in {:?})", e, delay);
                self.writer.record_error(&e, Utc::now()).await;
                (CycleResult::Failed(e), delay)
            }
        };

        self.writer.set_status(PollStatus::Idle).await;
        (result, delay)
    }

    /// Poll until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        log::info!("Polling every {:?}", self.interval);
        loop {
            let (_, delay) = tokio::select! {
                outcome = self.poll_once() => outcome,
                _ = shutdown.changed() => break,
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        // A cycle cut short by shutdown leaves the status at Polling.
        self.writer.set_status(PollStatus::Idle).await;
        log::info!("Polling stopped");
    }

    async fn capture(&self) -> (Result<RawFrame, AagError>, Option<DeviceInfo>) {
        let reader = self.reader.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut reader = reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let frame = reader.capture();
            (frame, reader.device_info().cloned())
        });
        match task.await {
            Ok(captured) => captured,
            Err(e) => (
                Err(AagError::Connection(format!("capture task failed: {}", e))),
                None,
            ),
        }
    }

    /// The decoder folds the current speed into the gust, so only the
    /// previous `gust_window - 1` speeds are passed in.
    fn decode(&mut self, frame: &RawFrame) -> Result<SensorReading, AagError> {
        let gust = self.winds.iter().copied().reduce(f64::max);
        let reading = self.decoder.decode_with_gust(frame, gust)?;
        if let Some(wind) = reading.wind_speed_kph {
            self.winds.push_back(wind);
            while self.winds.len() >= self.gust_window {
                self.winds.pop_front();
            }
        }
        Ok(reading)
    }

    async fn persist(&self, reading: &SensorReading) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.lock().await.insert(reading) {
            log::error!("Failed to store reading: {}", e);
        }
    }
}
