//! Reader and JSON server for the Lunatico AAG CloudWatcher.
//!
//! The crate is layered the way data flows through it:
//! - [`reader`] talks to the serial port and returns raw capture cycles
//! - [`decode`] turns those bytes into a typed [`SensorReading`]
//! - [`poller`] runs the reader on an interval and updates the [`state`]
//! - [`service`] gives read-only snapshots of that state to [`http`]
//!
//! Readings can optionally be kept in a SQLite [`store`].

pub mod conditions;
pub mod config;
pub mod decode;
pub mod error;
pub mod http;
pub mod poller;
pub mod protocol;
pub mod reader;
pub mod reading;
pub mod service;
pub mod state;
pub mod store;

pub use conditions::{Conditions, RainCondition, SkyCondition, WindCondition};
pub use config::{Config, ConfigError};
pub use decode::Decoder;
pub use error::{AagError, Result};
pub use poller::{Backoff, CycleResult, Poller};
pub use reader::{CaptureOptions, Connector, FrameReader, SerialConnector};
pub use reading::{DeviceInfo, RawFrame, SensorReading};
pub use service::{QueryService, Snapshot};
pub use state::{DeviceState, PollStatus, StateWriter};
pub use store::{SharedStore, StoreError, WeatherStore};
