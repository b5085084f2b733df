//! Scripted CloudWatcher for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aag_weather::protocol::{encode_block, HANDSHAKE};
use aag_weather::{AagError, CaptureOptions, Config, Connector, DeviceState, FrameReader, Poller};
use aag_weather::{QueryService, Result};

pub type Answers = Arc<Mutex<Vec<(&'static str, Vec<u8>)>>>;

pub fn answer(blocks: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (code, value) in blocks {
        bytes.extend_from_slice(&encode_block(code, value));
    }
    bytes.extend_from_slice(&HANDSHAKE);
    bytes
}

/// A clear, calm, dry night with the anemometer fitted.
pub fn clear_night() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("z!", answer(&[])),
        ("A!", answer(&[("N", "CloudWatcher")])),
        ("B!", answer(&[("V", "5.89")])),
        ("K!", answer(&[("K", "0042")])),
        ("v!", answer(&[("v", "Y")])),
        ("S!", answer(&[("1", "-1850")])),
        ("T!", answer(&[("2", "1230")])),
        ("C!", answer(&[("6", "200"), ("4", "300"), ("5", "512")])),
        ("E!", answer(&[("R", "2600")])),
        ("D!", answer(&[("E1", "0"), ("E2", "0"), ("E3", "0"), ("E4", "0")])),
        ("Q!", answer(&[("Q", "100")])),
        ("F!", answer(&[("Y", "")])),
        ("V!", answer(&[("w", "12")])),
    ]
}

/// Replace the answer to one command.
pub fn set_answer(answers: &Answers, cmd: &'static str, bytes: Vec<u8>) {
    let mut answers = answers.lock().unwrap();
    answers.retain(|(c, _)| *c != cmd);
    answers.push((cmd, bytes));
}

pub struct ScriptedPort {
    pending: VecDeque<u8>,
    answers: Answers,
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let answers = self.answers.lock().unwrap();
        if let Some((_, answer)) = answers.iter().find(|(cmd, _)| cmd.as_bytes() == buf) {
            self.pending.extend(answer.iter().copied());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connector whose answers and availability can change between cycles.
#[derive(Clone)]
pub struct ScriptedConnector {
    pub answers: Answers,
    pub unplugged: Arc<AtomicBool>,
    /// Milliseconds each `open` blocks for, to keep a cycle in flight.
    pub open_delay_ms: Arc<AtomicU64>,
}

impl ScriptedConnector {
    pub fn new(answers: Vec<(&'static str, Vec<u8>)>) -> Self {
        Self {
            answers: Arc::new(Mutex::new(answers)),
            unplugged: Arc::default(),
            open_delay_ms: Arc::default(),
        }
    }

    pub fn unplug(&self, unplugged: bool) {
        self.unplugged.store(unplugged, Ordering::SeqCst);
    }
}

impl Connector for ScriptedConnector {
    type Port = ScriptedPort;

    fn open(&self) -> Result<ScriptedPort> {
        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay));
        }
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(AagError::Connection("/dev/ttyUSB0: no such device".into()));
        }
        Ok(ScriptedPort {
            pending: VecDeque::new(),
            answers: self.answers.clone(),
        })
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

/// Poller over a scripted unit plus the query side of its state.
pub fn scripted_poller(
    connector: &ScriptedConnector,
    config: &Config,
) -> (Poller<ScriptedConnector>, QueryService) {
    let (writer, query) = DeviceState::new(
        config.poll.history_size,
        std::time::Duration::from_secs(config.poll.stale_after_secs),
    );
    let reader = FrameReader::new(connector.clone(), CaptureOptions::default());
    (Poller::new(reader, writer, config), query)
}
